//! Per-device command queue.
//!
//! Each device owns its queue; nothing is shared between devices. The queue
//! is unbounded and paced by the caller: one command leaves per poll cycle
//! at most, and only when no protocol command takes priority.

use std::collections::VecDeque;

/// FIFO of pending application commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandQueue<C> {
    pending: VecDeque<C>,
}

impl<C> CommandQueue<C> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self { pending: VecDeque::new() }
    }

    /// Append a command.
    pub fn enqueue(&mut self, command: C) {
        self.pending.push_back(command);
    }

    /// Pop the oldest command, if any. Never blocks.
    pub fn dequeue_or_none(&mut self) -> Option<C> {
        self.pending.pop_front()
    }

    /// Number of pending commands.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<C> Default for CommandQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}
