//! Model device - the reference implementation.

use turnstile_core::ChannelPhase;

use super::operation::{Operation, OperationError, OperationResult};

/// Offline threshold in milliseconds.
const OFFLINE_TIMEOUT_MS: u64 = 5_000;

/// Observable state for oracle comparison.
///
/// This is the subset of device state that can be compared against the real
/// implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservableState {
    /// Last accepted sequence.
    pub sequence: u8,
    /// Secure channel phase, `None` when disabled.
    pub phase: Option<ChannelPhase>,
    /// Queued application commands.
    pub pending: usize,
    /// Application commands the peripheral has received.
    pub delivered: usize,
    /// Whether the device counts as online.
    pub online: bool,
}

/// What the model decides to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sent {
    Poll,
    Challenge,
    Confirm,
    Application,
}

/// Model device talking to a cooperative peripheral with the same key.
#[derive(Debug, Clone)]
pub struct ModelDevice {
    secure: bool,
    sequence: u8,
    phase: ChannelPhase,
    pending: usize,
    delivered: usize,
    clock_ms: u64,
    last_valid_ms: u64,
}

impl ModelDevice {
    /// Create a model device.
    pub fn new(secure: bool) -> Self {
        Self {
            secure,
            sequence: 0,
            phase: ChannelPhase::Uninitialized,
            pending: 0,
            delivered: 0,
            clock_ms: 0,
            last_valid_ms: 0,
        }
    }

    /// Apply an operation and return the result.
    ///
    /// This is the main entry point for model-based testing. The result
    /// should match the real implementation's result.
    pub fn apply(&mut self, op: &Operation) -> OperationResult {
        match op {
            Operation::Enqueue { .. } => {
                self.pending += 1;
                OperationResult::Ok
            },
            Operation::PollCycle => {
                let sent = self.send();
                self.accept(sent);
                OperationResult::Ok
            },
            Operation::DropReply => {
                self.send();
                OperationResult::Error(OperationError::ReplyLost)
            },
            Operation::CorruptSequence => {
                self.send();
                OperationResult::Error(OperationError::OutOfOrder)
            },
            Operation::AdvanceTime { millis } => {
                self.clock_ms += u64::from(*millis);
                OperationResult::Ok
            },
            Operation::ResetSecurity => {
                self.phase = ChannelPhase::Uninitialized;
                OperationResult::Ok
            },
        }
    }

    /// Extract observable state for comparison.
    pub fn observable_state(&self) -> ObservableState {
        ObservableState {
            sequence: self.sequence,
            phase: self.secure.then_some(self.phase),
            pending: self.pending,
            delivered: self.delivered,
            online: self.clock_ms - self.last_valid_ms <= OFFLINE_TIMEOUT_MS,
        }
    }

    /// The command goes out and the peripheral acts on it, whatever happens
    /// to the reply.
    fn send(&mut self) -> Sent {
        if self.sequence == 0 {
            return Sent::Poll;
        }

        if self.secure {
            match self.phase {
                ChannelPhase::Uninitialized | ChannelPhase::Initializing => {
                    self.phase = ChannelPhase::Initializing;
                    return Sent::Challenge;
                },
                ChannelPhase::Initialized => return Sent::Confirm,
                ChannelPhase::Established => {},
            }
        }

        if self.pending == 0 {
            return Sent::Poll;
        }

        self.pending -= 1;
        self.delivered += 1;
        Sent::Application
    }

    fn accept(&mut self, sent: Sent) {
        self.sequence = if self.sequence >= 3 { 1 } else { self.sequence + 1 };
        self.last_valid_ms = self.clock_ms;

        match sent {
            Sent::Challenge => self.phase = ChannelPhase::Initialized,
            Sent::Confirm => self.phase = ChannelPhase::Established,
            Sent::Poll | Sent::Application => {},
        }
    }
}
