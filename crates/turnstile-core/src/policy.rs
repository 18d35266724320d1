//! Next-command decision.
//!
//! A pure function from the observable device state to the step the device
//! takes on the next poll opportunity. Priority order:
//!
//! 1. Sequence not yet synchronized: poll to bootstrap
//! 2. Secure channel enabled, no session keys: send a challenge
//! 3. Secure channel enabled, keys awaiting confirmation: send the server
//!    cryptogram
//! 4. Nothing pending: poll to keep the liveness window fed
//! 5. Otherwise: send the oldest queued command
//!
//! Handshake steps always preempt application traffic.

use crate::secure_channel::ChannelPhase;

/// Step chosen for the next poll opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NextStep {
    /// Poll to establish the first round trip
    Bootstrap,
    /// Send a security initialization request with a fresh random
    BeginHandshake,
    /// Send the server cryptogram for peer confirmation
    ConfirmCryptogram,
    /// Poll because nothing else is pending
    KeepAlive,
    /// Send the next queued application command
    Dequeue,
}

/// Decide the next step.
///
/// `secure_channel` is `None` when the device does not use the secure
/// channel at all.
pub fn next_step(sequence: u8, secure_channel: Option<ChannelPhase>, has_pending: bool) -> NextStep {
    if sequence == 0 {
        return NextStep::Bootstrap;
    }

    match secure_channel {
        Some(ChannelPhase::Uninitialized | ChannelPhase::Initializing) => NextStep::BeginHandshake,
        Some(ChannelPhase::Initialized) => NextStep::ConfirmCryptogram,
        Some(ChannelPhase::Established) | None if has_pending => NextStep::Dequeue,
        Some(ChannelPhase::Established) | None => NextStep::KeepAlive,
    }
}
