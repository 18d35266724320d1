//! Operations for model-based testing.
//!
//! Operations represent everything the outer loop and the bus can do to one
//! device. They are generated randomly by proptest (or decoded by the fuzzer
//! via `arbitrary`) and applied to both the model and the real device.

use arbitrary::Arbitrary;

/// Operations that can be applied to a device on a bus.
#[derive(Debug, Clone, Arbitrary)]
pub enum Operation {
    /// Queue an application command.
    Enqueue {
        /// Command content (kept small for efficiency).
        command: SmallCommand,
    },

    /// Run one poll cycle with a clean exchange.
    PollCycle,

    /// Run one poll cycle whose reply is lost.
    DropReply,

    /// Run one poll cycle whose reply echoes the wrong sequence.
    CorruptSequence,

    /// Advance simulation time.
    AdvanceTime {
        /// Milliseconds to advance.
        millis: u16,
    },

    /// Outer loop abandons the handshake or session.
    ResetSecurity,
}

/// Small application command for testing.
#[derive(Debug, Clone, Arbitrary)]
pub struct SmallCommand {
    /// OSDP command code.
    pub code: u8,
    /// Payload seed (expanded to content in real tests).
    pub seed: u8,
    /// Payload length hint (0-3 maps to empty/small/medium/large).
    pub size_class: u8,
}

impl SmallCommand {
    /// Expand the payload to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let len = match self.size_class % 4 {
            0 => 0,
            1 => 4,
            2 => 16,
            _ => 64,
        };

        (0..len).map(|i| self.seed.wrapping_add(i)).collect()
    }
}

/// Result of applying an operation.
///
/// Used to compare model and real system behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    /// Operation succeeded.
    Ok,

    /// Operation failed with expected error.
    Error(OperationError),
}

/// Expected errors that can occur during operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationError {
    /// The device discarded the reply for its sequence number.
    OutOfOrder,

    /// The reply never arrived.
    ReplyLost,
}

impl OperationResult {
    /// Check if operation succeeded.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Check if operation failed.
    pub fn is_err(&self) -> bool {
        !self.is_ok()
    }
}
