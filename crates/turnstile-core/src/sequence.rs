//! Sequence control.
//!
//! OSDP carries a two-bit sequence number in the message control byte. The
//! controller stamps it on every command and the peer echoes it in the
//! reply. Zero is reserved for bootstrap: a device at zero has never
//! completed a round, and once synchronized the counter cycles 1, 2, 3, 1…
//! without returning to zero.

use crate::error::SequenceError;

/// Sequence numbers are taken modulo this value.
pub const SEQUENCE_MODULUS: u8 = 4;

/// Message control bit: CRC-16 trailer present (checksum otherwise).
const CONTROL_CRC: u8 = 0x04;

/// Message control bit: security control block present.
const CONTROL_SCB: u8 = 0x08;

/// Successor in the sequence space, skipping the reserved zero.
pub fn successor(sequence: u8) -> u8 {
    if sequence >= SEQUENCE_MODULUS - 1 { 1 } else { sequence + 1 }
}

/// Per-device sequence counter and message control flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceControl {
    sequence: u8,
    use_crc: bool,
    has_security_control_block: bool,
}

impl SequenceControl {
    /// Create a counter at the bootstrap value.
    pub fn new(use_crc: bool, use_secure_channel: bool) -> Self {
        Self { sequence: 0, use_crc, has_security_control_block: use_secure_channel }
    }

    /// Sequence of the last accepted round (0 before the first one).
    pub fn current(&self) -> u8 {
        self.sequence
    }

    /// Sequence to stamp on the next outgoing command.
    ///
    /// A reply is accepted only if it echoes this value.
    pub fn outgoing(&self) -> u8 {
        successor(self.sequence)
    }

    /// Validate the sequence echoed by a reply and advance.
    ///
    /// # Errors
    ///
    /// Returns `OutOfOrder` if `received` is not [`Self::outgoing`]. The
    /// counter is left unchanged.
    pub fn accept(&mut self, received: u8) -> Result<(), SequenceError> {
        let expected = self.outgoing();
        if received != expected {
            return Err(SequenceError::OutOfOrder { expected, received });
        }

        self.sequence = received;
        Ok(())
    }

    /// Whether frames carry a CRC-16 trailer.
    pub fn uses_crc(&self) -> bool {
        self.use_crc
    }

    /// Whether frames carry a security control block.
    pub fn has_security_control_block(&self) -> bool {
        self.has_security_control_block
    }

    /// Message control byte for the next outgoing frame.
    pub fn control_byte(&self) -> u8 {
        let mut control = self.outgoing() & (SEQUENCE_MODULUS - 1);
        if self.use_crc {
            control |= CONTROL_CRC;
        }
        if self.has_security_control_block {
            control |= CONTROL_SCB;
        }
        control
    }
}
