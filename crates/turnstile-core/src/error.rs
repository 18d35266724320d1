//! Error types.
//!
//! Nothing here is fatal to the process. Every failure is scoped to one
//! device and is recovered by re-driving the state machine or by calling
//! `Device::reset_security`.

use thiserror::Error;

use crate::secure_channel::ChannelPhase;

/// Sequence validation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SequenceError {
    /// Reply sequence does not match the expected next value.
    ///
    /// The reply is discarded: sequence, liveness and secure channel state
    /// are left untouched.
    #[error("sequence out of order: expected {expected}, got {received}")]
    OutOfOrder {
        /// Sequence the reply should have echoed.
        expected: u8,
        /// Sequence the reply actually carried.
        received: u8,
    },
}

/// The environment could not produce random bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("entropy source unavailable: {reason}")]
pub struct EntropyError {
    /// Description from the underlying source.
    pub reason: String,
}

impl EntropyError {
    /// Wrap a source-specific failure description.
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

/// Secure channel failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// A handshake reply field is missing or has the wrong length.
    #[error("malformed handshake reply: {field} must be {expected} bytes, got {actual}")]
    MalformedHandshakeReply {
        /// Name of the offending field.
        field: &'static str,
        /// Protocol-fixed length.
        expected: usize,
        /// Length actually received.
        actual: usize,
    },

    /// The peer's client cryptogram does not match our derivation.
    ///
    /// Usually means the peer holds a different base key.
    #[error("client cryptogram mismatch")]
    ClientCryptogramMismatch,

    /// The peer rejected our server cryptogram, or confirmed it with the
    /// wrong initial R-MAC.
    #[error("server cryptogram rejected")]
    CryptogramRejected,

    /// MAC or cipher operation requested before the session is established.
    #[error("secure channel not established")]
    NotEstablished,

    /// Handshake step invoked in the wrong phase.
    #[error("cannot {operation} while secure channel is {phase}")]
    InvalidState {
        /// Phase the channel was in.
        phase: ChannelPhase,
        /// Operation that was attempted.
        operation: &'static str,
    },

    /// No device random could be drawn, so no challenge was sent.
    #[error("cannot start handshake: {0}")]
    Entropy(#[from] EntropyError),

    /// Ciphertext is empty, not block aligned, or lacks valid padding.
    #[error("malformed ciphertext of {len} bytes")]
    MalformedCiphertext {
        /// Length of the rejected input.
        len: usize,
    },
}

/// Errors from device operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// Reply failed sequence validation.
    #[error("sequence error: {0}")]
    Sequence(#[from] SequenceError),

    /// Secure channel operation failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl DeviceError {
    /// Returns true if the handshake must restart from scratch.
    ///
    /// Rejected cryptograms are never retried with the same keys; the caller
    /// resets security and lets the device emit a fresh challenge.
    pub fn requires_reset(&self) -> bool {
        match self {
            Self::Crypto(CryptoError::CryptogramRejected | CryptoError::ClientCryptogramMismatch) => {
                true
            },

            Self::Sequence(_)
            | Self::Crypto(
                CryptoError::MalformedHandshakeReply { .. }
                | CryptoError::NotEstablished
                | CryptoError::InvalidState { .. }
                | CryptoError::Entropy(_)
                | CryptoError::MalformedCiphertext { .. },
            ) => false,
        }
    }
}
