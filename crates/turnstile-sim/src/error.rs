//! Simulator error types.

use thiserror::Error;

/// Errors that can occur while configuring or running the simulator.
#[derive(Debug, Error)]
pub enum SimError {
    /// Secure channel key is not valid hex
    #[error("invalid key: {0}")]
    KeyHex(#[from] hex::FromHexError),

    /// Secure channel key decoded to the wrong length
    #[error("key must be {expected} bytes, got {actual}")]
    KeyLength {
        /// Required key length
        expected: usize,
        /// Decoded length
        actual: usize,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}
