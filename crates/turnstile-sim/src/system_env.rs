//! Production Environment implementation using system time and RNG.
//!
//! This module provides `SystemEnv`, the production implementation of the
//! `Environment` trait that uses real system time and cryptographic RNG.

use std::time::Instant;

use turnstile_core::{EntropyError, Environment};

/// Production environment using system time and cryptographic RNG.
///
/// This implementation:
/// - Uses `std::time::Instant::now()` for time
/// - Uses `getrandom` for cryptographic randomness
///
/// # Security
///
/// The RNG uses `getrandom` which provides OS-level cryptographic randomness.
/// Device randoms feed session key derivation, so nothing weaker will do.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn random_bytes(&self, buffer: &mut [u8]) -> Result<(), EntropyError> {
        getrandom::fill(buffer).map_err(|e| {
            tracing::error!("getrandom failed: {}", e);
            EntropyError::new(e.to_string())
        })
    }
}
