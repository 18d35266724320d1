//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples device logic from system resources
//! (time, randomness). Production code reads the system clock and the OS
//! entropy pool; tests use a manual clock and a seeded RNG so every
//! handshake is reproducible.
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` must never go backwards
//! - Determinism: Given the same seed, `random_bytes()` produces the same
//!   sequence
//! - Isolation: Implementations must not share global state

use std::time::Instant;

use crate::error::EntropyError;

/// Abstract environment providing time and randomness.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// 1. Time monotonicity: `now()` never goes backwards
/// 2. RNG quality: `random_bytes()` uses cryptographically secure entropy in
///    production. The device random feeds session key derivation, so a
///    predictable source breaks the secure channel.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Returns the current time.
    ///
    /// # Invariants
    ///
    /// - Monotonicity: Subsequent calls must return times >= previous calls.
    fn now(&self) -> Instant;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Security
    ///
    /// Production implementations MUST use the OS entropy pool
    /// (`getrandom`). Simulation implementations use a seeded RNG and MUST
    /// log the seed for reproducibility.
    ///
    /// # Errors
    ///
    /// `EntropyError` if the source cannot deliver. The buffer contents are
    /// unspecified on error and MUST NOT be used.
    fn random_bytes(&self, buffer: &mut [u8]) -> Result<(), EntropyError>;
}
