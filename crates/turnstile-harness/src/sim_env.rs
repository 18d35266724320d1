//! Simulated environment: manual clock and seeded RNG.
//!
//! Clones share one clock and one RNG stream, so a device and its simulated
//! peripheral observe the same time and draw from a single reproducible
//! sequence.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use turnstile_core::{EntropyError, Environment};

struct SimState {
    now: Instant,
    rng: ChaCha20Rng,
}

/// Deterministic [`Environment`] for simulation and tests.
///
/// Time only moves when [`SimEnv::advance`] is called. Randomness comes from
/// ChaCha20 seeded with the value passed to [`SimEnv::with_seed`].
#[derive(Clone)]
pub struct SimEnv {
    seed: u64,
    state: Arc<Mutex<SimState>>,
}

impl SimEnv {
    /// Create an environment with the given RNG seed.
    pub fn with_seed(seed: u64) -> Self {
        tracing::debug!(seed, "simulation environment created");
        let state = SimState { now: Instant::now(), rng: ChaCha20Rng::seed_from_u64(seed) };
        Self { seed, state: Arc::new(Mutex::new(state)) }
    }

    /// Seed this environment was created with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.now += by;
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::with_seed(0)
    }
}

impl std::fmt::Debug for SimEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimEnv").field("seed", &self.seed).finish_non_exhaustive()
    }
}

impl Environment for SimEnv {
    fn now(&self) -> Instant {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).now
    }

    fn random_bytes(&self, buffer: &mut [u8]) -> Result<(), EntropyError> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).rng.fill_bytes(buffer);
        Ok(())
    }
}
