//! Turnstile reference polling loop.
//!
//! Runs the controller side of one OSDP device against a simulated
//! peripheral using:
//! - Tokio for the poll interval
//! - System time and cryptographic RNG
//!
//! ## Architecture
//!
//! ```text
//! turnstile-sim
//!   ├─ SystemEnv      (production Environment impl)
//!   ├─ runner         (poll loop, fault schedule, state logging)
//!   └─ SimBus         (device + SimPeripheral, from turnstile-harness)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod runner;
mod system_env;

pub use error::SimError;
pub use runner::{RunSummary, SimConfig, offline_timeout, parse_key, run};
pub use system_env::SystemEnv;
