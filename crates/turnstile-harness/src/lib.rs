//! Deterministic simulation harness for Turnstile testing.
//!
//! Provides a seeded [`Environment`](turnstile_core::Environment), a
//! simulated peripheral that plays the peer side of the secure channel, and
//! a single-device bus with fault injection. Nothing here touches real I/O:
//! the clock moves only when told to, so every run is reproducible from its
//! seed.
//!
//! # Model-Based Testing
//!
//! The `model` module provides a reference implementation for model-based
//! testing. Operations are applied to both the model and a real device on a
//! [`SimBus`], and their observable states are compared.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bus;
pub mod model;
pub mod peripheral;
pub mod sim_env;

pub use bus::{BusStats, CycleOutcome, Fault, SimBus};
pub use model::{
    ModelDevice, ObservableState, Operation, OperationError, OperationResult, SmallCommand,
};
pub use peripheral::{PeripheralConfig, SimPeripheral};
pub use sim_env::SimEnv;
