//! Reference model for model-based testing.
//!
//! The model is a deliberately naive rendition of the per-device control
//! logic: no cryptography, no real peer, just counters and a phase. It is
//! the oracle the real [`turnstile_core::Device`] driven over a
//! [`crate::SimBus`] is checked against.
//!
//! # Design Principles
//!
//! - Simplicity: The model should be obviously correct
//! - Behavior not mechanism: Captures WHAT, not HOW
//! - Deterministic: Same inputs produce same outputs

mod device;
pub mod operation;

pub use device::{ModelDevice, ObservableState};
pub use operation::{Operation, OperationError, OperationResult, SmallCommand};
