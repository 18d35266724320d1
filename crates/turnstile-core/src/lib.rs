//! Turnstile protocol core logic
//!
//! Per-device state held by an OSDP-class controller: which command goes out
//! next, how replies advance the shared sequence counter, and how the secure
//! channel handshake is driven to an authenticated, encrypted session.
//!
//! # Architecture
//!
//! Everything in this crate is a deterministic state machine isolated from
//! I/O. Time and randomness come from the caller-supplied [`Environment`],
//! and the block cipher comes from a [`CryptoProvider`]. Wire framing,
//! checksums, transports and the polling scheduler live outside.
//!
//! ```text
//! outer loop ──get_next_command──> Device ──Command──> framing/transport
//!      ^                             │
//!      └──────── on_reply(reply, seq)┘
//!
//! Device
//!   ├─ SequenceControl   (shared sequence counter)
//!   ├─ SecureChannel     (handshake + session keys)
//!   ├─ CommandQueue      (pending application commands)
//!   └─ LivenessTracker   (online/offline window)
//! ```
//!
//! # Components
//!
//! - [`device`]: Orchestrator answering "what goes out next"
//! - [`policy`]: Priority-ordered decision function
//! - [`sequence`]: Sequence counter and message control byte
//! - [`secure_channel`]: Handshake state machine owning all secrets
//! - [`crypto`]: Block cipher seam and session key schedule
//! - [`queue`]: Per-device command queue
//! - [`liveness`]: Online tracking
//! - [`command`], [`reply`]: Boundary types
//! - [`mod@env`]: Environment abstraction (time, RNG)
//! - [`error`]: Error types

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod command;
pub mod crypto;
pub mod device;
pub mod env;
pub mod error;
pub mod liveness;
pub mod policy;
pub mod queue;
pub mod reply;
pub mod secure_channel;
pub mod sequence;

pub use command::{ApplicationCommand, Command};
pub use crypto::{Aes128Provider, CryptoProvider, SecureChannelKey, SessionKeys};
pub use device::{Device, DeviceConfig};
pub use env::Environment;
pub use error::{CryptoError, DeviceError, EntropyError, SequenceError};
pub use liveness::LivenessTracker;
pub use policy::{NextStep, next_step};
pub use queue::CommandQueue;
pub use reply::Reply;
pub use secure_channel::{ChannelPhase, SecureChannel};
pub use sequence::SequenceControl;
