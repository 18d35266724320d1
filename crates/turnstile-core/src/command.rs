//! Outbound commands.
//!
//! The device decides which command goes out; encoding it into a frame is
//! the framing layer's job.

use bytes::Bytes;

use crate::crypto::{CRYPTOGRAM_LEN, RANDOM_LEN};

/// osdp_POLL
pub const CODE_POLL: u8 = 0x60;
/// osdp_CHLNG
pub const CODE_CHALLENGE: u8 = 0x76;
/// osdp_SCRYPT
pub const CODE_SERVER_CRYPTOGRAM: u8 = 0x77;

/// Command chosen by [`crate::Device::get_next_command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<C = ApplicationCommand> {
    /// Keep-alive / bootstrap poll
    Poll {
        /// Device address
        address: u8,
    },

    /// Secure channel challenge carrying the device random
    SecurityInitializationRequest {
        /// Device address
        address: u8,
        /// Fresh random for this handshake attempt. Always 8 bytes (RND.A);
        /// the protocol fixes the challenge length, so a 16-byte random is
        /// never sent.
        device_random: [u8; RANDOM_LEN],
        /// Whether the install-mode key (SCBK-D) is in use
        default_key: bool,
    },

    /// Server cryptogram for the peer to verify
    ServerCryptogramConfirm {
        /// Device address
        address: u8,
        /// Cryptogram derived during initialization
        server_cryptogram: [u8; CRYPTOGRAM_LEN],
    },

    /// Application command, opaque to the core
    Application(C),
}

impl<C> Command<C> {
    /// Protocol command code, `None` for application commands.
    pub fn protocol_code(&self) -> Option<u8> {
        match self {
            Self::Poll { .. } => Some(CODE_POLL),
            Self::SecurityInitializationRequest { .. } => Some(CODE_CHALLENGE),
            Self::ServerCryptogramConfirm { .. } => Some(CODE_SERVER_CRYPTOGRAM),
            Self::Application(_) => None,
        }
    }

    /// True for the two handshake commands.
    pub fn is_handshake(&self) -> bool {
        matches!(
            self,
            Self::SecurityInitializationRequest { .. } | Self::ServerCryptogramConfirm { .. }
        )
    }
}

/// Default application command: a raw command code plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationCommand {
    /// Device address
    pub address: u8,
    /// OSDP command code
    pub code: u8,
    /// Encoded command data
    pub data: Bytes,
}

impl ApplicationCommand {
    /// Create an application command.
    pub fn new(address: u8, code: u8, data: impl Into<Bytes>) -> Self {
        Self { address, code, data: data.into() }
    }
}
