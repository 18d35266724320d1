//! Inbound replies.
//!
//! The decoder (external) turns a frame into a [`Reply`]; the device only
//! needs to know which replies carry handshake material.

use bytes::Bytes;

/// osdp_ACK
pub const CODE_ACK: u8 = 0x40;
/// osdp_NAK
pub const CODE_NAK: u8 = 0x41;
/// osdp_CCRYPT
pub const CODE_CLIENT_CRYPTOGRAM: u8 = 0x76;
/// osdp_RMAC_I
pub const CODE_INITIAL_RMAC: u8 = 0x78;

/// Decoded reply from a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// General acknowledge
    Ack,

    /// Negative acknowledge
    Nak {
        /// Reason code reported by the device
        error_code: u8,
    },

    /// Answer to the challenge: client UID, server random, client cryptogram
    ClientCryptogram {
        /// Raw 32-byte reply body
        data: Bytes,
    },

    /// Answer to the server cryptogram
    InitialRMac {
        /// Whether the peer accepted the server cryptogram
        accepted: bool,
        /// Initial R-MAC
        data: Bytes,
    },

    /// Any other reply; only sequence and liveness matter
    Other {
        /// Reply code
        code: u8,
        /// Reply body
        data: Bytes,
    },
}

impl Reply {
    /// OSDP reply code.
    pub fn code(&self) -> u8 {
        match self {
            Self::Ack => CODE_ACK,
            Self::Nak { .. } => CODE_NAK,
            Self::ClientCryptogram { .. } => CODE_CLIENT_CRYPTOGRAM,
            Self::InitialRMac { .. } => CODE_INITIAL_RMAC,
            Self::Other { code, .. } => *code,
        }
    }
}
