//! Fuzz target for the [`Device`] state machine
//!
//! Prevent session establishment or state corruption via hostile replies
//!
//! # Strategy
//!
//! - Event sequences: Arbitrary interleavings of polls, replies, clock
//!   advances, resets and crypto calls
//! - Hostile replies: Handshake replies with wrong lengths, wrong bytes and
//!   wrong sequence numbers
//! - Honest peer: A simulated peripheral answers some polls so the fuzzer can
//!   reach the established phase and probe it
//!
//! # Invariants
//!
//! - `Established` ONLY reachable via an accepted `InitialRMac` reply
//! - A rejected sequence leaves sequence, liveness and phase unchanged
//! - Sequence never returns to 0 once synchronized
//! - A plain device NEVER emits a handshake command
//! - MAC/encrypt/decrypt before establishment MUST fail with `NotEstablished`
//! - NEVER panic on unexpected replies

#![no_main]

use std::time::Duration;

use arbitrary::Arbitrary;
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use turnstile_core::{
    ApplicationCommand, ChannelPhase, CryptoError, Device, DeviceConfig, DeviceError, Reply,
};
use turnstile_harness::{PeripheralConfig, SimEnv, SimPeripheral};

#[derive(Debug, Clone, Arbitrary)]
enum DeviceEvent {
    /// Ask the device for a command and let the honest peer answer it
    HonestExchange,
    /// Ask the device for a command and drop it
    NextCommand,
    /// Feed a hostile reply
    ReceiveReply { reply: FuzzedReply, sequence: u8 },
    Enqueue { code: u8, len: u8 },
    Advance { millis: u16 },
    Reset,
    Mac { len: u8, is_command: bool },
    Encrypt(Vec<u8>),
    Decrypt(Vec<u8>),
}

#[derive(Debug, Clone, Arbitrary)]
enum FuzzedReply {
    Ack,
    Nak(u8),
    ClientCryptogram(Vec<u8>),
    InitialRMac { accepted: bool, data: Vec<u8> },
    Other { code: u8, data: Vec<u8> },
}

impl FuzzedReply {
    fn into_reply(self) -> Reply {
        match self {
            Self::Ack => Reply::Ack,
            Self::Nak(error_code) => Reply::Nak { error_code },
            Self::ClientCryptogram(data) => Reply::ClientCryptogram { data: Bytes::from(data) },
            Self::InitialRMac { accepted, data } => {
                Reply::InitialRMac { accepted, data: Bytes::from(data) }
            },
            Self::Other { code, data } => Reply::Other { code, data: Bytes::from(data) },
        }
    }
}

/// Fuzz input with deterministic seed and device flags.
#[derive(Debug, Clone, Arbitrary)]
struct FuzzInput {
    seed: u64,
    address: u8,
    use_secure_channel: bool,
    events: Vec<DeviceEvent>,
}

fuzz_target!(|input: FuzzInput| {
    let env = SimEnv::with_seed(input.seed);
    let config = DeviceConfig {
        address: input.address,
        use_secure_channel: input.use_secure_channel,
        ..Default::default()
    };
    let mut device: Device<SimEnv> = Device::new(env.clone(), config);
    let mut peer = SimPeripheral::new(env.clone(), PeripheralConfig::default());
    let mut synchronized = false;

    for event in input.events {
        let phase_before = device.secure_channel_phase();
        let sequence_before = device.sequence();
        let last_reply_before = device.last_valid_reply();
        let mut accepted_rmac = false;

        match event {
            DeviceEvent::HonestExchange => {
                let command = device.get_next_command();
                if !input.use_secure_channel {
                    assert!(!command.is_handshake(), "plain device sent {command:?}");
                }
                let sequence = device.outgoing_sequence();
                let reply = peer.respond(&command);
                let is_rmac = matches!(reply, Reply::InitialRMac { accepted: true, .. });
                let result = device.on_reply(&reply, sequence);
                accepted_rmac = is_rmac && result.is_ok();
            },

            DeviceEvent::NextCommand => {
                let command = device.get_next_command();
                if !input.use_secure_channel {
                    assert!(!command.is_handshake(), "plain device sent {command:?}");
                }
            },

            DeviceEvent::ReceiveReply { reply, sequence } => {
                let reply = reply.into_reply();
                let is_rmac = matches!(reply, Reply::InitialRMac { accepted: true, .. });
                match device.on_reply(&reply, sequence) {
                    Err(DeviceError::Sequence(_)) => {
                        assert_eq!(device.sequence(), sequence_before);
                        assert_eq!(device.last_valid_reply(), last_reply_before);
                        assert_eq!(device.secure_channel_phase(), phase_before);
                    },
                    Ok(()) => accepted_rmac = is_rmac,
                    Err(DeviceError::Crypto(_)) => {},
                }
            },

            DeviceEvent::Enqueue { code, len } => {
                let data = vec![code; usize::from(len)];
                device.send_command(ApplicationCommand::new(input.address, code, data));
            },

            DeviceEvent::Advance { millis } => {
                env.advance(Duration::from_millis(u64::from(millis)));
            },

            DeviceEvent::Reset => {
                device.reset_security();
                assert_ne!(device.secure_channel_phase(), Some(ChannelPhase::Established));
            },

            DeviceEvent::Mac { len, is_command } => {
                let message = vec![len; usize::from(len)];
                let result = device.generate_mac(&message, is_command);
                if phase_before != Some(ChannelPhase::Established) {
                    assert_eq!(result, Err(CryptoError::NotEstablished));
                }
            },

            DeviceEvent::Encrypt(data) => {
                let result = device.encrypt_data(&data);
                if phase_before != Some(ChannelPhase::Established) {
                    assert_eq!(result, Err(CryptoError::NotEstablished));
                }
            },

            DeviceEvent::Decrypt(data) => {
                let result = device.decrypt_data(&data);
                if phase_before != Some(ChannelPhase::Established) {
                    assert_eq!(result, Err(CryptoError::NotEstablished));
                }
            },
        }

        let phase_after = device.secure_channel_phase();
        if phase_after == Some(ChannelPhase::Established)
            && phase_before != Some(ChannelPhase::Established)
        {
            assert!(accepted_rmac, "established without an accepted initial R-MAC");
        }

        if synchronized {
            assert_ne!(device.sequence(), 0, "sequence returned to 0");
        }
        synchronized |= device.sequence() != 0;
    }
});
