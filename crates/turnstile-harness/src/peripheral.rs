//! Simulated peripheral.
//!
//! Plays the device side of the bus: echoes polls, answers the secure
//! channel challenge, verifies the server cryptogram and keeps its own copy
//! of the MAC chain. Tests use it as the independent peer that the
//! controller-side [`turnstile_core::Device`] must interoperate with.

use bytes::Bytes;
use turnstile_core::{
    Aes128Provider, ApplicationCommand, Command, CryptoError, Environment, Reply,
    SecureChannelKey, SessionKeys,
    crypto::{BLOCK_LEN, CLIENT_UID_LEN, RANDOM_LEN, complement},
};

/// NAK code: command not understood.
pub const NAK_UNKNOWN_COMMAND: u8 = 0x03;

/// NAK code: security block not supported or not valid in this state.
pub const NAK_UNSUPPORTED_SECURITY: u8 = 0x05;

/// Peripheral behavior knobs.
#[derive(Debug, Clone)]
pub struct PeripheralConfig {
    /// Device unique id returned in the challenge reply
    pub client_uid: [u8; CLIENT_UID_LEN],
    /// Answer challenges at all
    pub supports_secure_channel: bool,
    /// Report every server cryptogram as rejected
    pub reject_cryptogram: bool,
    /// Base key the peripheral holds
    pub key: SecureChannelKey,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        Self {
            client_uid: *b"TSTILE01",
            supports_secure_channel: true,
            reject_cryptogram: false,
            key: SecureChannelKey::install_mode(),
        }
    }
}

struct PeripheralSession {
    keys: SessionKeys,
    device_random: [u8; RANDOM_LEN],
    server_random: [u8; RANDOM_LEN],
    confirmed: bool,
    command_mac: [u8; BLOCK_LEN],
    reply_mac: [u8; BLOCK_LEN],
}

/// Peer-side emulation of one OSDP peripheral.
pub struct SimPeripheral<E: Environment> {
    env: E,
    config: PeripheralConfig,
    session: Option<PeripheralSession>,
    received: Vec<ApplicationCommand>,
}

impl<E: Environment> SimPeripheral<E> {
    /// Create a peripheral drawing its randoms from `env`.
    pub fn new(env: E, config: PeripheralConfig) -> Self {
        Self { env, config, session: None, received: Vec::new() }
    }

    /// Application commands received so far, in order.
    pub fn received(&self) -> &[ApplicationCommand] {
        &self.received
    }

    /// True once the peripheral has accepted a server cryptogram.
    pub fn is_session_confirmed(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.confirmed)
    }

    /// Answer one command.
    ///
    /// Application commands are recorded even if the reply is later lost on
    /// the bus.
    pub fn respond(&mut self, command: &Command<ApplicationCommand>) -> Reply {
        match command {
            Command::Poll { .. } => Reply::Ack,
            Command::SecurityInitializationRequest { device_random, .. } => {
                self.answer_challenge(device_random)
            },
            Command::ServerCryptogramConfirm { server_cryptogram, .. } => {
                self.confirm_server_cryptogram(server_cryptogram)
            },
            Command::Application(command) => {
                self.received.push(command.clone());
                Reply::Ack
            },
        }
    }

    fn answer_challenge(&mut self, device_random: &[u8; RANDOM_LEN]) -> Reply {
        if !self.config.supports_secure_channel {
            return Reply::Nak { error_code: NAK_UNKNOWN_COMMAND };
        }

        let mut server_random = [0u8; RANDOM_LEN];
        if let Err(e) = self.env.random_bytes(&mut server_random) {
            tracing::error!(error = %e, "no server random, refusing challenge");
            return Reply::Nak { error_code: NAK_UNSUPPORTED_SECURITY };
        }

        let keys = SessionKeys::derive(&Aes128Provider, &self.config.key, device_random);
        let cryptogram = keys.client_cryptogram(&Aes128Provider, device_random, &server_random);

        let mut data = Vec::with_capacity(CLIENT_UID_LEN + RANDOM_LEN + cryptogram.len());
        data.extend_from_slice(&self.config.client_uid);
        data.extend_from_slice(&server_random);
        data.extend_from_slice(&cryptogram);

        self.session = Some(PeripheralSession {
            keys,
            device_random: *device_random,
            server_random,
            confirmed: false,
            command_mac: [0; BLOCK_LEN],
            reply_mac: [0; BLOCK_LEN],
        });

        Reply::ClientCryptogram { data: Bytes::from(data) }
    }

    fn confirm_server_cryptogram(&mut self, received: &[u8; BLOCK_LEN]) -> Reply {
        let Some(session) = self.session.as_mut() else {
            return Reply::Nak { error_code: NAK_UNSUPPORTED_SECURITY };
        };

        let expected = session.keys.server_cryptogram(
            &Aes128Provider,
            &session.device_random,
            &session.server_random,
        );
        let accepted = expected == *received && !self.config.reject_cryptogram;
        let rmac = session.keys.initial_rmac(&Aes128Provider, received);

        if accepted {
            session.confirmed = true;
            session.command_mac = [0; BLOCK_LEN];
            session.reply_mac = rmac;
        }

        Reply::InitialRMac { accepted, data: Bytes::copy_from_slice(&rmac) }
    }

    /// MAC a message on the peripheral's chain. Mirrors
    /// [`turnstile_core::Device::generate_mac`].
    ///
    /// # Errors
    ///
    /// `NotEstablished` before a server cryptogram was accepted.
    pub fn mac(&mut self, message: &[u8], is_command: bool) -> Result<[u8; BLOCK_LEN], CryptoError> {
        let session = self.confirmed_session_mut()?;
        if is_command {
            session.command_mac = session.keys.mac(&Aes128Provider, &session.reply_mac, message);
            Ok(session.command_mac)
        } else {
            session.reply_mac = session.keys.mac(&Aes128Provider, &session.command_mac, message);
            Ok(session.reply_mac)
        }
    }

    /// Encrypt reply data for the controller.
    pub fn encrypt_reply(&mut self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let session = self.confirmed_session_mut()?;
        Ok(session.keys.encrypt(&Aes128Provider, &complement(&session.command_mac), data))
    }

    /// Decrypt command data from the controller.
    pub fn decrypt_command(&mut self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let session = self.confirmed_session_mut()?;
        session.keys.decrypt(&Aes128Provider, &complement(&session.reply_mac), data)
    }

    fn confirmed_session_mut(&mut self) -> Result<&mut PeripheralSession, CryptoError> {
        self.session.as_mut().filter(|s| s.confirmed).ok_or(CryptoError::NotEstablished)
    }
}

impl<E: Environment> std::fmt::Debug for SimPeripheral<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimPeripheral")
            .field("client_uid", &self.config.client_uid)
            .field("session_confirmed", &self.is_session_confirmed())
            .field("received", &self.received.len())
            .finish_non_exhaustive()
    }
}
