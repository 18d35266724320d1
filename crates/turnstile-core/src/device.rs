//! Device orchestrator.
//!
//! A [`Device`] is the controller's view of one peripheral on the bus. It
//! answers "what command goes out next" and folds each reply back into the
//! sequence counter, the liveness window and the secure channel, keeping the
//! three consistent.
//!
//! # Lifecycle
//!
//! 1. **Bootstrap**: sequence is 0, the device polls until a reply is
//!    accepted
//! 2. **Handshake** (secure channel only): challenge, then server cryptogram,
//!    preempting any queued command
//! 3. **Steady state**: queued commands go out one per cycle, polls fill the
//!    gaps
//!
//! The device never retries internally and never sleeps. Timeouts and retry
//! policy belong to the polling loop, which calls [`Device::reset_security`]
//! when it abandons a handshake.

use std::time::{Duration, Instant};

use crate::{
    command::{ApplicationCommand, Command},
    crypto::{
        Aes128Provider, BLOCK_LEN, CLIENT_UID_LEN, CRYPTOGRAM_LEN, CryptoProvider, RANDOM_LEN,
        SecureChannelKey,
    },
    env::Environment,
    error::{CryptoError, DeviceError},
    liveness::{DEFAULT_OFFLINE_TIMEOUT, LivenessTracker},
    policy::{NextStep, next_step},
    queue::CommandQueue,
    reply::Reply,
    secure_channel::{ChannelPhase, SecureChannel},
    sequence::SequenceControl,
};

/// Length of the challenge reply body: client UID, server random, client
/// cryptogram.
const CHALLENGE_REPLY_LEN: usize = CLIENT_UID_LEN + RANDOM_LEN + CRYPTOGRAM_LEN;

/// Device configuration
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Bus address of the peripheral
    pub address: u8,
    /// Frames carry CRC-16 instead of a checksum
    pub use_crc: bool,
    /// Establish a secure channel before application traffic
    pub use_secure_channel: bool,
    /// Secure channel base key; `None` uses the install-mode key SCBK-D
    pub secure_channel_key: Option<SecureChannelKey>,
    /// How long after the last accepted reply the device counts as online
    pub offline_timeout: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: 0,
            use_crc: true,
            use_secure_channel: true,
            secure_channel_key: None,
            offline_timeout: DEFAULT_OFFLINE_TIMEOUT,
        }
    }
}

/// Per-device command sequencing and secure channel state.
///
/// # Type Parameters
///
/// - `E`: Environment for time/randomness
/// - `P`: Block cipher provider
/// - `C`: Application command type, opaque to the device
pub struct Device<E: Environment, P: CryptoProvider = Aes128Provider, C = ApplicationCommand> {
    address: u8,
    use_secure_channel: bool,
    sequence: SequenceControl,
    channel: SecureChannel<P>,
    commands: CommandQueue<C>,
    liveness: LivenessTracker,
    env: E,
}

impl<E: Environment, C> Device<E, Aes128Provider, C> {
    /// Create a device using the AES-128 provider.
    pub fn new(env: E, config: DeviceConfig) -> Self {
        Self::with_provider(env, Aes128Provider, config)
    }
}

impl<E: Environment, P: CryptoProvider, C> Device<E, P, C> {
    /// Create a device with an explicit block cipher provider.
    pub fn with_provider(env: E, provider: P, config: DeviceConfig) -> Self {
        let base_key = config.secure_channel_key.unwrap_or_else(SecureChannelKey::install_mode);

        Self {
            address: config.address,
            use_secure_channel: config.use_secure_channel,
            sequence: SequenceControl::new(config.use_crc, config.use_secure_channel),
            channel: SecureChannel::new(provider, base_key),
            commands: CommandQueue::new(),
            liveness: LivenessTracker::new(env.now(), config.offline_timeout),
            env,
        }
    }

    /// Bus address.
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Sequence of the last accepted round.
    pub fn sequence(&self) -> u8 {
        self.sequence.current()
    }

    /// Sequence to stamp on the next outgoing frame.
    pub fn outgoing_sequence(&self) -> u8 {
        self.sequence.outgoing()
    }

    /// Message control byte for the next outgoing frame.
    pub fn control_byte(&self) -> u8 {
        self.sequence.control_byte()
    }

    /// Secure channel phase, `None` if the secure channel is disabled.
    pub fn secure_channel_phase(&self) -> Option<ChannelPhase> {
        self.use_secure_channel.then(|| self.channel.phase())
    }

    /// Number of queued application commands.
    pub fn pending_commands(&self) -> usize {
        self.commands.len()
    }

    /// Time of the last accepted reply.
    pub fn last_valid_reply(&self) -> Instant {
        self.liveness.last_valid_reply()
    }

    /// Decide and build the command for the next poll opportunity.
    ///
    /// See [`crate::policy`] for the priority order. A challenge always
    /// carries a freshly drawn random, so re-sending one restarts the
    /// handshake.
    pub fn get_next_command(&mut self) -> Command<C> {
        let address = self.address;
        let step =
            next_step(self.sequence.current(), self.secure_channel_phase(), !self.commands.is_empty());

        match step {
            NextStep::Bootstrap | NextStep::KeepAlive => Command::Poll { address },

            NextStep::BeginHandshake => match self.channel.begin_initialization(&self.env) {
                Ok(device_random) => {
                    tracing::debug!(address, "sending security initialization request");
                    Command::SecurityInitializationRequest {
                        address,
                        device_random,
                        default_key: self.channel.uses_install_mode_key(),
                    }
                },
                Err(e) => {
                    tracing::error!(address, error = %e, "no device random, postponing handshake");
                    Command::Poll { address }
                },
            },

            NextStep::ConfirmCryptogram => match self.channel.server_cryptogram() {
                Ok(server_cryptogram) => {
                    tracing::debug!(address, "sending server cryptogram");
                    Command::ServerCryptogramConfirm { address, server_cryptogram }
                },
                Err(e) => {
                    tracing::error!(address, error = %e, "server cryptogram unavailable");
                    Command::Poll { address }
                },
            },

            NextStep::Dequeue => {
                self.commands.dequeue_or_none().map_or(Command::Poll { address }, Command::Application)
            },
        }
    }

    /// Fold a decoded reply into the device state.
    ///
    /// The sequence is validated first; a rejected reply changes nothing.
    /// Only after acceptance is liveness refreshed and handshake material
    /// forwarded to the secure channel.
    ///
    /// # Errors
    ///
    /// - `Sequence` if the reply is out of order (discarded)
    /// - `Crypto` if handshake material is malformed or rejected. Sequence
    ///   and liveness have already advanced in that case.
    pub fn on_reply(&mut self, reply: &Reply, received_sequence: u8) -> Result<(), DeviceError> {
        if let Err(e) = self.sequence.accept(received_sequence) {
            tracing::warn!(address = self.address, error = %e, "discarding reply");
            return Err(e.into());
        }

        self.liveness.record_valid_reply(self.env.now());

        match reply {
            Reply::ClientCryptogram { data } if self.use_secure_channel => {
                self.initialize_secure_channel(data)
            },
            Reply::InitialRMac { accepted, data } if self.use_secure_channel => {
                self.validate_secure_channel_establishment(*accepted, data)
            },
            Reply::ClientCryptogram { .. } | Reply::InitialRMac { .. } => {
                tracing::warn!(
                    address = self.address,
                    code = reply.code(),
                    "ignoring handshake reply, secure channel disabled"
                );
                Ok(())
            },
            Reply::Nak { error_code } => {
                tracing::debug!(address = self.address, error_code, "device sent NAK");
                Ok(())
            },
            Reply::Ack | Reply::Other { .. } => Ok(()),
        }
    }

    fn initialize_secure_channel(&mut self, data: &[u8]) -> Result<(), DeviceError> {
        if data.len() != CHALLENGE_REPLY_LEN {
            return Err(CryptoError::MalformedHandshakeReply {
                field: "challenge reply",
                expected: CHALLENGE_REPLY_LEN,
                actual: data.len(),
            }
            .into());
        }

        let (client_uid, rest) = data.split_at(CLIENT_UID_LEN);
        let (server_random, client_cryptogram) = rest.split_at(RANDOM_LEN);

        match self.channel.initialize(client_uid, server_random, client_cryptogram) {
            Ok(()) => {
                tracing::debug!(address = self.address, "secure channel initialized");
                Ok(())
            },
            Err(e) => {
                tracing::warn!(address = self.address, error = %e, "challenge reply rejected");
                Err(e.into())
            },
        }
    }

    fn validate_secure_channel_establishment(
        &mut self,
        accepted: bool,
        initial_rmac: &[u8],
    ) -> Result<(), DeviceError> {
        // Only a pending confirmation can be rejected. Anything else is a
        // stray reply and must not tear down the session.
        let phase = self.channel.phase();
        if phase != ChannelPhase::Initialized {
            tracing::warn!(address = self.address, %phase, accepted, "unexpected initial r-mac");
            return Err(CryptoError::InvalidState { phase, operation: "establish" }.into());
        }

        // Peer rejection wins regardless of what the R-MAC bytes say.
        if !accepted {
            tracing::warn!(address = self.address, "device rejected server cryptogram");
            return Err(CryptoError::CryptogramRejected.into());
        }

        match self.channel.establish(initial_rmac) {
            Ok(()) => {
                tracing::info!(address = self.address, "secure channel established");
                Ok(())
            },
            Err(e) => {
                tracing::warn!(address = self.address, error = %e, "initial r-mac rejected");
                Err(e.into())
            },
        }
    }

    /// Queue an application command.
    pub fn send_command(&mut self, command: C) {
        self.commands.enqueue(command);
    }

    /// MAC for an outgoing command (`is_command`) or incoming reply.
    pub fn generate_mac(
        &mut self,
        message: &[u8],
        is_command: bool,
    ) -> Result<[u8; BLOCK_LEN], CryptoError> {
        self.channel.mac(message, is_command)
    }

    /// Encrypt command data for this device.
    pub fn encrypt_data(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.channel.encrypt(data)
    }

    /// Decrypt reply data from this device.
    pub fn decrypt_data(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.channel.decrypt(data)
    }

    /// Drop the secure channel session. The next poll restarts the handshake.
    pub fn reset_security(&mut self) {
        tracing::debug!(address = self.address, "resetting secure channel");
        self.channel.reset();
    }

    /// True when frames carry a security block and the session is confirmed.
    pub fn is_security_established(&self) -> bool {
        self.sequence.has_security_control_block() && self.channel.is_established()
    }

    /// Online check against the environment clock.
    pub fn is_online(&self) -> bool {
        self.is_online_at(self.env.now())
    }

    /// Online check at an explicit time.
    pub fn is_online_at(&self, now: Instant) -> bool {
        self.liveness.is_online(now)
    }
}

impl<E: Environment, P: CryptoProvider, C> std::fmt::Debug for Device<E, P, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("address", &self.address)
            .field("sequence", &self.sequence)
            .field("channel", &self.channel)
            .field("pending_commands", &self.commands.len())
            .field("liveness", &self.liveness)
            .finish_non_exhaustive()
    }
}
