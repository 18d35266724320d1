//! Secure channel state machine.
//!
//! # State Machine
//!
//! ```text
//! ┌───────────────┐ begin_initialization ┌──────────────┐ initialize ┌─────────────┐ establish ┌─────────────┐
//! │ Uninitialized │─────────────────────>│ Initializing │───────────>│ Initialized │──────────>│ Established │
//! └───────────────┘                      └──────────────┘            └─────────────┘           └─────────────┘
//!         ^                                                                                           │
//!         └──────────────────────────── reset / begin_initialization (any state) ─────────────────────┘
//! ```
//!
//! Each phase carries exactly the secrets valid in it, so "established
//! implies initialized" holds by construction. Failed `initialize` or
//! `establish` calls leave the phase unchanged. Dropping a phase zeroes its
//! buffers.

use std::fmt;

use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::{
    crypto::{
        BLOCK_LEN, CLIENT_UID_LEN, CRYPTOGRAM_LEN, CryptoProvider, RANDOM_LEN, SecureChannelKey,
        SessionKeys, complement,
    },
    env::Environment,
    error::CryptoError,
};

/// Observable handshake phase. Carries no secrets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelPhase {
    /// No handshake in progress
    Uninitialized,
    /// Challenge sent, waiting for the peer's cryptogram
    Initializing,
    /// Session keys derived, server cryptogram awaiting confirmation
    Initialized,
    /// Session confirmed by the peer
    Established,
}

impl fmt::Display for ChannelPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Initialized => "initialized",
            Self::Established => "established",
        };
        f.write_str(name)
    }
}

#[cfg_attr(test, derive(Clone, PartialEq, Eq))]
enum ChannelState {
    Uninitialized,
    Initializing {
        device_random: Zeroizing<[u8; RANDOM_LEN]>,
    },
    Initialized {
        keys: SessionKeys,
        server_cryptogram: Zeroizing<[u8; CRYPTOGRAM_LEN]>,
        expected_rmac: Zeroizing<[u8; BLOCK_LEN]>,
    },
    Established {
        keys: SessionKeys,
        /// Last command MAC, IV for the next reply MAC
        command_mac: Zeroizing<[u8; BLOCK_LEN]>,
        /// Last reply MAC, IV for the next command MAC
        reply_mac: Zeroizing<[u8; BLOCK_LEN]>,
    },
}

/// Secure channel for one device.
///
/// Sole owner of the base key and every session secret. Callers get
/// capabilities (MAC, encrypt, decrypt) rather than keys.
#[cfg_attr(test, derive(Clone, PartialEq, Eq))]
pub struct SecureChannel<P: CryptoProvider> {
    provider: P,
    base_key: SecureChannelKey,
    state: ChannelState,
}

impl<P: CryptoProvider> SecureChannel<P> {
    /// Create an uninitialized channel.
    pub fn new(provider: P, base_key: SecureChannelKey) -> Self {
        Self { provider, base_key, state: ChannelState::Uninitialized }
    }

    /// Current phase.
    pub fn phase(&self) -> ChannelPhase {
        match self.state {
            ChannelState::Uninitialized => ChannelPhase::Uninitialized,
            ChannelState::Initializing { .. } => ChannelPhase::Initializing,
            ChannelState::Initialized { .. } => ChannelPhase::Initialized,
            ChannelState::Established { .. } => ChannelPhase::Established,
        }
    }

    /// True once session keys exist. A pending challenge does not count.
    pub fn is_initialized(&self) -> bool {
        matches!(self.phase(), ChannelPhase::Initialized | ChannelPhase::Established)
    }

    /// True once the peer has confirmed the session.
    pub fn is_established(&self) -> bool {
        self.phase() == ChannelPhase::Established
    }

    /// Whether the base key is the install-mode default.
    pub fn uses_install_mode_key(&self) -> bool {
        self.base_key.is_install_mode()
    }

    /// Start (or restart) the handshake with a fresh device random.
    ///
    /// Any previous session is discarded first. Returns the random to send in
    /// the challenge.
    ///
    /// # Errors
    ///
    /// - `Entropy` if no random could be drawn; the channel is left
    ///   `Uninitialized`
    pub fn begin_initialization<E: Environment>(
        &mut self,
        env: &E,
    ) -> Result<[u8; RANDOM_LEN], CryptoError> {
        self.reset();

        let mut device_random = Zeroizing::new([0u8; RANDOM_LEN]);
        env.random_bytes(device_random.as_mut_slice())?;
        let challenge = *device_random;

        self.state = ChannelState::Initializing { device_random };
        Ok(challenge)
    }

    /// Consume the peer's challenge reply.
    ///
    /// # Errors
    ///
    /// - `InvalidState` unless a challenge is pending
    /// - `MalformedHandshakeReply` if a field has the wrong length
    /// - `ClientCryptogramMismatch` if the peer derived different keys
    ///
    /// The phase is unchanged on every error.
    pub fn initialize(
        &mut self,
        client_uid: &[u8],
        server_random: &[u8],
        client_cryptogram: &[u8],
    ) -> Result<(), CryptoError> {
        let ChannelState::Initializing { device_random } = &self.state else {
            return Err(CryptoError::InvalidState {
                phase: self.phase(),
                operation: "initialize",
            });
        };

        check_len("client uid", client_uid, CLIENT_UID_LEN)?;
        let server_random: [u8; RANDOM_LEN] = fixed("server random", server_random)?;
        let client_cryptogram: [u8; CRYPTOGRAM_LEN] =
            fixed("client cryptogram", client_cryptogram)?;

        let keys = SessionKeys::derive(&self.provider, &self.base_key, device_random);

        let expected = keys.client_cryptogram(&self.provider, device_random, &server_random);
        if !bool::from(expected[..].ct_eq(&client_cryptogram[..])) {
            return Err(CryptoError::ClientCryptogramMismatch);
        }

        let server_cryptogram =
            Zeroizing::new(keys.server_cryptogram(&self.provider, device_random, &server_random));
        let expected_rmac = Zeroizing::new(keys.initial_rmac(&self.provider, &server_cryptogram));

        self.state = ChannelState::Initialized { keys, server_cryptogram, expected_rmac };
        Ok(())
    }

    /// Server cryptogram to send for peer confirmation.
    ///
    /// This value travels on the wire in clear, so handing out a copy does
    /// not leak key material.
    pub fn server_cryptogram(&self) -> Result<[u8; CRYPTOGRAM_LEN], CryptoError> {
        match &self.state {
            ChannelState::Initialized { server_cryptogram, .. } => Ok(**server_cryptogram),
            _ => Err(CryptoError::InvalidState {
                phase: self.phase(),
                operation: "read server cryptogram",
            }),
        }
    }

    /// Verify the peer's initial R-MAC and establish the session.
    ///
    /// # Errors
    ///
    /// - `InvalidState` unless initialized
    /// - `MalformedHandshakeReply` if the R-MAC has the wrong length
    /// - `CryptogramRejected` if it does not match; the channel stays
    ///   initialized and the caller is expected to reset
    pub fn establish(&mut self, initial_rmac: &[u8]) -> Result<(), CryptoError> {
        let ChannelState::Initialized { expected_rmac, .. } = &self.state else {
            return Err(CryptoError::InvalidState { phase: self.phase(), operation: "establish" });
        };

        let received: [u8; BLOCK_LEN] = fixed("initial r-mac", initial_rmac)?;
        if !bool::from(expected_rmac[..].ct_eq(&received[..])) {
            return Err(CryptoError::CryptogramRejected);
        }

        let previous = std::mem::replace(&mut self.state, ChannelState::Uninitialized);
        if let ChannelState::Initialized { keys, expected_rmac, .. } = previous {
            self.state = ChannelState::Established {
                keys,
                command_mac: Zeroizing::new([0u8; BLOCK_LEN]),
                reply_mac: expected_rmac,
            };
        }
        Ok(())
    }

    /// MAC a message and advance the chain.
    ///
    /// Command MACs chain from the last reply MAC and reply MACs from the
    /// last command MAC.
    pub fn mac(&mut self, message: &[u8], is_command: bool) -> Result<[u8; BLOCK_LEN], CryptoError> {
        let ChannelState::Established { keys, command_mac, reply_mac } = &mut self.state else {
            return Err(CryptoError::NotEstablished);
        };

        if is_command {
            let mac = keys.mac(&self.provider, reply_mac, message);
            **command_mac = mac;
            Ok(mac)
        } else {
            let mac = keys.mac(&self.provider, command_mac, message);
            **reply_mac = mac;
            Ok(mac)
        }
    }

    /// Encrypt command data. IV is the complement of the last reply MAC.
    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let ChannelState::Established { keys, reply_mac, .. } = &self.state else {
            return Err(CryptoError::NotEstablished);
        };
        Ok(keys.encrypt(&self.provider, &complement(reply_mac), data))
    }

    /// Decrypt reply data. IV is the complement of the last command MAC.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let ChannelState::Established { keys, command_mac, .. } = &self.state else {
            return Err(CryptoError::NotEstablished);
        };
        keys.decrypt(&self.provider, &complement(command_mac), data)
    }

    /// Discard all session material and return to `Uninitialized`.
    pub fn reset(&mut self) {
        self.state = ChannelState::Uninitialized;
    }
}

impl<P: CryptoProvider> fmt::Debug for SecureChannel<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureChannel")
            .field("phase", &self.phase())
            .field("install_mode", &self.uses_install_mode_key())
            .finish_non_exhaustive()
    }
}

fn check_len(field: &'static str, value: &[u8], expected: usize) -> Result<(), CryptoError> {
    if value.len() == expected {
        Ok(())
    } else {
        Err(CryptoError::MalformedHandshakeReply { field, expected, actual: value.len() })
    }
}

fn fixed<const N: usize>(field: &'static str, value: &[u8]) -> Result<[u8; N], CryptoError> {
    value.try_into().map_err(|_| CryptoError::MalformedHandshakeReply {
        field,
        expected: N,
        actual: value.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{crypto::Aes128Provider, env::testing::TestEnv};

    /// Play the peer's side of the challenge: returns (uid, server random,
    /// client cryptogram) for the given device random.
    fn peer_challenge_reply(
        key: &SecureChannelKey,
        device_random: &[u8; RANDOM_LEN],
    ) -> ([u8; 8], [u8; RANDOM_LEN], [u8; CRYPTOGRAM_LEN]) {
        let server_random = [0x5A; RANDOM_LEN];
        let keys = SessionKeys::derive(&Aes128Provider, key, device_random);
        let cryptogram = keys.client_cryptogram(&Aes128Provider, device_random, &server_random);
        ([0xC0; 8], server_random, cryptogram)
    }

    fn initialized_channel(env: &TestEnv) -> (SecureChannel<Aes128Provider>, [u8; BLOCK_LEN]) {
        let key = SecureChannelKey::install_mode();
        let mut channel = SecureChannel::new(Aes128Provider, key.clone());
        let device_random = channel.begin_initialization(env).unwrap();
        let (uid, server_random, cryptogram) = peer_challenge_reply(&key, &device_random);
        channel.initialize(&uid, &server_random, &cryptogram).unwrap();

        let keys = SessionKeys::derive(&Aes128Provider, &key, &device_random);
        let server_cryptogram = channel.server_cryptogram().unwrap();
        let rmac = keys.initial_rmac(&Aes128Provider, &server_cryptogram);
        (channel, rmac)
    }

    #[test]
    fn handshake_lifecycle() {
        let env = TestEnv::new();
        let (mut channel, rmac) = initialized_channel(&env);
        assert_eq!(channel.phase(), ChannelPhase::Initialized);
        assert!(channel.is_initialized());
        assert!(!channel.is_established());

        channel.establish(&rmac).unwrap();
        assert_eq!(channel.phase(), ChannelPhase::Established);
        assert!(channel.is_initialized());
        assert!(channel.is_established());
    }

    #[test]
    fn pending_challenge_is_not_initialized() {
        let env = TestEnv::new();
        let mut channel = SecureChannel::new(Aes128Provider, SecureChannelKey::install_mode());
        channel.begin_initialization(&env).unwrap();

        assert_eq!(channel.phase(), ChannelPhase::Initializing);
        assert!(!channel.is_initialized());
    }

    #[test]
    fn retry_draws_a_fresh_random() {
        let env = TestEnv::new();
        let mut channel = SecureChannel::new(Aes128Provider, SecureChannelKey::install_mode());
        let first = channel.begin_initialization(&env).unwrap();
        let second = channel.begin_initialization(&env).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn entropy_failure_leaves_channel_uninitialized() {
        let env = TestEnv::new();
        let (mut channel, _) = initialized_channel(&env);

        env.set_entropy_available(false);
        let err = channel.begin_initialization(&env).unwrap_err();
        assert!(matches!(err, CryptoError::Entropy(_)));
        assert_eq!(channel.phase(), ChannelPhase::Uninitialized);

        env.set_entropy_available(true);
        channel.begin_initialization(&env).unwrap();
        assert_eq!(channel.phase(), ChannelPhase::Initializing);
    }

    #[test]
    fn initialize_rejects_wrong_lengths() {
        let env = TestEnv::new();
        let mut channel = SecureChannel::new(Aes128Provider, SecureChannelKey::install_mode());
        channel.begin_initialization(&env).unwrap();

        let err = channel.initialize(&[0; 8], &[0; 7], &[0; 16]).unwrap_err();
        assert_eq!(
            err,
            CryptoError::MalformedHandshakeReply { field: "server random", expected: 8, actual: 7 }
        );

        let err = channel.initialize(&[0; 8], &[0; 8], &[0; 15]).unwrap_err();
        assert!(matches!(err, CryptoError::MalformedHandshakeReply { field: "client cryptogram", .. }));

        let err = channel.initialize(&[0; 2], &[0; 8], &[0; 16]).unwrap_err();
        assert!(matches!(err, CryptoError::MalformedHandshakeReply { field: "client uid", .. }));

        assert_eq!(channel.phase(), ChannelPhase::Initializing);
    }

    #[test]
    fn initialize_rejects_foreign_key() {
        let env = TestEnv::new();
        let mut channel = SecureChannel::new(Aes128Provider, SecureChannelKey::install_mode());
        let device_random = channel.begin_initialization(&env).unwrap();

        let foreign = SecureChannelKey::new([0x77; 16]);
        let (uid, server_random, cryptogram) = peer_challenge_reply(&foreign, &device_random);

        let err = channel.initialize(&uid, &server_random, &cryptogram).unwrap_err();
        assert_eq!(err, CryptoError::ClientCryptogramMismatch);
        assert_eq!(channel.phase(), ChannelPhase::Initializing);
    }

    #[test]
    fn initialize_requires_pending_challenge() {
        let mut channel = SecureChannel::new(Aes128Provider, SecureChannelKey::install_mode());
        let err = channel.initialize(&[0; 8], &[0; 8], &[0; 16]).unwrap_err();
        assert_eq!(
            err,
            CryptoError::InvalidState { phase: ChannelPhase::Uninitialized, operation: "initialize" }
        );
    }

    #[test]
    fn establish_rejects_wrong_rmac_and_stays_initialized() {
        let env = TestEnv::new();
        let (mut channel, mut rmac) = initialized_channel(&env);
        rmac[0] ^= 0x01;

        assert_eq!(channel.establish(&rmac), Err(CryptoError::CryptogramRejected));
        assert_eq!(channel.phase(), ChannelPhase::Initialized);
    }

    #[test]
    fn establish_requires_initialized() {
        let env = TestEnv::new();
        let mut channel = SecureChannel::new(Aes128Provider, SecureChannelKey::install_mode());
        channel.begin_initialization(&env).unwrap();

        let err = channel.establish(&[0; 16]).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidState { phase: ChannelPhase::Initializing, .. }));
    }

    #[test]
    fn operations_fail_before_establishment() {
        let env = TestEnv::new();
        let (mut channel, _) = initialized_channel(&env);

        assert_eq!(channel.mac(b"x", true), Err(CryptoError::NotEstablished));
        assert_eq!(channel.encrypt(b"x"), Err(CryptoError::NotEstablished));
        assert_eq!(channel.decrypt(&[0; 16]), Err(CryptoError::NotEstablished));
    }

    #[test]
    fn mac_chain_alternates_direction() {
        let env = TestEnv::new();
        let (mut channel, rmac) = initialized_channel(&env);
        channel.establish(&rmac).unwrap();

        let first = channel.mac(b"command", true).unwrap();
        let again = channel.mac(b"command", true).unwrap();
        // Command IV is the last reply MAC, which has not moved.
        assert_eq!(first, again);

        channel.mac(b"reply", false).unwrap();
        let after_reply = channel.mac(b"command", true).unwrap();
        assert_ne!(first, after_reply);
    }

    #[test]
    fn reset_discards_session() {
        let env = TestEnv::new();
        let (mut channel, rmac) = initialized_channel(&env);
        channel.establish(&rmac).unwrap();

        channel.reset();
        assert_eq!(channel.phase(), ChannelPhase::Uninitialized);
        assert_eq!(channel.encrypt(b"x"), Err(CryptoError::NotEstablished));
        assert!(channel.server_cryptogram().is_err());
    }

    #[test]
    fn debug_output_hides_secrets() {
        let env = TestEnv::new();
        let (channel, _) = initialized_channel(&env);
        let debug = format!("{channel:?}");
        assert!(debug.contains("Initialized"));
        assert!(!debug.contains("keys"));
    }
}
