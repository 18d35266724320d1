//! Secure channel cryptography.
//!
//! The block cipher itself is an injected [`CryptoProvider`]; this module
//! builds the OSDP secure channel schedule on top of it:
//!
//! - Session keys S-ENC, S-MAC1, S-MAC2 derived from the base key (SCBK) and
//!   the first six bytes of the device random
//! - Client and server cryptograms over both randoms
//! - Initial R-MAC confirming the server cryptogram
//! - CBC-MAC chain where the last block is keyed with S-MAC2
//! - CBC data encryption with `0x80` padding
//!
//! Keys are held in zeroize-on-drop buffers and never leave [`SessionKeys`];
//! callers only get the results of operations.

use aes::{
    Aes128,
    cipher::{BlockDecrypt, BlockEncrypt, KeyInit, generic_array::GenericArray},
};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// AES block size in bytes.
pub const BLOCK_LEN: usize = 16;

/// AES-128 key size in bytes.
pub const KEY_LEN: usize = 16;

/// Length of each handshake random (RND.A / RND.B).
pub const RANDOM_LEN: usize = 8;

/// Length of a cryptogram or full MAC.
pub const CRYPTOGRAM_LEN: usize = 16;

/// Length of the peer's unique identifier in the challenge reply.
pub const CLIENT_UID_LEN: usize = 8;

/// First padding byte; the rest of the block is zero.
const PAD_MARKER: u8 = 0x80;

/// Derivation tags for the session keys.
const TAG_ENC: u8 = 0x82;
const TAG_MAC1: u8 = 0x01;
const TAG_MAC2: u8 = 0x02;

/// Well-known install-mode base key (SCBK-D).
const INSTALL_MODE_KEY: [u8; KEY_LEN] = [
    0x30, 0x31, 0x32, 0x33, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, 0x3A, 0x3B, 0x3C, 0x3D, 0x3E, 0x3F,
];

/// Single-block symmetric primitive used by the secure channel.
///
/// Implementations must be pure: the same key and block always produce the
/// same output.
pub trait CryptoProvider {
    /// Encrypt one block in place.
    fn encrypt_block(&self, key: &[u8; KEY_LEN], block: &mut [u8; BLOCK_LEN]);

    /// Decrypt one block in place.
    fn decrypt_block(&self, key: &[u8; KEY_LEN], block: &mut [u8; BLOCK_LEN]);
}

/// AES-128 provider backed by the `aes` crate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Aes128Provider;

impl CryptoProvider for Aes128Provider {
    fn encrypt_block(&self, key: &[u8; KEY_LEN], block: &mut [u8; BLOCK_LEN]) {
        let cipher = Aes128::new(GenericArray::from_slice(key));
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }

    fn decrypt_block(&self, key: &[u8; KEY_LEN], block: &mut [u8; BLOCK_LEN]) {
        let cipher = Aes128::new(GenericArray::from_slice(key));
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }
}

/// Secure channel base key (SCBK).
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecureChannelKey([u8; KEY_LEN]);

impl SecureChannelKey {
    /// Wrap raw key bytes.
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// The well-known install-mode key SCBK-D.
    pub fn install_mode() -> Self {
        Self(INSTALL_MODE_KEY)
    }

    /// Whether this is SCBK-D.
    pub fn is_install_mode(&self) -> bool {
        self.0[..].ct_eq(&INSTALL_MODE_KEY[..]).into()
    }

    fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl PartialEq for SecureChannelKey {
    fn eq(&self, other: &Self) -> bool {
        self.0[..].ct_eq(&other.0[..]).into()
    }
}

impl Eq for SecureChannelKey {}

impl std::fmt::Debug for SecureChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecureChannelKey(..)")
    }
}

/// Session keys for one secure channel session.
#[derive(Zeroize, ZeroizeOnDrop)]
#[cfg_attr(test, derive(Clone, PartialEq, Eq))]
pub struct SessionKeys {
    enc: [u8; KEY_LEN],
    smac1: [u8; KEY_LEN],
    smac2: [u8; KEY_LEN],
}

impl SessionKeys {
    /// Derive S-ENC, S-MAC1 and S-MAC2 from the base key and device random.
    pub fn derive<P: CryptoProvider>(
        provider: &P,
        base: &SecureChannelKey,
        device_random: &[u8; RANDOM_LEN],
    ) -> Self {
        Self {
            enc: derive_key(provider, base, TAG_ENC, device_random),
            smac1: derive_key(provider, base, TAG_MAC1, device_random),
            smac2: derive_key(provider, base, TAG_MAC2, device_random),
        }
    }

    /// Cryptogram the peer proves key possession with.
    pub fn client_cryptogram<P: CryptoProvider>(
        &self,
        provider: &P,
        device_random: &[u8; RANDOM_LEN],
        server_random: &[u8; RANDOM_LEN],
    ) -> [u8; CRYPTOGRAM_LEN] {
        self.cryptogram(provider, device_random, server_random)
    }

    /// Cryptogram the controller proves key possession with.
    pub fn server_cryptogram<P: CryptoProvider>(
        &self,
        provider: &P,
        device_random: &[u8; RANDOM_LEN],
        server_random: &[u8; RANDOM_LEN],
    ) -> [u8; CRYPTOGRAM_LEN] {
        self.cryptogram(provider, server_random, device_random)
    }

    /// Initial R-MAC the peer returns after accepting the server cryptogram.
    pub fn initial_rmac<P: CryptoProvider>(
        &self,
        provider: &P,
        server_cryptogram: &[u8; CRYPTOGRAM_LEN],
    ) -> [u8; BLOCK_LEN] {
        let mut block = *server_cryptogram;
        provider.encrypt_block(&self.smac1, &mut block);
        provider.encrypt_block(&self.smac2, &mut block);
        block
    }

    /// CBC-MAC over `message` chained from `iv`.
    ///
    /// Every block but the last is keyed with S-MAC1, the last with S-MAC2.
    /// A short last block is padded; an empty message is one padding block.
    pub fn mac<P: CryptoProvider>(
        &self,
        provider: &P,
        iv: &[u8; BLOCK_LEN],
        message: &[u8],
    ) -> [u8; BLOCK_LEN] {
        let mut chunks: Vec<&[u8]> = message.chunks(BLOCK_LEN).collect();
        if chunks.is_empty() {
            chunks.push(&[]);
        }
        let last = chunks.len() - 1;

        let mut chain = *iv;
        for (index, chunk) in chunks.into_iter().enumerate() {
            let mut block = padded_block(chunk);
            xor_into(&mut block, &chain);
            let key = if index == last { &self.smac2 } else { &self.smac1 };
            provider.encrypt_block(key, &mut block);
            chain = block;
        }
        chain
    }

    /// AES-CBC encrypt with S-ENC. Output is always padded, so it is at least
    /// one block longer than a block-aligned input.
    pub fn encrypt<P: CryptoProvider>(
        &self,
        provider: &P,
        iv: &[u8; BLOCK_LEN],
        data: &[u8],
    ) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(data.len() + BLOCK_LEN);
        buffer.extend_from_slice(data);
        buffer.push(PAD_MARKER);
        while buffer.len() % BLOCK_LEN != 0 {
            buffer.push(0);
        }

        let mut chain = *iv;
        for chunk in buffer.chunks_exact_mut(BLOCK_LEN) {
            let mut block = [0u8; BLOCK_LEN];
            block.copy_from_slice(chunk);
            xor_into(&mut block, &chain);
            provider.encrypt_block(&self.enc, &mut block);
            chunk.copy_from_slice(&block);
            chain = block;
        }
        buffer
    }

    /// AES-CBC decrypt with S-ENC and strip the padding.
    ///
    /// # Errors
    ///
    /// `MalformedCiphertext` if the input is empty, not block aligned, or the
    /// plaintext does not end in a valid padding run.
    pub fn decrypt<P: CryptoProvider>(
        &self,
        provider: &P,
        iv: &[u8; BLOCK_LEN],
        data: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let len = data.len();
        if len == 0 || len % BLOCK_LEN != 0 {
            return Err(CryptoError::MalformedCiphertext { len });
        }

        let mut plaintext = Vec::with_capacity(len);
        let mut chain = *iv;
        for chunk in data.chunks_exact(BLOCK_LEN) {
            let mut block = [0u8; BLOCK_LEN];
            block.copy_from_slice(chunk);
            provider.decrypt_block(&self.enc, &mut block);
            xor_into(&mut block, &chain);
            chain.copy_from_slice(chunk);
            plaintext.extend_from_slice(&block);
        }

        match plaintext.iter().rposition(|&b| b != 0) {
            Some(marker)
                if plaintext.get(marker) == Some(&PAD_MARKER) && len - marker <= BLOCK_LEN =>
            {
                plaintext.truncate(marker);
                Ok(plaintext)
            },
            _ => {
                plaintext.zeroize();
                Err(CryptoError::MalformedCiphertext { len })
            },
        }
    }

    fn cryptogram<P: CryptoProvider>(
        &self,
        provider: &P,
        first: &[u8; RANDOM_LEN],
        second: &[u8; RANDOM_LEN],
    ) -> [u8; CRYPTOGRAM_LEN] {
        let mut block = [0u8; BLOCK_LEN];
        block[..RANDOM_LEN].copy_from_slice(first);
        block[RANDOM_LEN..].copy_from_slice(second);
        provider.encrypt_block(&self.enc, &mut block);
        block
    }
}

/// Bitwise complement, used to turn a MAC into a data IV.
pub fn complement(block: &[u8; BLOCK_LEN]) -> [u8; BLOCK_LEN] {
    block.map(|b| !b)
}

fn derive_key<P: CryptoProvider>(
    provider: &P,
    base: &SecureChannelKey,
    tag: u8,
    device_random: &[u8; RANDOM_LEN],
) -> [u8; KEY_LEN] {
    let mut block = [0u8; BLOCK_LEN];
    block[0] = 0x01;
    block[1] = tag;
    block[2..8].copy_from_slice(&device_random[..6]);
    provider.encrypt_block(base.as_bytes(), &mut block);
    block
}

fn padded_block(chunk: &[u8]) -> [u8; BLOCK_LEN] {
    let mut block = [0u8; BLOCK_LEN];
    block[..chunk.len()].copy_from_slice(chunk);
    if chunk.len() < BLOCK_LEN {
        block[chunk.len()] = PAD_MARKER;
    }
    block
}

fn xor_into(block: &mut [u8; BLOCK_LEN], other: &[u8; BLOCK_LEN]) {
    for (b, o) in block.iter_mut().zip(other) {
        *b ^= o;
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const DEVICE_RANDOM: [u8; RANDOM_LEN] = [0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6, 0xA7];
    const SERVER_RANDOM: [u8; RANDOM_LEN] = [0xB0, 0xB1, 0xB2, 0xB3, 0xB4, 0xB5, 0xB6, 0xB7];

    fn keys() -> SessionKeys {
        SessionKeys::derive(&Aes128Provider, &SecureChannelKey::install_mode(), &DEVICE_RANDOM)
    }

    #[test]
    fn aes_known_answer() {
        // FIPS-197 appendix C.1
        let key: [u8; KEY_LEN] = hex::decode("000102030405060708090a0b0c0d0e0f")
            .unwrap()
            .try_into()
            .unwrap();
        let mut block: [u8; BLOCK_LEN] = hex::decode("00112233445566778899aabbccddeeff")
            .unwrap()
            .try_into()
            .unwrap();

        Aes128Provider.encrypt_block(&key, &mut block);
        assert_eq!(hex::encode(block), "69c4e0d86a7b0430d8cdb78070b4c55a");

        Aes128Provider.decrypt_block(&key, &mut block);
        assert_eq!(hex::encode(block), "00112233445566778899aabbccddeeff");
    }

    #[test]
    fn install_mode_key_is_recognized() {
        assert!(SecureChannelKey::install_mode().is_install_mode());
        assert!(!SecureChannelKey::new([7; KEY_LEN]).is_install_mode());
    }

    #[test]
    fn key_debug_is_redacted() {
        let key = SecureChannelKey::install_mode();
        assert_eq!(format!("{key:?}"), "SecureChannelKey(..)");
    }

    #[test]
    fn cryptograms_are_direction_specific() {
        let keys = keys();
        let client = keys.client_cryptogram(&Aes128Provider, &DEVICE_RANDOM, &SERVER_RANDOM);
        let server = keys.server_cryptogram(&Aes128Provider, &DEVICE_RANDOM, &SERVER_RANDOM);
        assert_ne!(client, server);
    }

    #[test]
    fn different_base_keys_derive_different_sessions() {
        let other =
            SessionKeys::derive(&Aes128Provider, &SecureChannelKey::new([9; 16]), &DEVICE_RANDOM);
        let a = keys().client_cryptogram(&Aes128Provider, &DEVICE_RANDOM, &SERVER_RANDOM);
        let b = other.client_cryptogram(&Aes128Provider, &DEVICE_RANDOM, &SERVER_RANDOM);
        assert_ne!(a, b);
    }

    #[test]
    fn mac_depends_on_iv() {
        let keys = keys();
        let a = keys.mac(&Aes128Provider, &[0; BLOCK_LEN], b"poll");
        let b = keys.mac(&Aes128Provider, &[1; BLOCK_LEN], b"poll");
        assert_ne!(a, b);
    }

    #[test]
    fn mac_pads_short_blocks() {
        let keys = keys();
        let short = keys.mac(&Aes128Provider, &[0; BLOCK_LEN], &[0x11; 15]);
        let mut explicit = [0x11; 16];
        explicit[15] = PAD_MARKER;
        // An explicitly padded full block MACs identically to the short one.
        assert_eq!(short, keys.mac(&Aes128Provider, &[0; BLOCK_LEN], &explicit));
    }

    #[test]
    fn empty_message_has_a_mac() {
        let keys = keys();
        let empty = keys.mac(&Aes128Provider, &[0; BLOCK_LEN], &[]);
        let mut explicit = [0; BLOCK_LEN];
        explicit[0] = PAD_MARKER;
        // Full blocks are not padded again, so this is the padded empty message.
        assert_eq!(empty, keys.mac(&Aes128Provider, &[0; BLOCK_LEN], &explicit));
        // A lone marker byte is short, so it gets its own padding.
        assert_ne!(empty, keys.mac(&Aes128Provider, &[0; BLOCK_LEN], &[PAD_MARKER]));
    }

    #[test]
    fn aligned_plaintext_gets_a_full_padding_block() {
        let keys = keys();
        let ciphertext = keys.encrypt(&Aes128Provider, &[0; BLOCK_LEN], &[0x42; 16]);
        assert_eq!(ciphertext.len(), 32);
    }

    #[test]
    fn decrypt_rejects_unaligned_input() {
        let keys = keys();
        let err = keys.decrypt(&Aes128Provider, &[0; BLOCK_LEN], &[0; 17]).unwrap_err();
        assert_eq!(err, CryptoError::MalformedCiphertext { len: 17 });

        let err = keys.decrypt(&Aes128Provider, &[0; BLOCK_LEN], &[]).unwrap_err();
        assert_eq!(err, CryptoError::MalformedCiphertext { len: 0 });
    }

    #[test]
    fn decrypt_with_wrong_iv_fails_padding_or_garbles() {
        let keys = keys();
        let ciphertext = keys.encrypt(&Aes128Provider, &[0; BLOCK_LEN], b"open door 3");
        let result = keys.decrypt(&Aes128Provider, &[0xFF; BLOCK_LEN], &ciphertext);
        assert_ne!(result, Ok(b"open door 3".to_vec()));
    }

    #[test]
    fn complement_inverts_every_bit() {
        assert_eq!(complement(&[0x00; BLOCK_LEN]), [0xFF; BLOCK_LEN]);
        assert_eq!(complement(&[0x0F; BLOCK_LEN]), [0xF0; BLOCK_LEN]);
    }

    proptest! {
        #[test]
        fn encrypt_then_decrypt_recovers_plaintext(
            data in proptest::collection::vec(any::<u8>(), 0..100),
            iv in any::<[u8; BLOCK_LEN]>(),
        ) {
            let keys = keys();
            let ciphertext = keys.encrypt(&Aes128Provider, &iv, &data);
            prop_assert_eq!(ciphertext.len() % BLOCK_LEN, 0);
            prop_assert!(ciphertext.len() > data.len());
            prop_assert_eq!(keys.decrypt(&Aes128Provider, &iv, &ciphertext), Ok(data));
        }
    }
}
