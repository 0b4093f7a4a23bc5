//! Symmetric room keys.
//!
//! A room key is a 256-bit AES-GCM key shared by the members of one room. It is
//! generated by the first member, held only in memory, and handed to later
//! members wrapped under a pairwise [`WrappingKey`].
//!
//! Every encryption uses a fresh random 96-bit IV. The IV travels next to the
//! ciphertext; the 16-byte tag is appended to the ciphertext (WebCrypto layout).

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroizing;

use crate::encoding::{b64_decode, b64_encode, KEY_LEN};
use crate::error::{CryptoError, CryptoResult};
use crate::exchange::WrappingKey;

/// AES-GCM IV length in bytes.
pub const IV_LEN: usize = 12;

/// Ciphertext plus the IV it was sealed with.
#[derive(Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_LEN],
}

impl Sealed {
    /// `(ciphertext, iv)` as standard base64.
    pub fn to_base64(&self) -> (String, String) {
        (b64_encode(&self.ciphertext), b64_encode(&self.iv))
    }

    pub fn from_base64(ciphertext: &str, iv: &str) -> CryptoResult<Self> {
        let ciphertext = b64_decode("ciphertext", ciphertext)?;
        let iv_bytes = b64_decode("iv", iv)?;
        let iv: [u8; IV_LEN] = iv_bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidLength {
                what: "iv",
                expected: IV_LEN,
                actual: iv_bytes.len(),
            })?;
        Ok(Self { ciphertext, iv })
    }
}

impl fmt::Debug for Sealed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sealed")
            .field("ciphertext_len", &self.ciphertext.len())
            .field("iv", &hex::encode(self.iv))
            .finish()
    }
}

/// 256-bit room key, zeroized on drop.
pub struct RoomKey(Zeroizing<[u8; KEY_LEN]>);

impl RoomKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        rand::thread_rng().fill_bytes(&mut key[..]);
        Self(key)
    }

    /// Import raw key bytes.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != KEY_LEN {
            return Err(CryptoError::InvalidLength {
                what: "room key",
                expected: KEY_LEN,
                actual: bytes.len(),
            });
        }
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    /// Short, non-reversible tag for logs and comparisons.
    pub fn fingerprint(&self) -> String {
        hex::encode(&Sha256::digest(self.0.as_slice())[..8])
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<Sealed> {
        self.encrypt_with_iv(plaintext, &random_iv())
    }

    /// Encrypt with a caller-chosen IV. Reusing an IV under the same key breaks
    /// GCM; outside of tests use [`RoomKey::encrypt`].
    pub fn encrypt_with_iv(&self, plaintext: &[u8], iv: &[u8; IV_LEN]) -> CryptoResult<Sealed> {
        seal(&self.0, iv, plaintext)
    }

    pub fn decrypt(&self, sealed: &Sealed) -> CryptoResult<Vec<u8>> {
        open(&self.0, sealed)
    }

    /// Wrap this key for one recipient.
    pub fn wrap_for(&self, wrapping_key: &WrappingKey) -> CryptoResult<Sealed> {
        seal(wrapping_key.as_bytes(), &random_iv(), self.0.as_slice())
    }

    /// Recover a key wrapped with [`RoomKey::wrap_for`].
    pub fn unwrap_with(sealed: &Sealed, wrapping_key: &WrappingKey) -> CryptoResult<Self> {
        let raw = Zeroizing::new(open(wrapping_key.as_bytes(), sealed)?);
        Self::from_bytes(&raw)
    }
}

impl fmt::Debug for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RoomKey({})", self.fingerprint())
    }
}

fn random_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);
    iv
}

fn seal(key: &[u8; KEY_LEN], iv: &[u8; IV_LEN], plaintext: &[u8]) -> CryptoResult<Sealed> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::Encryption)?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(iv), plaintext)
        .map_err(|_| CryptoError::Encryption)?;
    Ok(Sealed {
        ciphertext,
        iv: *iv,
    })
}

fn open(key: &[u8; KEY_LEN], sealed: &Sealed) -> CryptoResult<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::Decryption)?;
    cipher
        .decrypt(Nonce::from_slice(&sealed.iv), sealed.ciphertext.as_slice())
        .map_err(|_| CryptoError::Decryption)
}
