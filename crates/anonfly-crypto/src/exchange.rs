//! X25519 key agreement for pairwise wrapping keys.
//!
//! The wrapping key is the raw 32-byte X25519 shared secret used directly as an
//! AES-256-GCM key. This matches WebCrypto's `deriveKey({name: "X25519"}, ...,
//! {name: "AES-GCM", length: 256})`, so browser and native members can wrap
//! room keys for each other.

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::encoding::{decode_spki, encode_spki, KeyAlgorithm, KEY_LEN};
use crate::error::{CryptoError, CryptoResult};

/// Long-term X25519 keypair used only for room key distribution.
#[derive(Clone)]
pub struct ExchangeKeypair {
    secret: StaticSecret,
    public: PublicKey,
}

impl ExchangeKeypair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn from_bytes(bytes: &[u8; KEY_LEN]) -> Self {
        let secret = StaticSecret::from(*bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key_bytes(&self) -> [u8; KEY_LEN] {
        *self.public.as_bytes()
    }

    pub fn public_key_spki(&self) -> String {
        encode_spki(KeyAlgorithm::X25519, &self.public_key_bytes())
    }

    pub fn secret_bytes(&self) -> Zeroizing<[u8; KEY_LEN]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    /// Derive the key shared with the holder of `remote_spki`.
    ///
    /// Both sides obtain the same key: `a.derive(B) == b.derive(A)`.
    pub fn derive_wrapping_key(&self, remote_spki: &str) -> CryptoResult<WrappingKey> {
        let remote = decode_spki(KeyAlgorithm::X25519, remote_spki)?;
        let shared = self.secret.diffie_hellman(&PublicKey::from(remote));
        if !shared.was_contributory() {
            return Err(CryptoError::WeakSharedSecret);
        }
        Ok(WrappingKey(Zeroizing::new(shared.to_bytes())))
    }
}

/// Pairwise secret between two exchange keypairs.
pub struct WrappingKey(Zeroizing<[u8; KEY_LEN]>);

impl WrappingKey {
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_sides_derive_same_key() {
        let alice = ExchangeKeypair::generate();
        let bob = ExchangeKeypair::generate();

        let ab = alice.derive_wrapping_key(&bob.public_key_spki()).unwrap();
        let ba = bob.derive_wrapping_key(&alice.public_key_spki()).unwrap();
        assert_eq!(ab.as_bytes(), ba.as_bytes());
    }

    #[test]
    fn test_third_party_derives_different_key() {
        let alice = ExchangeKeypair::generate();
        let bob = ExchangeKeypair::generate();
        let eve = ExchangeKeypair::generate();

        let ab = alice.derive_wrapping_key(&bob.public_key_spki()).unwrap();
        let eb = eve.derive_wrapping_key(&bob.public_key_spki()).unwrap();
        assert_ne!(ab.as_bytes(), eb.as_bytes());
    }

    #[test]
    fn test_low_order_point_rejected() {
        let alice = ExchangeKeypair::generate();
        let zero = encode_spki(KeyAlgorithm::X25519, &[0u8; KEY_LEN]);
        assert!(matches!(
            alice.derive_wrapping_key(&zero),
            Err(CryptoError::WeakSharedSecret)
        ));
    }

    #[test]
    fn test_signing_key_not_accepted_for_exchange() {
        let alice = ExchangeKeypair::generate();
        let ed = encode_spki(KeyAlgorithm::Ed25519, &[5u8; KEY_LEN]);
        assert!(matches!(
            alice.derive_wrapping_key(&ed),
            Err(CryptoError::UnsupportedKeyFormat(_))
        ));
    }
}
