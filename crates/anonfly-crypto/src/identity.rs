//! Anonymous identities and the AID.
//!
//! An **AID** is the lowercase hex SHA-256 of the Ed25519 signing public key in
//! SPKI DER form (64 characters). It is the only account identifier the server
//! ever sees; there is no username/password behind it.
//!
//! # Example
//!
//! ```
//! use anonfly_crypto::identity::{verify_signature, Identity};
//!
//! let identity = Identity::generate("alice");
//! assert_eq!(identity.aid().as_str().len(), 64);
//!
//! let signature = identity.sign_base64(b"nonce-1234");
//! assert!(verify_signature(&identity.signing_public_spki(), b"nonce-1234", &signature).is_ok());
//! ```

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::encoding::{
    b64_decode, b64_encode, decode_pkcs8, decode_spki, encode_pkcs8, encode_spki, spki_der,
    KeyAlgorithm, KEY_LEN,
};
use crate::error::{CryptoError, CryptoResult};
use crate::exchange::ExchangeKeypair;

/// Anonymous identifier: hex SHA-256 of the signing public key's SPKI DER.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Aid(String);

impl Aid {
    /// Derive the AID for a raw Ed25519 public key.
    pub fn from_signing_public(public: &[u8; KEY_LEN]) -> Self {
        let digest = Sha256::digest(spki_der(KeyAlgorithm::Ed25519, public));
        Self(hex::encode(digest))
    }

    /// Derive the AID for a base64 SPKI signing public key.
    pub fn from_signing_spki(encoded: &str) -> CryptoResult<Self> {
        let public = decode_spki(KeyAlgorithm::Ed25519, encoded)?;
        Ok(Self::from_signing_public(&public))
    }

    /// Parse an AID from its string form.
    pub fn parse(s: &str) -> CryptoResult<Self> {
        let bytes = hex::decode(s).map_err(|_| CryptoError::Encoding("aid"))?;
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidLength {
                what: "aid",
                expected: 32,
                actual: bytes.len(),
            });
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Aid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Aid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Aid({})", self.0)
    }
}

/// Ed25519 signing keypair.
///
/// `SigningKey` zeroizes itself on drop.
#[derive(Clone)]
pub struct SigningKeypair {
    signing_key: SigningKey,
}

impl SigningKeypair {
    /// Generate a new random keypair using the OS CSPRNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Create from raw signing key bytes.
    pub fn from_bytes(bytes: &[u8; KEY_LEN]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(bytes),
        }
    }

    pub fn aid(&self) -> Aid {
        Aid::from_signing_public(&self.public_key_bytes())
    }

    pub fn public_key_bytes(&self) -> [u8; KEY_LEN] {
        *self.signing_key.verifying_key().as_bytes()
    }

    /// Base64 SPKI form sent to the server and to peers.
    pub fn public_key_spki(&self) -> String {
        encode_spki(KeyAlgorithm::Ed25519, &self.public_key_bytes())
    }

    /// Get the private key bytes.
    ///
    /// # Security
    /// These bytes recreate the identity. They are only written to the local store.
    pub fn private_key_bytes(&self) -> Zeroizing<[u8; KEY_LEN]> {
        Zeroizing::new(self.signing_key.to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

/// Verify a base64 Ed25519 signature against a base64 SPKI public key.
pub fn verify_signature(
    signing_public_spki: &str,
    message: &[u8],
    signature_b64: &str,
) -> CryptoResult<()> {
    let public = decode_spki(KeyAlgorithm::Ed25519, signing_public_spki)?;
    let verifying_key =
        VerifyingKey::from_bytes(&public).map_err(|_| CryptoError::InvalidPublicKey)?;
    let signature_bytes = b64_decode("signature", signature_b64)?;
    let signature =
        Signature::from_slice(&signature_bytes).map_err(|_| CryptoError::BadSignature)?;
    verifying_key
        .verify(message, &signature)
        .map_err(|_| CryptoError::BadSignature)
}

/// The device's single pseudonymous identity.
#[derive(Clone)]
pub struct Identity {
    aid: Aid,
    display_name: String,
    signing: SigningKeypair,
    exchange: ExchangeKeypair,
}

impl Identity {
    /// Create a fresh identity. Display-name rules are enforced by the caller.
    pub fn generate(display_name: &str) -> Self {
        let signing = SigningKeypair::generate();
        let exchange = ExchangeKeypair::generate();
        Self {
            aid: signing.aid(),
            display_name: display_name.to_string(),
            signing,
            exchange,
        }
    }

    pub fn aid(&self) -> &Aid {
        &self.aid
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn signing(&self) -> &SigningKeypair {
        &self.signing
    }

    pub fn exchange(&self) -> &ExchangeKeypair {
        &self.exchange
    }

    pub fn signing_public_spki(&self) -> String {
        self.signing.public_key_spki()
    }

    pub fn exchange_public_spki(&self) -> String {
        self.exchange.public_key_spki()
    }

    /// Sign and return the base64 signature.
    pub fn sign_base64(&self, message: &[u8]) -> String {
        b64_encode(&self.signing.sign(message))
    }

    /// Export for durable storage.
    pub fn to_record(&self) -> IdentityRecord {
        IdentityRecord {
            aid: self.aid.as_str().to_string(),
            username: self.display_name.clone(),
            identity_key_pair: EncodedKeyPair {
                public_key: self.signing.public_key_spki(),
                private_key: encode_pkcs8(KeyAlgorithm::Ed25519, &self.signing.private_key_bytes())
                    .to_string(),
            },
            exchange_key_pair: EncodedKeyPair {
                public_key: self.exchange.public_key_spki(),
                private_key: encode_pkcs8(KeyAlgorithm::X25519, &self.exchange.secret_bytes())
                    .to_string(),
            },
        }
    }

    /// Rebuild from a stored record.
    ///
    /// Public keys and the AID are re-derived from the private keys and must
    /// match what the record claims.
    pub fn from_record(record: &IdentityRecord) -> CryptoResult<Self> {
        let signing_secret =
            decode_pkcs8(KeyAlgorithm::Ed25519, &record.identity_key_pair.private_key)?;
        let signing = SigningKeypair::from_bytes(&signing_secret);
        if signing.public_key_spki() != record.identity_key_pair.public_key.trim() {
            return Err(CryptoError::InconsistentIdentity("signing public key"));
        }

        let aid = signing.aid();
        if aid != Aid::parse(&record.aid)? {
            return Err(CryptoError::InconsistentIdentity("aid"));
        }

        let exchange_secret =
            decode_pkcs8(KeyAlgorithm::X25519, &record.exchange_key_pair.private_key)?;
        let exchange = ExchangeKeypair::from_bytes(&exchange_secret);
        if exchange.public_key_spki() != record.exchange_key_pair.public_key.trim() {
            return Err(CryptoError::InconsistentIdentity("exchange public key"));
        }

        Ok(Self {
            aid,
            display_name: record.username.clone(),
            signing,
            exchange,
        })
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("aid", &self.aid)
            .field("display_name", &self.display_name)
            .finish_non_exhaustive()
    }
}

/// Base64 DER key pair as persisted.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct EncodedKeyPair {
    pub public_key: String,
    pub private_key: String,
}

/// Durable identity record (same shape the web client keeps in IndexedDB).
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRecord {
    pub aid: String,
    pub username: String,
    pub identity_key_pair: EncodedKeyPair,
    pub exchange_key_pair: EncodedKeyPair,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aid_is_hash_of_signing_key() {
        let identity = Identity::generate("alice");
        let expected = hex::encode(Sha256::digest(spki_der(
            KeyAlgorithm::Ed25519,
            &identity.signing().public_key_bytes(),
        )));
        assert_eq!(identity.aid().as_str(), expected);
        assert_eq!(
            Aid::from_signing_spki(&identity.signing_public_spki()).unwrap(),
            *identity.aid()
        );
    }

    #[test]
    fn test_identities_are_unique() {
        let a = Identity::generate("alice");
        let b = Identity::generate("alice");
        assert_ne!(a.aid(), b.aid());
    }

    #[test]
    fn test_sign_verify() {
        let identity = Identity::generate("alice");
        let signature = identity.sign_base64(b"hello anonfly");
        let public = identity.signing_public_spki();

        assert!(verify_signature(&public, b"hello anonfly", &signature).is_ok());
        assert_eq!(
            verify_signature(&public, b"wrong message", &signature),
            Err(CryptoError::BadSignature)
        );
    }

    #[test]
    fn test_wrong_key_fails() {
        let alice = Identity::generate("alice");
        let bob = Identity::generate("bob");
        let signature = alice.sign_base64(b"payload");
        assert!(verify_signature(&bob.signing_public_spki(), b"payload", &signature).is_err());
    }

    #[test]
    fn test_record_roundtrip_preserves_key_material() {
        let identity = Identity::generate("alice");
        let record = identity.to_record();
        let restored = Identity::from_record(&record).unwrap();

        assert_eq!(restored.aid(), identity.aid());
        assert_eq!(restored.display_name(), "alice");
        assert_eq!(
            *restored.signing().private_key_bytes(),
            *identity.signing().private_key_bytes()
        );
        assert_eq!(
            *restored.exchange().secret_bytes(),
            *identity.exchange().secret_bytes()
        );
    }

    #[test]
    fn test_tampered_record_rejected() {
        let identity = Identity::generate("alice");
        let other = Identity::generate("mallory");

        let mut record = identity.to_record();
        record.aid = other.aid().as_str().to_string();
        assert_eq!(
            Identity::from_record(&record).err(),
            Some(CryptoError::InconsistentIdentity("aid"))
        );

        let mut record = identity.to_record();
        record.exchange_key_pair.public_key = other.exchange_public_spki();
        assert_eq!(
            Identity::from_record(&record).err(),
            Some(CryptoError::InconsistentIdentity("exchange public key"))
        );
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = Identity::generate("alice").to_record();
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("identityKeyPair").is_some());
        assert!(json["exchangeKeyPair"].get("privateKey").is_some());
        assert_eq!(json["username"], "alice");
    }

    #[test]
    fn test_aid_parse_rejects_garbage() {
        assert!(Aid::parse("xyz").is_err());
        assert!(Aid::parse("abcd").is_err());
        let identity = Identity::generate("alice");
        let upper = identity.aid().as_str().to_ascii_uppercase();
        assert_eq!(Aid::parse(&upper).unwrap(), *identity.aid());
    }
}
