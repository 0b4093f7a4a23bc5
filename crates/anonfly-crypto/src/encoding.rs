//! Key encodings shared with the browser client.
//!
//! Public keys travel as base64 SPKI DER and private keys are stored as base64
//! PKCS#8 DER, which is what WebCrypto exports for Ed25519 and X25519. Both
//! algorithms have fixed-size encodings, so the DER is a constant prefix
//! followed by the 32 raw key bytes.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};

/// Raw key length for both Ed25519 and X25519.
pub const KEY_LEN: usize = 32;

const SPKI_PREFIX_ED25519: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];
const SPKI_PREFIX_X25519: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x6e, 0x03, 0x21, 0x00,
];
const PKCS8_PREFIX_ED25519: [u8; 16] = [
    0x30, 0x2e, 0x02, 0x01, 0x00, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x04, 0x22, 0x04,
    0x20,
];
const PKCS8_PREFIX_X25519: [u8; 16] = [
    0x30, 0x2e, 0x02, 0x01, 0x00, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x6e, 0x04, 0x22, 0x04,
    0x20,
];

/// Curve a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Ed25519,
    X25519,
}

impl KeyAlgorithm {
    fn spki_prefix(self) -> &'static [u8] {
        match self {
            Self::Ed25519 => &SPKI_PREFIX_ED25519,
            Self::X25519 => &SPKI_PREFIX_X25519,
        }
    }

    fn pkcs8_prefix(self) -> &'static [u8] {
        match self {
            Self::Ed25519 => &PKCS8_PREFIX_ED25519,
            Self::X25519 => &PKCS8_PREFIX_X25519,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Ed25519 => "Ed25519",
            Self::X25519 => "X25519",
        }
    }
}

/// Standard base64 with padding.
pub fn b64_encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode standard base64, naming the field in the error.
pub fn b64_decode(what: &'static str, s: &str) -> CryptoResult<Vec<u8>> {
    STANDARD
        .decode(s.trim())
        .map_err(|_| CryptoError::Encoding(what))
}

/// SPKI DER bytes for a raw public key.
pub fn spki_der(alg: KeyAlgorithm, public: &[u8; KEY_LEN]) -> Vec<u8> {
    let prefix = alg.spki_prefix();
    let mut der = Vec::with_capacity(prefix.len() + KEY_LEN);
    der.extend_from_slice(prefix);
    der.extend_from_slice(public);
    der
}

/// Base64 SPKI encoding of a raw public key.
pub fn encode_spki(alg: KeyAlgorithm, public: &[u8; KEY_LEN]) -> String {
    b64_encode(&spki_der(alg, public))
}

/// Parse a base64 SPKI public key into its raw bytes.
pub fn decode_spki(alg: KeyAlgorithm, encoded: &str) -> CryptoResult<[u8; KEY_LEN]> {
    let der = b64_decode("public key", encoded)?;
    strip_prefix(alg, alg.spki_prefix(), &der)
}

/// Base64 PKCS#8 encoding of a raw private key.
pub fn encode_pkcs8(alg: KeyAlgorithm, secret: &[u8; KEY_LEN]) -> Zeroizing<String> {
    let prefix = alg.pkcs8_prefix();
    let mut der = Zeroizing::new(Vec::with_capacity(prefix.len() + KEY_LEN));
    der.extend_from_slice(prefix);
    der.extend_from_slice(secret);
    Zeroizing::new(b64_encode(&der))
}

/// Parse a base64 PKCS#8 private key into its raw bytes.
pub fn decode_pkcs8(alg: KeyAlgorithm, encoded: &str) -> CryptoResult<Zeroizing<[u8; KEY_LEN]>> {
    let der = Zeroizing::new(b64_decode("private key", encoded)?);
    strip_prefix(alg, alg.pkcs8_prefix(), &der).map(Zeroizing::new)
}

fn strip_prefix(alg: KeyAlgorithm, prefix: &[u8], der: &[u8]) -> CryptoResult<[u8; KEY_LEN]> {
    if der.len() != prefix.len() + KEY_LEN {
        return Err(CryptoError::InvalidLength {
            what: "DER key",
            expected: prefix.len() + KEY_LEN,
            actual: der.len(),
        });
    }
    if &der[..prefix.len()] != prefix {
        return Err(CryptoError::UnsupportedKeyFormat(alg.name()));
    }
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&der[prefix.len()..]);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spki_roundtrip() {
        let key = [7u8; KEY_LEN];
        let encoded = encode_spki(KeyAlgorithm::Ed25519, &key);
        assert_eq!(decode_spki(KeyAlgorithm::Ed25519, &encoded).unwrap(), key);
        // 44 DER bytes -> 60 base64 characters
        assert_eq!(encoded.len(), 60);
    }

    #[test]
    fn test_algorithm_mismatch_rejected() {
        let key = [9u8; KEY_LEN];
        let encoded = encode_spki(KeyAlgorithm::X25519, &key);
        assert_eq!(
            decode_spki(KeyAlgorithm::Ed25519, &encoded),
            Err(CryptoError::UnsupportedKeyFormat("Ed25519"))
        );
    }

    #[test]
    fn test_pkcs8_roundtrip() {
        let secret = [3u8; KEY_LEN];
        let encoded = encode_pkcs8(KeyAlgorithm::X25519, &secret);
        let decoded = decode_pkcs8(KeyAlgorithm::X25519, &encoded).unwrap();
        assert_eq!(*decoded, secret);
    }

    #[test]
    fn test_truncated_key_rejected() {
        let encoded = b64_encode(&[0x30, 0x2a, 0x30]);
        assert!(matches!(
            decode_spki(KeyAlgorithm::X25519, &encoded),
            Err(CryptoError::InvalidLength { .. })
        ));
        assert_eq!(
            decode_spki(KeyAlgorithm::X25519, "not base64!"),
            Err(CryptoError::Encoding("public key"))
        );
    }
}
