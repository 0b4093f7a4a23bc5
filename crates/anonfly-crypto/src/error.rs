//! Errors raised by the cryptographic primitives.

use thiserror::Error;

/// Result alias for primitive operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Cryptographic failures.
///
/// Messages never include key material.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("invalid base64 encoding for {0}")]
    Encoding(&'static str),

    #[error("invalid {what} length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("unsupported key format: {0}")]
    UnsupportedKeyFormat(&'static str),

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("stored identity is inconsistent: {0}")]
    InconsistentIdentity(&'static str),

    #[error("key agreement produced a non-contributory secret")]
    WeakSharedSecret,

    #[error("encryption failed")]
    Encryption,

    #[error("decryption failed: authentication tag mismatch")]
    Decryption,

    #[error("signature verification failed")]
    BadSignature,
}
