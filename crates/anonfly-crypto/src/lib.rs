//! Cryptographic primitives for Anonfly.
//!
//! This crate provides:
//! - Ed25519 identities and the anonymous identifier (AID)
//! - SPKI / PKCS#8 key encodings compatible with the web client
//! - X25519 pairwise wrapping keys
//! - AES-256-GCM room keys and key wrapping
//!
//! # Design
//!
//! Every member of a room holds the same symmetric room key. New members
//! receive it from an existing member, wrapped under the X25519 secret the two
//! of them share, so the relay server only ever sees wrapped keys and
//! ciphertext. Everything here is synchronous and side-effect free apart from
//! drawing randomness from the OS.

#![forbid(unsafe_code)]

pub mod encoding;
pub mod error;
pub mod exchange;
pub mod identity;
pub mod room_key;

pub use error::{CryptoError, CryptoResult};
pub use exchange::{ExchangeKeypair, WrappingKey};
pub use identity::{verify_signature, Aid, Identity, IdentityRecord, SigningKeypair};
pub use room_key::{RoomKey, Sealed, IV_LEN};
