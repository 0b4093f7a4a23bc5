//! Anonfly client core.
//!
//! - [`store`]: the device's single identity
//! - [`handshake`]: challenge-response login producing a [`Session`]
//! - [`negotiator`]: per-room key distribution
//! - [`channel`]: signing and encryption of chat payloads
//! - [`chat`]: sans-IO protocol state machine
//! - [`transport`] and [`runtime`]: the duplex channel and the task driving it

#![forbid(unsafe_code)]

pub mod channel;
pub mod chat;
pub mod config;
pub mod handshake;
pub mod negotiator;
pub mod runtime;
pub mod servers;
pub mod session;
pub mod store;
pub mod transport;

pub use channel::{DisplayedMessage, Envelope, MessageKind, SecureChannel};
pub use chat::{ChatClient, ChatEvent};
pub use config::ClientConfig;
pub use handshake::{HandshakeClient, HandshakeError, HttpVerificationService, VerificationService};
pub use negotiator::{KeyStatus, RoomKeyNegotiator, Roster};
pub use runtime::{ChatHandle, ChatRuntime, Intent};
pub use session::{Session, SessionCache};
pub use store::{
    FileIdentityRepository, IdentityRepository, IdentityStore, MemoryIdentityRepository,
};
pub use transport::{Connector, Transport, WsConnector};
