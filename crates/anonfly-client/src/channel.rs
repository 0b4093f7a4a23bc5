//! Signing and encryption of chat payloads.

use std::sync::Arc;

use tracing::{debug, warn};

use anonfly_common::{ClientMessage, EncryptedPayload, Error, Result};
use anonfly_crypto::{verify_signature, Identity, RoomKey, Sealed};

use crate::negotiator::Roster;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Chat,
    /// Locally synthesised join/leave notice; never signed or encrypted.
    System,
}

/// Chat message as received from the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub message_id: String,
    pub sender_id: String,
    pub sender_display_name: String,
    pub payload: String,
    pub signature: String,
    pub timestamp: String,
}

/// Message ready for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayedMessage {
    pub message_id: String,
    pub sender_id: String,
    pub sender_display_name: String,
    pub payload: String,
    pub signature: String,
    pub timestamp: String,
    pub kind: MessageKind,
    pub content: String,
    pub encrypted: bool,
    /// `None` when the sender is not in the roster.
    pub signature_valid: Option<bool>,
}

#[derive(Clone)]
pub struct SecureChannel {
    identity: Arc<Identity>,
}

impl SecureChannel {
    pub fn new(identity: Arc<Identity>) -> Self {
        Self { identity }
    }

    /// Build the signed `message` frame for `plaintext`.
    ///
    /// With a room key the payload is the JSON [`EncryptedPayload`]; without
    /// one it is the plaintext itself.
    pub fn seal_outbound(
        &self,
        room_id: &str,
        plaintext: &str,
        key: Option<&RoomKey>,
    ) -> Result<ClientMessage> {
        let payload = match key {
            Some(key) => {
                let (ciphertext, iv) = key
                    .encrypt(plaintext.as_bytes())
                    .map_err(Error::crypto)?
                    .to_base64();
                serde_json::to_string(&EncryptedPayload { ciphertext, iv })?
            }
            None => plaintext.to_string(),
        };
        let signature = self.identity.sign_base64(payload.as_bytes());

        Ok(ClientMessage::Message {
            room_id: room_id.to_string(),
            payload,
            signature,
            identity_id: self.identity.aid().to_string(),
        })
    }

    /// Decrypt and check an inbound message. Never fails: anything that
    /// cannot be decrypted is shown as the raw payload.
    pub fn open_inbound(
        &self,
        envelope: Envelope,
        key: Option<&RoomKey>,
        roster: &Roster,
    ) -> DisplayedMessage {
        let signature_valid = roster.get(&envelope.sender_id).map(|sender| {
            verify_signature(
                &sender.signing_public_key,
                envelope.payload.as_bytes(),
                &envelope.signature,
            )
            .is_ok()
        });
        if signature_valid == Some(false) {
            warn!(
                "Message {} from {} has an invalid signature",
                envelope.message_id, envelope.sender_id
            );
        }

        let decrypted = key.and_then(|key| decrypt_payload(key, &envelope.payload));
        let (content, encrypted) = match decrypted {
            Some(plaintext) => (plaintext, true),
            None => (envelope.payload.clone(), false),
        };

        DisplayedMessage {
            message_id: envelope.message_id,
            sender_id: envelope.sender_id,
            sender_display_name: envelope.sender_display_name,
            payload: envelope.payload,
            signature: envelope.signature,
            timestamp: envelope.timestamp,
            kind: MessageKind::Chat,
            content,
            encrypted,
            signature_valid,
        }
    }
}

fn decrypt_payload(key: &RoomKey, payload: &str) -> Option<String> {
    let parsed: EncryptedPayload = serde_json::from_str(payload).ok()?;
    let sealed = Sealed::from_base64(&parsed.ciphertext, &parsed.iv).ok()?;
    match key.decrypt(&sealed) {
        Ok(plaintext) => String::from_utf8(plaintext).ok(),
        Err(e) => {
            debug!("Payload did not decrypt: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::negotiator::participant_for;

    fn envelope(from: &Identity, msg: ClientMessage) -> Envelope {
        let ClientMessage::Message {
            payload, signature, ..
        } = msg
        else {
            panic!("expected message frame");
        };
        Envelope {
            message_id: "m1".into(),
            sender_id: from.aid().to_string(),
            sender_display_name: from.display_name().to_string(),
            payload,
            signature,
            timestamp: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn test_encrypted_roundtrip() {
        let alice = Arc::new(Identity::generate("alice"));
        let bob = Arc::new(Identity::generate("bob"));
        let key = RoomKey::generate();
        let roster = Roster::from_participants(vec![participant_for(&alice)]);

        let out = SecureChannel::new(alice.clone())
            .seal_outbound("r1", "hello", Some(&key))
            .unwrap();
        let env = envelope(&alice, out);
        assert!(!env.payload.contains("hello"));

        let shown = SecureChannel::new(bob).open_inbound(env, Some(&key), &roster);
        assert_eq!(shown.content, "hello");
        assert!(shown.encrypted);
        assert_eq!(shown.signature_valid, Some(true));
        assert_eq!(shown.kind, MessageKind::Chat);
    }

    #[test]
    fn test_plaintext_without_key() {
        let alice = Arc::new(Identity::generate("alice"));
        let channel = SecureChannel::new(alice.clone());
        let out = channel.seal_outbound("r1", "in the clear", None).unwrap();
        let env = envelope(&alice, out);
        assert_eq!(env.payload, "in the clear");

        let shown = channel.open_inbound(env, None, &Roster::default());
        assert_eq!(shown.content, "in the clear");
        assert!(!shown.encrypted);
        assert_eq!(shown.signature_valid, None);
    }

    #[test]
    fn test_malformed_payload_shown_raw() {
        let bob = Arc::new(Identity::generate("bob"));
        let key = RoomKey::generate();
        let env = Envelope {
            message_id: "m9".into(),
            sender_id: "stranger".into(),
            sender_display_name: "?".into(),
            payload: r####"{"ciphertext":"###","iv":1}"####.into(),
            signature: String::new(),
            timestamp: String::new(),
        };
        let shown =
            SecureChannel::new(bob).open_inbound(env.clone(), Some(&key), &Roster::default());
        assert_eq!(shown.content, env.payload);
        assert!(!shown.encrypted);
    }

    #[test]
    fn test_wrong_key_shows_raw_payload() {
        let alice = Arc::new(Identity::generate("alice"));
        let out = SecureChannel::new(alice.clone())
            .seal_outbound("r1", "secret", Some(&RoomKey::generate()))
            .unwrap();
        let env = envelope(&alice, out);
        let shown = SecureChannel::new(alice.clone()).open_inbound(
            env.clone(),
            Some(&RoomKey::generate()),
            &Roster::default(),
        );
        assert_eq!(shown.content, env.payload);
        assert!(!shown.encrypted);
    }

    #[test]
    fn test_forged_signature_flagged_not_hidden() {
        let alice = Arc::new(Identity::generate("alice"));
        let mallory = Arc::new(Identity::generate("mallory"));
        let key = RoomKey::generate();
        let roster = Roster::from_participants(vec![participant_for(&alice)]);

        let out = SecureChannel::new(mallory)
            .seal_outbound("r1", "trust me", Some(&key))
            .unwrap();
        // Claims to be Alice.
        let env = envelope(&alice, out);
        let shown = SecureChannel::new(alice).open_inbound(env, Some(&key), &roster);
        assert_eq!(shown.content, "trust me");
        assert_eq!(shown.signature_valid, Some(false));
    }
}
