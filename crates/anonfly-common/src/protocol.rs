use serde::{Deserialize, Serialize};

/// Room member as announced by the membership feed.
///
/// Keys are base64 SPKI DER.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    pub display_name: String,
    pub signing_public_key: String,
    pub exchange_public_key: String,
}

/// Frame sent by the client on the duplex channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_id: String,
        identity_id: String,
        display_name: String,
    },

    #[serde(rename_all = "camelCase")]
    LeaveRoom { room_id: String },

    /// Signed chat message; `payload` is plaintext or an [`EncryptedPayload`] as JSON.
    #[serde(rename_all = "camelCase")]
    Message {
        room_id: String,
        payload: String,
        signature: String,
        identity_id: String,
    },

    /// Ask any established member for the room key.
    #[serde(rename_all = "camelCase")]
    RoomKeyRequest { room_id: String },

    /// Room key wrapped for exactly one member.
    #[serde(rename_all = "camelCase")]
    RoomKeyShare {
        room_id: String,
        target_id: String,
        wrapped_key: String,
        iv: String,
    },
}

/// Frame received from the server on the duplex channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Join acknowledged; `participants` is the roster including ourselves.
    #[serde(rename_all = "camelCase")]
    JoinSuccess {
        room_id: String,
        #[serde(default)]
        participants: Vec<Participant>,
    },

    #[serde(rename_all = "camelCase")]
    RoomKeyRequest { room_id: String, sender_id: String },

    #[serde(rename_all = "camelCase")]
    RoomKeyShare {
        room_id: String,
        target_id: String,
        sender_id: String,
        wrapped_key: String,
        iv: String,
    },

    #[serde(rename_all = "camelCase")]
    ChatMessage {
        message_id: String,
        sender_id: String,
        #[serde(default)]
        sender_display_name: String,
        payload: String,
        #[serde(default)]
        signature: String,
        #[serde(default)]
        timestamp: String,
    },

    ParticipantJoined(Participant),

    /// Only `id` is needed to drop a member; any other fields are ignored.
    #[serde(rename_all = "camelCase")]
    ParticipantLeft { id: String },

    #[serde(rename_all = "camelCase")]
    LeaveSuccess { room_id: String },

    #[serde(rename_all = "camelCase")]
    MessageDeleted { message_id: String },

    Error { message: String },

    /// Any frame type this client does not understand.
    #[serde(other)]
    Unknown,
}

/// Encrypted chat payload, carried as a JSON string inside `payload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    /// Base64 AES-GCM ciphertext with the tag appended.
    pub ciphertext: String,
    /// Base64 96-bit IV.
    pub iv: String,
}

/// `POST /auth/challenge` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeRequest {
    pub aid: String,
}

/// `POST /auth/challenge` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeResponse {
    pub nonce: String,
}

/// `POST /auth/verify` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub aid: String,
    /// Base64 Ed25519 signature over the UTF-8 bytes of the nonce.
    pub signature: String,
    pub username: String,
    pub identity_public_key: String,
    pub exchange_public_key: String,
}

/// `POST /auth/verify` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub token: String,
    pub aid: String,
    pub username: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_message_wire_shape() {
        let msg = ClientMessage::RoomKeyShare {
            room_id: "r1".into(),
            target_id: "bob".into(),
            wrapped_key: "d2s=".into(),
            iv: "aXY=".into(),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "type": "roomKeyShare",
                "roomId": "r1",
                "targetId": "bob",
                "wrappedKey": "d2s=",
                "iv": "aXY="
            })
        );

        let join = ClientMessage::JoinRoom {
            room_id: "r1".into(),
            identity_id: "aid".into(),
            display_name: "alice".into(),
        };
        let value = serde_json::to_value(&join).unwrap();
        assert_eq!(value["type"], "joinRoom");
        assert_eq!(value["identityId"], "aid");
        assert_eq!(value["displayName"], "alice");
    }

    #[test]
    fn test_join_success_with_roster() {
        let raw = json!({
            "type": "joinSuccess",
            "roomId": "r1",
            "participants": [{
                "id": "a",
                "displayName": "alice",
                "signingPublicKey": "sig",
                "exchangePublicKey": "exc"
            }]
        });
        match serde_json::from_value::<ServerMessage>(raw).unwrap() {
            ServerMessage::JoinSuccess {
                room_id,
                participants,
            } => {
                assert_eq!(room_id, "r1");
                assert_eq!(participants.len(), 1);
                assert_eq!(participants[0].display_name, "alice");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_participant_joined_is_flat() {
        let raw = r#"{"type":"participantJoined","id":"b","displayName":"bob","signingPublicKey":"s","exchangePublicKey":"e"}"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        assert!(matches!(msg, ServerMessage::ParticipantJoined(p) if p.id == "b"));

        let left: ServerMessage =
            serde_json::from_str(r#"{"type":"participantLeft","id":"b","displayName":"bob"}"#)
                .unwrap();
        assert_eq!(left, ServerMessage::ParticipantLeft { id: "b".into() });
    }

    #[test]
    fn test_chat_message_optional_fields() {
        let raw = r#"{"type":"chatMessage","messageId":"m1","senderId":"a","payload":"hi"}"#;
        match serde_json::from_str::<ServerMessage>(raw).unwrap() {
            ServerMessage::ChatMessage {
                signature,
                timestamp,
                ..
            } => {
                assert!(signature.is_empty());
                assert!(timestamp.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_tolerated() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"typing","roomId":"r1"}"#).unwrap();
        assert_eq!(msg, ServerMessage::Unknown);
    }

    #[test]
    fn test_verify_request_camel_case() {
        let req = VerifyRequest {
            aid: "aid".into(),
            signature: "sig".into(),
            username: "alice".into(),
            identity_public_key: "ipk".into(),
            exchange_public_key: "epk".into(),
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["identityPublicKey"], "ipk");
        assert_eq!(value["exchangePublicKey"], "epk");
    }
}
