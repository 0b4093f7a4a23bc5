//! Chat client state machine.
//!
//! [`ChatClient`] owns all protocol state for one session and performs no I/O:
//! every method takes an input (user intent, inbound frame, connection change)
//! and returns the frames to send. Observable changes are queued as
//! [`ChatEvent`]s. The connection runtime drives it from a single task.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use anonfly_common::{ClientMessage, Error, Participant, Result, ServerMessage};
use anonfly_crypto::{Identity, RoomKey};

use crate::channel::{DisplayedMessage, Envelope, MessageKind, SecureChannel};
use crate::negotiator::{KeyStatus, RoomKeyNegotiator, Roster};

/// Surfaced for every transport failure; details go to the log.
pub const CONNECTIVITY_ERROR: &str = "connection error, check your network";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Connected,
    Disconnected,
    /// Join acknowledged by the server.
    Joined { room_id: String },
    KeyStatusChanged { room_id: String, status: KeyStatus },
    Message(DisplayedMessage),
    MessageRetracted { message_id: String },
    ParticipantJoined(Participant),
    ParticipantLeft { id: String },
    Left { room_id: String },
    Error(String),
}

pub struct ChatClient {
    identity: Arc<Identity>,
    channel: SecureChannel,
    connected: bool,
    /// Room to be in; kept across disconnects so it can be re-joined.
    room: Option<RoomKeyNegotiator>,
    messages: Vec<DisplayedMessage>,
    last_error: Option<String>,
    events: VecDeque<ChatEvent>,
}

impl ChatClient {
    pub fn new(identity: Arc<Identity>) -> Self {
        Self {
            channel: SecureChannel::new(identity.clone()),
            identity,
            connected: false,
            room: None,
            messages: Vec::new(),
            last_error: None,
            events: VecDeque::new(),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn current_room(&self) -> Option<&str> {
        self.room.as_ref().map(|r| r.room_id())
    }

    pub fn key_status(&self) -> KeyStatus {
        self.room
            .as_ref()
            .map(|r| r.status())
            .unwrap_or(KeyStatus::None)
    }

    pub fn room_key(&self) -> Option<&RoomKey> {
        self.room.as_ref().and_then(|r| r.room_key())
    }

    pub fn roster(&self) -> Option<&Roster> {
        self.room.as_ref().map(|r| r.roster())
    }

    pub fn messages(&self) -> &[DisplayedMessage] {
        &self.messages
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// A reconnect is worth attempting only while a room is joined.
    pub fn should_reconnect(&self) -> bool {
        self.room.is_some()
    }

    pub fn drain_events(&mut self) -> Vec<ChatEvent> {
        self.events.drain(..).collect()
    }

    /// Join `room_id`, leaving the current room first.
    pub fn join(&mut self, room_id: &str) -> Vec<ClientMessage> {
        if self.current_room() == Some(room_id) {
            debug!("Already in room {}", room_id);
            return Vec::new();
        }
        let mut out = self.leave();
        self.room = Some(RoomKeyNegotiator::new(self.identity.clone(), room_id));
        out.push(self.join_frame(room_id));
        info!("Joining room {}", room_id);
        out
    }

    /// Leave the current room. The key is discarded immediately.
    pub fn leave(&mut self) -> Vec<ClientMessage> {
        let Some(mut room) = self.room.take() else {
            return Vec::new();
        };
        room.reset();
        info!("Leaving room {}", room.room_id());
        vec![ClientMessage::LeaveRoom {
            room_id: room.room_id().to_string(),
        }]
    }

    /// Encrypt, sign, and frame a chat message for the current room.
    pub fn send(&mut self, text: &str) -> Result<ClientMessage> {
        let result = self.try_send(text);
        if let Err(e) = &result {
            self.fail(e.to_string());
        }
        result
    }

    fn try_send(&self, text: &str) -> Result<ClientMessage> {
        if !self.connected {
            return Err(Error::connectivity("not connected"));
        }
        let room = self
            .room
            .as_ref()
            .ok_or_else(|| Error::protocol("not in a room"))?;
        let key = room.room_key().ok_or_else(|| {
            Error::protocol(format!(
                "room key for {} is {}, cannot send yet",
                room.room_id(),
                room.status()
            ))
        })?;
        self.channel.seal_outbound(room.room_id(), text, Some(key))
    }

    /// Channel opened: clear errors and re-join the room, renegotiating from NONE.
    pub fn on_connected(&mut self) -> Vec<ClientMessage> {
        self.connected = true;
        self.last_error = None;
        self.events.push_back(ChatEvent::Connected);

        let Some(room) = self.room.as_mut() else {
            return Vec::new();
        };
        room.reset();
        let room_id = room.room_id().to_string();
        info!("Re-joining room {}", room_id);
        vec![self.join_frame(&room_id)]
    }

    /// Channel closed: the key is gone, the room is remembered.
    pub fn on_disconnected(&mut self) {
        self.connected = false;
        if let Some(room) = self.room.as_mut() {
            room.reset();
            let room_id = room.room_id().to_string();
            self.key_changed(room_id);
        }
        self.events.push_back(ChatEvent::Disconnected);
    }

    /// Transport hiccup or failed connect. Protocol state is kept.
    pub fn on_transport_error(&mut self, error: &Error) {
        warn!("Transport error: {}", error);
        self.fail(CONNECTIVITY_ERROR.to_string());
    }

    /// Apply one inbound frame; returns frames to send in response.
    pub fn handle_inbound(&mut self, msg: ServerMessage) -> Vec<ClientMessage> {
        match msg {
            ServerMessage::JoinSuccess {
                room_id,
                participants,
            } => self.on_join_success(room_id, participants),
            ServerMessage::RoomKeyRequest { room_id, sender_id } => {
                let Some(room) = self.room.as_ref() else {
                    return Vec::new();
                };
                room.on_key_request(&room_id, &sender_id)
                    .into_iter()
                    .collect()
            }
            ServerMessage::RoomKeyShare {
                room_id,
                target_id,
                sender_id,
                wrapped_key,
                iv,
            } => {
                let Some(room) = self.room.as_mut() else {
                    debug!("Dropping key share for {} outside any room", room_id);
                    return Vec::new();
                };
                if room.on_key_share(&room_id, &target_id, &sender_id, &wrapped_key, &iv) {
                    self.key_changed(room_id);
                }
                Vec::new()
            }
            ServerMessage::ChatMessage {
                message_id,
                sender_id,
                sender_display_name,
                payload,
                signature,
                timestamp,
            } => {
                let Some(room) = self.room.as_ref() else {
                    debug!("Dropping message {} outside any room", message_id);
                    return Vec::new();
                };
                let envelope = Envelope {
                    message_id,
                    sender_id,
                    sender_display_name,
                    payload,
                    signature,
                    timestamp,
                };
                let shown = self
                    .channel
                    .open_inbound(envelope, room.room_key(), room.roster());
                self.push_message(shown);
                Vec::new()
            }
            ServerMessage::ParticipantJoined(participant) => {
                self.on_participant_joined(participant);
                Vec::new()
            }
            ServerMessage::ParticipantLeft { id } => {
                self.on_participant_left(id);
                Vec::new()
            }
            ServerMessage::LeaveSuccess { room_id } => {
                // Room state was dropped by `leave`; the current room may be a rejoin.
                self.events.push_back(ChatEvent::Left { room_id });
                Vec::new()
            }
            ServerMessage::MessageDeleted { message_id } => {
                let before = self.messages.len();
                self.messages.retain(|m| m.message_id != message_id);
                if self.messages.len() != before {
                    self.events
                        .push_back(ChatEvent::MessageRetracted { message_id });
                }
                Vec::new()
            }
            ServerMessage::Error { message } => {
                warn!("Server error: {}", message);
                self.fail(message);
                Vec::new()
            }
            ServerMessage::Unknown => {
                debug!("Ignoring unknown frame type");
                Vec::new()
            }
        }
    }

    fn on_join_success(
        &mut self,
        room_id: String,
        participants: Vec<Participant>,
    ) -> Vec<ClientMessage> {
        let Some(room) = self.room.as_mut() else {
            warn!("Join ack for {} but no join pending", room_id);
            return Vec::new();
        };
        if room.room_id() != room_id {
            warn!("Join ack for {} while in {}", room_id, room.room_id());
            return Vec::new();
        }

        let out: Vec<ClientMessage> = room.on_join_ack(participants).into_iter().collect();
        self.messages.clear();
        self.events.push_back(ChatEvent::Joined {
            room_id: room_id.clone(),
        });
        self.key_changed(room_id);
        out
    }

    fn on_participant_joined(&mut self, participant: Participant) {
        let Some(room) = self.room.as_mut() else {
            return;
        };
        room.add_participant(participant.clone());
        if participant.id != self.identity.aid().as_str() {
            self.push_system(format!("{} joined the room", participant.display_name));
        }
        self.events.push_back(ChatEvent::ParticipantJoined(participant));
    }

    fn on_participant_left(&mut self, id: String) {
        let Some(room) = self.room.as_mut() else {
            return;
        };
        let name = room
            .remove_participant(&id)
            .map(|p| p.display_name)
            .unwrap_or_else(|| "someone".to_string());
        self.push_system(format!("{name} left the room"));
        self.events.push_back(ChatEvent::ParticipantLeft { id });
    }

    fn join_frame(&self, room_id: &str) -> ClientMessage {
        ClientMessage::JoinRoom {
            room_id: room_id.to_string(),
            identity_id: self.identity.aid().to_string(),
            display_name: self.identity.display_name().to_string(),
        }
    }

    fn key_changed(&mut self, room_id: String) {
        let status = self.key_status();
        self.events
            .push_back(ChatEvent::KeyStatusChanged { room_id, status });
    }

    fn push_system(&mut self, content: String) {
        self.push_message(DisplayedMessage {
            message_id: Uuid::new_v4().to_string(),
            sender_id: String::new(),
            sender_display_name: String::new(),
            payload: content.clone(),
            signature: String::new(),
            timestamp: Utc::now().to_rfc3339(),
            kind: MessageKind::System,
            content,
            encrypted: false,
            signature_valid: None,
        });
    }

    fn push_message(&mut self, message: DisplayedMessage) {
        self.messages.push(message.clone());
        self.events.push_back(ChatEvent::Message(message));
    }

    fn fail(&mut self, message: String) {
        self.last_error = Some(message.clone());
        self.events.push_back(ChatEvent::Error(message));
    }
}
