//! Per-room key negotiation.
//!
//! ```text
//!            join ack, alone
//!   NONE ─────────────────────────────────────▶ ESTABLISHED
//!     │                                             ▲
//!     │ join ack, others present                    │ share unwrapped
//!     ▼                                             │
//!   REQUESTING ─────────────────────────────────────┘
//! ```
//!
//! The first member of a room generates the key. Everyone after that
//! broadcasts a `roomKeyRequest`; any established member answers with the key
//! wrapped under the X25519 secret it shares with the requester. The requester
//! keeps the first share it can unwrap and ignores the rest.
//!
//! Leaving or losing the connection drops the key. Rejoining starts over.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use anonfly_common::{ClientMessage, Participant};
use anonfly_crypto::{Identity, RoomKey, Sealed};

/// Observable negotiation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    None,
    Requesting,
    Established,
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Requesting => "requesting",
            Self::Established => "established",
        };
        f.write_str(s)
    }
}

/// Established always carries the key.
enum RoomKeyState {
    None,
    Requesting,
    Established(RoomKey),
}

impl RoomKeyState {
    fn status(&self) -> KeyStatus {
        match self {
            Self::None => KeyStatus::None,
            Self::Requesting => KeyStatus::Requesting,
            Self::Established(_) => KeyStatus::Established,
        }
    }
}

/// Current members of one room, keyed by identity id.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    members: HashMap<String, Participant>,
}

impl Roster {
    pub fn from_participants(participants: Vec<Participant>) -> Self {
        Self {
            members: participants.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Participant> {
        self.members.get(id)
    }

    pub fn insert(&mut self, participant: Participant) {
        self.members.insert(participant.id.clone(), participant);
    }

    pub fn remove(&mut self, id: &str) -> Option<Participant> {
        self.members.remove(id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// True when nobody but `self_id` is present.
    pub fn only_contains(&self, self_id: &str) -> bool {
        self.members.keys().all(|id| id == self_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.members.values()
    }
}

/// Key negotiation for the one room this client is in.
pub struct RoomKeyNegotiator {
    identity: Arc<Identity>,
    room_id: String,
    roster: Roster,
    state: RoomKeyState,
}

impl RoomKeyNegotiator {
    pub fn new(identity: Arc<Identity>, room_id: impl Into<String>) -> Self {
        Self {
            identity,
            room_id: room_id.into(),
            roster: Roster::default(),
            state: RoomKeyState::None,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn status(&self) -> KeyStatus {
        self.state.status()
    }

    pub fn room_key(&self) -> Option<&RoomKey> {
        match &self.state {
            RoomKeyState::Established(key) => Some(key),
            _ => None,
        }
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    fn self_id(&self) -> &str {
        self.identity.aid().as_str()
    }

    /// Join acknowledged with the room's roster.
    ///
    /// Returns the key request to broadcast when others are already present.
    pub fn on_join_ack(&mut self, participants: Vec<Participant>) -> Option<ClientMessage> {
        self.roster = Roster::from_participants(participants);

        if !matches!(self.state, RoomKeyState::None) {
            debug!(
                "Room {}: join ack while {}, roster refreshed only",
                self.room_id,
                self.status()
            );
            return None;
        }

        if self.roster.only_contains(self.self_id()) {
            let key = RoomKey::generate();
            info!(
                "Room {}: first member, generated room key {}",
                self.room_id,
                key.fingerprint()
            );
            self.state = RoomKeyState::Established(key);
            None
        } else {
            debug!(
                "Room {}: {} member(s) present, requesting key",
                self.room_id,
                self.roster.len()
            );
            self.state = RoomKeyState::Requesting;
            Some(ClientMessage::RoomKeyRequest {
                room_id: self.room_id.clone(),
            })
        }
    }

    /// Another member asks for the key. Returns the share addressed to them.
    pub fn on_key_request(&self, room_id: &str, requester_id: &str) -> Option<ClientMessage> {
        if room_id != self.room_id {
            debug!("Ignoring key request for room {}", room_id);
            return None;
        }
        if requester_id == self.self_id() {
            return None;
        }
        let RoomKeyState::Established(key) = &self.state else {
            debug!(
                "Room {}: cannot answer key request while {}",
                self.room_id,
                self.status()
            );
            return None;
        };
        let Some(requester) = self.roster.get(requester_id) else {
            warn!(
                "Room {}: key request from unknown member {}",
                self.room_id, requester_id
            );
            return None;
        };

        let sealed = self
            .identity
            .exchange()
            .derive_wrapping_key(&requester.exchange_public_key)
            .and_then(|wrapping| key.wrap_for(&wrapping));
        match sealed {
            Ok(sealed) => {
                let (wrapped_key, iv) = sealed.to_base64();
                debug!("Room {}: sharing key with {}", self.room_id, requester_id);
                Some(ClientMessage::RoomKeyShare {
                    room_id: self.room_id.clone(),
                    target_id: requester_id.to_string(),
                    wrapped_key,
                    iv,
                })
            }
            Err(e) => {
                warn!(
                    "Room {}: could not wrap key for {}: {}",
                    self.room_id, requester_id, e
                );
                None
            }
        }
    }

    /// A wrapped key arrived. Returns true when it established the room key.
    pub fn on_key_share(
        &mut self,
        room_id: &str,
        target_id: &str,
        sender_id: &str,
        wrapped_key: &str,
        iv: &str,
    ) -> bool {
        if room_id != self.room_id || target_id != self.self_id() {
            return false;
        }
        if !matches!(self.state, RoomKeyState::Requesting) {
            debug!(
                "Room {}: ignoring share from {} while {}",
                self.room_id,
                sender_id,
                self.status()
            );
            return false;
        }
        let Some(sender) = self.roster.get(sender_id) else {
            warn!(
                "Room {}: key share from unknown member {}",
                self.room_id, sender_id
            );
            return false;
        };

        let key = Sealed::from_base64(wrapped_key, iv).and_then(|sealed| {
            let wrapping = self
                .identity
                .exchange()
                .derive_wrapping_key(&sender.exchange_public_key)?;
            RoomKey::unwrap_with(&sealed, &wrapping)
        });
        match key {
            Ok(key) => {
                info!(
                    "Room {}: room key {} received from {}",
                    self.room_id,
                    key.fingerprint(),
                    sender_id
                );
                self.state = RoomKeyState::Established(key);
                true
            }
            Err(e) => {
                warn!(
                    "Room {}: share from {} unusable: {}",
                    self.room_id, sender_id, e
                );
                false
            }
        }
    }

    pub fn add_participant(&mut self, participant: Participant) {
        debug!("Room {}: {} joined", self.room_id, participant.id);
        self.roster.insert(participant);
    }

    pub fn remove_participant(&mut self, id: &str) -> Option<Participant> {
        debug!("Room {}: {} left", self.room_id, id);
        self.roster.remove(id)
    }

    /// Drop the key and return to NONE.
    pub fn reset(&mut self) {
        if !matches!(self.state, RoomKeyState::None) {
            debug!("Room {}: key state reset", self.room_id);
        }
        self.state = RoomKeyState::None;
    }
}

impl fmt::Debug for RoomKeyNegotiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomKeyNegotiator")
            .field("room_id", &self.room_id)
            .field("status", &self.status())
            .field("members", &self.roster.len())
            .finish()
    }
}

/// Roster entry for a local identity.
pub fn participant_for(identity: &Identity) -> Participant {
    Participant {
        id: identity.aid().to_string(),
        display_name: identity.display_name().to_string(),
        signing_public_key: identity.signing_public_spki(),
        exchange_public_key: identity.exchange_public_spki(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anonfly_crypto::IV_LEN;

    fn member(name: &str) -> Arc<Identity> {
        Arc::new(Identity::generate(name))
    }

    fn share_fields(msg: ClientMessage) -> (String, String, String, String) {
        match msg {
            ClientMessage::RoomKeyShare {
                room_id,
                target_id,
                wrapped_key,
                iv,
            } => (room_id, target_id, wrapped_key, iv),
            other => panic!("expected share, got {other:?}"),
        }
    }

    #[test]
    fn test_alone_generates() {
        let a = member("alice");
        let mut neg = RoomKeyNegotiator::new(a.clone(), "r1");
        assert_eq!(neg.status(), KeyStatus::None);
        assert!(neg.on_join_ack(vec![participant_for(&a)]).is_none());
        assert_eq!(neg.status(), KeyStatus::Established);
        assert!(neg.room_key().is_some());
    }

    #[test]
    fn test_empty_roster_generates() {
        let mut neg = RoomKeyNegotiator::new(member("alice"), "r1");
        assert!(neg.on_join_ack(Vec::new()).is_none());
        assert_eq!(neg.status(), KeyStatus::Established);
    }

    #[test]
    fn test_others_present_requests() {
        let a = member("alice");
        let b = member("bob");
        let mut neg = RoomKeyNegotiator::new(b.clone(), "r1");
        let msg = neg.on_join_ack(vec![participant_for(&a), participant_for(&b)]);
        assert_eq!(
            msg,
            Some(ClientMessage::RoomKeyRequest {
                room_id: "r1".into()
            })
        );
        assert_eq!(neg.status(), KeyStatus::Requesting);
        assert!(neg.room_key().is_none());
    }

    #[test]
    fn test_request_answered_and_share_accepted() {
        let a = member("alice");
        let b = member("bob");
        let roster = vec![participant_for(&a), participant_for(&b)];

        let mut na = RoomKeyNegotiator::new(a.clone(), "r1");
        na.on_join_ack(vec![participant_for(&a)]);
        na.add_participant(participant_for(&b));

        let mut nb = RoomKeyNegotiator::new(b.clone(), "r1");
        nb.on_join_ack(roster);

        let share = na.on_key_request("r1", b.aid().as_str()).unwrap();
        let (room, target, wrapped, iv) = share_fields(share);
        assert_eq!(target, b.aid().as_str());
        assert!(nb.on_key_share(&room, &target, a.aid().as_str(), &wrapped, &iv));
        assert_eq!(nb.status(), KeyStatus::Established);

        let iv = [1u8; IV_LEN];
        assert_eq!(
            na.room_key().unwrap().encrypt_with_iv(b"x", &iv).unwrap(),
            nb.room_key().unwrap().encrypt_with_iv(b"x", &iv).unwrap()
        );
    }

    #[test]
    fn test_request_ignored_unless_established() {
        let a = member("alice");
        let b = member("bob");
        let c = member("carol");
        let mut na = RoomKeyNegotiator::new(a.clone(), "r1");
        na.on_join_ack(vec![participant_for(&a), participant_for(&b)]);
        assert_eq!(na.status(), KeyStatus::Requesting);
        assert!(na.on_key_request("r1", b.aid().as_str()).is_none());

        let mut nc = RoomKeyNegotiator::new(c.clone(), "r1");
        assert!(nc.on_key_request("r1", b.aid().as_str()).is_none());
        nc.on_join_ack(Vec::new());
        // From self, from a stranger, and for another room.
        assert!(nc.on_key_request("r1", c.aid().as_str()).is_none());
        assert!(nc.on_key_request("r1", b.aid().as_str()).is_none());
        nc.add_participant(participant_for(&b));
        assert!(nc.on_key_request("r2", b.aid().as_str()).is_none());
        assert!(nc.on_key_request("r1", b.aid().as_str()).is_some());
    }

    #[test]
    fn test_second_share_changes_nothing() {
        let a = member("alice");
        let b = member("bob");
        let c = member("carol");

        let mut na = RoomKeyNegotiator::new(a.clone(), "r1");
        na.on_join_ack(vec![]);
        na.add_participant(participant_for(&c));

        // Bob has a different key; both answer Carol.
        let mut nb = RoomKeyNegotiator::new(b.clone(), "r1");
        nb.on_join_ack(vec![]);
        nb.add_participant(participant_for(&c));

        let mut nc = RoomKeyNegotiator::new(c.clone(), "r1");
        nc.on_join_ack(vec![
            participant_for(&a),
            participant_for(&b),
            participant_for(&c),
        ]);

        let (r, t, w, iv) = share_fields(na.on_key_request("r1", c.aid().as_str()).unwrap());
        assert!(nc.on_key_share(&r, &t, a.aid().as_str(), &w, &iv));
        let first = nc.room_key().unwrap().fingerprint();

        let (r, t, w, iv) = share_fields(nb.on_key_request("r1", c.aid().as_str()).unwrap());
        assert!(!nc.on_key_share(&r, &t, b.aid().as_str(), &w, &iv));
        assert_eq!(nc.room_key().unwrap().fingerprint(), first);
        assert_eq!(first, na.room_key().unwrap().fingerprint());
    }

    #[test]
    fn test_bad_share_keeps_requesting() {
        let a = member("alice");
        let b = member("bob");
        let mut nb = RoomKeyNegotiator::new(b.clone(), "r1");
        nb.on_join_ack(vec![participant_for(&a), participant_for(&b)]);

        assert!(!nb.on_key_share("r1", b.aid().as_str(), a.aid().as_str(), "AAAA", "AAAA"));
        assert!(!nb.on_key_share(
            "r1",
            b.aid().as_str(),
            a.aid().as_str(),
            "not base64!",
            "AAAAAAAAAAAAAAAA"
        ));
        assert_eq!(nb.status(), KeyStatus::Requesting);
    }

    #[test]
    fn test_share_for_someone_else_ignored() {
        let a = member("alice");
        let b = member("bob");
        let c = member("carol");

        let mut na = RoomKeyNegotiator::new(a.clone(), "r1");
        na.on_join_ack(vec![]);
        na.add_participant(participant_for(&b));
        let (r, t, w, iv) = share_fields(na.on_key_request("r1", b.aid().as_str()).unwrap());

        let mut nc = RoomKeyNegotiator::new(c.clone(), "r1");
        nc.on_join_ack(vec![participant_for(&a), participant_for(&c)]);
        assert!(!nc.on_key_share(&r, &t, a.aid().as_str(), &w, &iv));
        assert_eq!(nc.status(), KeyStatus::Requesting);

        // Addressed to Carol but for another room.
        assert!(!nc.on_key_share("r2", c.aid().as_str(), a.aid().as_str(), &w, &iv));
    }

    #[test]
    fn test_reset_returns_to_none_and_renegotiates() {
        let a = member("alice");
        let mut na = RoomKeyNegotiator::new(a.clone(), "r1");
        na.on_join_ack(vec![]);
        let before = na.room_key().unwrap().fingerprint();

        na.reset();
        assert_eq!(na.status(), KeyStatus::None);
        assert!(na.room_key().is_none());

        na.on_join_ack(vec![participant_for(&a)]);
        assert_eq!(na.status(), KeyStatus::Established);
        assert_ne!(na.room_key().unwrap().fingerprint(), before);
    }

    #[test]
    fn test_roster_maintenance() {
        let a = member("alice");
        let b = member("bob");
        let mut na = RoomKeyNegotiator::new(a.clone(), "r1");
        na.on_join_ack(vec![participant_for(&a)]);
        na.add_participant(participant_for(&b));
        assert_eq!(na.roster().len(), 2);
        assert!(na.remove_participant(b.aid().as_str()).is_some());
        assert!(na.roster().only_contains(a.aid().as_str()));
        assert!(na.on_key_request("r1", b.aid().as_str()).is_none());
    }
}
