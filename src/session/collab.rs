use loro::{Counter, ExportMode, LoroDoc, PeerID, VersionVector};
use std::collections::HashMap;
use tracing::debug;

use crate::models::{Participant, PresenceState};
use super::error::SessionError;

/// The in-memory state of one collaboratively edited document.
///
/// Merging is delegated to a `LoroDoc`; the session never interprets the
/// document content. Callers are expected to serialize access (the registry
/// hands out the session only under its per-document lock).
pub struct CollaborationSession {
    id: String,
    doc: LoroDoc,
    participants: HashMap<String, Participant>,
    /// Every connection a participant has open, oldest first
    connections: HashMap<String, Vec<String>>,
}

impl CollaborationSession {
    /// Create a session, optionally rehydrated from a persisted snapshot
    pub fn new(id: impl Into<String>, snapshot: Option<&[u8]>) -> Result<Self, SessionError> {
        let id = id.into();
        let doc = LoroDoc::new();
        if let Some(bytes) = snapshot {
            doc.import(bytes)
                .map_err(|e| SessionError::MalformedUpdate(format!("snapshot for '{}': {}", id, e)))?;
        }
        Ok(Self {
            id,
            doc,
            participants: HashMap::new(),
            connections: HashMap::new(),
        })
    }

    /// Merge a binary update. `origin` names the connection the update came from.
    ///
    /// A payload the engine cannot decode leaves the document untouched.
    pub fn apply_update(&mut self, update: &[u8], origin: &str) -> Result<(), SessionError> {
        if update.is_empty() {
            return Err(SessionError::MalformedUpdate("empty update".to_string()));
        }
        let status = self
            .doc
            .import_with(update, origin)
            .map_err(|e| SessionError::MalformedUpdate(e.to_string()))?;
        if status.pending.is_some() {
            // Causally incomplete; the engine keeps it until its dependencies arrive.
            debug!("Update from {} for document {} is waiting on missing dependencies", origin, self.id);
        }
        Ok(())
    }

    /// Encoded summary of every operation this replica has seen
    pub fn state_vector(&self) -> Vec<u8> {
        encode_state_vector(&self.doc.oplog_vv())
    }

    /// The updates a peer holding `state_vector` is missing.
    ///
    /// An empty state vector stands for a peer that has seen nothing.
    pub fn diff(&self, state_vector: &[u8]) -> Result<Vec<u8>, SessionError> {
        let from = if state_vector.is_empty() {
            VersionVector::new()
        } else {
            VersionVector::decode(state_vector)
                .map_err(|e| SessionError::MalformedStateVector(e.to_string()))?
        };
        self.doc
            .export(ExportMode::updates(&from))
            .map_err(|e| SessionError::Export(e.to_string()))
    }

    /// Full encoded state, for new joiners and persistence.
    ///
    /// Exported from a replica rebuilt from the operations alone, so sessions
    /// holding the same operations produce the same bytes whatever order
    /// they arrived in.
    pub fn snapshot(&self) -> Result<Vec<u8>, SessionError> {
        let updates = self
            .doc
            .export(ExportMode::all_updates())
            .map_err(|e| SessionError::Export(e.to_string()))?;
        let replica = LoroDoc::new();
        replica
            .import(&updates)
            .map_err(|e| SessionError::Export(e.to_string()))?;
        replica
            .export(ExportMode::Snapshot)
            .map_err(|e| SessionError::Export(e.to_string()))
    }

    /// Add a connection for a user. The entry is replaced, so the newest
    /// connection's participant details win.
    pub fn add_participant(&mut self, participant: Participant) {
        let connections = self.connections.entry(participant.user_id.clone()).or_default();
        if !connections.contains(&participant.connection_id) {
            connections.push(participant.connection_id.clone());
        }
        self.participants.insert(participant.user_id.clone(), participant);
    }

    /// Drop one connection of a user.
    ///
    /// Returns true only when it was the user's last connection and the
    /// participant is gone. While other connections remain the entry is
    /// handed to the newest of them.
    pub fn remove_participant(&mut self, user_id: &str, connection_id: &str) -> bool {
        let Some(connections) = self.connections.get_mut(user_id) else {
            return false;
        };
        let Some(index) = connections.iter().position(|c| c == connection_id) else {
            return false;
        };
        connections.remove(index);
        match connections.last().cloned() {
            Some(newest) => {
                if let Some(participant) = self.participants.get_mut(user_id) {
                    if participant.connection_id == connection_id {
                        participant.connection_id = newest;
                    }
                }
                false
            }
            None => {
                self.connections.remove(user_id);
                self.participants.remove(user_id);
                true
            }
        }
    }

    /// Whether `connection_id` is one of the user's open connections
    pub fn has_connection(&self, user_id: &str, connection_id: &str) -> bool {
        self.connections
            .get(user_id)
            .is_some_and(|connections| connections.iter().any(|c| c == connection_id))
    }

    #[cfg(test)]
    pub fn participant(&self, user_id: &str) -> Option<&Participant> {
        self.participants.get(user_id)
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// Replace a participant's presence payload, returning the updated entry
    pub fn set_presence_state(&mut self, user_id: &str, presence_state: PresenceState) -> Option<&Participant> {
        let participant = self.participants.get_mut(user_id)?;
        participant.presence_state = presence_state;
        Some(participant)
    }
}

/// Encode a version vector with its entries inserted in (peer, counter)
/// order, so equal vectors always encode to equal bytes
pub fn encode_state_vector(vv: &VersionVector) -> Vec<u8> {
    let mut entries: Vec<(PeerID, Counter)> = vv.iter().map(|(peer, counter)| (*peer, *counter)).collect();
    entries.sort_unstable();
    entries.into_iter().collect::<VersionVector>().encode()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use loro::{LoroValue, ToJson};

    /// A client replica producing updates the way an editor would
    pub(crate) struct Editor {
        pub doc: LoroDoc,
    }

    impl Editor {
        pub fn new(peer: u64) -> Self {
            let doc = LoroDoc::new();
            doc.set_peer_id(peer).unwrap();
            Self { doc }
        }

        /// Insert text and return the incremental update
        pub fn type_text(&self, pos: usize, text: &str) -> Vec<u8> {
            let before = self.doc.oplog_vv();
            self.doc.get_text("text").insert(pos, text).unwrap();
            self.doc.commit();
            self.doc.export(ExportMode::updates(&before)).unwrap()
        }

        pub fn set_title(&self, title: &str) -> Vec<u8> {
            let before = self.doc.oplog_vv();
            self.doc.get_map("meta").insert("title", title).unwrap();
            self.doc.commit();
            self.doc.export(ExportMode::updates(&before)).unwrap()
        }
    }

    pub(crate) fn value_of(bytes: &[u8]) -> LoroValue {
        let doc = LoroDoc::new();
        doc.import(bytes).unwrap();
        doc.get_deep_value()
    }

    fn session_value(session: &CollaborationSession) -> LoroValue {
        value_of(&session.snapshot().unwrap())
    }

    #[test]
    fn updates_converge_regardless_of_order_and_duplicates() {
        let alice = Editor::new(1);
        let bob = Editor::new(2);
        let u1 = alice.type_text(0, "hello");
        let u2 = bob.set_title("draft");
        let u3 = alice.type_text(5, " world");

        let mut first = CollaborationSession::new("doc1", None).unwrap();
        for u in [&u1, &u2, &u3] {
            first.apply_update(u, "a").unwrap();
        }

        let mut second = CollaborationSession::new("doc1", None).unwrap();
        for u in [&u3, &u2, &u1, &u2, &u3] {
            second.apply_update(u, "b").unwrap();
        }

        assert_eq!(first.snapshot().unwrap(), second.snapshot().unwrap());
        assert_eq!(first.state_vector(), second.state_vector());
        assert_eq!(
            session_value(&first).to_json_value()["text"],
            serde_json::json!("hello world")
        );
    }

    #[test]
    fn applying_an_update_twice_is_idempotent() {
        let editor = Editor::new(7);
        let update = editor.type_text(0, "once");

        let mut once = CollaborationSession::new("doc1", None).unwrap();
        once.apply_update(&update, "c1").unwrap();
        let mut twice = CollaborationSession::new("doc1", None).unwrap();
        twice.apply_update(&update, "c1").unwrap();
        twice.apply_update(&update, "c1").unwrap();

        assert_eq!(once.snapshot().unwrap(), twice.snapshot().unwrap());
        assert_eq!(once.state_vector(), twice.state_vector());
    }

    #[test]
    fn diff_brings_a_stale_replica_up_to_date() {
        let editor = Editor::new(3);
        let mut session = CollaborationSession::new("doc1", None).unwrap();
        session.apply_update(&editor.type_text(0, "abc"), "c1").unwrap();

        let replica = LoroDoc::new();
        replica.import(&session.diff(&[]).unwrap()).unwrap();
        let seen = encode_state_vector(&replica.oplog_vv());

        session.apply_update(&editor.type_text(3, "def"), "c1").unwrap();
        replica.import(&session.diff(&seen).unwrap()).unwrap();

        assert_eq!(replica.get_deep_value(), session_value(&session));
        assert_eq!(encode_state_vector(&replica.oplog_vv()), session.state_vector());
    }

    #[test]
    fn equal_version_vectors_encode_identically() {
        let forward: VersionVector = [(1, 11), (2, 1), (9, 4)].into_iter().collect();
        let mut backward = VersionVector::new();
        for (peer, counter) in [(9, 4), (2, 1), (1, 11)] {
            backward.insert(peer, counter);
        }
        assert_eq!(forward, backward);
        assert_eq!(encode_state_vector(&forward), encode_state_vector(&backward));
        assert_eq!(VersionVector::decode(&encode_state_vector(&forward)).unwrap(), forward);
    }

    #[test]
    fn snapshots_match_across_peers_applying_in_different_orders() {
        let editors: Vec<Editor> = (10..14).map(Editor::new).collect();
        let updates: Vec<Vec<u8>> = editors
            .iter()
            .enumerate()
            .flat_map(|(i, e)| [e.type_text(0, &format!("p{i}")), e.set_title(&format!("t{i}"))])
            .collect();

        let mut forward = CollaborationSession::new("doc1", None).unwrap();
        for u in &updates {
            forward.apply_update(u, "a").unwrap();
        }
        let mut reversed = CollaborationSession::new("doc1", None).unwrap();
        for u in updates.iter().rev() {
            reversed.apply_update(u, "b").unwrap();
        }

        assert_eq!(forward.snapshot().unwrap(), reversed.snapshot().unwrap());
        assert_eq!(forward.state_vector(), reversed.state_vector());
    }

    #[test]
    fn malformed_update_is_rejected_without_touching_state() {
        let editor = Editor::new(4);
        let mut session = CollaborationSession::new("doc1", None).unwrap();
        session.apply_update(&editor.type_text(0, "keep"), "c1").unwrap();
        let before = session.state_vector();

        let err = session.apply_update(b"definitely not a loro update", "c2").unwrap_err();
        assert!(matches!(err, SessionError::MalformedUpdate(_)));
        assert!(matches!(session.apply_update(&[], "c2"), Err(SessionError::MalformedUpdate(_))));
        assert_eq!(session.state_vector(), before);
    }

    #[test]
    fn undecodable_state_vector_is_reported() {
        let session = CollaborationSession::new("doc1", None).unwrap();
        assert!(matches!(
            session.diff(&[0xff, 0xff, 0xff, 0xff]),
            Err(SessionError::MalformedStateVector(_))
        ));
    }

    #[test]
    fn session_rehydrates_from_snapshot() {
        let editor = Editor::new(5);
        let mut original = CollaborationSession::new("doc1", None).unwrap();
        original.apply_update(&editor.type_text(0, "persisted"), "c1").unwrap();

        let restored = CollaborationSession::new("doc1", Some(&original.snapshot().unwrap())).unwrap();
        assert_eq!(session_value(&restored), session_value(&original));
        assert!(matches!(
            CollaborationSession::new("doc1", Some(b"junk")),
            Err(SessionError::MalformedUpdate(_))
        ));
    }

    #[test]
    fn participants_are_keyed_by_user() {
        let mut session = CollaborationSession::new("doc1", None).unwrap();
        session.add_participant(Participant::new("u1", "conn-1"));
        session.add_participant(Participant::new("u2", "conn-2"));
        session.add_participant(Participant::new("u1", "conn-3"));
        assert_eq!(session.participant_count(), 2);
        assert_eq!(session.participant("u1").unwrap().connection_id, "conn-3");
        assert!(session.has_connection("u1", "conn-1") && session.has_connection("u1", "conn-3"));

        let mut cursor = PresenceState::new();
        cursor.insert("cursor".to_string(), serde_json::json!(12));
        assert!(session.set_presence_state("u2", cursor.clone()).is_some());
        assert!(session.set_presence_state("ghost", cursor).is_none());

        assert!(session.remove_participant("u2", "conn-2"));
        assert!(!session.remove_participant("u2", "conn-2"));
        assert_eq!(session.participant_count(), 1);
    }

    #[test]
    fn participant_stays_until_its_last_connection_closes() {
        let mut session = CollaborationSession::new("doc1", None).unwrap();
        session.add_participant(Participant::new("u1", "tab-1"));
        session.add_participant(Participant::new("u1", "tab-2"));

        // Newest tab first
        assert!(!session.remove_participant("u1", "tab-2"));
        assert_eq!(session.participant_count(), 1);
        assert_eq!(session.participant("u1").unwrap().connection_id, "tab-1");
        assert!(!session.has_connection("u1", "tab-2"));

        assert!(!session.remove_participant("u1", "unknown-tab"));
        assert!(session.remove_participant("u1", "tab-1"));
        assert_eq!(session.participant_count(), 0);
        assert!(!session.has_connection("u1", "tab-1"));
    }
}
