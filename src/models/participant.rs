use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form presence payload (cursor, selection, viewport, ...)
pub type PresenceState = Map<String, Value>;

/// A user connected to a collaboration session
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    pub connection_id: String,
    #[serde(default)]
    pub presence_state: PresenceState,
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    pub fn new(user_id: impl Into<String>, connection_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            connection_id: connection_id.into(),
            presence_state: PresenceState::new(),
            joined_at: Utc::now(),
        }
    }
}

/// Reverse index entry used to resolve a disconnect without client context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketTrackEntry {
    pub user_id: String,
    pub document_id: String,
}
