use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};

use crate::models::{Participant, PresenceState};

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct JoinSessionMessage {
    pub document_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LeaveSessionMessage {
    pub document_id: String,
}

#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DocumentUpdateMessage {
    pub document_id: String,
    #[serde_as(as = "Base64")]
    pub update: Vec<u8>,
}

#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequestMessage {
    pub document_id: String,
    #[serde_as(as = "Base64")]
    #[serde(default)]
    pub state_vector: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdateMessage {
    pub document_id: String,
    #[serde(default)]
    pub presence_state: PresenceState,
}

/// Events a client may send
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinSession(JoinSessionMessage),
    LeaveSession(LeaveSessionMessage),
    DocumentUpdate(DocumentUpdateMessage),
    SyncRequest(SyncRequestMessage),
    PresenceUpdate(PresenceUpdateMessage),
    Ping,
}

#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SessionJoinedMessage {
    pub document_id: String,
    #[serde_as(as = "Base64")]
    pub document_state: Vec<u8>,
    #[serde_as(as = "Base64")]
    pub state_vector: Vec<u8>,
    pub participants: Vec<Participant>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UserJoinedMessage {
    pub document_id: String,
    pub user_id: String,
    pub connection_id: String,
    pub presence_state: PresenceState,
}

#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SyncReplyMessage {
    pub document_id: String,
    #[serde_as(as = "Base64")]
    pub diff: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PresenceBroadcastMessage {
    pub document_id: String,
    pub user_id: String,
    pub presence_state: PresenceState,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SessionErrorMessage {
    pub message: String,
    pub code: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UserLeftMessage {
    pub document_id: String,
    pub user_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PongMessage {
    pub date: String,
}

/// Events the server sends, either to one client or to a room
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum ServerEvent {
    SessionJoined(SessionJoinedMessage),
    UserJoined(UserJoinedMessage),
    DocumentUpdate(DocumentUpdateMessage),
    SyncReply(SyncReplyMessage),
    PresenceUpdate(PresenceBroadcastMessage),
    SessionError(SessionErrorMessage),
    UserLeft(UserLeftMessage),
    Pong(PongMessage),
}

impl ServerEvent {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerEvent::SessionError(SessionErrorMessage {
            message: message.into(),
            code: code.to_string(),
        })
    }
}

/// Error codes reported through `session-error`
pub mod codes {
    pub const AUTH_FAILED: &str = "AUTH_FAILED";
    pub const MALFORMED_MESSAGE: &str = "MALFORMED_MESSAGE";
    pub const MALFORMED_UPDATE: &str = "MALFORMED_UPDATE";
    pub const MALFORMED_STATE_VECTOR: &str = "MALFORMED_STATE_VECTOR";
    pub const NOT_JOINED: &str = "NOT_JOINED";
    pub const JOIN_FAILED: &str = "JOIN_FAILED";
    pub const SYNC_FAILED: &str = "SYNC_FAILED";
    pub const UPDATE_FAILED: &str = "UPDATE_FAILED";
    pub const RESYNC_REQUIRED: &str = "RESYNC_REQUIRED";
}
