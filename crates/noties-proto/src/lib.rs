use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A document as delivered by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Insert a new document; the server generates an id when none is given.
    Create,
    /// Shallow-merge the payload into the document, creating it if missing.
    MergeUpdate,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unavailable,
    PermissionDenied,
    ResourceExhausted,
    LeaseExpired,
    NotFound,
    InvalidArgument,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        subscription_id: u64,
        path: String,
    },
    Unsubscribe {
        subscription_id: u64,
    },
    Fetch {
        request_id: u64,
        path: String,
    },
    Write {
        request_id: u64,
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        doc_id: Option<String>,
        mode: WriteMode,
        #[serde(default)]
        payload: Map<String, Value>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full current set of documents under the subscribed path.
    Snapshot {
        subscription_id: u64,
        documents: Vec<Document>,
    },
    /// The feed is dead; the server will not send more snapshots for it.
    SubscriptionError {
        subscription_id: u64,
        code: ErrorCode,
        message: String,
    },
    Fetched {
        request_id: u64,
        #[serde(default)]
        document: Option<Document>,
    },
    WriteAck {
        request_id: u64,
        doc_id: String,
    },
    RequestError {
        request_id: u64,
        code: ErrorCode,
        message: String,
    },
}

impl ServerMessage {
    /// Request id for replies to `fetch` / `write`, None for feed messages.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            ServerMessage::Fetched { request_id, .. }
            | ServerMessage::WriteAck { request_id, .. }
            | ServerMessage::RequestError { request_id, .. } => Some(*request_id),
            ServerMessage::Snapshot { .. } | ServerMessage::SubscriptionError { .. } => None,
        }
    }
}
