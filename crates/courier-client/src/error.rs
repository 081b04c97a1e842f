use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use courier_types::api::ErrorKind;
use courier_types::events::Topic;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The server answered with a failure body.
    #[error("{kind:?}: {message}")]
    Api { kind: ErrorKind, message: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid frame: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Loading a conversation after subscribing failed. Shared by every
    /// caller waiting on the same conversation.
    #[error("snapshot of {conversation_id} failed: {source}")]
    Snapshot {
        conversation_id: Uuid,
        #[source]
        source: Arc<ClientError>,
    },

    #[error("subscription to {topic} rejected: {reason}")]
    Rejected { topic: Topic, reason: String },

    #[error("session closed")]
    Closed,
}

impl ClientError {
    /// The server-side failure kind, if the server produced one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ClientError::Api { kind, .. } => Some(*kind),
            ClientError::Snapshot { source, .. } => source.kind(),
            _ => None,
        }
    }
}
