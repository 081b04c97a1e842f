use async_trait::async_trait;

use courier_types::events::{RelayEvent, Topic};

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("failed to encode {kind} event: {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("relay unavailable: {0}")]
    Unavailable(String),
}

/// Publishing side of the pub/sub transport.
///
/// Delivery is fire-and-forget and at-least-once to whoever is subscribed at
/// publish time. Nothing is queued for subscribers that are not connected.
#[async_trait]
pub trait EventRelay: Send + Sync {
    async fn publish(&self, topic: Topic, event: RelayEvent) -> Result<(), RelayError>;
}
