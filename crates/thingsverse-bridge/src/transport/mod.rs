//! Transport collaborator: lifecycle and publish events in, publishes out.

pub mod feed;

use async_trait::async_trait;
use serde::Serialize;

use thingsverse_protocol::SessionId;

use crate::errors::BridgeError;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Events delivered by the broker.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    ClientConnected(SessionId),
    ClientDisconnected(SessionId),
    Published {
        topic: String,
        payload: Option<Vec<u8>>,
        publisher: SessionId,
    },
    /// The broker hit an unrecoverable error.
    Error(String),
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;
}

/// Serialize `body` as JSON and publish it on `topic`.
pub async fn publish_json<P, T>(publisher: &P, topic: &str, body: &T) -> Result<(), BridgeError>
where
    P: Publisher + ?Sized,
    T: Serialize + ?Sized,
{
    let to_error = |source: TransportError| BridgeError::Publish {
        topic: topic.to_string(),
        source,
    };
    let payload = serde_json::to_vec(body).map_err(|e| to_error(TransportError::Encode(e)))?;
    publisher.publish(topic, payload).await.map_err(to_error)
}
