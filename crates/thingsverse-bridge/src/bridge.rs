//! Message dispatch for one bridge instance.
//!
//! Ties the registry, registrar, metric writer and disconnection handler
//! together behind the three transport callbacks. Every per-message error
//! is reported here and never returned to the transport.
//!
//! Callbacks for one session must not overlap; [`crate::runtime`] takes
//! care of that when events come from a live transport.

use std::sync::Arc;

use thingsverse_protocol::{parse_agent_report, SessionId, TopicKind};

use crate::disconnect::DisconnectionHandler;
use crate::errors::{self, BridgeError};
use crate::metrics::{MetricBatchReport, MetricWriter};
use crate::registrar::Registrar;
use crate::registry::{SessionRegistry, SharedRegistry};
use crate::store::{AgentStore, MetricStore};
use crate::transport::Publisher;

/// What happened to one published message.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// One of the bridge's own notices, echoed back by the broker.
    Ignored(TopicKind),
    Unrecognized,
    Malformed,
    /// Persisting the identity failed; metrics were not attempted.
    RegistrationFailed,
    Processed {
        uuid: String,
        announced: bool,
        metrics: MetricBatchReport,
    },
}

pub struct Bridge<S, P> {
    sessions: SharedRegistry,
    registrar: Registrar<S, P>,
    metrics: MetricWriter<S>,
    disconnect: DisconnectionHandler<S, P>,
}

impl<S, P> Bridge<S, P>
where
    S: AgentStore + MetricStore + 'static,
    P: Publisher + 'static,
{
    pub fn new(store: Arc<S>, publisher: Arc<P>) -> Self {
        let sessions = SessionRegistry::shared();
        Self {
            registrar: Registrar::new(Arc::clone(&store), Arc::clone(&publisher), Arc::clone(&sessions)),
            metrics: MetricWriter::new(Arc::clone(&store)),
            disconnect: DisconnectionHandler::new(store, publisher, Arc::clone(&sessions)),
            sessions,
        }
    }

    /// Registry handle, for inspection.
    pub fn sessions(&self) -> SharedRegistry {
        Arc::clone(&self.sessions)
    }

    pub async fn on_client_connected(&self, session: &SessionId) {
        tracing::debug!(session = %session, "Client connected");
        self.sessions.write().await.open(session);
    }

    pub async fn on_published(
        &self,
        topic: &str,
        payload: Option<&[u8]>,
        publisher: &SessionId,
    ) -> Outcome {
        tracing::debug!(topic = %topic, session = %publisher, "Received");
        match TopicKind::classify(topic) {
            kind @ (TopicKind::ConnectedNotice | TopicKind::DisconnectedNotice) => {
                tracing::debug!(
                    topic = %topic,
                    payload = %String::from_utf8_lossy(payload.unwrap_or_default()),
                    "Notice echoed back, ignoring"
                );
                Outcome::Ignored(kind)
            }
            TopicKind::AgentMessage => self.on_agent_message(topic, payload, publisher).await,
            TopicKind::Unrecognized => {
                errors::report(&BridgeError::UnrecognizedTopic(topic.to_string()));
                Outcome::Unrecognized
            }
        }
    }

    async fn on_agent_message(
        &self,
        topic: &str,
        payload: Option<&[u8]>,
        publisher: &SessionId,
    ) -> Outcome {
        let report = match parse_agent_report(payload) {
            Ok(r) => r,
            Err(source) => {
                errors::report(&BridgeError::MalformedPayload {
                    topic: topic.to_string(),
                    source,
                });
                return Outcome::Malformed;
            }
        };

        let registration = match self.registrar.register(&report.agent, publisher).await {
            Ok(r) => r,
            Err(e) => {
                errors::report(&e);
                return Outcome::RegistrationFailed;
            }
        };

        let metrics = self.metrics.store(&registration.agent.uuid, &report.metrics).await;
        Outcome::Processed {
            uuid: registration.agent.uuid,
            announced: registration.announced,
            metrics,
        }
    }

    /// Returns the uuid announced as disconnected, if any.
    pub async fn on_client_disconnected(&self, session: &SessionId) -> Option<String> {
        tracing::debug!(session = %session, "Client disconnected");
        match self.disconnect.on_session_closed(session).await {
            Ok(uuid) => uuid,
            Err(e) => {
                errors::report(&e);
                None
            }
        }
    }
}
