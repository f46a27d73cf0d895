//! Session teardown: mark the agent offline and announce it.

use std::sync::Arc;

use thingsverse_protocol::{DisconnectedNotice, SessionId, TOPIC_AGENT_DISCONNECTED};

use crate::errors::{self, BridgeError};
use crate::registry::SharedRegistry;
use crate::store::AgentStore;
use crate::transport::{publish_json, Publisher};

pub struct DisconnectionHandler<S, P> {
    store: Arc<S>,
    publisher: Arc<P>,
    sessions: SharedRegistry,
}

impl<S: AgentStore, P: Publisher> DisconnectionHandler<S, P> {
    pub fn new(store: Arc<S>, publisher: Arc<P>, sessions: SharedRegistry) -> Self {
        Self {
            store,
            publisher,
            sessions,
        }
    }

    /// Evict `session` and, if it had reported an agent, persist that agent
    /// as disconnected and announce it.
    ///
    /// Returns the uuid announced, or `None` when the session never reported.
    /// The entry stays evicted even when persistence fails.
    pub async fn on_session_closed(&self, session: &SessionId) -> Result<Option<String>, BridgeError> {
        let Some(agent) = self.sessions.write().await.close(session) else {
            return Ok(None);
        };

        let offline = agent.with_connected(false);
        self.store
            .create_or_update_agent(&offline)
            .await
            .map_err(|source| BridgeError::Disconnection {
                uuid: offline.uuid.clone(),
                source,
            })?;

        let notice = DisconnectedNotice::new(offline.uuid.clone());
        if let Err(e) = publish_json(self.publisher.as_ref(), TOPIC_AGENT_DISCONNECTED, &notice).await {
            errors::report(&e);
        }
        tracing::info!(
            session = %session,
            uuid = %offline.uuid,
            "Session closed, agent marked as disconnected"
        );
        Ok(Some(offline.uuid))
    }
}
