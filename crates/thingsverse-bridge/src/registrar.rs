//! Agent registration: upsert as connected, announce once per connection.

use std::sync::Arc;

use thingsverse_protocol::{AgentIdentity, SessionId, TOPIC_AGENT_CONNECTED};

use crate::errors::{self, BridgeError};
use crate::registry::{SetOutcome, SharedRegistry};
use crate::store::AgentStore;
use crate::transport::{publish_json, Publisher};

/// What a successful registration did.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    /// The identity as persisted.
    pub agent: AgentIdentity,
    /// Whether this registration announced the agent on `agent/connected`.
    pub announced: bool,
}

pub struct Registrar<S, P> {
    store: Arc<S>,
    publisher: Arc<P>,
    sessions: SharedRegistry,
}

impl<S: AgentStore, P: Publisher> Registrar<S, P> {
    pub fn new(store: Arc<S>, publisher: Arc<P>, sessions: SharedRegistry) -> Self {
        Self {
            store,
            publisher,
            sessions,
        }
    }

    /// Persist `identity` as connected and cache it for `session`.
    ///
    /// An agent is announced whenever nothing was cached for the session
    /// beforehand: the first identity on an open session, and every report
    /// from a session the transport never opened (nothing can be cached
    /// for it). A failed upsert leaves the registry untouched and announces
    /// nothing.
    pub async fn register(
        &self,
        identity: &AgentIdentity,
        session: &SessionId,
    ) -> Result<Registration, BridgeError> {
        let persisted = self
            .store
            .create_or_update_agent(&identity.with_connected(true))
            .await
            .map_err(|source| BridgeError::Registration {
                uuid: identity.uuid.clone(),
                source,
            })?;
        tracing::debug!(uuid = %persisted.uuid, session = %session, "Agent saved");

        // Check-and-cache happens under one lock, so two registrations on
        // the same session can never both see an empty slot.
        let outcome = self.sessions.write().await.set(session, persisted.clone());
        if outcome == SetOutcome::NotOpen {
            tracing::debug!(session = %session, "Session not tracked, identity not cached");
        }
        let announced = outcome != SetOutcome::Refreshed;

        if announced {
            match publish_json(self.publisher.as_ref(), TOPIC_AGENT_CONNECTED, &persisted).await {
                Ok(()) => {
                    tracing::info!(uuid = %persisted.uuid, session = %session, "Agent connected");
                }
                Err(e) => errors::report(&e),
            }
        }

        Ok(Registration {
            agent: persisted,
            announced,
        })
    }
}
