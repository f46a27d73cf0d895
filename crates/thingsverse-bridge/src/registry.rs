//! In-memory map from transport session to the agent last registered on it.
//!
//! An entry exists exactly while the transport reports the session as
//! connected. The cached identity doubles as the "already announced" flag:
//! [`SessionRegistry::set`] tells the caller whether this is the first
//! identity on the connection, in the same critical section that stores it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use thingsverse_protocol::{AgentIdentity, SessionId};

/// Registry handle shared by the registrar, the disconnection handler and
/// the bridge. Never hold the lock across a persistence or publish call.
pub type SharedRegistry = Arc<RwLock<SessionRegistry>>;

/// Result of caching an identity for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// The session was never opened; nothing was stored.
    NotOpen,
    /// First identity on this connection.
    First,
    /// An identity was already cached and has been replaced.
    Refreshed,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    /// session -> identity last registered on it (None until the first report)
    sessions: HashMap<SessionId, Option<AgentIdentity>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedRegistry {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Start tracking a session with no identity. Re-opening resets it.
    pub fn open(&mut self, session: &SessionId) {
        self.sessions.insert(session.clone(), None);
    }

    pub fn get(&self, session: &SessionId) -> Option<&AgentIdentity> {
        self.sessions.get(session).and_then(Option::as_ref)
    }

    /// Cache `identity` for an open session. Unopened sessions are ignored.
    pub fn set(&mut self, session: &SessionId, identity: AgentIdentity) -> SetOutcome {
        match self.sessions.get_mut(session) {
            None => SetOutcome::NotOpen,
            Some(slot) => {
                let outcome = if slot.is_some() {
                    SetOutcome::Refreshed
                } else {
                    SetOutcome::First
                };
                *slot = Some(identity);
                outcome
            }
        }
    }

    /// Stop tracking a session, returning whatever identity it held.
    pub fn close(&mut self, session: &SessionId) -> Option<AgentIdentity> {
        self.sessions.remove(session).flatten()
    }

    pub fn is_open(&self, session: &SessionId) -> bool {
        self.sessions.contains_key(session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(uuid: &str) -> AgentIdentity {
        AgentIdentity {
            uuid: uuid.into(),
            name: "fixture".into(),
            username: "things".into(),
            hostname: "test-host".into(),
            pid: 0,
            connected: true,
        }
    }

    #[test]
    fn test_open_then_get_is_empty() {
        let mut reg = SessionRegistry::new();
        let s = SessionId::from("s1");
        reg.open(&s);
        assert!(reg.is_open(&s));
        assert!(reg.get(&s).is_none());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_set_reports_first_then_refreshed() {
        let mut reg = SessionRegistry::new();
        let s = SessionId::from("s1");
        reg.open(&s);
        assert_eq!(reg.set(&s, agent("u1")), SetOutcome::First);
        assert_eq!(reg.set(&s, agent("u1")), SetOutcome::Refreshed);
        assert_eq!(reg.get(&s).map(|a| a.uuid.as_str()), Some("u1"));
    }

    #[test]
    fn test_set_on_unopened_session_is_ignored() {
        let mut reg = SessionRegistry::new();
        let s = SessionId::from("ghost");
        assert_eq!(reg.set(&s, agent("u1")), SetOutcome::NotOpen);
        assert!(!reg.is_open(&s));
        assert!(reg.get(&s).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_reopen_resets_identity() {
        let mut reg = SessionRegistry::new();
        let s = SessionId::from("s1");
        reg.open(&s);
        reg.set(&s, agent("u1"));
        reg.open(&s);
        assert!(reg.get(&s).is_none());
        assert_eq!(reg.set(&s, agent("u1")), SetOutcome::First);
    }

    #[test]
    fn test_close_returns_prior_identity() {
        let mut reg = SessionRegistry::new();
        let a = SessionId::from("a");
        let b = SessionId::from("b");
        reg.open(&a);
        reg.open(&b);
        reg.set(&a, agent("u1"));

        assert_eq!(reg.close(&a).map(|x| x.uuid), Some("u1".to_string()));
        assert!(reg.close(&b).is_none(), "open without identity closes to None");
        assert!(reg.close(&a).is_none(), "second close finds nothing");
        assert!(reg.is_empty());
    }
}
