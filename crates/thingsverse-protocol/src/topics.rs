//! Broker topics used by agents and the bridge.

/// Broadcast by the bridge when an agent is first seen on a connection.
pub const TOPIC_AGENT_CONNECTED: &str = "agent/connected";
/// Broadcast by the bridge when an announced connection goes away.
pub const TOPIC_AGENT_DISCONNECTED: &str = "agent/disconnected";
/// Published by agents: identity plus a batch of metrics.
pub const TOPIC_AGENT_MESSAGE: &str = "agent/message";

/// Classification of an inbound topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    ConnectedNotice,
    DisconnectedNotice,
    AgentMessage,
    Unrecognized,
}

impl TopicKind {
    pub fn classify(topic: &str) -> Self {
        match topic {
            TOPIC_AGENT_CONNECTED => Self::ConnectedNotice,
            TOPIC_AGENT_DISCONNECTED => Self::DisconnectedNotice,
            TOPIC_AGENT_MESSAGE => Self::AgentMessage,
            _ => Self::Unrecognized,
        }
    }

    pub fn as_str(&self) -> Option<&'static str> {
        match self {
            Self::ConnectedNotice => Some(TOPIC_AGENT_CONNECTED),
            Self::DisconnectedNotice => Some(TOPIC_AGENT_DISCONNECTED),
            Self::AgentMessage => Some(TOPIC_AGENT_MESSAGE),
            Self::Unrecognized => None,
        }
    }

    /// Notices are the bridge's own broadcasts.
    pub fn is_notice(&self) -> bool {
        matches!(self, Self::ConnectedNotice | Self::DisconnectedNotice)
    }
}

pub fn is_connected_notice(topic: &str) -> bool {
    TopicKind::classify(topic) == TopicKind::ConnectedNotice
}

pub fn is_disconnected_notice(topic: &str) -> bool {
    TopicKind::classify(topic) == TopicKind::DisconnectedNotice
}

pub fn is_agent_message(topic: &str) -> bool {
    TopicKind::classify(topic) == TopicKind::AgentMessage
}

/// Every topic the bridge understands.
pub fn topics_allowed() -> [&'static str; 3] {
    [TOPIC_AGENT_CONNECTED, TOPIC_AGENT_DISCONNECTED, TOPIC_AGENT_MESSAGE]
}
