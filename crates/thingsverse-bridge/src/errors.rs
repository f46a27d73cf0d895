//! Error taxonomy and the recoverable/fatal split.
//!
//! Per-message failures are reported here and dropped. Fatal failures are
//! returned up to `main`, which is the only place that terminates the
//! process (see [`fatal_exit`]).

use thingsverse_protocol::ProtocolError;

use crate::store::StoreError;
use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("malformed payload on '{topic}': {source}")]
    MalformedPayload {
        topic: String,
        #[source]
        source: ProtocolError,
    },

    #[error("topic not valid: '{0}'")]
    UnrecognizedTopic(String),

    #[error("failed to register agent {uuid}: {source}")]
    Registration {
        uuid: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to store metric '{metric_type}' for agent {uuid}: {source}")]
    Metric {
        uuid: String,
        metric_type: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to mark agent {uuid} as disconnected: {source}")]
    Disconnection {
        uuid: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to publish on '{topic}': {source}")]
    Publish {
        topic: String,
        #[source]
        source: TransportError,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("transport event stream closed")]
    TransportClosed,

    #[error("bootstrap error: {0}")]
    Bootstrap(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Whether an error may be logged and skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Recoverable,
    Fatal,
}

impl BridgeError {
    pub fn severity(&self) -> Severity {
        match self {
            Self::Transport(_) | Self::TransportClosed | Self::Bootstrap(_) | Self::Config(_) => {
                Severity::Fatal
            }
            _ => Severity::Recoverable,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

/// Log an error at the level its kind calls for.
pub fn report(err: &BridgeError) {
    match err {
        BridgeError::MalformedPayload { .. } => {
            tracing::warn!(error = %err, "Payload not valid");
        }
        BridgeError::UnrecognizedTopic(topic) => {
            tracing::warn!(topic = %topic, "Topic not valid");
        }
        e if e.is_fatal() => {
            tracing::error!(error = %e, fatal = true, "Fatal bridge error");
        }
        e => {
            tracing::error!(error = %e, "Bridge error");
        }
    }
}

/// Top-level error boundary: log and terminate with status 1.
pub fn fatal_exit(err: &anyhow::Error) -> ! {
    tracing::error!(error = %format!("{err:#}"), fatal = true, "Terminating");
    eprintln!("[fatal error] {err:#}");
    std::process::exit(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_classification() {
        assert!(BridgeError::Transport("broker down".into()).is_fatal());
        assert!(BridgeError::TransportClosed.is_fatal());
        assert!(BridgeError::Bootstrap("bind".into()).is_fatal());
        assert!(BridgeError::Config("bad".into()).is_fatal());

        assert_eq!(
            BridgeError::UnrecognizedTopic("x".into()).severity(),
            Severity::Recoverable
        );
        let store_failure = BridgeError::Registration {
            uuid: "u1".into(),
            source: StoreError::Backend("db down".into()),
        };
        assert_eq!(store_failure.severity(), Severity::Recoverable);
        let metric_failure = BridgeError::Metric {
            uuid: "u1".into(),
            metric_type: "rss".into(),
            source: StoreError::AgentNotFound("u1".into()),
        };
        assert!(!metric_failure.is_fatal());
    }

    #[test]
    fn test_error_messages_name_the_subject() {
        let err = BridgeError::Disconnection {
            uuid: "u1".into(),
            source: StoreError::Backend("db down".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("u1"));
        assert!(msg.contains("db down"));
        assert_eq!(
            BridgeError::UnrecognizedTopic("unknown/topic".into()).to_string(),
            "topic not valid: 'unknown/topic'"
        );
    }
}
