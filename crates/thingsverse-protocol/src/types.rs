use serde::{Deserialize, Serialize};

/// Durable identity of a telemetry agent, keyed by `uuid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Stable external identifier; the upsert key.
    pub uuid: String,
    /// Human-readable agent name.
    pub name: String,
    /// Owning username.
    pub username: String,
    /// Host the agent reports from.
    pub hostname: String,
    /// Process id of the agent on its host.
    pub pid: u32,
    /// Connectivity flag. Agents never need to send it; the bridge owns it.
    #[serde(default)]
    pub connected: bool,
}

impl AgentIdentity {
    /// Copy of this identity with the connectivity flag forced to `connected`.
    pub fn with_connected(&self, connected: bool) -> Self {
        Self {
            connected,
            ..self.clone()
        }
    }
}

/// Value carried by a metric sample. Integers stay integers.
///
/// Agents report whatever their metric function returned, so anything that
/// is not a scalar (arrays, objects, `null`, or no value at all) is kept
/// as raw JSON in [`MetricValue::Other`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
    Other(serde_json::Value),
}

impl Default for MetricValue {
    fn default() -> Self {
        Self::Other(serde_json::Value::Null)
    }
}

impl MetricValue {
    /// True for an explicit `null` or a sample that carried no value.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Other(serde_json::Value::Null))
    }
}

impl From<serde_json::Value> for MetricValue {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n),
            serde_json::Value::String(s) => Self::Text(s),
            other => Self::Other(other),
        }
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        Self::Number(v.into())
    }
}

impl From<i32> for MetricValue {
    fn from(v: i32) -> Self {
        Self::Number(v.into())
    }
}

impl From<u64> for MetricValue {
    fn from(v: u64) -> Self {
        Self::Number(v.into())
    }
}

impl From<bool> for MetricValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::Other(v) => write!(f, "{v}"),
        }
    }
}

/// One metric reading. The creation timestamp is assigned on persistence.
///
/// Both fields default when absent. Empty types and missing values are
/// rejected per sample on persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    #[serde(rename = "type", default)]
    pub metric_type: String,
    #[serde(default)]
    pub value: MetricValue,
}

impl MetricSample {
    pub fn new(metric_type: impl Into<String>, value: impl Into<MetricValue>) -> Self {
        Self {
            metric_type: metric_type.into(),
            value: value.into(),
        }
    }
}

/// Identifier the transport assigns to one physical connection.
/// Does not survive a reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Body of an `agent/message` publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReport {
    pub agent: AgentIdentity,
    pub metrics: Vec<MetricSample>,
}

/// Agent reference carried by the disconnected notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRef {
    pub uuid: String,
}

/// Body of an outbound `agent/disconnected` publish: `{"agent":{"uuid":..}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectedNotice {
    pub agent: AgentRef,
}

impl DisconnectedNotice {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            agent: AgentRef { uuid: uuid.into() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_ignores_unknown_fields() {
        let json = r#"{"id":1,"uuid":"yyy-yyy-yyy","name":"fixture","username":"things",
            "hostname":"text-host","pid":0,"createdAt":"2017-01-01T00:00:00Z"}"#;
        let agent: AgentIdentity = serde_json::from_str(json).unwrap();
        assert_eq!(agent.uuid, "yyy-yyy-yyy");
        assert!(!agent.connected, "connected defaults to false");
    }

    #[test]
    fn test_with_connected_keeps_descriptive_fields() {
        let agent = AgentIdentity {
            uuid: "u1".into(),
            name: "n".into(),
            username: "a".into(),
            hostname: "h".into(),
            pid: 1,
            connected: false,
        };
        let online = agent.with_connected(true);
        assert!(online.connected);
        assert_eq!(online.uuid, agent.uuid);
        assert_eq!(online.hostname, agent.hostname);
    }

    #[test]
    fn test_metric_value_variants() {
        let samples: Vec<MetricSample> = serde_json::from_str(
            r#"[{"type":"rss","value":123},{"type":"up","value":true},{"type":"v","value":"1.2"}]"#,
        )
        .unwrap();
        assert_eq!(samples[0].value, MetricValue::from(123));
        assert_eq!(samples[1].value, MetricValue::Bool(true));
        assert_eq!(samples[2].value, MetricValue::Text("1.2".into()));

        let json = serde_json::to_string(&samples[0]).unwrap();
        assert_eq!(json, r#"{"type":"rss","value":123}"#);
    }

    #[test]
    fn test_metric_value_keeps_structured_and_missing_values() {
        let samples: Vec<MetricSample> = serde_json::from_str(
            r#"[{"type":"loadavg","value":[0.1,0.2,0.3]},{"type":"mem","value":{"free":1}},
                {"type":"gone","value":null},{"type":"absent"}]"#,
        )
        .unwrap();
        assert_eq!(
            samples[0].value,
            MetricValue::Other(serde_json::json!([0.1, 0.2, 0.3]))
        );
        assert_eq!(samples[1].value, MetricValue::Other(serde_json::json!({"free": 1})));
        assert!(samples[2].value.is_null());
        assert!(samples[3].value.is_null());
        assert!(!MetricValue::from(0).is_null());
        assert_eq!(MetricValue::from(serde_json::json!("x")), MetricValue::Text("x".into()));
    }

    #[test]
    fn test_disconnected_notice_shape() {
        let json = serde_json::to_value(DisconnectedNotice::new("u1")).unwrap();
        assert_eq!(json, serde_json::json!({"agent": {"uuid": "u1"}}));
    }

    #[test]
    fn test_session_id_is_transparent() {
        let id = SessionId::from("s1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"s1\"");
        assert_eq!(id.to_string(), "s1");
    }
}
