//! Message body decoding.
//!
//! Broker payloads arrive as raw bytes (text publishers and binary
//! publishers look the same here). Decoding never fails loudly: anything
//! that is not a JSON value collapses into the "no payload" sentinel,
//! represented as `None`.

use serde_json::Value;

use crate::error::ProtocolError;
use crate::types::AgentReport;

/// Decode a raw body into a JSON value.
///
/// Returns `None` for an absent or blank body, for a literal `null`, and for
/// anything that is not valid UTF-8 JSON.
pub fn decode_payload(raw: Option<&[u8]>) -> Option<Value> {
    let bytes = raw?;
    let text = match std::str::from_utf8(bytes) {
        Ok(t) => t,
        Err(e) => {
            tracing::debug!(error = %e, len = bytes.len(), "Payload is not valid UTF-8");
            return None;
        }
    };
    if text.trim().is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Null) => None,
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!(error = %e, len = bytes.len(), "Payload is not valid JSON");
            None
        }
    }
}

impl AgentReport {
    /// Structural check of a decoded `agent/message` body.
    ///
    /// Requires an `agent` object and a `metrics` array; field types are
    /// enforced by deserialization, nothing beyond that.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let obj = value
            .as_object()
            .ok_or_else(|| ProtocolError::MalformedPayload("expected a JSON object".into()))?;
        if !obj.get("agent").is_some_and(Value::is_object) {
            return Err(ProtocolError::MalformedPayload("missing 'agent' object".into()));
        }
        if !obj.get("metrics").is_some_and(Value::is_array) {
            return Err(ProtocolError::MalformedPayload("missing 'metrics' array".into()));
        }
        serde_json::from_value(value).map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
    }
}

/// Decode and shape-check an `agent/message` body in one step.
pub fn parse_agent_report(raw: Option<&[u8]>) -> Result<AgentReport, ProtocolError> {
    let value = decode_payload(raw).ok_or(ProtocolError::EmptyPayload)?;
    AgentReport::from_value(value)
}
