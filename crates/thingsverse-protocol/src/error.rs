/// Errors raised while interpreting a message body.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("payload is empty")]
    EmptyPayload,

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
