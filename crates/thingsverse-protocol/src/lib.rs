//! Thingsverse Protocol - Core types and topic definitions
//!
//! Describes what agents publish over the broker (`agent/message`) and
//! what the bridge broadcasts back (`agent/connected`, `agent/disconnected`).
//! All bodies are JSON.

pub mod error;
pub mod payload;
pub mod topics;
pub mod types;

pub use error::*;
pub use payload::{decode_payload, parse_agent_report};
pub use topics::*;
pub use types::*;
