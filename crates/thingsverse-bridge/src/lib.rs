//! Thingsverse Bridge
//!
//! Reconciles ephemeral broker sessions with durable agent identities:
//! classifies inbound topics, upserts agents as connected, stores their
//! metrics, and broadcasts `agent/connected` / `agent/disconnected` once per
//! connection.

pub mod bridge;
pub mod config;
pub mod disconnect;
pub mod errors;
pub mod metrics;
pub mod registrar;
pub mod registry;
pub mod runtime;
pub mod store;
pub mod testing;
pub mod transport;

pub use bridge::{Bridge, Outcome};
pub use config::BridgeConfig;
pub use errors::{BridgeError, Severity};
pub use registry::{SessionRegistry, SetOutcome, SharedRegistry};
pub use runtime::BridgeRuntime;
pub use store::{AgentStore, MemoryStore, MetricStore, StoreError, StoredMetric, TimeoutStore};
pub use transport::{Publisher, TransportError, TransportEvent};
