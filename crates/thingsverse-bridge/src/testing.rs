//! Scriptable collaborators for exercising the bridge without a broker or
//! database.

use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use thingsverse_protocol::{AgentIdentity, MetricSample};

use crate::store::{AgentStore, MemoryStore, MetricStore, StoreError, StoredMetric};
use crate::transport::{Publisher, TransportError};

/// Records every publish; can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(String, Vec<u8>)>>,
    failing: AtomicBool,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every publish as `(topic, payload)`, in order.
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// JSON bodies published on `topic`, in order.
    pub fn on_topic(&self, topic: &str) -> Vec<serde_json::Value> {
        self.published()
            .into_iter()
            .filter(|(t, _)| t == topic)
            .filter_map(|(_, p)| serde_json::from_slice(&p).ok())
            .collect()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if let Ok(mut published) = self.published.lock() {
            published.push((topic.to_string(), payload));
        }
        Ok(())
    }
}

/// A [`MemoryStore`] that records calls, injects failures per agent uuid
/// or metric type, and can delay every call.
#[derive(Debug, Default)]
pub struct ScriptedStore {
    inner: MemoryStore,
    upserts: Mutex<Vec<AgentIdentity>>,
    metric_calls: Mutex<Vec<(String, MetricSample)>>,
    failing_agents: Mutex<HashSet<String>>,
    failing_metrics: Mutex<HashSet<String>>,
    delay: Option<Duration>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn fail_agent(&self, uuid: &str) {
        if let Ok(mut set) = self.failing_agents.lock() {
            set.insert(uuid.to_string());
        }
    }

    pub fn heal_agent(&self, uuid: &str) {
        if let Ok(mut set) = self.failing_agents.lock() {
            set.remove(uuid);
        }
    }

    pub fn fail_metric(&self, metric_type: &str) {
        if let Ok(mut set) = self.failing_metrics.lock() {
            set.insert(metric_type.to_string());
        }
    }

    /// Every upsert attempted, including failed ones.
    pub fn upserts(&self) -> Vec<AgentIdentity> {
        self.upserts.lock().map(|u| u.clone()).unwrap_or_default()
    }

    /// Every metric append attempted, including failed ones.
    pub fn metric_calls(&self) -> Vec<(String, MetricSample)> {
        self.metric_calls.lock().map(|m| m.clone()).unwrap_or_default()
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn contains(set: &Mutex<HashSet<String>>, key: &str) -> bool {
        set.lock().map(|s| s.contains(key)).unwrap_or(false)
    }
}

#[async_trait]
impl AgentStore for ScriptedStore {
    async fn create_or_update_agent(&self, agent: &AgentIdentity) -> Result<AgentIdentity, StoreError> {
        if let Ok(mut upserts) = self.upserts.lock() {
            upserts.push(agent.clone());
        }
        self.pause().await;
        if Self::contains(&self.failing_agents, &agent.uuid) {
            return Err(StoreError::Backend(format!("injected failure for agent {}", agent.uuid)));
        }
        self.inner.create_or_update_agent(agent).await
    }
}

#[async_trait]
impl MetricStore for ScriptedStore {
    async fn create_metric(&self, agent_uuid: &str, sample: &MetricSample) -> Result<StoredMetric, StoreError> {
        if let Ok(mut calls) = self.metric_calls.lock() {
            calls.push((agent_uuid.to_string(), sample.clone()));
        }
        self.pause().await;
        if Self::contains(&self.failing_metrics, &sample.metric_type) {
            return Err(StoreError::Backend(format!(
                "injected failure for metric {}",
                sample.metric_type
            )));
        }
        self.inner.create_metric(agent_uuid, sample).await
    }
}

/// Collects the JSON log events emitted on the current thread while its
/// guard is alive. Pair it with a current-thread runtime.
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub fn install() -> (Self, tracing::subscriber::DefaultGuard) {
        let capture = Self::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || writer.clone())
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (capture, guard)
    }

    /// Every captured event, in order.
    pub fn events(&self) -> Vec<serde_json::Value> {
        let bytes = self.buf.lock().map(|b| b.clone()).unwrap_or_default();
        String::from_utf8_lossy(&bytes)
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    /// Number of events at `level` (`"WARN"`, `"ERROR"`, ...).
    pub fn count_at(&self, level: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.get("level").and_then(serde_json::Value::as_str) == Some(level))
            .count()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if let Ok(mut buf) = self.buf.lock() {
            buf.extend_from_slice(data);
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Agent fixture with the given uuid.
pub fn agent_fixture(uuid: &str) -> AgentIdentity {
    AgentIdentity {
        uuid: uuid.to_string(),
        name: "fixture".to_string(),
        username: "things".to_string(),
        hostname: "test-host".to_string(),
        pid: 0,
        connected: false,
    }
}

/// `agent/message` body for `agent` carrying `metrics`.
pub fn report_body(agent: &AgentIdentity, metrics: &[MetricSample]) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "agent": agent,
        "metrics": metrics,
    }))
    .unwrap_or_default()
}
