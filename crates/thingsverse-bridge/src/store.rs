//! Persistence collaborator for agents and metrics.
//!
//! The bridge only needs two calls: an upsert of an agent keyed by uuid and
//! an append of one metric for an agent. [`MemoryStore`] is the in-process
//! backend used by the binary; [`TimeoutStore`] bounds any backend's calls.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use thingsverse_protocol::{AgentIdentity, MetricSample, MetricValue};

/// Number of samples returned by [`MemoryStore::metrics_by_type`].
pub const METRIC_HISTORY_LIMIT: usize = 20;

/// Samples [`MemoryStore`] retains per agent and metric type by default.
pub const DEFAULT_MAX_SAMPLES_PER_TYPE: usize = 100;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("invalid agent: {0}")]
    InvalidAgent(String),

    #[error("invalid metric: {0}")]
    InvalidMetric(String),

    #[error("storage call timed out after {0:?}")]
    Timeout(Duration),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// A metric sample as persisted, timestamped by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMetric {
    pub id: Uuid,
    pub agent_uuid: String,
    #[serde(rename = "type")]
    pub metric_type: String,
    pub value: MetricValue,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Create the agent if its uuid is unknown, otherwise overwrite it.
    async fn create_or_update_agent(&self, agent: &AgentIdentity) -> Result<AgentIdentity, StoreError>;
}

#[async_trait]
pub trait MetricStore: Send + Sync {
    async fn create_metric(&self, agent_uuid: &str, sample: &MetricSample) -> Result<StoredMetric, StoreError>;
}

/// An agent row with bookkeeping timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: u64,
    pub agent: AgentIdentity,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    agents: HashMap<String, AgentRecord>,
    /// agent uuid -> metric type -> samples, oldest first
    metrics: HashMap<String, HashMap<String, VecDeque<StoredMetric>>>,
    next_agent_id: u64,
}

/// Process-local store. Contents are lost on restart.
///
/// Keeps at most `max_samples_per_type` samples for each agent and metric
/// type; the oldest sample is evicted first.
#[derive(Debug)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
    max_samples_per_type: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_SAMPLES_PER_TYPE)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store retaining `max_samples_per_type` samples per series (at least one).
    pub fn with_capacity(max_samples_per_type: usize) -> Self {
        Self {
            inner: RwLock::new(MemoryInner::default()),
            max_samples_per_type: max_samples_per_type.max(1),
        }
    }

    pub fn max_samples_per_type(&self) -> usize {
        self.max_samples_per_type
    }

    pub async fn find_agent(&self, uuid: &str) -> Option<AgentRecord> {
        self.inner.read().await.agents.get(uuid).cloned()
    }

    pub async fn connected_agents(&self) -> Vec<AgentIdentity> {
        let inner = self.inner.read().await;
        let mut agents: Vec<AgentIdentity> = inner
            .agents
            .values()
            .filter(|r| r.agent.connected)
            .map(|r| r.agent.clone())
            .collect();
        agents.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        agents
    }

    /// Distinct metric types recorded for an agent, sorted.
    pub async fn metric_types(&self, agent_uuid: &str) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut types: Vec<String> = inner
            .metrics
            .get(agent_uuid)
            .map(|series| series.keys().cloned().collect())
            .unwrap_or_default();
        types.sort();
        types
    }

    /// Most recent samples of one type for an agent, newest first.
    pub async fn metrics_by_type(&self, agent_uuid: &str, metric_type: &str) -> Vec<StoredMetric> {
        let inner = self.inner.read().await;
        inner
            .metrics
            .get(agent_uuid)
            .and_then(|series| series.get(metric_type))
            .map(|samples| samples.iter().rev().take(METRIC_HISTORY_LIMIT).cloned().collect())
            .unwrap_or_default()
    }

    /// Samples currently retained, across all agents and types.
    pub async fn metric_count(&self) -> usize {
        let inner = self.inner.read().await;
        inner
            .metrics
            .values()
            .flat_map(|series| series.values())
            .map(VecDeque::len)
            .sum()
    }
}

#[async_trait]
impl AgentStore for MemoryStore {
    async fn create_or_update_agent(&self, agent: &AgentIdentity) -> Result<AgentIdentity, StoreError> {
        if agent.uuid.trim().is_empty() {
            return Err(StoreError::InvalidAgent("uuid must not be empty".into()));
        }
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.agents.get_mut(&agent.uuid) {
            existing.agent = agent.clone();
            existing.updated_at = now;
            return Ok(existing.agent.clone());
        }
        inner.next_agent_id += 1;
        let record = AgentRecord {
            id: inner.next_agent_id,
            agent: agent.clone(),
            created_at: now,
            updated_at: now,
        };
        inner.agents.insert(agent.uuid.clone(), record);
        Ok(agent.clone())
    }
}

#[async_trait]
impl MetricStore for MemoryStore {
    async fn create_metric(&self, agent_uuid: &str, sample: &MetricSample) -> Result<StoredMetric, StoreError> {
        if sample.metric_type.trim().is_empty() {
            return Err(StoreError::InvalidMetric("metric type must not be empty".into()));
        }
        if sample.value.is_null() {
            return Err(StoreError::InvalidMetric(format!(
                "metric '{}' has no value",
                sample.metric_type
            )));
        }
        let mut inner = self.inner.write().await;
        if !inner.agents.contains_key(agent_uuid) {
            return Err(StoreError::AgentNotFound(agent_uuid.to_string()));
        }
        let stored = StoredMetric {
            id: Uuid::new_v4(),
            agent_uuid: agent_uuid.to_string(),
            metric_type: sample.metric_type.clone(),
            value: sample.value.clone(),
            created_at: Utc::now(),
        };
        let samples = inner
            .metrics
            .entry(agent_uuid.to_string())
            .or_default()
            .entry(sample.metric_type.clone())
            .or_default();
        if samples.len() >= self.max_samples_per_type {
            samples.pop_front();
        }
        samples.push_back(stored.clone());
        Ok(stored)
    }
}

/// Wraps a backend so that every call fails with [`StoreError::Timeout`]
/// instead of hanging past `timeout`.
#[derive(Debug)]
pub struct TimeoutStore<S> {
    inner: S,
    timeout: Duration,
}

impl<S> TimeoutStore<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: AgentStore> AgentStore for TimeoutStore<S> {
    async fn create_or_update_agent(&self, agent: &AgentIdentity) -> Result<AgentIdentity, StoreError> {
        tokio::time::timeout(self.timeout, self.inner.create_or_update_agent(agent))
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }
}

#[async_trait]
impl<S: MetricStore> MetricStore for TimeoutStore<S> {
    async fn create_metric(&self, agent_uuid: &str, sample: &MetricSample) -> Result<StoredMetric, StoreError> {
        tokio::time::timeout(self.timeout, self.inner.create_metric(agent_uuid, sample))
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }
}
