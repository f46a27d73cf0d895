//! Metric persistence with per-sample failure isolation.

use std::sync::Arc;

use thingsverse_protocol::MetricSample;

use crate::errors::{self, BridgeError};
use crate::store::{MetricStore, StoredMetric};

/// Result of storing one batch. Partial success is normal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricBatchReport {
    pub stored: Vec<StoredMetric>,
    pub failed: usize,
}

pub struct MetricWriter<S> {
    store: Arc<S>,
}

impl<S: MetricStore> MetricWriter<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Append every sample for `agent_uuid`, one call each. A failing sample
    /// is reported and skipped; later samples are still attempted.
    pub async fn store(&self, agent_uuid: &str, samples: &[MetricSample]) -> MetricBatchReport {
        let mut report = MetricBatchReport::default();
        for sample in samples {
            match self.store.create_metric(agent_uuid, sample).await {
                Ok(stored) => {
                    tracing::debug!(
                        metric_id = %stored.id,
                        uuid = %agent_uuid,
                        metric_type = %stored.metric_type,
                        "Metric saved"
                    );
                    report.stored.push(stored);
                }
                Err(source) => {
                    report.failed += 1;
                    errors::report(&BridgeError::Metric {
                        uuid: agent_uuid.to_string(),
                        metric_type: sample.metric_type.clone(),
                        source,
                    });
                }
            }
        }
        report
    }
}
