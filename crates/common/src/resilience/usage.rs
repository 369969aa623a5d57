//! Usage tracking port for retried calls
//!
//! The retry executor reports every attempt (success, failure, or timeout)
//! to a [`UsageTracker`]. Tracking is fire-and-forget from the executor's
//! point of view: implementations swallow their own errors.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::utils::serde::duration_millis;

/// One attempt made by the retry executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    /// Logical endpoint the attempt was made against
    pub endpoint: String,
    /// 1-based attempt number within one `run`
    pub attempt: u32,
    /// Caller-supplied cost estimate (tokens, bytes, ...)
    pub approximate_cost: u64,
    #[serde(with = "duration_millis", rename = "elapsed_ms")]
    pub elapsed: Duration,
    pub success: bool,
    /// Display text of the attempt's error, when it failed
    pub error_message: Option<String>,
}

/// Receives one record per attempt
#[async_trait]
pub trait UsageTracker: Send + Sync {
    async fn record_attempt(&self, record: AttemptRecord);
}

/// Discards every record
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopUsageTracker;

#[async_trait]
impl UsageTracker for NoopUsageTracker {
    async fn record_attempt(&self, _record: AttemptRecord) {}
}

/// Emits every record as a structured tracing event
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingUsageTracker;

#[async_trait]
impl UsageTracker for TracingUsageTracker {
    async fn record_attempt(&self, record: AttemptRecord) {
        let elapsed_ms = duration_millis::to_millis(&record.elapsed);
        if record.success {
            debug!(
                endpoint = %record.endpoint,
                attempt = record.attempt,
                approximate_cost = record.approximate_cost,
                elapsed_ms,
                "Inference attempt succeeded"
            );
        } else {
            warn!(
                endpoint = %record.endpoint,
                attempt = record.attempt,
                approximate_cost = record.approximate_cost,
                elapsed_ms,
                error = record.error_message.as_deref().unwrap_or("unknown"),
                "Inference attempt failed"
            );
        }
    }
}

/// Aggregate of the attempts made against one endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsageSummary {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_cost: u64,
    #[serde(with = "duration_millis", rename = "total_elapsed_ms")]
    pub total_elapsed: Duration,
}

impl UsageSummary {
    fn absorb(&mut self, record: &AttemptRecord) {
        self.attempts += 1;
        if record.success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.total_cost = self.total_cost.saturating_add(record.approximate_cost);
        self.total_elapsed = self.total_elapsed.saturating_add(record.elapsed);
    }
}

/// Keeps every record in memory; useful for tests and short-lived tools
#[derive(Debug, Default)]
pub struct InMemoryUsageTracker {
    records: Mutex<Vec<AttemptRecord>>,
}

impl InMemoryUsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all records, in arrival order
    pub fn records(&self) -> Vec<AttemptRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Forget every recorded attempt
    pub fn clear(&self) {
        self.records.lock().clear();
    }

    /// Summary for a single endpoint
    pub fn summary(&self, endpoint: &str) -> UsageSummary {
        self.records
            .lock()
            .iter()
            .filter(|record| record.endpoint == endpoint)
            .fold(UsageSummary::default(), |mut summary, record| {
                summary.absorb(record);
                summary
            })
    }

    /// Summaries keyed by endpoint
    pub fn summaries(&self) -> BTreeMap<String, UsageSummary> {
        let mut summaries: BTreeMap<String, UsageSummary> = BTreeMap::new();
        for record in self.records.lock().iter() {
            summaries.entry(record.endpoint.clone()).or_default().absorb(record);
        }
        summaries
    }
}

#[async_trait]
impl UsageTracker for InMemoryUsageTracker {
    async fn record_attempt(&self, record: AttemptRecord) {
        self.records.lock().push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(endpoint: &str, success: bool, cost: u64) -> AttemptRecord {
        AttemptRecord {
            endpoint: endpoint.to_string(),
            attempt: 1,
            approximate_cost: cost,
            elapsed: Duration::from_millis(20),
            success,
            error_message: (!success).then(|| "boom".to_string()),
        }
    }

    #[tokio::test]
    async fn test_in_memory_tracker_summarises_per_endpoint() {
        let tracker = InMemoryUsageTracker::new();
        tracker.record_attempt(record("embed", false, 10)).await;
        tracker.record_attempt(record("embed", true, 10)).await;
        tracker.record_attempt(record("answer", true, 40)).await;

        let embed = tracker.summary("embed");
        assert_eq!(embed.attempts, 2);
        assert_eq!(embed.successes, 1);
        assert_eq!(embed.failures, 1);
        assert_eq!(embed.total_cost, 20);
        assert_eq!(embed.total_elapsed, Duration::from_millis(40));

        let all = tracker.summaries();
        assert_eq!(all.len(), 2);
        assert_eq!(all["answer"].total_cost, 40);
    }

    #[tokio::test]
    async fn test_in_memory_tracker_clear() {
        let tracker = InMemoryUsageTracker::new();
        tracker.record_attempt(record("embed", true, 1)).await;
        assert_eq!(tracker.len(), 1);

        tracker.clear();
        assert!(tracker.is_empty());
        assert_eq!(tracker.summary("embed"), UsageSummary::default());
    }

    #[test]
    fn test_attempt_record_serializes_elapsed_ms() {
        let json = serde_json::to_value(record("embed", false, 3)).expect("serializable");
        assert_eq!(json["elapsed_ms"], 20);
        assert_eq!(json["error_message"], "boom");
    }
}
