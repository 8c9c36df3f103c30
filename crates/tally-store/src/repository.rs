//! The storage capability shared by ingestion and persistence.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tally_core::{MetricKind, MetricSample, MetricValue};
use tracing::warn;

use crate::error::Result;

/// Read/write access to gauges and counters.
///
/// Readers return `None` for unknown names, which is distinct from a stored zero.
pub trait Repository: Send + Sync {
    /// Replaces the value of a gauge.
    fn update_gauge(&self, name: &str, value: f64) -> Result<()>;

    /// Adds `delta` to a counter, creating it at `delta` if absent.
    fn update_counter(&self, name: &str, delta: i64) -> Result<()>;

    /// Applies every sample or none of them, as one atomic step.
    fn apply(&self, samples: &[MetricSample]) -> Result<()>;

    /// Current value of a gauge.
    fn receive_gauge(&self, name: &str) -> Option<f64>;

    /// Current total of a counter.
    fn receive_counter(&self, name: &str) -> Option<i64>;

    /// Copy of every gauge.
    fn receive_all_gauges(&self) -> HashMap<String, f64>;

    /// Copy of every counter.
    fn receive_all_counters(&self) -> HashMap<String, i64>;

    /// Kind stored under `name`, if any.
    fn kind_of(&self, name: &str) -> Option<MetricKind>;

    /// Consistent copy of both maps.
    fn snapshot(&self) -> Snapshot;
}

/// A full point-in-time copy of the store, one line in the backup file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Gauge values by name.
    #[serde(default)]
    pub gauges: HashMap<String, f64>,
    /// Counter totals by name.
    #[serde(default)]
    pub counters: HashMap<String, i64>,
}

impl Snapshot {
    /// Returns true if the snapshot holds no metrics.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.gauges.is_empty() && self.counters.is_empty()
    }

    /// Total number of metrics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.gauges.len() + self.counters.len()
    }

    /// Every metric as a sample, gauges first, each group sorted by name.
    #[must_use]
    pub fn samples(&self) -> Vec<MetricSample> {
        let mut gauges: Vec<_> = self.gauges.iter().collect();
        gauges.sort_by(|a, b| a.0.cmp(b.0));
        let mut counters: Vec<_> = self.counters.iter().collect();
        counters.sort_by(|a, b| a.0.cmp(b.0));

        gauges
            .into_iter()
            .map(|(name, value)| MetricSample::gauge(name.clone(), *value))
            .chain(
                counters
                    .into_iter()
                    .map(|(name, delta)| MetricSample::counter(name.clone(), *delta)),
            )
            .collect()
    }
}

/// Feeds restored samples through the normal update operations.
///
/// Counters accumulate on top of what is already stored. Samples that
/// conflict with the stored kind are skipped and logged. Returns how many
/// samples were applied.
pub fn replay<R>(repo: &R, samples: &[MetricSample]) -> usize
where
    R: Repository + ?Sized,
{
    let mut applied = 0;
    for sample in samples {
        let result = match sample.value() {
            MetricValue::Gauge(value) => repo.update_gauge(sample.name(), value),
            MetricValue::Counter(delta) => repo.update_counter(sample.name(), delta),
        };
        match result {
            Ok(()) => applied += 1,
            Err(e) => warn!(metric = %sample.name(), error = %e, "skipped restored metric"),
        }
    }
    applied
}
