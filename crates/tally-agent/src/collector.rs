//! The agent's working set between samples and reports.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tally_core::MetricBatch;

#[derive(Debug, Default)]
struct WorkingSet {
    gauges: HashMap<String, f64>,
    polls: i64,
}

/// Latest gauge readings plus the number of polls performed since start.
///
/// Sampling overwrites gauges and bumps the poll count. Every batch carries
/// the poll count as it stands, so `PollCount` only ever grows from one
/// batch to the next. A batch that fails to deliver is dropped.
#[derive(Debug, Clone, Default)]
pub struct MetricSet {
    inner: Arc<Mutex<WorkingSet>>,
}

impl MetricSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces gauges with a new reading and counts one poll.
    pub fn record(&self, gauges: impl IntoIterator<Item = (String, f64)>) {
        let mut set = self.inner.lock();
        set.gauges.extend(gauges);
        set.polls = set.polls.saturating_add(1);
    }

    /// Builds a batch from the current gauges and the running poll count.
    ///
    /// Returns `None` if nothing has been sampled yet.
    pub fn take_batch(&self) -> Option<MetricBatch> {
        let set = self.inner.lock();
        if set.polls == 0 {
            return None;
        }
        let polls = set.polls;
        let gauges: Vec<(String, f64)> = set
            .gauges
            .iter()
            .map(|(name, value)| (name.clone(), *value))
            .collect();
        drop(set);

        Some(MetricBatch::new(gauges, polls))
    }

    /// Polls performed so far.
    #[must_use]
    pub fn polls(&self) -> i64 {
        self.inner.lock().polls
    }

    /// Number of distinct gauges held.
    #[must_use]
    pub fn gauge_count(&self) -> usize {
        self.inner.lock().gauges.len()
    }
}
