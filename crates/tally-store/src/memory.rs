//! In-memory metric store.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tally_core::{MetricKind, MetricSample, MetricValue};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::repository::{Repository, Snapshot};

#[derive(Debug, Default)]
struct Maps {
    gauges: HashMap<String, f64>,
    counters: HashMap<String, i64>,
}

impl Maps {
    fn kind_of(&self, name: &str) -> Option<MetricKind> {
        if self.gauges.contains_key(name) {
            Some(MetricKind::Gauge)
        } else if self.counters.contains_key(name) {
            Some(MetricKind::Counter)
        } else {
            None
        }
    }

    fn ensure_kind(&self, name: &str, incoming: MetricKind) -> Result<()> {
        match self.kind_of(name) {
            Some(stored) if stored != incoming => Err(StoreError::TypeConflict {
                name: name.to_string(),
                stored,
                incoming,
            }),
            _ => Ok(()),
        }
    }

    fn put_gauge(&mut self, name: &str, value: f64) {
        self.gauges.insert(name.to_string(), value);
    }

    fn add_counter(&mut self, name: &str, delta: i64) {
        let total = self.counters.entry(name.to_string()).or_insert(0);
        *total = total.saturating_add(delta);
    }
}

/// Thread-safe store of gauge values and counter totals.
///
/// Both maps sit behind one lock, so a batch applied with
/// [`Repository::apply`] is never observed half-written and
/// [`Repository::snapshot`] always sees the two maps at the same instant.
/// Clones share the same data.
#[derive(Debug, Default)]
pub struct MetricStore {
    maps: Arc<RwLock<Maps>>,
}

impl Clone for MetricStore {
    fn clone(&self) -> Self {
        Self {
            maps: Arc::clone(&self.maps),
        }
    }
}

impl MetricStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored metrics of both kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        let maps = self.maps.read();
        maps.gauges.len() + maps.counters.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Repository for MetricStore {
    fn update_gauge(&self, name: &str, value: f64) -> Result<()> {
        let mut maps = self.maps.write();
        maps.ensure_kind(name, MetricKind::Gauge)?;
        maps.put_gauge(name, value);
        drop(maps);

        debug!(metric = %name, value, "gauge updated");
        Ok(())
    }

    fn update_counter(&self, name: &str, delta: i64) -> Result<()> {
        let mut maps = self.maps.write();
        maps.ensure_kind(name, MetricKind::Counter)?;
        maps.add_counter(name, delta);
        drop(maps);

        debug!(metric = %name, delta, "counter updated");
        Ok(())
    }

    #[allow(clippy::significant_drop_tightening)] // Lock held across validate and apply
    fn apply(&self, samples: &[MetricSample]) -> Result<()> {
        let mut maps = self.maps.write();

        let mut batch_kinds: HashMap<&str, MetricKind> = HashMap::with_capacity(samples.len());
        for sample in samples {
            let kind = sample.kind();
            maps.ensure_kind(sample.name(), kind)?;
            if let Some(&earlier) = batch_kinds.get(sample.name()) {
                if earlier != kind {
                    return Err(StoreError::TypeConflict {
                        name: sample.name().to_string(),
                        stored: earlier,
                        incoming: kind,
                    });
                }
            }
            batch_kinds.insert(sample.name(), kind);
        }

        for sample in samples {
            match sample.value() {
                MetricValue::Gauge(value) => maps.put_gauge(sample.name(), value),
                MetricValue::Counter(delta) => maps.add_counter(sample.name(), delta),
            }
        }

        debug!(samples = samples.len(), "batch applied");
        Ok(())
    }

    fn receive_gauge(&self, name: &str) -> Option<f64> {
        self.maps.read().gauges.get(name).copied()
    }

    fn receive_counter(&self, name: &str) -> Option<i64> {
        self.maps.read().counters.get(name).copied()
    }

    fn receive_all_gauges(&self) -> HashMap<String, f64> {
        self.maps.read().gauges.clone()
    }

    fn receive_all_counters(&self) -> HashMap<String, i64> {
        self.maps.read().counters.clone()
    }

    fn kind_of(&self, name: &str) -> Option<MetricKind> {
        self.maps.read().kind_of(name)
    }

    fn snapshot(&self) -> Snapshot {
        let maps = self.maps.read();
        Snapshot {
            gauges: maps.gauges.clone(),
            counters: maps.counters.clone(),
        }
    }
}
