//! Metric model and the HTTP wire representation.
//!
//! - [`MetricKind`]: the two supported metric kinds
//! - [`MetricSample`]: one named measurement whose value always matches its kind
//! - [`MetricBatch`]: the immutable set of samples from one poll cycle
//! - [`Metrics`]: the JSON object exchanged over HTTP

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Name of the counter appended to every batch.
pub const POLL_COUNT: &str = "PollCount";

/// The kind of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Point-in-time value, replaced on every update.
    Gauge,
    /// Running total, accumulated on every update.
    Counter,
}

impl MetricKind {
    /// Returns the wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gauge => "gauge",
            Self::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gauge" => Ok(Self::Gauge),
            "counter" => Ok(Self::Counter),
            other => Err(CoreError::UnknownKind {
                kind: other.to_string(),
            }),
        }
    }
}

/// The value carried by a sample. The variant determines the kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    /// Gauge reading.
    Gauge(f64),
    /// Counter increment.
    Counter(i64),
}

impl MetricValue {
    /// Returns the kind matching this value.
    #[must_use]
    pub const fn kind(self) -> MetricKind {
        match self {
            Self::Gauge(_) => MetricKind::Gauge,
            Self::Counter(_) => MetricKind::Counter,
        }
    }
}

/// A single named measurement.
///
/// A sample can only be built through [`MetricSample::gauge`],
/// [`MetricSample::counter`] or [`MetricSample::from_parts`], so a gauge
/// always has a value and a counter always has a delta.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    name: String,
    value: MetricValue,
}

impl MetricSample {
    /// Creates a gauge sample.
    #[must_use]
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value: MetricValue::Gauge(value),
        }
    }

    /// Creates a counter sample.
    #[must_use]
    pub fn counter(name: impl Into<String>, delta: i64) -> Self {
        Self {
            name: name.into(),
            value: MetricValue::Counter(delta),
        }
    }

    /// Builds a sample from loosely typed wire fields.
    ///
    /// The field matching `kind` must be present; the other one is ignored.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::EmptyName`, `CoreError::UnknownKind` or
    /// `CoreError::MissingField` when the parts do not describe a valid sample.
    pub fn from_parts(
        name: &str,
        kind: &str,
        value: Option<f64>,
        delta: Option<i64>,
    ) -> Result<Self> {
        if name.is_empty() {
            return Err(CoreError::EmptyName);
        }

        match kind.parse::<MetricKind>()? {
            MetricKind::Gauge => value.map(|v| Self::gauge(name, v)).ok_or_else(|| {
                CoreError::MissingField {
                    name: name.to_string(),
                    field: "value",
                }
            }),
            MetricKind::Counter => delta.map(|d| Self::counter(name, d)).ok_or_else(|| {
                CoreError::MissingField {
                    name: name.to_string(),
                    field: "delta",
                }
            }),
        }
    }

    /// Returns the metric name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the metric kind.
    #[must_use]
    pub const fn kind(&self) -> MetricKind {
        self.value.kind()
    }

    /// Returns the typed value.
    #[must_use]
    pub const fn value(&self) -> MetricValue {
        self.value
    }

    /// Returns the gauge reading, if this is a gauge.
    #[must_use]
    pub const fn gauge_value(&self) -> Option<f64> {
        match self.value {
            MetricValue::Gauge(v) => Some(v),
            MetricValue::Counter(_) => None,
        }
    }

    /// Returns the counter increment, if this is a counter.
    #[must_use]
    pub const fn counter_delta(&self) -> Option<i64> {
        match self.value {
            MetricValue::Counter(d) => Some(d),
            MetricValue::Gauge(_) => None,
        }
    }
}

/// The samples produced by one poll cycle, followed by the `PollCount` counter.
///
/// A batch cannot be modified after construction. It is encoded once and the
/// same bytes are reused across delivery attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricBatch {
    samples: Vec<MetricSample>,
}

impl MetricBatch {
    /// Builds a batch from gauge readings and the running poll count.
    ///
    /// Gauges are ordered by name so identical inputs encode identically.
    #[must_use]
    pub fn new(gauges: impl IntoIterator<Item = (String, f64)>, poll_count: i64) -> Self {
        let mut samples: Vec<MetricSample> = gauges
            .into_iter()
            .map(|(name, value)| MetricSample::gauge(name, value))
            .collect();
        samples.sort_by(|a, b| a.name.cmp(&b.name));
        samples.push(MetricSample::counter(POLL_COUNT, poll_count));
        Self { samples }
    }

    /// Returns the samples in delivery order.
    #[must_use]
    pub fn samples(&self) -> &[MetricSample] {
        &self.samples
    }

    /// Returns the number of samples, including `PollCount`.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if the batch holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Returns the poll count carried by the batch.
    #[must_use]
    pub fn poll_count(&self) -> i64 {
        self.samples
            .iter()
            .rev()
            .find(|s| s.name == POLL_COUNT)
            .and_then(MetricSample::counter_delta)
            .unwrap_or_default()
    }

    /// Serializes the batch as a JSON array of [`Metrics`].
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let wire: Vec<Metrics> = self.samples.iter().map(Metrics::from).collect();
        Ok(serde_json::to_vec(&wire)?)
    }
}

/// A metric as exchanged over HTTP.
///
/// `mtype` stays a plain string so an unknown type surfaces as a validation
/// error rather than a JSON syntax error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Metric name.
    pub id: String,
    /// `gauge` or `counter`.
    #[serde(rename = "type")]
    pub mtype: String,
    /// Gauge reading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    /// Counter increment, or the stored total in responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
}

impl Metrics {
    /// Validates the wire object and converts it into a sample.
    pub fn to_sample(&self) -> Result<MetricSample> {
        MetricSample::from_parts(&self.id, &self.mtype, self.value, self.delta)
    }
}

impl From<&MetricSample> for Metrics {
    fn from(sample: &MetricSample) -> Self {
        Self {
            id: sample.name.clone(),
            mtype: sample.kind().as_str().to_string(),
            value: sample.gauge_value(),
            delta: sample.counter_delta(),
        }
    }
}
