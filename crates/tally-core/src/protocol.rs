//! RPC frames exchanged over the WebSocket transport.
//!
//! Every call is a [`RequestFrame`] answered by exactly one [`ResponseFrame`]
//! with the same `id`. Binary payloads travel base64-encoded.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};
use crate::metric::{MetricSample, Metrics};

/// Method that applies a batch of metrics.
pub const METHOD_SEND: &str = "metrics.send";

/// Method that lists every stored metric.
pub const METHOD_LIST: &str = "metrics.list";

/// Error codes carried in [`ErrorShape::code`].
pub mod codes {
    /// Malformed request, bad signature or undecryptable payload.
    pub const INVALID_ARGUMENT: &str = "invalid_argument";
    /// Origin outside the trusted subnet.
    pub const PERMISSION_DENIED: &str = "permission_denied";
    /// Unknown method.
    pub const NOT_FOUND: &str = "not_found";
    /// Server-side failure.
    pub const INTERNAL: &str = "internal";
}

/// A call from the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Correlation id echoed in the response.
    pub id: String,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// The server's answer to one [`RequestFrame`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// Id of the request being answered.
    pub id: String,
    /// Result on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

impl ResponseFrame {
    /// Builds a success response.
    #[must_use]
    pub fn ok(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    /// Builds an error response.
    #[must_use]
    pub fn err(id: impl Into<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(ErrorShape {
                code: code.to_string(),
                message: message.into(),
            }),
        }
    }
}

/// Error body of a failed call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorShape {
    /// One of [`codes`].
    pub code: String,
    /// Human-readable cause.
    pub message: String,
}

/// A metric in RPC form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcMetric {
    /// Metric name.
    pub name: String,
    /// `gauge` or `counter`.
    pub kind: String,
    /// Gauge reading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    /// Counter increment or stored total.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
}

impl RpcMetric {
    /// Validates and converts into a sample.
    pub fn to_sample(&self) -> Result<MetricSample> {
        MetricSample::from_parts(&self.name, &self.kind, self.value, self.delta)
    }
}

impl From<&MetricSample> for RpcMetric {
    fn from(sample: &MetricSample) -> Self {
        Self {
            name: sample.name().to_string(),
            kind: sample.kind().as_str().to_string(),
            value: sample.gauge_value(),
            delta: sample.counter_delta(),
        }
    }
}

impl From<Metrics> for RpcMetric {
    fn from(m: Metrics) -> Self {
        Self {
            name: m.id,
            kind: m.mtype,
            value: m.value,
            delta: m.delta,
        }
    }
}

/// Parameters of [`METHOD_SEND`].
///
/// `payload` is the JSON list of [`RpcMetric`], optionally encrypted, then
/// base64-encoded. `signature` covers the unencrypted JSON bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMetricsParams {
    /// Base64 of the (possibly encrypted) metric list.
    pub payload: String,
    /// Hex HMAC-SHA256 of the plaintext list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Declared IP of the sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl SendMetricsParams {
    /// Wraps raw payload bytes.
    #[must_use]
    pub fn new(payload: &[u8], signature: Option<String>, origin: Option<String>) -> Self {
        Self {
            payload: STANDARD.encode(payload),
            signature,
            origin,
        }
    }

    /// Decodes the payload bytes.
    pub fn payload_bytes(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(&self.payload)
            .map_err(|e| CoreError::PayloadEncoding {
                reason: e.to_string(),
            })
    }
}

/// Result of [`METHOD_SEND`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMetricsResult {
    /// Number of samples applied.
    pub accepted: usize,
}

/// Result of [`METHOD_LIST`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListMetricsResult {
    /// Every stored metric; counters carry their total in `delta`.
    pub metrics: Vec<RpcMetric>,
}
