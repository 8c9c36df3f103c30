//! Decoding and applying incoming metric batches.

use tally_core::protocol::RpcMetric;
use tally_core::{MetricKind, MetricSample, Metrics};
use tally_store::Repository;
use tracing::info;

use crate::error::{ServerError, ServerResult};

/// Parses a JSON array of [`Metrics`] and validates every element.
///
/// Returns the decoded objects alongside their samples. Any invalid element
/// fails the whole batch.
pub fn decode_json_batch(body: &[u8]) -> ServerResult<(Vec<Metrics>, Vec<MetricSample>)> {
    let metrics: Vec<Metrics> = serde_json::from_slice(body)?;
    let samples = metrics
        .iter()
        .map(Metrics::to_sample)
        .collect::<Result<Vec<_>, _>>()?;
    Ok((metrics, samples))
}

/// Parses a JSON array of [`RpcMetric`] and validates every element.
pub fn decode_rpc_batch(body: &[u8]) -> ServerResult<Vec<MetricSample>> {
    let metrics: Vec<RpcMetric> = serde_json::from_slice(body)?;
    Ok(metrics
        .iter()
        .map(RpcMetric::to_sample)
        .collect::<Result<Vec<_>, _>>()?)
}

/// Applies `samples` atomically.
pub fn apply_batch(repo: &dyn Repository, samples: &[MetricSample]) -> ServerResult<()> {
    repo.apply(samples).map_err(ServerError::from)?;
    info!(metrics = samples.len(), "batch stored");
    Ok(())
}

/// Current stored value of `sample`'s metric in wire form.
pub fn stored_metrics(repo: &dyn Repository, sample: &MetricSample) -> ServerResult<Metrics> {
    let name = sample.name();
    let stored = match sample.kind() {
        MetricKind::Gauge => repo
            .receive_gauge(name)
            .map(|v| MetricSample::gauge(name, v)),
        MetricKind::Counter => repo
            .receive_counter(name)
            .map(|d| MetricSample::counter(name, d)),
    };
    stored
        .map(|s| Metrics::from(&s))
        .ok_or_else(|| ServerError::NotFound("metric not found".to_string()))
}

/// Every stored metric, gauges first, each group sorted by name.
pub fn list_all(repo: &dyn Repository) -> Vec<RpcMetric> {
    repo.snapshot()
        .samples()
        .iter()
        .map(RpcMetric::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_store::MetricStore;

    #[test]
    fn json_batch_with_bad_element_fails_whole() {
        let body = br#"[{"id":"A","type":"gauge","value":1.5},{"id":"B","type":"histogram","value":1}]"#;
        let err = decode_json_batch(body).unwrap_err();
        assert_eq!(err.to_string(), "invalid metric type: histogram");
    }

    #[test]
    fn json_batch_requires_matching_field() {
        let body = br#"[{"id":"PollCount","type":"counter","value":3}]"#;
        assert!(decode_json_batch(body).is_err());
    }

    #[test]
    fn malformed_json_is_invalid_request() {
        assert!(matches!(
            decode_json_batch(b"{not json"),
            Err(ServerError::InvalidRequest(_))
        ));
    }

    #[test]
    fn rpc_batch_decodes() {
        let body = br#"[{"name":"PollCount","kind":"counter","delta":4}]"#;
        let samples = decode_rpc_batch(body).unwrap();
        assert_eq!(samples, vec![MetricSample::counter("PollCount", 4)]);
    }

    #[test]
    fn stored_counter_is_total() {
        let store = MetricStore::new();
        store.update_counter("PollCount", 10).unwrap();
        apply_batch(&store, &[MetricSample::counter("PollCount", 10)]).unwrap();

        let stored = stored_metrics(&store, &MetricSample::counter("PollCount", 0)).unwrap();
        assert_eq!(stored.delta, Some(20));
    }

    #[test]
    fn unknown_metric_is_not_found() {
        let store = MetricStore::new();
        let err = stored_metrics(&store, &MetricSample::gauge("Nope", 0.0)).unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
    }

    #[test]
    fn list_all_is_sorted() {
        let store = MetricStore::new();
        store.update_gauge("Z", 1.0).unwrap();
        store.update_gauge("A", 1.0).unwrap();
        store.update_counter("C", 1).unwrap();
        let names: Vec<_> = list_all(&store).into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["A", "Z", "C"]);
    }
}
