//! HTTP request handlers.

use std::time::Duration;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use tally_core::{MetricKind, MetricSample, Metrics};
use tracing::debug;

use crate::error::{ServerError, ServerResult};
use crate::ingest::{apply_batch, decode_json_batch, stored_metrics};
use crate::state::SharedState;

/// Deadline for the database ping.
pub const PING_TIMEOUT: Duration = Duration::from_secs(1);

fn parse_kind(raw: &str) -> ServerResult<MetricKind> {
    raw.parse()
        .map_err(|_| ServerError::InvalidRequest("invalid metric type".to_string()))
}

/// Formats a gauge in its shortest round-trip decimal form.
#[must_use]
pub fn format_gauge(value: f64) -> String {
    value.to_string()
}

/// `GET /` - HTML table of every metric, sorted by name.
pub async fn index(State(state): State<SharedState>) -> Html<String> {
    let snapshot = state.repo().snapshot();

    let mut rows: Vec<(String, &'static str, String)> = snapshot
        .gauges
        .iter()
        .map(|(name, v)| (name.clone(), "gauge", format_gauge(*v)))
        .chain(
            snapshot
                .counters
                .iter()
                .map(|(name, d)| (name.clone(), "counter", d.to_string())),
        )
        .collect();
    rows.sort_by(|a, b| a.0.cmp(&b.0));

    let mut page = String::from(
        "<!DOCTYPE html>\n<html>\n<head><title>Metrics</title></head>\n<body>\n\
         <table>\n<tr><th>Name</th><th>Type</th><th>Value</th></tr>\n",
    );
    for (name, kind, value) in rows {
        page.push_str(&format!(
            "<tr><td>{}</td><td>{kind}</td><td>{value}</td></tr>\n",
            escape(&name)
        ));
    }
    page.push_str("</table>\n</body>\n</html>\n");
    Html(page)
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// `POST /update/{type}/{name}/{value}` - single update in path form.
pub async fn update_plain(
    State(state): State<SharedState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> ServerResult<&'static str> {
    let kind = parse_kind(&kind)?;
    if name.is_empty() {
        return Err(ServerError::NotFound("metric name not specified".to_string()));
    }

    match kind {
        MetricKind::Gauge => {
            let value: f64 = value
                .parse()
                .ok()
                .filter(|v: &f64| v.is_finite())
                .ok_or_else(|| ServerError::InvalidRequest("metric value is not a float".to_string()))?;
            state.repo().update_gauge(&name, value)?;
            debug!(metric = %name, value, "gauge updated");
            Ok("gauge successfully updated")
        }
        MetricKind::Counter => {
            let delta: i64 = value.parse().map_err(|_| {
                ServerError::InvalidRequest("metric value is not an integer".to_string())
            })?;
            state.repo().update_counter(&name, delta)?;
            debug!(metric = %name, delta, "counter updated");
            Ok("counter successfully updated")
        }
    }
}

/// `POST /update/` - single update as a JSON object; echoes the stored value.
pub async fn update_json(
    State(state): State<SharedState>,
    body: Bytes,
) -> ServerResult<Json<Metrics>> {
    let metric: Metrics = serde_json::from_slice(&body)?;
    let sample = metric.to_sample()?;
    apply_batch(state.repo(), std::slice::from_ref(&sample))?;
    Ok(Json(stored_metrics(state.repo(), &sample)?))
}

/// `POST /updates/` - batch of JSON objects, applied atomically; echoes the batch.
///
/// The body reaching this handler has already been admitted and decrypted.
pub async fn update_batch(
    State(state): State<SharedState>,
    body: Bytes,
) -> ServerResult<Json<Vec<Metrics>>> {
    let (metrics, samples) = decode_json_batch(&body)?;
    apply_batch(state.repo(), &samples)?;
    Ok(Json(metrics))
}

/// `POST /value/` - look up one metric described by a JSON object.
pub async fn value_json(
    State(state): State<SharedState>,
    body: Bytes,
) -> ServerResult<Json<Metrics>> {
    let query: Metrics = serde_json::from_slice(&body)?;
    let kind: MetricKind = query.mtype.parse()?;
    if query.id.is_empty() {
        return Err(ServerError::NotFound("metric not found".to_string()));
    }
    let probe = match kind {
        MetricKind::Gauge => MetricSample::gauge(query.id, 0.0),
        MetricKind::Counter => MetricSample::counter(query.id, 0),
    };
    Ok(Json(stored_metrics(state.repo(), &probe)?))
}

/// `GET /value/{type}/{name}` - plain-text value.
pub async fn value_plain(
    State(state): State<SharedState>,
    Path((kind, name)): Path<(String, String)>,
) -> ServerResult<String> {
    let not_found = || ServerError::NotFound("metric not found".to_string());
    match parse_kind(&kind)? {
        MetricKind::Gauge => state
            .repo()
            .receive_gauge(&name)
            .map(format_gauge)
            .ok_or_else(not_found),
        MetricKind::Counter => state
            .repo()
            .receive_counter(&name)
            .map(|d| d.to_string())
            .ok_or_else(not_found),
    }
}

/// `GET /ping` - database reachability.
pub async fn ping(State(state): State<SharedState>) -> impl IntoResponse {
    let Some(database) = state.database() else {
        return (StatusCode::OK, "success ping".to_string());
    };
    match database.ping(PING_TIMEOUT).await {
        Ok(()) => (StatusCode::OK, "success ping".to_string()),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
