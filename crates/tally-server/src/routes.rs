//! HTTP route definitions.

use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use tower_http::compression::CompressionLayer;
use tower_http::decompression::RequestDecompressionLayer;
use tower_http::trace::TraceLayer;

use crate::guard::{admit_batch, admit_origin};
use crate::handlers;
use crate::state::SharedState;

/// Create the HTTP router.
///
/// Gzip is accepted on requests and offered on responses. Batch uploads go
/// through the full admission chain; single updates only through the
/// trusted-subnet check.
pub fn create_router(state: SharedState) -> Router {
    let batch = Router::new()
        .route("/updates/", post(handlers::update_batch))
        .route_layer(from_fn_with_state(state.clone(), admit_batch));

    let single = Router::new()
        .route("/update/", post(handlers::update_json))
        .route(
            "/update/{kind}/{name}/{value}",
            post(handlers::update_plain),
        )
        .route_layer(from_fn_with_state(state.clone(), admit_origin));

    Router::new()
        .route("/", get(handlers::index))
        .route("/ping", get(handlers::ping))
        .route("/value/", post(handlers::value_json))
        .route("/value/{kind}/{name}", get(handlers::value_plain))
        .merge(batch)
        .merge(single)
        .with_state(state)
        .layer(CompressionLayer::new())
        .layer(RequestDecompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::Gatekeeper;
    use crate::state::AppState;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tally_core::codec;
    use tally_integrity::{REAL_IP_HEADER, SIGNATURE_HEADER, Signer, TrustedSubnet};
    use tally_store::{MetricStore, Repository};
    use tower::ServiceExt;

    fn app() -> (Router, MetricStore) {
        let store = MetricStore::new();
        let state = Arc::new(AppState::new(Arc::new(store.clone()), Gatekeeper::default()));
        (create_router(state), store)
    }

    fn guarded_app(guard: Gatekeeper) -> (Router, MetricStore) {
        let store = MetricStore::new();
        let state = Arc::new(AppState::new(Arc::new(store.clone()), guard));
        (create_router(state), store)
    }

    fn post_request(uri: &str, body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.into())
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn text(response: axum::response::Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    mod plain_tests {
        use super::*;

        #[tokio::test]
        async fn gauge_update_and_read_back() {
            let (router, _) = app();

            let response = router
                .clone()
                .oneshot(post_request("/update/gauge/Alloc/78910987.77", Body::empty()))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(text(response).await, "gauge successfully updated");

            let response = router.oneshot(get_request("/value/gauge/Alloc")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(text(response).await, "78910987.77");
        }

        #[tokio::test]
        async fn counter_accumulates() {
            let (router, store) = app();
            for _ in 0..2 {
                let response = router
                    .clone()
                    .oneshot(post_request("/update/counter/PollCount/10", Body::empty()))
                    .await
                    .unwrap();
                assert_eq!(text(response).await, "counter successfully updated");
            }

            assert_eq!(store.receive_counter("PollCount"), Some(20));
            let response = router.oneshot(get_request("/value/counter/PollCount")).await.unwrap();
            assert_eq!(text(response).await, "20");
        }

        #[tokio::test]
        async fn unknown_type_is_rejected() {
            let (router, store) = app();
            let response = router
                .oneshot(post_request("/update/histogram/X/1", Body::empty()))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(text(response).await, "invalid metric type");
            assert!(store.is_empty());
        }

        #[tokio::test]
        async fn bad_values_are_rejected() {
            let (router, _) = app();

            let response = router
                .clone()
                .oneshot(post_request("/update/gauge/Alloc/abc", Body::empty()))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(text(response).await, "metric value is not a float");

            let response = router
                .oneshot(post_request("/update/counter/PollCount/1.5", Body::empty()))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(text(response).await, "metric value is not an integer");
        }

        #[tokio::test]
        async fn missing_name_is_not_found() {
            let (router, _) = app();
            let response = router
                .oneshot(post_request("/update/gauge/", Body::empty()))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }

        #[tokio::test]
        async fn unknown_metric_is_not_found() {
            let (router, _) = app();
            let response = router.oneshot(get_request("/value/gauge/Nope")).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }

        #[tokio::test]
        async fn type_conflict_is_bad_request() {
            let (router, store) = app();
            store.update_gauge("Alloc", 1.0).unwrap();

            let response = router
                .oneshot(post_request("/update/counter/Alloc/1", Body::empty()))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(store.receive_counter("Alloc"), None);
        }
    }

    mod json_tests {
        use super::*;

        #[tokio::test]
        async fn update_echoes_stored_total() {
            let (router, store) = app();
            store.update_counter("PollCount", 5).unwrap();

            let response = router
                .oneshot(post_request(
                    "/update/",
                    r#"{"id":"PollCount","type":"counter","delta":3}"#,
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);

            let json: serde_json::Value = serde_json::from_str(&text(response).await).unwrap();
            assert_eq!(json["delta"], 8);
            assert_eq!(json["type"], "counter");
        }

        #[tokio::test]
        async fn value_lookup() {
            let (router, store) = app();
            store.update_gauge("Alloc", 9765.77).unwrap();

            let response = router
                .clone()
                .oneshot(post_request("/value/", r#"{"id":"Alloc","type":"gauge"}"#))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let json: serde_json::Value = serde_json::from_str(&text(response).await).unwrap();
            assert_eq!(json["value"], 9765.77);

            let response = router
                .oneshot(post_request("/value/", r#"{"id":"Sys","type":"gauge"}"#))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
            assert_eq!(text(response).await, "metric not found");
        }

        #[tokio::test]
        async fn batch_is_applied_and_echoed() {
            let (router, store) = app();
            let body = r#"[{"id":"Alloc","type":"gauge","value":1.5},{"id":"PollCount","type":"counter","delta":2}]"#;

            let response = router.oneshot(post_request("/updates/", body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);

            let json: serde_json::Value = serde_json::from_str(&text(response).await).unwrap();
            assert_eq!(json.as_array().unwrap().len(), 2);
            assert_eq!(store.receive_gauge("Alloc"), Some(1.5));
            assert_eq!(store.receive_counter("PollCount"), Some(2));
        }

        #[tokio::test]
        async fn invalid_batch_applies_nothing() {
            let (router, store) = app();
            let body = r#"[{"id":"Alloc","type":"gauge","value":1.5},{"id":"X","type":"histogram","value":1}]"#;

            let response = router.oneshot(post_request("/updates/", body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert!(store.is_empty());
        }

        #[tokio::test]
        async fn gzip_request_body_is_accepted() {
            let (router, store) = app();
            let body = codec::compress(br#"[{"id":"Alloc","type":"gauge","value":2.5}]"#).unwrap();

            let request = Request::builder()
                .method("POST")
                .uri("/updates/")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::CONTENT_ENCODING, "gzip")
                .body(Body::from(body))
                .unwrap();

            let response = router.oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(store.receive_gauge("Alloc"), Some(2.5));
        }
    }

    mod guard_tests {
        use super::*;

        #[tokio::test]
        async fn unsigned_batch_is_rejected() {
            let (router, store) = guarded_app(Gatekeeper::new(
                Signer::new("secret"),
                None,
                TrustedSubnet::default(),
            ));

            let response = router.oneshot(post_request("/updates/", "[]")).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert!(store.is_empty());
        }

        #[tokio::test]
        async fn signed_batch_gets_signed_response() {
            let signer = Signer::new("secret");
            let (router, store) = guarded_app(Gatekeeper::new(
                signer.clone(),
                None,
                TrustedSubnet::default(),
            ));
            let body = r#"[{"id":"Alloc","type":"gauge","value":1}]"#;

            let request = Request::builder()
                .method("POST")
                .uri("/updates/")
                .header(SIGNATURE_HEADER, signer.sign(body.as_bytes()).unwrap())
                .body(Body::from(body))
                .unwrap();

            let response = router.oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let signature = response
                .headers()
                .get(SIGNATURE_HEADER)
                .unwrap()
                .to_str()
                .unwrap()
                .to_string();
            let body = text(response).await;
            assert!(signer.verify(body.as_bytes(), &signature).is_valid());
            assert_eq!(store.receive_gauge("Alloc"), Some(1.0));
        }

        #[tokio::test]
        async fn untrusted_origin_is_forbidden() {
            let (router, store) = guarded_app(Gatekeeper::new(
                Signer::disabled(),
                None,
                TrustedSubnet::parse("10.0.0.0/8").unwrap(),
            ));

            let request = Request::builder()
                .method("POST")
                .uri("/update/gauge/Alloc/1")
                .header(REAL_IP_HEADER, "192.168.1.1")
                .body(Body::empty())
                .unwrap();
            let response = router.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::FORBIDDEN);

            let request = Request::builder()
                .method("POST")
                .uri("/updates/")
                .header(REAL_IP_HEADER, "10.0.0.7")
                .body(Body::from(r#"[{"id":"Alloc","type":"gauge","value":1}]"#))
                .unwrap();
            let response = router.oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(store.receive_gauge("Alloc"), Some(1.0));
        }
    }

    mod misc_tests {
        use super::*;

        #[tokio::test]
        async fn ping_without_database_succeeds() {
            let (router, _) = app();
            let response = router.oneshot(get_request("/ping")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(text(response).await, "success ping");
        }

        #[tokio::test]
        async fn index_lists_sorted_metrics() {
            let (router, store) = app();
            store.update_gauge("Zeta", 1.0).unwrap();
            store.update_counter("Alpha", 2).unwrap();

            let response = router.oneshot(get_request("/")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let page = text(response).await;
            let alpha = page.find("Alpha").unwrap();
            let zeta = page.find("Zeta").unwrap();
            assert!(alpha < zeta);
        }

        #[tokio::test]
        async fn index_renders_one_row_per_metric() {
            let (router, store) = app();
            store.update_gauge("<Alloc>", 1.5).unwrap();
            store.update_counter("PollCount", 7).unwrap();

            let response = router.oneshot(get_request("/")).await.unwrap();
            let page = text(response).await;
            assert!(page.contains("<tr><td>&lt;Alloc&gt;</td><td>gauge</td><td>1.5</td></tr>\n"));
            assert!(page.contains("<tr><td>PollCount</td><td>counter</td><td>7</td></tr>\n"));
            assert!(page.ends_with("</table>\n</body>\n</html>\n"));
        }

        #[tokio::test]
        async fn responses_are_gzipped_on_request() {
            let (router, store) = app();
            for i in 0..20 {
                store.update_gauge(&format!("Metric{i:02}"), f64::from(i)).unwrap();
            }

            let request = Request::builder()
                .uri("/")
                .header(header::ACCEPT_ENCODING, "gzip")
                .body(Body::empty())
                .unwrap();
            let response = router.oneshot(request).await.unwrap();

            assert_eq!(
                response.headers().get(header::CONTENT_ENCODING).unwrap(),
                "gzip"
            );
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let page = String::from_utf8(codec::decompress(&bytes).unwrap()).unwrap();
            assert!(page.contains("Metric19"));
        }
    }
}
