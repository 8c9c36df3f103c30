//! RPC transport: JSON request/response frames over WebSocket.
//!
//! Each text frame carries one [`RequestFrame`]; the server answers with one
//! [`ResponseFrame`] carrying the same `id`.

use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tally_core::protocol::{
    ListMetricsResult, METHOD_LIST, METHOD_SEND, RequestFrame, ResponseFrame, SendMetricsParams,
    SendMetricsResult, codes,
};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ServerError, ServerResult};
use crate::ingest::{apply_batch, decode_rpc_batch, list_all};
use crate::state::SharedState;

/// WebSocket RPC server sharing state with the HTTP router.
#[derive(Debug, Clone)]
pub struct RpcServer {
    state: SharedState,
}

impl RpcServer {
    /// Creates a server over `state`.
    #[must_use]
    pub const fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Accepts connections until `cancel` fires.
    pub async fn serve(&self, listener: TcpListener, cancel: CancellationToken) -> ServerResult<()> {
        let addr = listener
            .local_addr()
            .map_err(|e| ServerError::Internal(e.to_string()))?;
        info!(addr = %addr, "RPC server listening");

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => self.spawn_connection(stream, peer, cancel.clone()),
                        Err(e) => warn!(error = %e, "failed to accept RPC connection"),
                    }
                }
                () = cancel.cancelled() => break,
            }
        }

        info!("RPC server shut down");
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr, cancel: CancellationToken) {
        let state = self.state.clone();
        tokio::spawn(async move {
            match handle_connection(stream, state, cancel).await {
                Ok(()) => debug!(peer = %peer, "RPC connection closed"),
                Err(e) => debug!(peer = %peer, error = %e, "RPC connection ended with error"),
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    state: SharedState,
    cancel: CancellationToken,
) -> ServerResult<()> {
    let ws = accept_async(stream)
        .await
        .map_err(|e| ServerError::WebSocket(e.to_string()))?;
    let (mut sink, mut source) = ws.split();

    loop {
        let message = tokio::select! {
            message = source.next() => message,
            () = cancel.cancelled() => break,
        };

        let text = match message {
            Some(Ok(WsMessage::Text(text))) => text,
            Some(Ok(WsMessage::Ping(payload))) => {
                sink.send(WsMessage::Pong(payload))
                    .await
                    .map_err(|e| ServerError::WebSocket(e.to_string()))?;
                continue;
            }
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(ServerError::WebSocket(e.to_string())),
        };

        let response = dispatch(&state, &text);
        let json = serde_json::to_string(&response)
            .map_err(|e| ServerError::Internal(e.to_string()))?;
        sink.send(WsMessage::Text(json))
            .await
            .map_err(|e| ServerError::WebSocket(e.to_string()))?;
    }

    Ok(())
}

/// Handles one request frame and builds its response.
pub fn dispatch(state: &SharedState, text: &str) -> ResponseFrame {
    let request: RequestFrame = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(e) => {
            return ResponseFrame::err("", codes::INVALID_ARGUMENT, format!("invalid frame: {e}"));
        }
    };

    let result = match request.method.as_str() {
        METHOD_SEND => handle_send(state, request.params).and_then(to_value),
        METHOD_LIST => to_value(handle_list(state)),
        other => {
            return ResponseFrame::err(
                request.id,
                codes::NOT_FOUND,
                format!("unknown method: {other}"),
            );
        }
    };

    match result {
        Ok(value) => ResponseFrame::ok(request.id, value),
        Err(e) => {
            debug!(method = %request.method, error = %e, "RPC call failed");
            ResponseFrame::err(request.id, e.rpc_code(), e.to_string())
        }
    }
}

fn to_value<T: serde::Serialize>(value: T) -> ServerResult<Value> {
    serde_json::to_value(value).map_err(|e| ServerError::Internal(e.to_string()))
}

fn handle_send(state: &SharedState, params: Option<Value>) -> ServerResult<SendMetricsResult> {
    let params: SendMetricsParams = serde_json::from_value(
        params.ok_or_else(|| ServerError::InvalidRequest("missing params".to_string()))?,
    )?;
    let payload = params.payload_bytes()?;
    let plaintext = state.guard().admit(
        payload,
        params.signature.as_deref(),
        params.origin.as_deref(),
    )?;

    let samples = decode_rpc_batch(&plaintext)?;
    apply_batch(state.repo(), &samples)?;
    Ok(SendMetricsResult {
        accepted: samples.len(),
    })
}

fn handle_list(state: &SharedState) -> ListMetricsResult {
    ListMetricsResult {
        metrics: list_all(state.repo()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::Gatekeeper;
    use crate::state::AppState;
    use serde_json::json;
    use std::sync::Arc;
    use tally_core::protocol::RpcMetric;
    use tally_core::MetricSample;
    use tally_integrity::{Signer, TrustedSubnet};
    use tally_store::{MetricStore, Repository};

    fn state_with(guard: Gatekeeper) -> (SharedState, MetricStore) {
        let store = MetricStore::new();
        let state = Arc::new(AppState::new(Arc::new(store.clone()), guard));
        (state, store)
    }

    fn send_frame(params: &SendMetricsParams) -> String {
        json!({"id": "1", "method": METHOD_SEND, "params": params}).to_string()
    }

    fn batch_json() -> Vec<u8> {
        let metrics: Vec<RpcMetric> = [
            MetricSample::gauge("Alloc", 1.5),
            MetricSample::counter("PollCount", 4),
        ]
        .iter()
        .map(RpcMetric::from)
        .collect();
        serde_json::to_vec(&metrics).unwrap()
    }

    mod dispatch_tests {
        use super::*;

        #[test]
        fn send_applies_batch() {
            let (state, store) = state_with(Gatekeeper::default());
            let params = SendMetricsParams::new(&batch_json(), None, None);

            let response = dispatch(&state, &send_frame(&params));
            assert!(response.error.is_none());
            assert_eq!(response.id, "1");
            assert_eq!(response.result.unwrap()["accepted"], 2);
            assert_eq!(store.receive_counter("PollCount"), Some(4));
        }

        #[test]
        fn list_returns_everything() {
            let (state, store) = state_with(Gatekeeper::default());
            store.update_gauge("Alloc", 2.0).unwrap();
            store.update_counter("PollCount", 3).unwrap();

            let frame = json!({"id": "7", "method": METHOD_LIST}).to_string();
            let response = dispatch(&state, &frame);
            let result: ListMetricsResult =
                serde_json::from_value(response.result.unwrap()).unwrap();
            assert_eq!(result.metrics.len(), 2);
        }

        #[test]
        fn unknown_method_is_not_found() {
            let (state, _) = state_with(Gatekeeper::default());
            let frame = json!({"id": "2", "method": "metrics.drop"}).to_string();
            let response = dispatch(&state, &frame);
            assert_eq!(response.error.unwrap().code, codes::NOT_FOUND);
        }

        #[test]
        fn garbage_frame_is_invalid_argument() {
            let (state, _) = state_with(Gatekeeper::default());
            let response = dispatch(&state, "not json");
            assert_eq!(response.error.unwrap().code, codes::INVALID_ARGUMENT);
        }

        #[test]
        fn missing_params_is_invalid_argument() {
            let (state, _) = state_with(Gatekeeper::default());
            let frame = json!({"id": "3", "method": METHOD_SEND}).to_string();
            let response = dispatch(&state, &frame);
            assert_eq!(response.error.unwrap().code, codes::INVALID_ARGUMENT);
        }

        #[test]
        fn untrusted_origin_is_permission_denied() {
            let (state, store) = state_with(Gatekeeper::new(
                Signer::disabled(),
                None,
                TrustedSubnet::parse("10.0.0.0/8").unwrap(),
            ));
            let params = SendMetricsParams::new(&batch_json(), None, Some("8.8.8.8".to_string()));

            let response = dispatch(&state, &send_frame(&params));
            assert_eq!(response.error.unwrap().code, codes::PERMISSION_DENIED);
            assert!(store.is_empty());
        }

        #[test]
        fn bad_signature_is_invalid_argument() {
            let (state, store) = state_with(Gatekeeper::new(
                Signer::new("secret"),
                None,
                TrustedSubnet::default(),
            ));
            let wrong = Signer::new("other").sign(&batch_json());
            let params = SendMetricsParams::new(&batch_json(), wrong, None);

            let response = dispatch(&state, &send_frame(&params));
            assert_eq!(response.error.unwrap().code, codes::INVALID_ARGUMENT);
            assert!(store.is_empty());
        }

        #[test]
        fn type_conflict_applies_nothing() {
            let (state, store) = state_with(Gatekeeper::default());
            store.update_counter("Alloc", 1).unwrap();
            let params = SendMetricsParams::new(&batch_json(), None, None);

            let response = dispatch(&state, &send_frame(&params));
            assert_eq!(response.error.unwrap().code, codes::INVALID_ARGUMENT);
            assert_eq!(store.receive_counter("PollCount"), None);
        }
    }

    #[tokio::test]
    async fn serves_over_websocket() {
        let (state, store) = state_with(Gatekeeper::default());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();

        let server = RpcServer::new(state);
        let server_cancel = cancel.clone();
        let handle = tokio::spawn(async move { server.serve(listener, server_cancel).await });

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();
        let params = SendMetricsParams::new(&batch_json(), None, None);
        ws.send(WsMessage::Text(send_frame(&params))).await.unwrap();

        let reply = loop {
            match ws.next().await.unwrap().unwrap() {
                WsMessage::Text(text) => break text,
                _ => continue,
            }
        };
        let response: ResponseFrame = serde_json::from_str(&reply).unwrap();
        assert!(response.error.is_none());
        assert_eq!(store.receive_gauge("Alloc"), Some(1.5));

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }
}
