//! RPC delivery over a persistent WebSocket connection.
//!
//! The connection is opened on first use and reused for every call. Any
//! transport failure drops it so the next attempt reconnects.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tally_core::MetricBatch;
use tally_core::protocol::{
    METHOD_SEND, RequestFrame, ResponseFrame, RpcMetric, SendMetricsParams, SendMetricsResult,
};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{AgentError, AgentResult};
use crate::http::outbound_ipv4;
use crate::reporter::{Envelope, Transport};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default time allowed for connecting and for each call.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends batches as `metrics.send` calls.
///
/// All calls share one connection and run one at a time: a call holds the
/// connection until its response arrives or its timeout expires, so
/// concurrent deliveries queue behind it. Delivery concurrency for this
/// transport is therefore one, whatever the rate limit allows.
#[derive(Debug)]
pub struct RpcTransport {
    url: String,
    origin: Option<String>,
    timeout: Duration,
    connection: Mutex<Option<WsStream>>,
}

impl RpcTransport {
    /// Creates a transport for the RPC server at `address` (`host:port`).
    #[must_use]
    pub fn new(address: &str) -> Self {
        let url = if address.starts_with("ws://") || address.starts_with("wss://") {
            address.to_string()
        } else {
            format!("ws://{address}")
        };
        Self {
            url,
            origin: outbound_ipv4().map(|ip| ip.to_string()),
            timeout: CALL_TIMEOUT,
            connection: Mutex::new(None),
        }
    }

    /// Overrides the declared sender address.
    #[must_use]
    pub fn with_origin(mut self, origin: Option<String>) -> Self {
        self.origin = origin;
        self
    }

    /// Sets the connect and call timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Server URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn connect(&self) -> AgentResult<WsStream> {
        let (stream, _) = timeout(self.timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| AgentError::Connection(format!("connect to {} timed out", self.url)))?
            .map_err(|e| AgentError::Connection(e.to_string()))?;
        info!(url = %self.url, "connected to RPC server");
        Ok(stream)
    }

    /// Performs one call and returns its result value. Holds the connection
    /// lock for the whole exchange.
    async fn call(&self, method: &str, params: serde_json::Value) -> AgentResult<serde_json::Value> {
        let mut slot = self.connection.lock().await;
        let stream = match slot.take() {
            Some(stream) => stream,
            None => self.connect().await?,
        };

        let request = RequestFrame {
            id: Uuid::new_v4().to_string(),
            method: method.to_string(),
            params: Some(params),
        };
        let (stream, response) = self.exchange(stream, &request).await?;
        *slot = Some(stream);
        drop(slot);

        match (response.result, response.error) {
            (_, Some(error)) => Err(AgentError::Rpc {
                code: error.code,
                message: error.message,
            }),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(serde_json::Value::Null),
        }
    }

    /// Sends `request` and waits for its response. The stream is only
    /// returned when it is still usable.
    async fn exchange(
        &self,
        mut stream: WsStream,
        request: &RequestFrame,
    ) -> AgentResult<(WsStream, ResponseFrame)> {
        let text = serde_json::to_string(request)?;
        timeout(self.timeout, stream.send(Message::Text(text)))
            .await
            .map_err(|_| AgentError::Connection("send timed out".to_string()))?
            .map_err(|e| AgentError::Connection(e.to_string()))?;

        loop {
            let message = timeout(self.timeout, stream.next())
                .await
                .map_err(|_| AgentError::Connection("response timed out".to_string()))?;

            match message {
                Some(Ok(Message::Text(text))) => {
                    let response: ResponseFrame = serde_json::from_str(&text)?;
                    if response.id == request.id {
                        return Ok((stream, response));
                    }
                    debug!(id = %response.id, "ignoring response for another call");
                }
                Some(Ok(Message::Ping(payload))) => {
                    stream
                        .send(Message::Pong(payload))
                        .await
                        .map_err(|e| AgentError::Connection(e.to_string()))?;
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(AgentError::Connection("connection closed".to_string()));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(AgentError::Connection(e.to_string())),
            }
        }
    }
}

impl Transport for RpcTransport {
    fn name(&self) -> &'static str {
        "rpc"
    }

    fn encode(&self, batch: &MetricBatch) -> AgentResult<Vec<u8>> {
        let metrics: Vec<RpcMetric> = batch.samples().iter().map(RpcMetric::from).collect();
        Ok(serde_json::to_vec(&metrics)?)
    }

    async fn deliver(&self, envelope: &Envelope) -> AgentResult<()> {
        let params = SendMetricsParams::new(
            &envelope.body,
            envelope.signature.clone(),
            self.origin.clone(),
        );
        let result = self.call(METHOD_SEND, serde_json::to_value(params)?).await?;
        let sent: SendMetricsResult = serde_json::from_value(result)?;
        debug!(accepted = sent.accepted, "batch accepted");
        Ok(())
    }
}
