//! HTTP delivery to `POST /updates/`.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE};
use tally_core::MetricBatch;
use tally_core::codec::{GZIP_ENCODING, compress};
use tally_integrity::{REAL_IP_HEADER, SIGNATURE_HEADER};
use tracing::debug;

use crate::error::{AgentError, AgentResult};
use crate::reporter::{Envelope, Transport};

/// Timeout for a single HTTP request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends gzip-compressed JSON batches.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    origin: Option<String>,
}

impl HttpTransport {
    /// Creates a transport for the server at `address` (`host:port`).
    pub fn new(address: &str) -> AgentResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AgentError::Config(format!("http client: {e}")))?;

        Ok(Self {
            client,
            url: updates_url(address),
            origin: outbound_ipv4().map(|ip| ip.to_string()),
        })
    }

    /// Overrides the address announced in `X-Real-IP`.
    #[must_use]
    pub fn with_origin(mut self, origin: Option<String>) -> Self {
        self.origin = origin;
        self
    }

    /// The batch endpoint.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    fn encode(&self, batch: &MetricBatch) -> AgentResult<Vec<u8>> {
        Ok(batch.to_json()?)
    }

    async fn deliver(&self, envelope: &Envelope) -> AgentResult<()> {
        let body = compress(&envelope.body)?;

        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, GZIP_ENCODING)
            .header(ACCEPT_ENCODING, GZIP_ENCODING)
            .body(body);
        if let Some(signature) = &envelope.signature {
            request = request.header(SIGNATURE_HEADER, signature);
        }
        if let Some(origin) = &self.origin {
            request = request.header(REAL_IP_HEADER, origin);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AgentError::Connection(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Status {
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }

        debug!(url = %self.url, status = %status, "batch accepted");
        Ok(())
    }
}

fn updates_url(address: &str) -> String {
    if address.starts_with("http://") || address.starts_with("https://") {
        format!("{}/updates/", address.trim_end_matches('/'))
    } else {
        format!("http://{address}/updates/")
    }
}

/// The IPv4 address of the interface used for outbound traffic.
///
/// Connecting a UDP socket sends nothing; it only asks the kernel to pick a
/// route. Loopback and unspecified addresses yield `None`.
#[must_use]
pub fn outbound_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(192, 0, 2, 1), 9)).ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}
