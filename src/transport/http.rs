use super::{RawResponse, Transport, TransportError};
use crate::request::{FetchRequest, Method};
use crate::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// reqwest-backed [`Transport`].
///
/// Owns a pooled client; clone-cheap via the client's internal `Arc`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Builds a transport with the given per-request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
            .map_err(|e| crate::Error::Transport(TransportError::Other(e.to_string())))?;
        Ok(Self { client })
    }

    /// Wraps an already-configured client, e.g. one with proxy settings.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: &FetchRequest,
        abort: CancellationToken,
    ) -> std::result::Result<RawResponse, TransportError> {
        let url = request.url().as_str();
        let mut req = match request.method() {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Put => self.client.put(url),
            Method::Delete => self.client.delete(url),
            Method::Head => self.client.head(url),
            Method::Patch => self.client.patch(url),
        };

        for (name, value) in request.headers() {
            req = req.header(name, value);
        }
        if let Some(body) = request.body() {
            req = req.body(body.clone());
        }

        let roundtrip = async move {
            let response = req.send().await?;
            let status = response.status().as_u16();
            let body = response.bytes().await?;
            Ok(RawResponse { status, body })
        };

        tokio::select! {
            _ = abort.cancelled() => Err(TransportError::Aborted),
            result = roundtrip => result,
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
