use async_trait::async_trait;
use http::{Request, StatusCode, Uri};
use hyper::client::HttpConnector;
use hyper::{Body, Client};
use log::trace;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone)]
pub struct ClientResponse {
    pub status: Option<StatusCode>,
    pub latency: Duration,
    pub error: Option<ClientError>,
}

impl ClientResponse {
    /// 2xx or 3xx without transport error
    pub fn success(&self) -> bool {
        self.error.is_none()
            && self
                .status
                .map(|s| s.is_success() || s.is_redirection())
                .unwrap_or(false)
    }

    pub fn timed_out(&self) -> bool {
        matches!(self.error, Some(ClientError::Timeout))
    }
}

/// Issues the request of a single iteration
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Send a GET and wait for the full response
    async fn send(&self, uri: &Uri) -> Result<StatusCode, ClientError>;

    /// [`HttpClient::send`] bounded by `timeout`, with the time it took
    async fn request(&self, uri: &Uri, timeout: Duration) -> ClientResponse {
        let started = Instant::now();
        let result = tokio::time::timeout(timeout, self.send(uri)).await;
        let latency = started.elapsed();
        match result {
            Ok(Ok(status)) => ClientResponse {
                status: Some(status),
                latency,
                error: None,
            },
            Ok(Err(e)) => ClientResponse {
                status: None,
                latency,
                error: Some(e),
            },
            Err(_) => {
                trace!("[request] - {} - timed out after {:?}", uri, latency);
                ClientResponse {
                    status: None,
                    latency,
                    error: Some(ClientError::Timeout),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HyperClient {
    client: Client<HttpConnector>,
}

#[async_trait]
impl HttpClient for HyperClient {
    async fn send(&self, uri: &Uri) -> Result<StatusCode, ClientError> {
        let request = Request::get(uri.clone())
            .body(Body::empty())
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let status = response.status();
        // a response counts once the whole body is in
        hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(status)
    }
}
