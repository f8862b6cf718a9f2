//! The JSON-over-HTTPS transport used for pushes.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::error::TransportError;

/// A completed HTTP exchange: status code and the full response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Posts a JSON body to `host:port` at `path`.
///
/// Implementations resolve with the response for any status code; only
/// failures to complete the exchange are errors.
#[async_trait]
pub trait JsonTransport: Send + Sync {
    async fn post_json(
        &self,
        host: &str,
        port: u16,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<TransportResponse, TransportError>;
}

/// URL scheme used to reach peers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Https,
    /// Plain HTTP, for local test harnesses.
    Http,
}

impl Scheme {
    fn as_str(self) -> &'static str {
        match self {
            Scheme::Https => "https",
            Scheme::Http => "http",
        }
    }
}

/// [`JsonTransport`] backed by a shared `reqwest` client.
///
/// TLS setup is reqwest's default rustls configuration.
#[derive(Debug, Clone)]
pub struct ReplicationHttpClient {
    client: reqwest::Client,
    scheme: Scheme,
}

impl ReplicationHttpClient {
    /// Builds a client whose requests, body reads included, time out after
    /// `timeout`.
    pub fn new(scheme: Scheme, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(TransportError::ClientBuild)?;
        Ok(Self { client, scheme })
    }

    fn url(&self, host: &str, port: u16, path: &str) -> String {
        format!("{}://{}:{}{}", self.scheme.as_str(), host, port, path)
    }
}

#[async_trait]
impl JsonTransport for ReplicationHttpClient {
    async fn post_json(
        &self,
        host: &str,
        port: u16,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<TransportResponse, TransportError> {
        let url = self.url(host, port, path);
        let request_failed = |source| TransportError::Request {
            url: url.clone(),
            source,
        };

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(request_failed)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(request_failed)?;

        tracing::debug!(%url, status, "replication request completed");

        Ok(TransportResponse {
            status,
            body: body.to_vec(),
        })
    }
}
