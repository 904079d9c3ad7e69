//! One-shot request channel.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use telemetry_core::error::TransportError;
use telemetry_core::models::Operation;
use url::Url;

use crate::protocol::{GraphqlRequest, GraphqlResponse};

/// Sends one operation and resolves once with its result.
#[async_trait]
pub trait RequestChannel: Send + Sync {
    /// Send `op` and return the response's `data` value.
    async fn send(&self, op: &Operation) -> Result<Value, TransportError>;
}

/// GraphQL-over-HTTP request channel.
///
/// Every call is an independent `POST`; no connection state is kept beyond
/// what the underlying client pools.
pub struct HttpRequestChannel {
    http: Client,
    endpoint: Url,
}

impl HttpRequestChannel {
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self, TransportError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("live-telemetry/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Network(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl RequestChannel for HttpRequestChannel {
    async fn send(&self, op: &Operation) -> Result<Value, TransportError> {
        tracing::debug!(operation = op.name(), endpoint = %self.endpoint, "sending request");

        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&GraphqlRequest::from(op))
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let parsed: GraphqlResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;

        parsed.into_data().map_err(TransportError::Graphql)
    }
}

fn network_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Network(e.to_string())
    }
}
