use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::error::TelemetryError;

/// Whether an operation completes once or keeps delivering results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// One-shot read.
    Query,
    /// One-shot write.
    Mutation,
    /// Continuous stream of results.
    Subscription,
}

/// Which transport an operation must travel over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportTag {
    /// Long-lived bidirectional connection.
    Stream,
    /// One-shot request / response exchange.
    Request,
}

/// A named GraphQL operation the client can issue.
///
/// Immutable once built; [`Operation::with_input`] consumes and returns a new
/// value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    kind: OperationKind,
    name: String,
    document: String,
    #[serde(default)]
    input: Map<String, Value>,
}

impl Operation {
    pub fn new(kind: OperationKind, name: impl Into<String>, document: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            document: document.into(),
            input: Map::new(),
        }
    }

    pub fn query(name: impl Into<String>, document: impl Into<String>) -> Self {
        Self::new(OperationKind::Query, name, document)
    }

    pub fn mutation(name: impl Into<String>, document: impl Into<String>) -> Self {
        Self::new(OperationKind::Mutation, name, document)
    }

    pub fn subscription(name: impl Into<String>, document: impl Into<String>) -> Self {
        Self::new(OperationKind::Subscription, name, document)
    }

    /// Return a copy of this operation with one more input variable.
    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.input.insert(key.into(), value);
        self
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// GraphQL document text sent on the wire.
    pub fn document(&self) -> &str {
        &self.document
    }

    /// Input variables, keyed by parameter name.
    pub fn input(&self) -> &Map<String, Value> {
        &self.input
    }
}

/// A single telemetry reading.
///
/// Wire form is `{ "timestamp", "value", "deviceId" }`; see
/// [`crate::time_utils::epoch_seconds`] for the accepted timestamp encodings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// When the reading was taken (UTC).
    #[serde(with = "crate::time_utils::epoch_seconds")]
    pub timestamp: DateTime<Utc>,
    /// Measured value.
    pub value: f64,
    /// Identifier of the device that produced the reading.
    #[serde(rename = "deviceId")]
    pub source_id: String,
}

impl DataPoint {
    pub fn new(timestamp: DateTime<Utc>, value: f64, source_id: impl Into<String>) -> Self {
        Self {
            timestamp,
            value,
            source_id: source_id.into(),
        }
    }
}

/// Network endpoints of the telemetry server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// One-shot request endpoint (`http` / `https`).
    pub request: Url,
    /// Streaming endpoint (`ws` / `wss`).
    pub stream: Url,
}

impl Endpoints {
    /// Parse and validate both endpoint URLs.
    pub fn parse(request: &str, stream: &str) -> Result<Self, TelemetryError> {
        let request = parse_endpoint(request, &["http", "https"])?;
        let stream = parse_endpoint(stream, &["ws", "wss"])?;
        Ok(Self { request, stream })
    }
}

fn parse_endpoint(raw: &str, schemes: &[&str]) -> Result<Url, TelemetryError> {
    let url = Url::parse(raw)
        .map_err(|e| TelemetryError::Config(format!("invalid endpoint {raw}: {e}")))?;
    if !schemes.contains(&url.scheme()) {
        return Err(TelemetryError::Config(format!(
            "endpoint {raw} must use one of: {}",
            schemes.join(", ")
        )));
    }
    Ok(url)
}
