//! Wire types: the GraphQL request / response envelope and the `graphql-ws`
//! (subscriptions-transport-ws) message set.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use telemetry_core::models::Operation;

/// WebSocket subprotocol negotiated with the subscription endpoint.
pub const GRAPHQL_WS_PROTOCOL: &str = "graphql-ws";

// ── GraphQL envelope ──────────────────────────────────────────────────────────

/// Body of a GraphQL request, over HTTP or inside a `start` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphqlRequest {
    pub query: String,
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(
        rename = "operationName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub operation_name: Option<String>,
}

impl From<&Operation> for GraphqlRequest {
    fn from(op: &Operation) -> Self {
        Self {
            query: op.document().to_string(),
            variables: op.input().clone(),
            operation_name: Some(op.name().to_string()).filter(|n| !n.is_empty()),
        }
    }
}

/// GraphQL response: `data` and / or a list of errors.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GraphqlResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub errors: Vec<Value>,
}

impl GraphqlResponse {
    /// Human-readable error messages.
    ///
    /// Servers send either `{ "message": ... }` objects or bare strings.
    pub fn error_messages(&self) -> Vec<String> {
        self.errors
            .iter()
            .map(|e| match e {
                Value::String(s) => s.clone(),
                other => other
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| other.to_string()),
            })
            .collect()
    }

    /// The `data` value, or the error messages when the server reported any
    /// or sent no data at all.
    pub fn into_data(self) -> Result<Value, Vec<String>> {
        if !self.errors.is_empty() {
            return Err(self.error_messages());
        }
        match self.data {
            Some(Value::Null) | None => Err(vec!["response carried no data".to_string()]),
            Some(data) => Ok(data),
        }
    }
}

// ── graphql-ws messages ───────────────────────────────────────────────────────

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    ConnectionInit {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Start {
        id: String,
        payload: GraphqlRequest,
    },
    Stop {
        id: String,
    },
    ConnectionTerminate,
}

impl ClientMessage {
    pub fn to_text(&self) -> String {
        // Serializing these plain structs cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConnectionAck,
    ConnectionError {
        #[serde(default)]
        payload: Value,
    },
    Data {
        id: String,
        payload: GraphqlResponse,
    },
    Error {
        id: String,
        #[serde(default)]
        payload: Value,
    },
    Complete {
        id: String,
    },
    #[serde(rename = "ka")]
    KeepAlive,
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Render an error payload (object, list, or string) as one line.
pub fn describe_payload(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        Value::Null => "no details".to_string(),
        Value::Array(items) => items.iter().map(describe_payload).collect::<Vec<_>>().join("; "),
        other => other
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    }
}
