use thiserror::Error;

/// A one-shot request could not be completed.
///
/// Variants carry rendered messages rather than source errors so the value
/// can be cloned into observable subscription state.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The connection could not be established or broke mid-exchange.
    #[error("Network failure: {0}")]
    Network(String),

    /// The request did not complete within the configured timeout.
    #[error("Request timed out")]
    Timeout,

    /// The endpoint answered with a non-success HTTP status.
    #[error("Endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The endpoint answered but reported GraphQL errors.
    #[error("Operation failed: {}", .0.join("; "))]
    Graphql(Vec<String>),

    /// The response body did not have the expected shape.
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// A continuous operation was handed to a one-shot caller.
    #[error("Operation {operation} was routed to the stream transport")]
    Misrouted { operation: String },
}

/// A long-lived subscription could not be established or maintained.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamError {
    /// The socket could not be opened.
    #[error("Failed to connect: {0}")]
    Connect(String),

    /// The server rejected or never acknowledged the connection.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// The server reported an error for the running operation.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// `attempts` consecutive connection attempts failed.
    #[error("Gave up after {attempts} connection attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// The server completed a subscription that was expected to stay open.
    #[error("Stream ended unexpectedly")]
    EndOfStream,

    /// No event arrived within the configured stall timeout.
    #[error("No event received for {secs}s")]
    Stalled { secs: u64 },
}

/// All errors produced by Live Telemetry.
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A JSON document could not be parsed.
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Catch-all for errors from third-party crates via `anyhow`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Convenience alias used throughout the telemetry crates.
pub type Result<T> = std::result::Result<T, TelemetryError>;
