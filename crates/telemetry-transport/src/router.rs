//! Routes each operation to the request or stream channel.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::Value;
use telemetry_core::classifier::classify;
use telemetry_core::error::TransportError;
use telemetry_core::models::{Endpoints, Operation, TransportTag};

use crate::request::{HttpRequestChannel, RequestChannel};
use crate::stream::{EventSequence, ReconnectPolicy, StreamChannel, WsStreamChannel};

/// Knobs for the concrete channels built by [`TransportRouter::connect`].
#[derive(Debug, Clone, PartialEq)]
pub struct TransportOptions {
    pub request_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Result of [`TransportRouter::execute`].
#[derive(Debug)]
pub enum TransportHandle {
    /// A one-shot operation; resolves once.
    Response(ResponseHandle),
    /// A continuous operation; yields until closed or failed.
    Stream(EventSequence),
}

impl TransportHandle {
    pub fn into_response(self) -> Option<ResponseHandle> {
        match self {
            TransportHandle::Response(response) => Some(response),
            TransportHandle::Stream(_) => None,
        }
    }

    pub fn into_stream(self) -> Option<EventSequence> {
        match self {
            TransportHandle::Stream(events) => Some(events),
            TransportHandle::Response(_) => None,
        }
    }
}

/// Pending result of a one-shot operation.
pub struct ResponseHandle {
    inner: BoxFuture<'static, Result<Value, TransportError>>,
}

impl Future for ResponseHandle {
    type Output = Result<Value, TransportError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

impl std::fmt::Debug for ResponseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ResponseHandle")
    }
}

/// Dispatches operations by their declared kind.
///
/// Holds no per-operation state: every call may open a new connection and
/// nothing is pooled or deduplicated.
#[derive(Clone)]
pub struct TransportRouter {
    requests: Arc<dyn RequestChannel>,
    streams: Arc<dyn StreamChannel>,
}

impl TransportRouter {
    pub fn new(requests: Arc<dyn RequestChannel>, streams: Arc<dyn StreamChannel>) -> Self {
        Self { requests, streams }
    }

    /// Build the HTTP and WebSocket channels for `endpoints`.
    pub fn connect(
        endpoints: &Endpoints,
        options: &TransportOptions,
    ) -> Result<Self, TransportError> {
        let requests = HttpRequestChannel::new(endpoints.request.clone(), options.request_timeout)?;
        let streams = WsStreamChannel::new(endpoints.stream.clone(), options.reconnect.clone());

        tracing::info!(
            request = %endpoints.request,
            stream = %endpoints.stream,
            "transport router ready"
        );

        Ok(Self::new(Arc::new(requests), Arc::new(streams)))
    }

    /// Send `op` over the channel its kind calls for.
    pub fn execute(&self, op: Operation) -> TransportHandle {
        match classify(&op) {
            TransportTag::Stream => TransportHandle::Stream(self.streams.open(op)),
            TransportTag::Request => {
                let requests = Arc::clone(&self.requests);
                TransportHandle::Response(ResponseHandle {
                    inner: Box::pin(async move { requests.send(&op).await }),
                })
            }
        }
    }

    /// Run a one-shot operation to completion.
    ///
    /// A continuous operation is closed immediately and reported as
    /// [`TransportError::Misrouted`].
    pub async fn request(&self, op: Operation) -> Result<Value, TransportError> {
        let operation = op.name().to_string();
        match self.execute(op) {
            TransportHandle::Response(response) => response.await,
            TransportHandle::Stream(mut events) => {
                events.close();
                Err(TransportError::Misrouted { operation })
            }
        }
    }
}
