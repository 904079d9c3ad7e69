//! Long-lived subscription channel.
//!
//! A [`StreamChannel`] turns a continuous [`Operation`] into an
//! [`EventSequence`]: a lazy stream of response payloads owned by exactly one
//! consumer. [`WsStreamChannel`] runs each subscription as a `graphql-ws`
//! WebSocket session in its own tokio task and reconnects with bounded
//! exponential back-off when the connection drops.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::{SinkExt, Stream, StreamExt};
use serde_json::Value;
use telemetry_core::error::StreamError;
use telemetry_core::models::Operation;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::protocol::{
    describe_payload, ClientMessage, GraphqlRequest, ServerMessage, GRAPHQL_WS_PROTOCOL,
};

/// One item of an [`EventSequence`]. An `Err` is always the last item.
pub type StreamItem = Result<Value, StreamError>;

/// Default number of undelivered events buffered per subscription.
pub const DEFAULT_EVENT_BUFFER: usize = 64;

// ── StreamChannel ─────────────────────────────────────────────────────────────

/// Opens continuous operations.
pub trait StreamChannel: Send + Sync {
    /// Start `op` and return its event sequence.
    ///
    /// Connection errors are reported through the sequence, never here.
    fn open(&self, op: Operation) -> EventSequence;
}

// ── EventSequence / EventSender ───────────────────────────────────────────────

/// Consumer side of a subscription lease.
///
/// Yields response payloads until the producer finishes or fails. Closing is
/// at-most-once: the first [`EventSequence::close`] (or dropping the sequence)
/// signals the producer, later calls are no-ops. Once closed the sequence
/// yields nothing more, even if events were already buffered.
pub struct EventSequence {
    events: mpsc::Receiver<StreamItem>,
    close: Option<oneshot::Sender<()>>,
}

impl EventSequence {
    /// Create a connected producer / consumer pair.
    pub fn channel(buffer: usize) -> (EventSender, EventSequence) {
        let (events_tx, events_rx) = mpsc::channel(buffer.max(1));
        let (close_tx, close_rx) = oneshot::channel();
        (
            EventSender {
                events: events_tx,
                close: close_rx,
                close_seen: false,
            },
            EventSequence {
                events: events_rx,
                close: Some(close_tx),
            },
        )
    }

    /// Signal the producer to tear the subscription down.
    ///
    /// Returns `true` when this call sent the signal, `false` when the
    /// sequence was already closed.
    pub fn close(&mut self) -> bool {
        match self.close.take() {
            Some(signal) => {
                let _ = signal.send(());
                self.events.close();
                true
            }
            None => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.close.is_none()
    }
}

impl Stream for EventSequence {
    type Item = StreamItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.close.is_none() {
            return Poll::Ready(None);
        }
        self.events.poll_recv(cx)
    }
}

impl std::fmt::Debug for EventSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSequence")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Producer side of a subscription lease, held by channel implementations.
pub struct EventSender {
    events: mpsc::Sender<StreamItem>,
    close: oneshot::Receiver<()>,
    close_seen: bool,
}

impl EventSender {
    /// Deliver one item. Returns `false` once the consumer has closed or
    /// dropped the sequence.
    pub async fn send(&self, item: StreamItem) -> bool {
        self.events.send(item).await.is_ok()
    }

    /// Resolve when the consumer closes or drops the sequence.
    pub async fn closed(&mut self) {
        if self.close_seen {
            return;
        }
        let _ = (&mut self.close).await;
        self.close_seen = true;
    }

    /// Non-blocking check for a close request.
    pub fn is_closed(&mut self) -> bool {
        if self.close_seen {
            return true;
        }
        match self.close.try_recv() {
            Err(oneshot::error::TryRecvError::Empty) => false,
            _ => {
                self.close_seen = true;
                true
            }
        }
    }
}

// ── ReconnectPolicy ───────────────────────────────────────────────────────────

/// When and how often a dropped subscription is re-established.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Consecutive failed sessions tolerated before giving up.
    pub max_retries: u32,
    /// Delay before the second retry; the first retry is immediate.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
    /// How long to wait for `connection_ack` after `connection_init`.
    pub ack_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(10),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based).
    ///
    /// Schedule: 0, `initial`, 2×`initial`, 4×`initial`, … capped at
    /// `max_backoff`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow((attempt - 2).min(16));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

// ── WsStreamChannel ───────────────────────────────────────────────────────────

/// `graphql-ws` subscription channel.
///
/// [`StreamChannel::open`] spawns the session task, so it must be called from
/// within a tokio runtime.
pub struct WsStreamChannel {
    endpoint: Url,
    policy: ReconnectPolicy,
    buffer: usize,
    next_id: AtomicU64,
}

impl WsStreamChannel {
    pub fn new(endpoint: Url, policy: ReconnectPolicy) -> Self {
        Self {
            endpoint,
            policy,
            buffer: DEFAULT_EVENT_BUFFER,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }
}

impl StreamChannel for WsStreamChannel {
    fn open(&self, op: Operation) -> EventSequence {
        let (sender, sequence) = EventSequence::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();

        tracing::debug!(operation = op.name(), id = %id, endpoint = %self.endpoint, "opening subscription");

        tokio::spawn(run_subscription(
            self.endpoint.clone(),
            op,
            id,
            self.policy.clone(),
            sender,
        ));

        sequence
    }
}

// ── Session task ──────────────────────────────────────────────────────────────

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How one WebSocket session ended.
enum SessionOutcome {
    /// The consumer closed the lease.
    Closed,
    /// Reconnecting would not help.
    Fatal(StreamError),
    /// The connection failed or dropped; worth another attempt.
    /// `delivered` is set when the session forwarded at least one event.
    Dropped { reason: String, delivered: bool },
}

/// Drive sessions for one subscription until it is closed or retries run out.
async fn run_subscription(
    endpoint: Url,
    op: Operation,
    id: String,
    policy: ReconnectPolicy,
    mut sink: EventSender,
) {
    let mut failures: u32 = 0;

    loop {
        let reason = match run_session(&endpoint, &op, &id, &policy, &mut sink).await {
            SessionOutcome::Closed => {
                tracing::debug!(id = %id, "subscription closed by consumer");
                return;
            }
            SessionOutcome::Fatal(err) => {
                tracing::warn!(id = %id, error = %err, "subscription failed");
                sink.send(Err(err)).await;
                return;
            }
            SessionOutcome::Dropped {
                reason,
                delivered,
            } => {
                // Only a session that produced data counts as healthy.
                if delivered {
                    failures = 0;
                }
                reason
            }
        };

        failures += 1;
        if failures > policy.max_retries {
            tracing::warn!(id = %id, attempts = failures, reason = %reason, "reconnect attempts exhausted");
            sink.send(Err(StreamError::RetriesExhausted {
                attempts: failures,
                last_error: reason,
            }))
            .await;
            return;
        }

        let delay = policy.delay_for(failures);
        tracing::info!(
            id = %id,
            attempt = failures,
            delay_ms = delay.as_millis() as u64,
            reason = %reason,
            "subscription interrupted; reconnecting"
        );

        if delay.is_zero() {
            if sink.is_closed() {
                return;
            }
        } else {
            tokio::select! {
                _ = sink.closed() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Connect, handshake, start `op`, and forward payloads until the session ends.
async fn run_session(
    endpoint: &Url,
    op: &Operation,
    id: &str,
    policy: &ReconnectPolicy,
    sink: &mut EventSender,
) -> SessionOutcome {
    let request = match build_request(endpoint) {
        Ok(request) => request,
        Err(e) => return SessionOutcome::Fatal(StreamError::Connect(e)),
    };

    let connected = tokio::select! {
        _ = sink.closed() => return SessionOutcome::Closed,
        result = connect_async(request) => result,
    };
    let mut ws = match connected {
        Ok((ws, _response)) => ws,
        Err(e) => {
            return SessionOutcome::Dropped {
                reason: e.to_string(),
                delivered: false,
            }
        }
    };

    let init = ClientMessage::ConnectionInit { payload: None };
    if let Err(e) = ws.send(Message::Text(init.to_text())).await {
        return SessionOutcome::Dropped {
            reason: e.to_string(),
            delivered: false,
        };
    }

    let acked = tokio::select! {
        _ = sink.closed() => {
            let _ = ws.close(None).await;
            return SessionOutcome::Closed;
        }
        result = tokio::time::timeout(policy.ack_timeout, wait_for_ack(&mut ws)) => result,
    };
    match acked {
        Ok(Ok(())) => {}
        Ok(Err(outcome)) => return outcome,
        Err(_elapsed) => {
            let _ = ws.close(None).await;
            return SessionOutcome::Dropped {
                reason: "timed out waiting for connection_ack".to_string(),
                delivered: false,
            };
        }
    }

    let start = ClientMessage::Start {
        id: id.to_string(),
        payload: GraphqlRequest::from(op),
    };
    if let Err(e) = ws.send(Message::Text(start.to_text())).await {
        return SessionOutcome::Dropped {
            reason: e.to_string(),
            delivered: false,
        };
    }
    tracing::debug!(id = %id, "subscription started");

    let mut delivered = false;
    loop {
        let frame = tokio::select! {
            _ = sink.closed() => {
                shutdown(&mut ws, id).await;
                return SessionOutcome::Closed;
            }
            frame = ws.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => match ServerMessage::parse(&text) {
                Ok(ServerMessage::Data {
                    id: message_id,
                    payload,
                }) => {
                    if message_id != id {
                        tracing::debug!(id = %message_id, "ignoring data for unknown operation");
                        continue;
                    }
                    match payload.into_data() {
                        Ok(data) => {
                            if !sink.send(Ok(data)).await {
                                shutdown(&mut ws, id).await;
                                return SessionOutcome::Closed;
                            }
                            delivered = true;
                        }
                        Err(errors) => {
                            tracing::warn!(id = %id, ?errors, "subscription payload carried errors; skipping");
                        }
                    }
                }
                Ok(ServerMessage::Error {
                    id: message_id,
                    payload,
                }) => {
                    if message_id != id {
                        tracing::debug!(id = %message_id, "ignoring error for unknown operation");
                        continue;
                    }
                    let _ = ws.close(None).await;
                    return SessionOutcome::Fatal(StreamError::Protocol(describe_payload(
                        &payload,
                    )));
                }
                Ok(ServerMessage::ConnectionError { payload }) => {
                    let _ = ws.close(None).await;
                    return SessionOutcome::Fatal(StreamError::Handshake(describe_payload(
                        &payload,
                    )));
                }
                Ok(ServerMessage::Complete { id: message_id }) => {
                    if message_id != id {
                        tracing::debug!(id = %message_id, "ignoring complete for unknown operation");
                        continue;
                    }
                    let _ = ws.close(None).await;
                    return SessionOutcome::Fatal(StreamError::EndOfStream);
                }
                Ok(ServerMessage::KeepAlive) | Ok(ServerMessage::ConnectionAck) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring unrecognised server message");
                }
            },
            Some(Ok(Message::Close(_))) => {
                return SessionOutcome::Dropped {
                    reason: "server closed the connection".to_string(),
                    delivered,
                }
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                return SessionOutcome::Dropped {
                    reason: e.to_string(),
                    delivered,
                }
            }
            None => {
                return SessionOutcome::Dropped {
                    reason: "connection closed".to_string(),
                    delivered,
                }
            }
        }
    }
}

/// Read frames until `connection_ack`.
async fn wait_for_ack(ws: &mut Socket) -> Result<(), SessionOutcome> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => match ServerMessage::parse(&text) {
                Ok(ServerMessage::ConnectionAck) => return Ok(()),
                Ok(ServerMessage::ConnectionError { payload }) => {
                    return Err(SessionOutcome::Fatal(StreamError::Handshake(
                        describe_payload(&payload),
                    )))
                }
                Ok(other) => tracing::debug!(received = ?other, "ignoring message before ack"),
                Err(e) => tracing::warn!(error = %e, "ignoring unrecognised server message"),
            },
            Some(Ok(Message::Close(_))) | None => {
                return Err(SessionOutcome::Dropped {
                    reason: "connection closed during handshake".to_string(),
                    delivered: false,
                })
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                return Err(SessionOutcome::Dropped {
                    reason: e.to_string(),
                    delivered: false,
                })
            }
        }
    }
}

/// Stop the operation and end the session politely.
async fn shutdown(ws: &mut Socket, id: &str) {
    let stop = ClientMessage::Stop { id: id.to_string() };
    let _ = ws.send(Message::Text(stop.to_text())).await;
    let _ = ws
        .send(Message::Text(ClientMessage::ConnectionTerminate.to_text()))
        .await;
    let _ = ws.close(None).await;
}

fn build_request(endpoint: &Url) -> Result<Request, String> {
    let mut request = endpoint
        .as_str()
        .into_client_request()
        .map_err(|e| e.to_string())?;
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        HeaderValue::from_static(GRAPHQL_WS_PROTOCOL),
    );
    Ok(request)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
