//! Subscription manager: seeds a sliding window from history, keeps it fed
//! from a live subscription, and publishes a snapshot after every change.
//!
//! A manager can be driven step by step ([`SubscriptionManager::activate`],
//! [`SubscriptionManager::pump`], [`SubscriptionManager::cancel`]) or handed
//! to a tokio task with [`SubscriptionManager::spawn`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde_json::Value;
use telemetry_core::error::{StreamError, TransportError};
use telemetry_core::models::{DataPoint, Operation};
use telemetry_core::operations::{history_query, live_subscription, HISTORY_FIELD, LIVE_FIELD};
use telemetry_core::window::SlidingWindow;
use telemetry_transport::router::TransportRouter;
use telemetry_transport::stream::EventSequence;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Bound of the snapshot channel towards the display layer.
const DISPLAY_BUFFER: usize = 16;

// ── Public types ──────────────────────────────────────────────────────────────

/// What a view shows and how it is fed.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewConfig {
    /// One-shot operation whose result seeds the window.
    pub history: Operation,
    /// Root field of the history response holding the list of points.
    pub history_field: String,
    /// Continuous operation feeding the window.
    pub live: Operation,
    /// Root field of each live payload holding one point.
    pub live_field: String,
    pub capacity: usize,
    /// Fail the subscription when no event arrives for this long.
    pub stall_timeout: Option<Duration>,
}

impl ViewConfig {
    /// The telemetry view: recent history plus readings stored from `start`.
    pub fn telemetry(start: DateTime<Utc>, capacity: usize) -> Self {
        Self {
            history: history_query(),
            history_field: HISTORY_FIELD.to_string(),
            live: live_subscription(start),
            live_field: LIVE_FIELD.to_string(),
            capacity,
            stall_timeout: None,
        }
    }

    pub fn with_stall_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stall_timeout = timeout;
        self
    }
}

/// Owned copy of the window handed to the display layer.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSnapshot {
    /// Oldest first, in arrival order.
    pub points: Vec<DataPoint>,
    pub capacity: usize,
    /// Number of snapshots published before this one.
    pub sequence: u64,
}

/// Why a subscription ended in [`SubscriptionState::Failed`].
#[derive(Debug, Clone, PartialEq)]
pub enum Failure {
    /// The history fetch failed; the live subscription was never opened.
    NoInitialData(TransportError),
    /// The live subscription broke after it was opened.
    Stream(StreamError),
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Failure::NoInitialData(e) => write!(f, "could not load initial data: {e}"),
            Failure::Stream(e) => write!(f, "live subscription failed: {e}"),
        }
    }
}

/// Lifecycle of one view's subscription.
///
/// `Closed` and `Failed` are terminal.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionState {
    Idle,
    Seeding,
    Subscribed,
    Closed,
    Failed(Failure),
}

impl SubscriptionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubscriptionState::Closed | SubscriptionState::Failed(_))
    }
}

// ── SubscriptionManager ───────────────────────────────────────────────────────

/// Owns the window and the single live subscription of one view.
///
/// All window mutation happens on the task driving the manager, so the window
/// needs no locking.
pub struct SubscriptionManager {
    router: TransportRouter,
    view: ViewConfig,
    window: SlidingWindow<DataPoint>,
    events: Option<EventSequence>,
    display: mpsc::Sender<WindowSnapshot>,
    state: watch::Sender<SubscriptionState>,
    cancel_signal: Option<watch::Receiver<bool>>,
    published: u64,
    skipped: u64,
}

impl SubscriptionManager {
    /// Create an idle manager and the receiver the display layer reads
    /// snapshots from.
    pub fn new(router: TransportRouter, view: ViewConfig) -> (Self, mpsc::Receiver<WindowSnapshot>) {
        let (display, snapshots) = mpsc::channel(DISPLAY_BUFFER);
        let (state, _) = watch::channel(SubscriptionState::Idle);
        let window = SlidingWindow::new(view.capacity);

        let manager = Self {
            router,
            view,
            window,
            events: None,
            display,
            state,
            cancel_signal: None,
            published: 0,
            skipped: 0,
        };
        (manager, snapshots)
    }

    /// Seed the window from history, then open the live subscription.
    ///
    /// Returns `true` once the manager is `Subscribed`. A history failure
    /// ends in `Failed(NoInitialData)` and the live operation is never sent.
    pub async fn activate(&mut self) -> bool {
        if self.state() != SubscriptionState::Idle {
            tracing::warn!(state = ?self.state(), "activate called on a non-idle subscription");
            return false;
        }
        self.set_state(SubscriptionState::Seeding);

        let points = match self.load_history().await {
            Ok(points) => points,
            Err(e) => {
                self.fail(Failure::NoInitialData(e));
                return false;
            }
        };

        tracing::info!(
            received = points.len(),
            capacity = self.window.capacity(),
            "seeding window from history"
        );
        self.window.seed(points);

        if !self.notify().await {
            self.cancel();
            return false;
        }

        match self.router.execute(self.view.live.clone()).into_stream() {
            Some(events) => {
                self.events = Some(events);
                self.set_state(SubscriptionState::Subscribed);
                tracing::info!(operation = self.view.live.name(), "live subscription opened");
                true
            }
            None => {
                self.fail(Failure::Stream(StreamError::Connect(format!(
                    "operation {} is not continuous",
                    self.view.live.name()
                ))));
                false
            }
        }
    }

    /// Wait for the next live event and apply it.
    ///
    /// Returns whether the subscription is still live. An error or the end of
    /// the event sequence moves to `Failed(Stream)` and keeps the window.
    pub async fn pump(&mut self) -> bool {
        if self.state() != SubscriptionState::Subscribed {
            return false;
        }
        let stall_timeout = self.view.stall_timeout;
        let Some(events) = self.events.as_mut() else {
            return false;
        };

        let next = match stall_timeout {
            Some(limit) => match tokio::time::timeout(limit, events.next()).await {
                Ok(next) => next,
                Err(_) => Some(Err(StreamError::Stalled {
                    secs: whole_seconds(limit),
                })),
            },
            None => events.next().await,
        };

        match next {
            Some(Ok(payload)) => {
                let point = match decode_point(&payload, &self.view.live_field) {
                    Ok(point) => point,
                    Err(e) => {
                        self.skipped += 1;
                        tracing::warn!(error = %e, skipped = self.skipped, "skipping undecodable live event");
                        return true;
                    }
                };

                tracing::debug!(timestamp = %point.timestamp, value = point.value, "live event");
                self.window.push(point);

                if !self.notify().await {
                    self.cancel();
                    return false;
                }
                true
            }
            Some(Err(e)) => {
                self.fail(Failure::Stream(e));
                false
            }
            None => {
                self.fail(Failure::Stream(StreamError::EndOfStream));
                false
            }
        }
    }

    /// Stop the view: close the live subscription and move to `Closed`.
    ///
    /// Idempotent. Returns `true` only for the call that sent the close
    /// signal to the stream channel.
    pub fn cancel(&mut self) -> bool {
        let signalled = self
            .events
            .as_mut()
            .map(EventSequence::close)
            .unwrap_or(false);

        if !self.state().is_terminal() {
            tracing::info!("subscription cancelled");
            self.set_state(SubscriptionState::Closed);
        }
        signalled
    }

    pub fn state(&self) -> SubscriptionState {
        self.state.borrow().clone()
    }

    /// Current window contents, oldest first.
    pub fn snapshot(&self) -> Vec<DataPoint> {
        self.window.snapshot()
    }

    /// Live events dropped because they could not be decoded.
    pub fn skipped_events(&self) -> u64 {
        self.skipped
    }

    /// Run activation and the event loop in a tokio task.
    pub fn spawn(mut self) -> ViewHandle {
        let (cancel, cancel_rx) = watch::channel(false);
        self.cancel_signal = Some(cancel_rx.clone());
        let state = self.state.subscribe();

        let task = tokio::spawn(async move { self.run(cancel_rx).await });

        ViewHandle {
            cancel,
            state,
            task,
        }
    }

    // ── Private implementation ────────────────────────────────────────────

    async fn run(mut self, mut cancel_rx: watch::Receiver<bool>) -> SubscriptionState {
        let subscribed = tokio::select! {
            biased;
            _ = cancel_rx.wait_for(|cancelled| *cancelled) => false,
            subscribed = self.activate() => subscribed,
        };
        if !subscribed {
            if !self.state().is_terminal() {
                self.cancel();
            }
            return self.state();
        }

        loop {
            let live = tokio::select! {
                biased;
                _ = cancel_rx.wait_for(|cancelled| *cancelled) => false,
                live = self.pump() => live,
            };
            if !live {
                break;
            }
        }

        if !self.state().is_terminal() {
            self.cancel();
        }
        self.state()
    }

    async fn load_history(&self) -> Result<Vec<DataPoint>, TransportError> {
        let data = self.router.request(self.view.history.clone()).await?;
        let list = data
            .get(&self.view.history_field)
            .cloned()
            .unwrap_or(Value::Null);
        serde_json::from_value(list).map_err(|e| {
            TransportError::Decode(format!("{} is not a list of points: {e}", self.view.history_field))
        })
    }

    /// Publish the current window. Returns `false` when the view was cancelled
    /// or the display layer went away.
    async fn notify(&mut self) -> bool {
        if self.cancel_requested() {
            return false;
        }
        let snapshot = WindowSnapshot {
            points: self.window.snapshot(),
            capacity: self.window.capacity(),
            sequence: self.published,
        };
        if self.display.send(snapshot).await.is_err() {
            tracing::debug!("display receiver dropped; closing subscription");
            return false;
        }
        self.published += 1;
        true
    }

    fn cancel_requested(&self) -> bool {
        self.cancel_signal
            .as_ref()
            .map(|signal| *signal.borrow())
            .unwrap_or(false)
    }

    fn fail(&mut self, failure: Failure) {
        if let Some(events) = self.events.as_mut() {
            events.close();
        }
        tracing::warn!(error = %failure, kept = self.window.len(), "subscription failed");
        self.set_state(SubscriptionState::Failed(failure));
    }

    fn set_state(&self, next: SubscriptionState) {
        tracing::debug!(from = ?*self.state.borrow(), to = ?next, "subscription state change");
        self.state.send_replace(next);
    }
}

/// Seconds rounded up, so sub-second limits never report `0s`.
fn whole_seconds(limit: Duration) -> u64 {
    limit.as_secs() + u64::from(limit.subsec_nanos() > 0)
}

fn decode_point(payload: &Value, field: &str) -> Result<DataPoint, String> {
    let raw = payload
        .get(field)
        .ok_or_else(|| format!("payload has no {field} field"))?;
    serde_json::from_value(raw.clone()).map_err(|e| e.to_string())
}

// ── ViewHandle ────────────────────────────────────────────────────────────────

/// Handle to a spawned [`SubscriptionManager`].
pub struct ViewHandle {
    cancel: watch::Sender<bool>,
    state: watch::Receiver<SubscriptionState>,
    task: JoinHandle<SubscriptionState>,
}

impl ViewHandle {
    /// Request cancellation; safe to call any number of times.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn state(&self) -> SubscriptionState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<SubscriptionState> {
        self.state.clone()
    }

    /// Wait for the task to finish and return its terminal state.
    pub async fn join(self) -> SubscriptionState {
        match self.task.await {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(error = %e, "subscription task ended abnormally");
                self.state.borrow().clone()
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use telemetry_transport::request::RequestChannel;
    use telemetry_transport::stream::{EventSender, StreamChannel};

    const WAIT: Duration = Duration::from_secs(5);

    // ── fakes ─────────────────────────────────────────────────────────────

    enum HistoryScript {
        Respond(Result<Value, TransportError>),
        Hang,
    }

    struct ScriptedRequests {
        script: Mutex<Option<HistoryScript>>,
        calls: AtomicUsize,
    }

    impl ScriptedRequests {
        fn new(script: HistoryScript) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(Some(script)),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl RequestChannel for ScriptedRequests {
        async fn send(&self, _op: &Operation) -> Result<Value, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let script = self.script.lock().unwrap().take();
            match script {
                Some(HistoryScript::Respond(result)) => result,
                Some(HistoryScript::Hang) => std::future::pending().await,
                None => Err(TransportError::Network("no scripted response".to_string())),
            }
        }
    }

    #[derive(Default)]
    struct ScriptedStreams {
        senders: Mutex<Vec<EventSender>>,
        opened: AtomicUsize,
    }

    impl ScriptedStreams {
        fn take_sender(&self) -> EventSender {
            self.senders.lock().unwrap().remove(0)
        }

        fn opened(&self) -> usize {
            self.opened.load(Ordering::SeqCst)
        }
    }

    impl StreamChannel for ScriptedStreams {
        fn open(&self, _op: Operation) -> EventSequence {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let (sender, sequence) = EventSequence::channel(32);
            self.senders.lock().unwrap().push(sender);
            sequence
        }
    }

    // ── helpers ───────────────────────────────────────────────────────────

    fn raw_point(t: i64, value: f64) -> Value {
        json!({ "timestamp": t, "value": value, "deviceId": "A" })
    }

    fn history(points: &[(i64, f64)]) -> Value {
        let list: Vec<Value> = points.iter().map(|&(t, v)| raw_point(t, v)).collect();
        json!({ "last": list })
    }

    fn live(t: i64, value: f64) -> Value {
        json!({ "newData": raw_point(t, value) })
    }

    fn view(capacity: usize) -> ViewConfig {
        ViewConfig::telemetry(Utc::now(), capacity)
    }

    fn manager_with(
        script: HistoryScript,
        view: ViewConfig,
    ) -> (
        SubscriptionManager,
        mpsc::Receiver<WindowSnapshot>,
        Arc<ScriptedRequests>,
        Arc<ScriptedStreams>,
    ) {
        let requests = ScriptedRequests::new(script);
        let streams = Arc::new(ScriptedStreams::default());
        let router = TransportRouter::new(requests.clone(), streams.clone());
        let (manager, snapshots) = SubscriptionManager::new(router, view);
        (manager, snapshots, requests, streams)
    }

    fn readings(points: &[DataPoint]) -> Vec<(i64, f64)> {
        points
            .iter()
            .map(|p| (p.timestamp.timestamp(), p.value))
            .collect()
    }

    fn timestamps(points: &[DataPoint]) -> Vec<i64> {
        points.iter().map(|p| p.timestamp.timestamp()).collect()
    }

    // ── activation ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_activate_seeds_then_subscribes() {
        let (mut manager, mut snapshots, requests, streams) = manager_with(
            HistoryScript::Respond(Ok(history(&[(1, 10.0), (2, 20.0)]))),
            view(10),
        );
        assert_eq!(manager.state(), SubscriptionState::Idle);

        assert!(manager.activate().await);
        assert_eq!(manager.state(), SubscriptionState::Subscribed);
        assert_eq!(requests.calls.load(Ordering::SeqCst), 1);
        assert_eq!(streams.opened(), 1);

        let seeded = snapshots.recv().await.unwrap();
        assert_eq!(timestamps(&seeded.points), vec![1, 2]);
        assert_eq!(seeded.capacity, 10);
        assert_eq!(seeded.sequence, 0);
    }

    #[tokio::test]
    async fn test_seeding_keeps_last_capacity_points() {
        let (mut manager, _snapshots, _requests, _streams) = manager_with(
            HistoryScript::Respond(Ok(history(&[(1, 1.0), (2, 2.0), (3, 3.0), (4, 4.0)]))),
            view(3),
        );
        assert!(manager.activate().await);
        assert_eq!(timestamps(&manager.snapshot()), vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_seeding_failure_never_opens_stream() {
        let (mut manager, mut snapshots, _requests, streams) =
            manager_with(HistoryScript::Respond(Err(TransportError::Timeout)), view(10));

        assert!(!manager.activate().await);
        assert_eq!(
            manager.state(),
            SubscriptionState::Failed(Failure::NoInitialData(TransportError::Timeout))
        );
        assert_eq!(streams.opened(), 0);
        assert!(snapshots.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_history_is_no_initial_data() {
        let (mut manager, _snapshots, _requests, streams) = manager_with(
            HistoryScript::Respond(Ok(json!({ "last": "nope" }))),
            view(10),
        );

        assert!(!manager.activate().await);
        assert!(matches!(
            manager.state(),
            SubscriptionState::Failed(Failure::NoInitialData(TransportError::Decode(_)))
        ));
        assert_eq!(streams.opened(), 0);
    }

    #[tokio::test]
    async fn test_activate_twice_is_rejected() {
        let (mut manager, _snapshots, requests, _streams) =
            manager_with(HistoryScript::Respond(Ok(history(&[]))), view(10));

        assert!(manager.activate().await);
        assert!(!manager.activate().await);
        assert_eq!(requests.calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), SubscriptionState::Subscribed);
    }

    #[tokio::test]
    async fn test_dropped_display_closes_subscription() {
        let (mut manager, snapshots, _requests, streams) =
            manager_with(HistoryScript::Respond(Ok(history(&[(1, 1.0)]))), view(10));
        drop(snapshots);

        assert!(!manager.activate().await);
        assert_eq!(manager.state(), SubscriptionState::Closed);
        assert_eq!(streams.opened(), 0);
    }

    // ── live events ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_end_to_end_window_after_overflow() {
        let (mut manager, mut snapshots, _requests, streams) = manager_with(
            HistoryScript::Respond(Ok(history(&[(1, 10.0), (2, 20.0)]))),
            view(10),
        );
        assert!(manager.activate().await);
        let sender = streams.take_sender();

        for t in 3..=11 {
            assert!(sender.send(Ok(live(t, t as f64 * 10.0))).await);
        }
        for _ in 3..=11 {
            assert!(manager.pump().await);
        }

        let window = manager.snapshot();
        assert_eq!(window.len(), 10);
        assert_eq!(window[0].timestamp.timestamp(), 2);
        assert_eq!(window[9].timestamp.timestamp(), 11);
        assert_eq!(window[0].value, 20.0);
        assert_eq!(window[9].value, 110.0);

        let published: Vec<WindowSnapshot> = std::iter::from_fn(|| snapshots.try_recv().ok()).collect();
        assert_eq!(published.len(), 10);

        let seeded = &published[0];
        assert_eq!(readings(&seeded.points), vec![(1, 10.0), (2, 20.0)]);

        let after_first = &published[1];
        assert_eq!(
            readings(&after_first.points),
            vec![(1, 10.0), (2, 20.0), (3, 30.0)]
        );
        assert_eq!(after_first.sequence, 1);

        let last = &published[9];
        assert_eq!(last.points, window);
        assert_eq!(last.sequence, 9);
    }

    #[tokio::test]
    async fn test_out_of_order_event_is_appended() {
        let (mut manager, _snapshots, _requests, streams) = manager_with(
            HistoryScript::Respond(Ok(history(&[(5, 5.0), (6, 6.0)]))),
            view(10),
        );
        assert!(manager.activate().await);
        let sender = streams.take_sender();

        sender.send(Ok(live(4, 4.0))).await;
        assert!(manager.pump().await);

        assert_eq!(timestamps(&manager.snapshot()), vec![5, 6, 4]);
    }

    #[tokio::test]
    async fn test_undecodable_event_is_skipped() {
        let (mut manager, _snapshots, _requests, streams) =
            manager_with(HistoryScript::Respond(Ok(history(&[(1, 1.0)]))), view(10));
        assert!(manager.activate().await);
        let sender = streams.take_sender();

        sender.send(Ok(json!({ "newData": { "value": "high" } }))).await;
        sender.send(Ok(json!({ "somethingElse": {} }))).await;
        sender.send(Ok(live(2, 2.0))).await;

        assert!(manager.pump().await);
        assert!(manager.pump().await);
        assert!(manager.pump().await);

        assert_eq!(manager.skipped_events(), 2);
        assert_eq!(timestamps(&manager.snapshot()), vec![1, 2]);
        assert_eq!(manager.state(), SubscriptionState::Subscribed);
    }

    #[tokio::test]
    async fn test_stream_failure_keeps_window() {
        let (mut manager, _snapshots, _requests, streams) = manager_with(
            HistoryScript::Respond(Ok(history(&[(1, 1.0), (2, 2.0)]))),
            view(10),
        );
        assert!(manager.activate().await);
        let mut sender = streams.take_sender();

        let err = StreamError::RetriesExhausted {
            attempts: 6,
            last_error: "connection refused".to_string(),
        };
        sender.send(Err(err.clone())).await;

        assert!(!manager.pump().await);
        assert_eq!(
            manager.state(),
            SubscriptionState::Failed(Failure::Stream(err))
        );
        assert_eq!(timestamps(&manager.snapshot()), vec![1, 2]);
        assert!(sender.is_closed());
        assert!(!manager.pump().await);
    }

    #[tokio::test]
    async fn test_end_of_sequence_is_failure() {
        let (mut manager, _snapshots, _requests, streams) =
            manager_with(HistoryScript::Respond(Ok(history(&[]))), view(10));
        assert!(manager.activate().await);
        drop(streams.take_sender());

        assert!(!manager.pump().await);
        assert_eq!(
            manager.state(),
            SubscriptionState::Failed(Failure::Stream(StreamError::EndOfStream))
        );
    }

    #[tokio::test]
    async fn test_stall_timeout_fails_subscription() {
        let (mut manager, _snapshots, _requests, streams) = manager_with(
            HistoryScript::Respond(Ok(history(&[]))),
            view(10).with_stall_timeout(Some(Duration::from_millis(30))),
        );
        assert!(manager.activate().await);
        let _sender = streams.take_sender();

        assert!(!manager.pump().await);
        assert_eq!(
            manager.state(),
            SubscriptionState::Failed(Failure::Stream(StreamError::Stalled { secs: 1 }))
        );
    }

    #[test]
    fn test_whole_seconds_rounds_up() {
        assert_eq!(whole_seconds(Duration::from_millis(30)), 1);
        assert_eq!(whole_seconds(Duration::from_secs(5)), 5);
        assert_eq!(whole_seconds(Duration::from_millis(5_001)), 6);
    }

    // ── cancellation ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_cancel_is_idempotent_and_signals_once() {
        let (mut manager, _snapshots, _requests, streams) =
            manager_with(HistoryScript::Respond(Ok(history(&[]))), view(10));
        assert!(manager.activate().await);
        let mut sender = streams.take_sender();

        assert!(manager.cancel());
        assert!(!manager.cancel());
        assert!(!manager.cancel());

        assert_eq!(manager.state(), SubscriptionState::Closed);
        assert!(sender.is_closed());
        assert!(!manager.pump().await);
    }

    #[tokio::test]
    async fn test_cancel_after_failure_keeps_failed_state() {
        let (mut manager, _snapshots, _requests, _streams) =
            manager_with(HistoryScript::Respond(Err(TransportError::Timeout)), view(10));
        manager.activate().await;

        assert!(!manager.cancel());
        assert!(matches!(manager.state(), SubscriptionState::Failed(_)));
    }

    // ── spawned views ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_spawned_view_delivers_and_cancels() {
        let (manager, mut snapshots, _requests, streams) =
            manager_with(HistoryScript::Respond(Ok(history(&[(1, 1.0)]))), view(10));
        let handle = manager.spawn();

        let seeded = tokio::time::timeout(WAIT, snapshots.recv()).await.unwrap().unwrap();
        assert_eq!(timestamps(&seeded.points), vec![1]);

        let mut state = handle.watch_state();
        tokio::time::timeout(WAIT, state.wait_for(|s| *s == SubscriptionState::Subscribed))
            .await
            .unwrap()
            .unwrap();

        let mut sender = streams.take_sender();
        sender.send(Ok(live(2, 2.0))).await;
        let next = tokio::time::timeout(WAIT, snapshots.recv()).await.unwrap().unwrap();
        assert_eq!(timestamps(&next.points), vec![1, 2]);

        handle.cancel();
        handle.cancel();
        let final_state = tokio::time::timeout(WAIT, handle.join()).await.unwrap();
        assert_eq!(final_state, SubscriptionState::Closed);
        assert!(sender.is_closed());

        // Nothing is published once the view is cancelled.
        sender.send(Ok(live(3, 3.0))).await;
        assert!(snapshots.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_during_seeding_never_opens_stream() {
        let (manager, mut snapshots, requests, streams) =
            manager_with(HistoryScript::Hang, view(10));
        let handle = manager.spawn();

        let mut state = handle.watch_state();
        tokio::time::timeout(WAIT, state.wait_for(|s| *s == SubscriptionState::Seeding))
            .await
            .unwrap()
            .unwrap();

        handle.cancel();
        let final_state = tokio::time::timeout(WAIT, handle.join()).await.unwrap();

        assert_eq!(final_state, SubscriptionState::Closed);
        assert_eq!(requests.calls.load(Ordering::SeqCst), 1);
        assert_eq!(streams.opened(), 0);
        assert!(snapshots.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_spawned_view_reports_failure() {
        let (manager, _snapshots, _requests, streams) =
            manager_with(HistoryScript::Respond(Ok(history(&[]))), view(10));
        let handle = manager.spawn();

        let mut state = handle.watch_state();
        tokio::time::timeout(WAIT, state.wait_for(|s| *s == SubscriptionState::Subscribed))
            .await
            .unwrap()
            .unwrap();

        let sender = streams.take_sender();
        sender
            .send(Err(StreamError::Protocol("unknown field".to_string())))
            .await;

        let final_state = tokio::time::timeout(WAIT, handle.join()).await.unwrap();
        assert_eq!(
            final_state,
            SubscriptionState::Failed(Failure::Stream(StreamError::Protocol(
                "unknown field".to_string()
            )))
        );
    }
}
