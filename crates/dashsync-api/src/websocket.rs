//! Live-update channel with auto-reconnect.
//!
//! One background task per topic owns at most one connection. Inbound text
//! frames are parsed into [`LiveEnvelope`]s and published on a
//! [`tokio::sync::broadcast`] channel together with state transitions.
//! Dropped connections are retried with [`BackoffPolicy`] until the attempt
//! cap is reached, at which point the subscription ends in
//! `Closed(Exhausted)` and a single [`ChannelEvent::Exhausted`] is emitted.
//!
//! # Example
//!
//! ```rust,ignore
//! use dashsync_api::{CredentialStore, LiveChannel, ReconnectConfig, WsConnector};
//! use url::Url;
//!
//! let base = Url::parse("https://dash.example.com")?;
//! let connector = WsConnector::new(&base, "ws", CredentialStore::new())?;
//! let channel = LiveChannel::new(connector, ReconnectConfig::default());
//!
//! let mut sub = channel.subscribe("reports");
//! while let Some(event) = sub.recv().await {
//!     println!("{event:?}");
//! }
//! sub.unsubscribe();
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_core::Stream;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::auth::CredentialStore;
use crate::backoff::{BackoffPolicy, jitter_rng};
use crate::envelope::LiveEnvelope;
use crate::error::Error;

// ── Broadcast channel capacity ───────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Close code used when the stream ends without a close frame.
const CLOSE_ABNORMAL: u16 = 1006;
const CLOSE_NO_STATUS: u16 = 1005;

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Reconnection policy for live subscriptions.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub backoff: BackoffPolicy,

    /// Consecutive failed reconnects before giving up. Default: 5.
    pub max_attempts: u32,

    /// Seed for backoff jitter; `None` draws from OS entropy.
    pub jitter_seed: Option<u64>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            max_attempts: 5,
            jitter_seed: None,
        }
    }
}

// ── States and events ────────────────────────────────────────────────

/// Why a connection is closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer sent a close frame or ended the stream.
    Remote { code: u16, reason: String },
    /// Handshake failed or the connection broke.
    NetworkDrop(String),
    /// The peer violated the websocket protocol.
    ProtocolError(String),
    /// Reconnect budget spent. Terminal.
    Exhausted { attempts: u32 },
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote { code, reason } if reason.is_empty() => {
                write!(f, "closed by remote (code {code})")
            }
            Self::Remote { code, reason } => write!(f, "closed by remote (code {code}): {reason}"),
            Self::NetworkDrop(e) => write!(f, "network drop: {e}"),
            Self::ProtocolError(e) => write!(f, "protocol error: {e}"),
            Self::Exhausted { attempts } => {
                write!(f, "gave up after {attempts} reconnect attempts")
            }
        }
    }
}

/// Per-subscription connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Connecting,
    Open,
    Closed(CloseReason),
}

impl ChannelState {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Closed(CloseReason::Exhausted { .. }))
    }
}

/// What a subscription delivers.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Envelope(LiveEnvelope),
    StateChanged(ChannelState),
    /// Emitted once when the reconnect budget runs out.
    Exhausted { attempts: u32, last_error: String },
}

// ── Transport seam ───────────────────────────────────────────────────

/// One inbound unit from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close { code: u16, reason: String },
}

/// Inbound frames of one open connection. Ends when the connection does.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, Error>> + Send>>;

/// Opens one connection for a topic.
///
/// [`WsConnector`] is the production implementation; tests substitute a
/// scripted double.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, topic: &str) -> impl Future<Output = Result<FrameStream, Error>> + Send;
}

// ── WsConnector ──────────────────────────────────────────────────────

/// Websocket connector upgraded from the API base address.
///
/// Connects to `{base}/{live_path}?topic={topic}` (`http` → `ws`,
/// `https` → `wss`), sending the bearer credential on the upgrade request
/// and, optionally, a `{"type":"subscribe","topic":..}` frame once open.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: Url,
    credentials: CredentialStore,
    subscribe_on_connect: bool,
}

impl WsConnector {
    pub fn new(base_url: &Url, live_path: &str, credentials: CredentialStore) -> Result<Self, Error> {
        let scheme = match base_url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(Error::UnsupportedScheme(other.to_owned())),
        };

        let joined = format!(
            "{}/{}",
            base_url.as_str().trim_end_matches('/'),
            live_path.trim_start_matches('/')
        );
        let mut url = Url::parse(&joined)?;
        url.set_scheme(scheme)
            .map_err(|()| Error::UnsupportedScheme(base_url.scheme().to_owned()))?;

        Ok(Self {
            url,
            credentials,
            subscribe_on_connect: true,
        })
    }

    pub fn subscribe_on_connect(mut self, enabled: bool) -> Self {
        self.subscribe_on_connect = enabled;
        self
    }

    /// The URL a subscription to `topic` connects to.
    pub fn topic_url(&self, topic: &str) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut().append_pair("topic", topic);
        url
    }
}

impl Connector for WsConnector {
    async fn connect(&self, topic: &str) -> Result<FrameStream, Error> {
        let url = self.topic_url(topic);
        tracing::info!(url = %url, topic, "Connecting to live channel");

        let uri: tungstenite::http::Uri = url
            .as_str()
            .parse()
            .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

        let mut request = ClientRequestBuilder::new(uri);
        if let Some(credential) = self.credentials.get() {
            request = request.with_header("Authorization", credential.bearer_header());
        }

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        if self.subscribe_on_connect {
            let payload = serde_json::json!({ "type": "subscribe", "topic": topic }).to_string();
            write
                .send(tungstenite::Message::text(payload))
                .await
                .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
        }

        let frames = async_stream::stream! {
            // Keep the sink alive so control frames can still be answered.
            let _write = write;
            while let Some(message) = read.next().await {
                match message {
                    Ok(tungstenite::Message::Text(text)) => {
                        yield Ok(Frame::Text(text.as_str().to_owned()));
                    }
                    Ok(tungstenite::Message::Close(frame)) => {
                        let (code, reason) = frame.map_or((CLOSE_NO_STATUS, String::new()), |cf| {
                            (u16::from(cf.code), cf.reason.as_str().to_owned())
                        });
                        yield Ok(Frame::Close { code, reason });
                        break;
                    }
                    Ok(_) => {
                        // Ping, Pong, Binary, raw Frame -- nothing to reconcile
                        tracing::trace!("ignoring non-text websocket message");
                    }
                    Err(tungstenite::Error::Protocol(e)) => {
                        yield Err(Error::Protocol(e.to_string()));
                        break;
                    }
                    Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => break,
                    Err(e) => {
                        yield Err(Error::WebSocketConnect(e.to_string()));
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(frames))
    }
}

// ── Lifecycle state machine ──────────────────────────────────────────

/// What to do after a connection closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    /// Wait `backoff.delay(attempt)` then connect again.
    Reconnect { attempt: u32 },
    Exhausted { attempts: u32 },
}

/// Pure transition logic for one subscription; the async loop drives it.
#[derive(Debug)]
struct Lifecycle {
    state: ChannelState,
    attempts: u32,
    max_attempts: u32,
}

impl Lifecycle {
    fn new(max_attempts: u32) -> Self {
        Self {
            state: ChannelState::Idle,
            attempts: 0,
            max_attempts,
        }
    }

    fn state(&self) -> &ChannelState {
        &self.state
    }

    /// `Idle → Connecting` on subscribe, `Closed → Connecting` on reconnect.
    fn begin_connect(&mut self) -> ChannelState {
        self.state = ChannelState::Connecting;
        self.state.clone()
    }

    /// `Connecting → Open`; the attempt counter resets.
    fn opened(&mut self) -> ChannelState {
        self.state = ChannelState::Open;
        self.attempts = 0;
        self.state.clone()
    }

    /// `Open/Connecting → Closed(reason)`, then either schedule a reconnect
    /// or end in `Closed(Exhausted)`.
    fn closed(&mut self, reason: CloseReason) -> Next {
        if self.attempts >= self.max_attempts {
            self.state = ChannelState::Closed(CloseReason::Exhausted {
                attempts: self.attempts,
            });
            return Next::Exhausted {
                attempts: self.attempts,
            };
        }
        self.state = ChannelState::Closed(reason);
        let attempt = self.attempts;
        self.attempts += 1;
        Next::Reconnect { attempt }
    }
}

// ── Topic task ───────────────────────────────────────────────────────

struct TopicTask<C> {
    connector: Arc<C>,
    topic: String,
    reconnect: ReconnectConfig,
    events: broadcast::Sender<Arc<ChannelEvent>>,
    state: Arc<watch::Sender<ChannelState>>,
    cancel: CancellationToken,
}

impl<C: Connector> TopicTask<C> {
    /// Main loop: connect → read → on close, backoff → reconnect.
    async fn run(self) {
        let mut lifecycle = Lifecycle::new(self.reconnect.max_attempts);
        let mut rng = jitter_rng(self.reconnect.jitter_seed);

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            self.publish(lifecycle.begin_connect());

            let reason = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                reason = self.session(&mut lifecycle) => reason,
            };

            let next = lifecycle.closed(reason.clone());
            self.publish(lifecycle.state().clone());

            match next {
                Next::Reconnect { attempt } => {
                    let delay = self.reconnect.backoff.delay(attempt, &mut rng);
                    tracing::info!(
                        topic = %self.topic,
                        reason = %reason,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Live channel closed, waiting before reconnect"
                    );

                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Next::Exhausted { attempts } => {
                    tracing::error!(
                        topic = %self.topic,
                        attempts,
                        last_error = %reason,
                        "Live channel reconnection limit reached, giving up"
                    );
                    self.emit(ChannelEvent::Exhausted {
                        attempts,
                        last_error: reason.to_string(),
                    });
                    break;
                }
            }
        }

        tracing::debug!(topic = %self.topic, "Live channel task exiting");
    }

    /// One connection lifecycle: connect, read until it drops.
    async fn session(&self, lifecycle: &mut Lifecycle) -> CloseReason {
        let mut frames = match self.connector.connect(&self.topic).await {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!(topic = %self.topic, error = %e, "Live channel connect failed");
                return CloseReason::NetworkDrop(e.to_string());
            }
        };

        self.publish(lifecycle.opened());
        tracing::info!(topic = %self.topic, "Live channel open");

        while let Some(frame) = frames.next().await {
            match frame {
                Ok(Frame::Text(text)) => self.dispatch(&text),
                Ok(Frame::Close { code, reason }) => return CloseReason::Remote { code, reason },
                Err(Error::Protocol(e)) => return CloseReason::ProtocolError(e),
                Err(e) => return CloseReason::NetworkDrop(e.to_string()),
            }
        }

        CloseReason::Remote {
            code: CLOSE_ABNORMAL,
            reason: "stream ended".into(),
        }
    }

    /// Parse a text frame; malformed envelopes are logged and dropped
    /// without touching connection health.
    fn dispatch(&self, text: &str) {
        match LiveEnvelope::parse(text, &self.topic) {
            Ok(envelope) => self.emit(ChannelEvent::Envelope(envelope)),
            Err(e) => {
                tracing::warn!(topic = %self.topic, error = %e, "Discarding malformed envelope");
            }
        }
    }

    fn publish(&self, state: ChannelState) {
        // Checked under the watch lock so a concurrent unsubscribe's `Idle`
        // is never overwritten.
        let changed = self.state.send_if_modified(|current| {
            if self.cancel.is_cancelled() || *current == state {
                return false;
            }
            *current = state.clone();
            true
        });
        if changed {
            tracing::debug!(topic = %self.topic, state = ?state, "Live channel state changed");
            self.emit(ChannelEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: ChannelEvent) {
        // Ignore send errors -- just means no active subscribers right now
        let _ = self.events.send(Arc::new(event));
    }
}

// ── Registry ─────────────────────────────────────────────────────────

struct TopicEntry {
    generation: u64,
    handles: usize,
    events: broadcast::Sender<Arc<ChannelEvent>>,
    state: Arc<watch::Sender<ChannelState>>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Registry {
    topics: Mutex<HashMap<String, TopicEntry>>,
    next_generation: AtomicU64,
}

impl Registry {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, TopicEntry>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop one handle; the last one cancels the task and any pending
    /// reconnect timer before returning.
    fn release(&self, topic: &str, generation: u64) {
        let mut topics = self.lock();
        let Some(entry) = topics.get_mut(topic) else {
            return;
        };
        if entry.generation != generation {
            return;
        }

        entry.handles = entry.handles.saturating_sub(1);
        if entry.handles > 0 {
            return;
        }

        if let Some(entry) = topics.remove(topic) {
            entry.cancel.cancel();
            // Exhaustion stays visible; it is already terminal.
            entry.state.send_if_modified(|state| {
                if state.is_exhausted() {
                    return false;
                }
                *state = ChannelState::Idle;
                true
            });
            tracing::info!(topic, "Live channel unsubscribed");
        }
    }
}

// ── LiveChannel ──────────────────────────────────────────────────────

/// Owns every live subscription and guarantees at most one connection per
/// topic: subscribing to a topic that is already active reuses it.
///
/// Must be used from within a Tokio runtime.
pub struct LiveChannel<C: Connector> {
    connector: Arc<C>,
    reconnect: ReconnectConfig,
    registry: Arc<Registry>,
    cancel: CancellationToken,
}

impl<C: Connector> Clone for LiveChannel<C> {
    fn clone(&self) -> Self {
        Self {
            connector: Arc::clone(&self.connector),
            reconnect: self.reconnect.clone(),
            registry: Arc::clone(&self.registry),
            cancel: self.cancel.clone(),
        }
    }
}

impl<C: Connector> LiveChannel<C> {
    pub fn new(connector: C, reconnect: ReconnectConfig) -> Self {
        Self {
            connector: Arc::new(connector),
            reconnect,
            registry: Arc::new(Registry::default()),
            cancel: CancellationToken::new(),
        }
    }

    /// Subscribe to `topic`, spawning its connection task if none is live.
    ///
    /// A topic whose previous subscription exhausted its reconnect budget
    /// starts over with a fresh task.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let mut topics = self.registry.lock();

        if let Some(entry) = topics.get_mut(topic) {
            if !entry.state.borrow().is_exhausted() {
                entry.handles += 1;
                tracing::debug!(topic, handles = entry.handles, "Reusing live subscription");
                return Subscription::new(
                    topic,
                    entry.generation,
                    entry.events.subscribe(),
                    entry.state.subscribe(),
                    Arc::clone(&self.registry),
                );
            }
        }

        let generation = self.registry.next_generation.fetch_add(1, Ordering::Relaxed);
        let (events_tx, events_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ChannelState::Idle);
        let state_tx = Arc::new(state_tx);
        let cancel = self.cancel.child_token();

        let task = TopicTask {
            connector: Arc::clone(&self.connector),
            topic: topic.to_owned(),
            reconnect: self.reconnect.clone(),
            events: events_tx.clone(),
            state: Arc::clone(&state_tx),
            cancel: cancel.clone(),
        };
        tokio::spawn(task.run());

        if let Some(old) = topics.insert(
            topic.to_owned(),
            TopicEntry {
                generation,
                handles: 1,
                events: events_tx,
                state: state_tx,
                cancel,
            },
        ) {
            old.cancel.cancel();
        }

        Subscription::new(
            topic,
            generation,
            events_rx,
            state_rx,
            Arc::clone(&self.registry),
        )
    }

    /// Current state of `topic`, or `None` when nobody is subscribed.
    pub fn state(&self, topic: &str) -> Option<ChannelState> {
        self.registry
            .lock()
            .get(topic)
            .map(|entry| entry.state.borrow().clone())
    }

    /// Topics with at least one live handle.
    pub fn active_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.registry.lock().keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Tear down every subscription.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        for (topic, entry) in self.registry.lock().drain() {
            entry.state.send_replace(ChannelState::Idle);
            tracing::debug!(topic, "Live channel shut down");
        }
    }
}

// ── Subscription ─────────────────────────────────────────────────────

/// Handle to one live subscription.
///
/// Releasing it ([`unsubscribe`](Self::unsubscribe) or drop) is terminal:
/// the last handle for a topic cancels the pending reconnect timer and
/// closes the connection before returning.
pub struct Subscription {
    events: LiveEvents,
    handle: SubscriptionHandle,
}

impl Subscription {
    fn new(
        topic: &str,
        generation: u64,
        events: broadcast::Receiver<Arc<ChannelEvent>>,
        state: watch::Receiver<ChannelState>,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            events: LiveEvents {
                topic: topic.to_owned(),
                events,
                finished: false,
            },
            handle: SubscriptionHandle {
                topic: topic.to_owned(),
                generation,
                state,
                registry,
            },
        }
    }

    pub fn topic(&self) -> &str {
        self.handle.topic()
    }

    pub fn state(&self) -> ChannelState {
        self.handle.state()
    }

    /// Watch receiver for state transitions.
    pub fn state_receiver(&self) -> watch::Receiver<ChannelState> {
        self.handle.state_receiver()
    }

    /// Next event. Returns `None` after [`ChannelEvent::Exhausted`] or once
    /// the channel has shut down.
    pub async fn recv(&mut self) -> Option<Arc<ChannelEvent>> {
        self.events.recv().await
    }

    /// Separate the event receiver from the handle that keeps the topic
    /// alive, so one task can read events while another owns the release.
    pub fn split(self) -> (LiveEvents, SubscriptionHandle) {
        (self.events, self.handle)
    }

    /// Release this handle.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.handle.topic)
            .field("generation", &self.handle.generation)
            .field("state", &*self.handle.state.borrow())
            .finish_non_exhaustive()
    }
}

/// Event half of a [`Subscription`]. Holds no claim on the topic.
pub struct LiveEvents {
    topic: String,
    events: broadcast::Receiver<Arc<ChannelEvent>>,
    finished: bool,
}

impl LiveEvents {
    /// Next event; `None` after exhaustion or shutdown.
    ///
    /// A receiver that falls behind skips the missed events with a warning.
    pub async fn recv(&mut self) -> Option<Arc<ChannelEvent>> {
        if self.finished {
            return None;
        }
        loop {
            match self.events.recv().await {
                Ok(event) => {
                    if matches!(*event, ChannelEvent::Exhausted { .. }) {
                        self.finished = true;
                    }
                    return Some(event);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(topic = %self.topic, skipped, "Live subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }
}

/// Release half of a [`Subscription`]: dropping it gives up the topic
/// synchronously.
pub struct SubscriptionHandle {
    topic: String,
    generation: u64,
    state: watch::Receiver<ChannelState>,
    registry: Arc<Registry>,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn state(&self) -> ChannelState {
        self.state.borrow().clone()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    /// Release this handle.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.registry.release(&self.topic, self.generation);
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("topic", &self.topic)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;
    use crate::envelope::UpdateKind;

    // ── Scripted connector ──

    enum Step {
        Fail,
        /// Deliver frames, then end the stream.
        Deliver(Vec<Frame>),
        /// Deliver frames, then stay open.
        Hold(Vec<Frame>),
    }

    #[derive(Default)]
    struct Scripted {
        steps: Mutex<VecDeque<Step>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    struct Shared(Arc<Scripted>);

    impl Connector for Shared {
        async fn connect(&self, _topic: &str) -> Result<FrameStream, Error> {
            self.0.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.0.steps.lock().unwrap().pop_front().unwrap_or(Step::Fail);
            match step {
                Step::Fail => Err(Error::WebSocketConnect("connection refused".into())),
                Step::Deliver(frames) => {
                    Ok(Box::pin(futures_util::stream::iter(frames.into_iter().map(Ok))))
                }
                Step::Hold(frames) => Ok(Box::pin(
                    futures_util::stream::iter(frames.into_iter().map(Ok))
                        .chain(futures_util::stream::pending()),
                )),
            }
        }
    }

    fn channel(script: &Arc<Scripted>, max_attempts: u32) -> LiveChannel<Shared> {
        LiveChannel::new(
            Shared(Arc::clone(script)),
            ReconnectConfig {
                backoff: BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(30)),
                max_attempts,
                jitter_seed: Some(11),
            },
        )
    }

    fn text(json: &str) -> Frame {
        Frame::Text(json.to_owned())
    }

    async fn next_envelope(sub: &mut Subscription) -> LiveEnvelope {
        loop {
            match sub.recv().await.as_deref() {
                Some(ChannelEvent::Envelope(env)) => return env.clone(),
                Some(_) => {}
                None => panic!("subscription ended before an envelope arrived"),
            }
        }
    }

    // ── Lifecycle ──

    #[test]
    fn lifecycle_counts_and_resets() {
        let mut lc = Lifecycle::new(2);
        assert_eq!(lc.state(), &ChannelState::Idle);

        assert_eq!(lc.begin_connect(), ChannelState::Connecting);
        let refused = CloseReason::NetworkDrop("refused".into());
        assert_eq!(lc.closed(refused.clone()), Next::Reconnect { attempt: 0 });
        assert_eq!(lc.state(), &ChannelState::Closed(refused.clone()));

        lc.begin_connect();
        assert_eq!(lc.opened(), ChannelState::Open);
        assert_eq!(lc.closed(refused.clone()), Next::Reconnect { attempt: 0 });

        lc.begin_connect();
        assert_eq!(lc.closed(refused.clone()), Next::Reconnect { attempt: 1 });
        lc.begin_connect();
        assert_eq!(lc.closed(refused), Next::Exhausted { attempts: 2 });
        assert!(lc.state().is_exhausted());
    }

    #[test]
    fn close_reason_display() {
        let reason = CloseReason::Remote {
            code: 1000,
            reason: String::new(),
        };
        assert_eq!(reason.to_string(), "closed by remote (code 1000)");
        assert_eq!(
            CloseReason::Exhausted { attempts: 5 }.to_string(),
            "gave up after 5 reconnect attempts"
        );
    }

    // ── Connector URL ──

    #[test]
    fn ws_connector_upgrades_scheme() {
        let base = Url::parse("https://dash.example.com/api/").unwrap();
        let connector = WsConnector::new(&base, "/ws", CredentialStore::new()).unwrap();
        assert_eq!(
            connector.topic_url("reports").as_str(),
            "wss://dash.example.com/api/ws?topic=reports"
        );

        let base = Url::parse("http://localhost:8000").unwrap();
        let connector = WsConnector::new(&base, "live", CredentialStore::new()).unwrap();
        assert_eq!(
            connector.topic_url("a b").as_str(),
            "ws://localhost:8000/live?topic=a+b"
        );
    }

    #[test]
    fn ws_connector_rejects_other_schemes() {
        let base = Url::parse("ftp://files.example.com").unwrap();
        assert!(matches!(
            WsConnector::new(&base, "ws", CredentialStore::new()),
            Err(Error::UnsupportedScheme(_))
        ));
    }

    // ── Channel behaviour ──

    #[tokio::test(start_paused = true)]
    async fn delivers_envelopes_and_skips_malformed_frames() {
        let script = Scripted::new(vec![Step::Hold(vec![
            text(r#"{"type":"created","timestamp":100,"record_id":"r1","payload":{"n":1}}"#),
            text("{ this is not json"),
            text(r#"{"type":"deleted","timestamp":200,"record_id":"r1"}"#),
        ])]);
        let live = channel(&script, 5);
        let mut sub = live.subscribe("feed");

        let first = next_envelope(&mut sub).await;
        assert_eq!(first.kind, UpdateKind::Created);
        let second = next_envelope(&mut sub).await;
        assert_eq!(second.kind, UpdateKind::Deleted);

        assert_eq!(sub.state(), ChannelState::Open);
        assert_eq!(script.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_subscribe_reuses_connection() {
        let script = Scripted::new(vec![Step::Hold(vec![])]);
        let live = channel(&script, 5);

        let mut a = live.subscribe("feed");
        let b = live.subscribe("feed");

        while a.state() != ChannelState::Open {
            a.recv().await;
        }
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(script.calls(), 1);
        assert_eq!(live.active_topics(), vec!["feed".to_owned()]);

        // Releasing one handle keeps the connection up.
        b.unsubscribe();
        assert_eq!(live.state("feed"), Some(ChannelState::Open));
        a.unsubscribe();
        assert_eq!(live.state("feed"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn split_handle_releases_while_events_are_read_elsewhere() {
        let script = Scripted::new(vec![Step::Hold(vec![])]);
        let live = channel(&script, 5);
        let (mut events, handle) = live.subscribe("feed").split();

        let mut state = handle.state_receiver();
        state.wait_for(|s| *s == ChannelState::Open).await.unwrap();

        handle.unsubscribe();
        assert_eq!(*state.borrow(), ChannelState::Idle);
        assert!(live.active_topics().is_empty());

        // The task winds down and the event half sees the end.
        while events.recv().await.is_some() {}
        assert_eq!(script.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn five_reconnect_failures_exhaust_once() {
        let script = Scripted::new(vec![]);
        let live = channel(&script, 5);
        let mut sub = live.subscribe("feed");

        let mut exhausted = 0;
        while let Some(event) = sub.recv().await {
            if let ChannelEvent::Exhausted { attempts, .. } = *event {
                assert_eq!(attempts, 5);
                exhausted += 1;
            }
        }

        assert_eq!(exhausted, 1);
        // Initial connect plus five reconnects.
        assert_eq!(script.calls(), 6);
        assert!(sub.state().is_exhausted());

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(script.calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_handshake_resets_attempts() {
        let script = Scripted::new(vec![Step::Fail, Step::Fail, Step::Deliver(vec![])]);
        let live = channel(&script, 5);
        let mut sub = live.subscribe("feed");

        while sub.recv().await.is_some() {}

        // 2 failures, 1 open that ends, then 5 failed reconnects + the last straw.
        assert_eq!(script.calls(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_cancels_pending_reconnect() {
        let script = Scripted::new(vec![]);
        let live = channel(&script, 5);
        let mut sub = live.subscribe("feed");

        // Wait for the first failure to land us in the backoff sleep.
        loop {
            let event = sub.recv().await.unwrap();
            if matches!(*event, ChannelEvent::StateChanged(ChannelState::Closed(_))) {
                break;
            }
        }
        assert_eq!(script.calls(), 1);

        let state = sub.state_receiver();
        sub.unsubscribe();
        assert_eq!(*state.borrow(), ChannelState::Idle);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(script.calls(), 1);
        assert_eq!(*state.borrow(), ChannelState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_close_schedules_reconnect() {
        let script = Scripted::new(vec![
            Step::Deliver(vec![Frame::Close {
                code: 1001,
                reason: "going away".into(),
            }]),
            Step::Hold(vec![]),
        ]);
        let live = channel(&script, 5);
        let mut sub = live.subscribe("feed");

        let mut saw_remote_close = false;
        let mut opens = 0;
        while opens < 2 {
            match sub.recv().await.as_deref() {
                Some(ChannelEvent::StateChanged(ChannelState::Open)) => opens += 1,
                Some(ChannelEvent::StateChanged(ChannelState::Closed(CloseReason::Remote {
                    code: 1001,
                    ..
                }))) => saw_remote_close = true,
                Some(_) => {}
                None => panic!("subscription ended"),
            }
        }
        assert!(saw_remote_close);
        assert_eq!(script.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribing_after_exhaustion_starts_fresh() {
        let script = Scripted::new(vec![]);
        let live = channel(&script, 1);
        let mut first = live.subscribe("feed");
        while first.recv().await.is_some() {}
        assert_eq!(script.calls(), 2);

        let mut second = live.subscribe("feed");
        while second.recv().await.is_some() {}
        assert_eq!(script.calls(), 4);

        // Dropping the stale handle must not tear down the fresh entry.
        drop(first);
        assert!(live.state("feed").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_every_topic() {
        let script = Scripted::new(vec![]);
        let live = channel(&script, 5);
        let a = live.subscribe("a");
        let b = live.subscribe("b");
        tokio::task::yield_now().await;

        live.shutdown();
        let calls = script.calls();
        tokio::time::sleep(Duration::from_secs(3600)).await;

        assert_eq!(script.calls(), calls);
        assert!(live.active_topics().is_empty());
        assert_eq!(a.state(), ChannelState::Idle);
        assert_eq!(b.state(), ChannelState::Idle);
    }
}
