// ── SyncClient facade ──
//
// Ties the request executor, live channel, and per-topic reconcilers
// together. Each subscribed topic gets exactly one drain task: it reads the
// channel's event stream, applies envelopes to the topic's reconciler (the
// single writer), and fans the resulting changes out to every registered
// handler.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use dashsync_api::{
    ChannelEvent, ChannelState, Connector, CredentialStore, Endpoint, ExchangeResult, LiveChannel,
    LiveEnvelope, LiveEvents, RequestExecutor, RequestOptions, Schema, SubscriptionHandle, Validation,
    WsConnector,
};

use crate::config::SyncConfig;
use crate::error::CoreError;
use crate::model::RecordChange;
use crate::store::Reconciler;
use crate::stream::RecordStream;

// ── Handler trait ────────────────────────────────────────────────────

/// Receives reconciled changes for one topic.
///
/// Called from the topic's drain task; keep implementations quick.
pub trait UpdateHandler: Send + Sync + 'static {
    /// A record was inserted, replaced, merged, or removed.
    fn on_change(&self, change: &RecordChange);

    /// The live channel gave up. Called at most once per subscription.
    fn on_error(&self, error: &CoreError) {
        let _ = error;
    }

    /// Connection state transition.
    fn on_state(&self, state: &ChannelState) {
        let _ = state;
    }
}

impl<F> UpdateHandler for F
where
    F: Fn(&RecordChange) + Send + Sync + 'static,
{
    fn on_change(&self, change: &RecordChange) {
        self(change);
    }
}

// ── Topic hub ────────────────────────────────────────────────────────

/// Shared per-topic state: the handler list, the channel handle, and the
/// drain task's lifetime.
struct TopicHub {
    topic: String,
    reconciler: Arc<Reconciler>,
    handlers: Mutex<Vec<(u64, Arc<dyn UpdateHandler>)>>,
    state: watch::Receiver<ChannelState>,
    channel: Mutex<Option<SubscriptionHandle>>,
    cancel: CancellationToken,
    finished: AtomicBool,
}

impl TopicHub {
    fn handlers(&self) -> std::sync::MutexGuard<'_, Vec<(u64, Arc<dyn UpdateHandler>)>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add(&self, id: u64, handler: Arc<dyn UpdateHandler>) {
        self.handlers().push((id, handler));
    }

    /// Remove one handler; returns `true` when none remain.
    fn remove(&self, id: u64) -> bool {
        let mut handlers = self.handlers();
        handlers.retain(|(hid, _)| *hid != id);
        handlers.is_empty()
    }

    fn is_idle(&self) -> bool {
        self.handlers().is_empty()
    }

    /// Snapshot the handler list so callbacks run without the lock held.
    fn each(&self, f: impl Fn(&dyn UpdateHandler)) {
        let handlers: Vec<Arc<dyn UpdateHandler>> =
            self.handlers().iter().map(|(_, h)| Arc::clone(h)).collect();
        for handler in &handlers {
            f(handler.as_ref());
        }
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Give up the live channel and stop the drain task. The channel
    /// state is `Idle` (or still exhausted) when this returns.
    fn close(&self) {
        let handle = self
            .channel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(handle);
        self.cancel.cancel();
    }

    fn apply(&self, envelope: &LiveEnvelope) {
        let outcome = self.reconciler.apply(envelope);
        if !outcome.changed() {
            return;
        }

        let change = RecordChange {
            topic: self.topic.clone(),
            record_id: envelope.record_id.clone(),
            outcome,
            version: envelope.timestamp,
            record: self.reconciler.get(&envelope.record_id),
        };
        self.each(|h| h.on_change(&change));
    }
}

/// Single writer for one topic: channel events in, reconciled changes out.
async fn drain(hub: Arc<TopicHub>, mut events: LiveEvents) {
    loop {
        let event = tokio::select! {
            biased;
            () = hub.cancel.cancelled() => break,
            event = events.recv() => event,
        };
        let Some(event) = event else {
            break;
        };

        match &*event {
            ChannelEvent::Envelope(envelope) => hub.apply(envelope),
            ChannelEvent::StateChanged(state) => hub.each(|h| h.on_state(state)),
            ChannelEvent::Exhausted {
                attempts,
                last_error,
            } => {
                let err = CoreError::LiveChannelExhausted {
                    topic: hub.topic.clone(),
                    attempts: *attempts,
                    last_error: last_error.clone(),
                };
                error!(topic = %hub.topic, attempts, "Live updates stopped");
                hub.finished.store(true, Ordering::Release);
                hub.each(|h| h.on_error(&err));
                break;
            }
        }
    }

    debug!(topic = %hub.topic, "Drain task exiting");
    hub.close();
}

// ── SyncClient ───────────────────────────────────────────────────────

/// The surface UI code talks to: `execute()` / `fetch()` for on-demand
/// calls, `subscribe()` for live collections.
///
/// Must be used from within a Tokio runtime.
pub struct SyncClient<C: Connector = WsConnector> {
    config: SyncConfig,
    executor: RequestExecutor,
    channel: LiveChannel<C>,
    reconcilers: DashMap<String, Arc<Reconciler>>,
    hubs: Arc<DashMap<String, Arc<TopicHub>>>,
    next_handler: AtomicU64,
}

impl SyncClient<WsConnector> {
    /// Build a client that talks websocket for live updates.
    pub fn new(config: SyncConfig, credentials: CredentialStore) -> Result<Self, CoreError> {
        let connector = WsConnector::new(&config.base_url, &config.live_path, credentials.clone())?
            .subscribe_on_connect(config.subscribe_on_connect);
        Self::with_connector(config, credentials, connector)
    }
}

impl<C: Connector> SyncClient<C> {
    /// Build a client around a custom live transport.
    pub fn with_connector(
        config: SyncConfig,
        credentials: CredentialStore,
        connector: C,
    ) -> Result<Self, CoreError> {
        let executor = RequestExecutor::new(config.executor_config(), credentials)?;
        let channel = LiveChannel::new(connector, config.reconnect_config());

        info!(base_url = %config.base_url, "Sync client ready");

        Ok(Self {
            config,
            executor,
            channel,
            reconcilers: DashMap::new(),
            hubs: Arc::new(DashMap::new()),
            next_handler: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The credential holder shared with every request and live connection.
    pub fn credentials(&self) -> &CredentialStore {
        self.executor.credentials()
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    // ── Requests ─────────────────────────────────────────────────────

    pub async fn execute(&self, endpoint: &Endpoint, options: &RequestOptions) -> ExchangeResult<Value> {
        self.executor.execute(endpoint, options).await
    }

    pub async fn fetch<S: Schema>(
        &self,
        endpoint: &Endpoint,
        options: &RequestOptions,
    ) -> ExchangeResult<Validation<S>> {
        self.executor.fetch(endpoint, options).await
    }

    // ── Live collections ─────────────────────────────────────────────

    /// Subscribe `handler` to `topic`.
    ///
    /// The first subscriber opens the topic's live connection; later ones
    /// share it. A topic whose channel gave up starts over. Records
    /// survive unsubscribe and resubscribe.
    pub fn subscribe(&self, topic: &str, handler: impl UpdateHandler) -> TopicSubscription {
        let id = self.next_handler.fetch_add(1, Ordering::Relaxed);
        let handler: Arc<dyn UpdateHandler> = Arc::new(handler);

        let hub = match self.hubs.entry(topic.to_owned()) {
            Entry::Occupied(entry) if !entry.get().is_finished() => {
                let hub = Arc::clone(entry.get());
                hub.add(id, handler);
                hub
            }
            Entry::Occupied(mut entry) => {
                let hub = self.open_hub(topic, id, handler);
                let stale = entry.insert(Arc::clone(&hub));
                stale.close();
                hub
            }
            Entry::Vacant(entry) => {
                let hub = self.open_hub(topic, id, handler);
                entry.insert(Arc::clone(&hub));
                hub
            }
        };

        TopicSubscription {
            id,
            hub,
            hubs: Arc::clone(&self.hubs),
        }
    }

    /// Live view of a topic's collection, if it was ever subscribed.
    pub fn records(&self, topic: &str) -> Option<RecordStream> {
        self.reconcilers.get(topic).map(|r| r.stream())
    }

    /// Topics with at least one live subscriber.
    pub fn active_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.hubs.iter().map(|h| h.key().clone()).collect();
        topics.sort();
        topics
    }

    /// Stop every drain task and close every live connection.
    pub fn shutdown(&self) {
        info!("Shutting down sync client");
        for hub in self.hubs.iter() {
            hub.close();
        }
        self.hubs.clear();
        self.channel.shutdown();
    }

    fn reconciler(&self, topic: &str) -> Arc<Reconciler> {
        let entry = self
            .reconcilers
            .entry(topic.to_owned())
            .or_insert_with(|| Arc::new(Reconciler::new(topic, self.config.max_records)));
        Arc::clone(entry.value())
    }

    fn open_hub(&self, topic: &str, id: u64, handler: Arc<dyn UpdateHandler>) -> Arc<TopicHub> {
        let (events, handle) = self.channel.subscribe(topic).split();
        let hub = Arc::new(TopicHub {
            topic: topic.to_owned(),
            reconciler: self.reconciler(topic),
            handlers: Mutex::new(vec![(id, handler)]),
            state: handle.state_receiver(),
            channel: Mutex::new(Some(handle)),
            cancel: CancellationToken::new(),
            finished: AtomicBool::new(false),
        });
        tokio::spawn(drain(Arc::clone(&hub), events));
        debug!(topic, "Opened topic hub");
        hub
    }
}

impl<C: Connector> Drop for SyncClient<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ── TopicSubscription ────────────────────────────────────────────────

/// Handle returned by [`SyncClient::subscribe`].
///
/// Releasing it ([`unsubscribe`](Self::unsubscribe) or drop) removes the
/// handler; the last handler for a topic stops its drain task and releases
/// the live connection before returning.
pub struct TopicSubscription {
    id: u64,
    hub: Arc<TopicHub>,
    hubs: Arc<DashMap<String, Arc<TopicHub>>>,
}

impl TopicSubscription {
    pub fn topic(&self) -> &str {
        &self.hub.topic
    }

    /// Live view of the topic's collection.
    pub fn records(&self) -> RecordStream {
        self.hub.reconciler.stream()
    }

    pub fn state(&self) -> ChannelState {
        self.hub.state.borrow().clone()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ChannelState> {
        self.hub.state.clone()
    }

    /// Release this handler. Terminal.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for TopicSubscription {
    fn drop(&mut self) {
        if !self.hub.remove(self.id) {
            return;
        }

        // Re-checked under the map's shard lock so a concurrent subscribe
        // that joined this hub keeps it alive.
        let topic = self.hub.topic.as_str();
        let removed = self
            .hubs
            .remove_if(topic, |_, hub| Arc::ptr_eq(hub, &self.hub) && hub.is_idle());
        let current = self
            .hubs
            .get(topic)
            .is_some_and(|hub| Arc::ptr_eq(hub.value(), &self.hub));

        if removed.is_some() || !current {
            self.hub.close();
            info!(topic, "Unsubscribed from topic");
        }
    }
}

impl std::fmt::Debug for TopicSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicSubscription")
            .field("topic", &self.hub.topic)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
