//! Live cache invalidation driven by the Wikimedia recent-changes feed.
//!
//! ## How It Works
//!
//! 1. A [`ChangeFeed`] connection yields raw event payloads over an mpsc channel
//!    (for SSE, a pump task reads the HTTP body and forwards each `data:` event).
//! 2. One loop owns that channel, the reconnect state machine and the flush
//!    ticker. Wikidata item edits add their id to the dirty set.
//! 3. On every flush tick a non-empty dirty set invalidates the whole events
//!    namespace and is cleared. If the cache rejects the delete, the ids stay
//!    dirty for the next tick.
//!
//! A connection that delivers nothing for `idle_timeout` is treated as dead,
//! so a half-open socket cannot hold the listener in `Connected`.
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//!      ^              |             |
//!      +-- backoff ---+-- error / end of stream / idle
//! ```

use std::collections::HashSet;
use std::fmt;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use unrest_cache::CacheStore;
use unrest_core::is_qid;

const FEED_CHANNEL_CAPACITY: usize = 1024;
const WIKIDATA_WIKI: &str = "wikidatawiki";
const CHANGE_TYPES: [&str; 3] = ["edit", "new", "create"];

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("change feed connection failed: {0}")]
    Connect(String),

    #[error("change feed returned HTTP {0}")]
    Status(u16),
}

/// A source of raw change-event payloads.
///
/// `connect` resolves once the feed is live. The returned channel closes
/// when the underlying connection ends.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn connect(&self) -> Result<mpsc::Receiver<String>, FeedError>;
}

/// Server-sent-events feed over HTTP.
pub struct SseChangeFeed {
    client: reqwest::Client,
    url: String,
}

impl SseChangeFeed {
    pub fn new(url: impl Into<String>, user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ChangeFeed for SseChangeFeed {
    async fn connect(&self) -> Result<mpsc::Receiver<String>, FeedError> {
        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| FeedError::Connect(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FeedError::Status(response.status().as_u16()));
        }

        let (tx, rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
        tokio::spawn(pump_events(response, tx));
        Ok(rx)
    }
}

async fn pump_events(response: reqwest::Response, tx: mpsc::Sender<String>) {
    let mut stream = pin!(response.bytes_stream());
    let mut decoder = SseDecoder::default();

    loop {
        tokio::select! {
            _ = tx.closed() => return,
            chunk = stream.next() => match chunk {
                Some(Ok(bytes)) => {
                    for event in decoder.push(&bytes) {
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "change feed body error");
                    return;
                }
                None => return,
            }
        }
    }
}

/// Incremental `text/event-stream` decoder yielding the data of each event.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(&line[..]);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data
                    .push(value.strip_prefix(' ').unwrap_or(value).to_string());
            }
            // comments, `event:`, `id:` and `retry:` lines are ignored
        }

        events
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Exponential reconnect delay: base, doubling, capped; reset on connect.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl ReconnectBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            current: base,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

#[derive(Debug, Clone)]
pub struct InvalidatorSettings {
    pub namespace: String,
    pub flush_interval: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub idle_timeout: Duration,
}

impl Default for InvalidatorSettings {
    fn default() -> Self {
        Self {
            namespace: "events".into(),
            flush_interval: Duration::from_secs(60),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(90),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RecentChange {
    #[serde(default)]
    wiki: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    title: String,
}

struct Shared {
    cache: CacheStore,
    namespace: String,
    dirty: Mutex<HashSet<String>>,
    state: Mutex<ConnectionState>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    fn handle_message(&self, raw: &str) -> bool {
        let change: RecentChange = match serde_json::from_str(raw) {
            Ok(c) => c,
            Err(e) => {
                debug!(error = %e, "skipping unparseable change event");
                return false;
            }
        };
        if change.wiki != WIKIDATA_WIKI
            || !CHANGE_TYPES.contains(&change.kind.as_str())
            || !is_qid(&change.title)
        {
            return false;
        }
        self.dirty.lock().insert(change.title)
    }

    async fn flush(&self) -> usize {
        let drained = std::mem::take(&mut *self.dirty.lock());
        if drained.is_empty() {
            return 0;
        }
        if !self.cache.invalidate_namespace(&self.namespace).await {
            let pending = drained.len();
            self.dirty.lock().extend(drained);
            warn!(
                namespace = %self.namespace,
                dirty_ids = pending,
                "flush failed, keeping dirty ids for the next tick"
            );
            return 0;
        }
        info!(
            namespace = %self.namespace,
            dirty_ids = drained.len(),
            "flushed dirty set"
        );
        drained.len()
    }
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the change-feed connection and the dirty set.
pub struct StreamInvalidator {
    shared: Arc<Shared>,
    feed: Arc<dyn ChangeFeed>,
    settings: InvalidatorSettings,
    running: Mutex<Option<Running>>,
}

impl StreamInvalidator {
    pub fn new(feed: Arc<dyn ChangeFeed>, cache: CacheStore, settings: InvalidatorSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                cache,
                namespace: settings.namespace.clone(),
                dirty: Mutex::new(HashSet::new()),
                state: Mutex::new(ConnectionState::Disconnected),
            }),
            feed,
            settings,
            running: Mutex::new(None),
        }
    }

    /// Spawns the listener task. Calling it while already running is a no-op.
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_listener(
            self.shared.clone(),
            self.feed.clone(),
            self.settings.clone(),
            cancel.clone(),
        ));
        *running = Some(Running { cancel, handle });
        info!(namespace = %self.settings.namespace, "stream invalidator started");
    }

    /// Cancels the listener and waits for it to exit.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        running.cancel.cancel();
        if let Err(e) = running.handle.await {
            warn!(error = %e, "stream invalidator task ended abnormally");
        }
        self.shared.set_state(ConnectionState::Disconnected);
        info!("stream invalidator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    pub fn dirty_count(&self) -> usize {
        self.shared.dirty.lock().len()
    }

    /// Flushes immediately, returning how many dirty ids were drained.
    /// Zero also means the cache rejected the flush and the ids are kept.
    pub async fn flush_now(&self) -> usize {
        self.shared.flush().await
    }

    /// Applies one raw feed payload; true if it added a new dirty id.
    pub fn handle_message(&self, raw: &str) -> bool {
        self.shared.handle_message(raw)
    }
}

async fn run_listener(
    shared: Arc<Shared>,
    feed: Arc<dyn ChangeFeed>,
    settings: InvalidatorSettings,
    cancel: CancellationToken,
) {
    let mut backoff = ReconnectBackoff::new(settings.backoff_base, settings.backoff_max);
    let mut flush = tokio::time::interval_at(
        Instant::now() + settings.flush_interval,
        settings.flush_interval,
    );
    flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        shared.set_state(ConnectionState::Connecting);
        let connected = {
            let mut connect = pin!(feed.connect());
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = flush.tick() => {
                        shared.flush().await;
                    }
                    result = &mut connect => break result,
                }
            }
        };

        match connected {
            Ok(mut messages) => {
                shared.set_state(ConnectionState::Connected);
                backoff.reset();
                info!("connected to change feed");

                let mut idle = pin!(tokio::time::sleep(settings.idle_timeout));
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = flush.tick() => {
                            shared.flush().await;
                        }
                        _ = &mut idle => {
                            warn!(
                                idle_secs = settings.idle_timeout.as_secs(),
                                "change feed idle, dropping connection"
                            );
                            break;
                        }
                        message = messages.recv() => match message {
                            Some(raw) => {
                                idle.as_mut().reset(Instant::now() + settings.idle_timeout);
                                shared.handle_message(&raw);
                            }
                            None => {
                                warn!("change feed closed");
                                break;
                            }
                        }
                    }
                }
            }
            Err(e) => warn!(error = %e, "change feed connection failed"),
        }

        shared.set_state(ConnectionState::Disconnected);
        let delay = backoff.next_delay();
        info!(delay_ms = delay.as_millis() as u64, "reconnecting to change feed");

        let mut sleep = pin!(tokio::time::sleep(delay));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = flush.tick() => {
                    shared.flush().await;
                }
                _ = &mut sleep => break,
            }
        }
    }
}
