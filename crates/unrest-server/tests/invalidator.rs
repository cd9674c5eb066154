use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use unrest_cache::{CacheStore, SqliteCache};
use unrest_server::{
    ChangeFeed, ConnectionState, FeedError, InvalidatorSettings, SseChangeFeed, StreamInvalidator,
};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

enum Step {
    Fail,
    /// Deliver the messages, then close the connection.
    Deliver(Vec<String>),
    /// Deliver the messages and keep the connection open.
    DeliverAndHold(Vec<String>),
}

#[derive(Default)]
struct ScriptedFeed {
    script: Mutex<VecDeque<Step>>,
    connects: Mutex<Vec<Instant>>,
    held: Mutex<Vec<mpsc::Sender<String>>>,
}

impl ScriptedFeed {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into()),
            ..Self::default()
        })
    }

    fn connect_times(&self) -> Vec<Instant> {
        self.connects.lock().clone()
    }
}

#[async_trait]
impl ChangeFeed for ScriptedFeed {
    async fn connect(&self) -> Result<mpsc::Receiver<String>, FeedError> {
        self.connects.lock().push(Instant::now());
        let step = self.script.lock().pop_front();
        let (messages, hold) = match step {
            Some(Step::Fail) => return Err(FeedError::Status(503)),
            Some(Step::Deliver(m)) => (m, false),
            Some(Step::DeliverAndHold(m)) => (m, true),
            // script exhausted: stay connected and silent
            None => (Vec::new(), true),
        };

        let (tx, rx) = mpsc::channel(64);
        for m in messages {
            let _ = tx.try_send(m);
        }
        if hold {
            self.held.lock().push(tx);
        }
        Ok(rx)
    }
}

fn edit(title: &str) -> String {
    format!(r#"{{"wiki":"wikidatawiki","type":"edit","title":"{title}","namespace":0}}"#)
}

fn settings() -> InvalidatorSettings {
    InvalidatorSettings {
        namespace: "events".into(),
        flush_interval: Duration::from_secs(60),
        backoff_base: Duration::from_secs(1),
        backoff_max: Duration::from_secs(30),
        idle_timeout: Duration::from_secs(300),
    }
}

fn gaps(times: &[Instant]) -> Vec<Duration> {
    times.windows(2).map(|w| w[1] - w[0]).collect()
}

fn assert_close(actual: Duration, expected: Duration) {
    assert!(
        actual >= expected && actual < expected + Duration::from_millis(50),
        "expected ~{expected:?}, got {actual:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn reconnect_backoff_doubles_then_resets_after_connect() {
    let feed = ScriptedFeed::new(vec![
        Step::Fail,
        Step::Fail,
        Step::Fail,
        Step::Deliver(vec![]),
        Step::Fail,
        Step::DeliverAndHold(vec![]),
    ]);
    let inv = StreamInvalidator::new(feed.clone(), CacheStore::memory(), settings());

    inv.start();
    tokio::time::sleep(Duration::from_secs(20)).await;

    let times = feed.connect_times();
    assert_eq!(times.len(), 6);
    let gaps = gaps(&times);
    // 1s, 2s, 4s while failing; the successful connect resets the schedule
    assert_close(gaps[0], Duration::from_secs(1));
    assert_close(gaps[1], Duration::from_secs(2));
    assert_close(gaps[2], Duration::from_secs(4));
    assert_close(gaps[3], Duration::from_secs(1));
    assert_close(gaps[4], Duration::from_secs(2));
    assert_eq!(inv.state(), ConnectionState::Connected);

    inv.stop().await;
    assert_eq!(inv.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn backoff_is_capped() {
    let feed = ScriptedFeed::new((0..8).map(|_| Step::Fail).collect());
    let mut s = settings();
    s.flush_interval = Duration::from_secs(3600);
    let inv = StreamInvalidator::new(feed.clone(), CacheStore::memory(), s);

    inv.start();
    tokio::time::sleep(Duration::from_secs(200)).await;

    let gaps = gaps(&feed.connect_times());
    let secs: Vec<u64> = gaps.iter().take(7).map(|d| d.as_secs()).collect();
    assert_eq!(secs, vec![1, 2, 4, 8, 16, 30, 30]);

    inv.stop().await;
}

#[tokio::test(start_paused = true)]
async fn dirty_ids_flush_the_namespace_on_tick() {
    let cache = CacheStore::memory();
    cache.set("events", "days=7", "cached", Duration::from_secs(3600)).await;
    cache.set("countries", "ES", "cached", Duration::from_secs(3600)).await;

    let feed = ScriptedFeed::new(vec![Step::DeliverAndHold(vec![
        edit("Q42"),
        edit("Q42"),
        r#"{"wiki":"enwiki","type":"edit","title":"Q1"}"#.to_string(),
        r#"{"wiki":"wikidatawiki","type":"edit","title":"Property:P31"}"#.to_string(),
        r#"{"wiki":"wikidatawiki","type":"log","title":"Q5"}"#.to_string(),
        r#"{"wiki":"wikidatawiki","type":"new","title":"Q99"}"#.to_string(),
    ])]);
    let inv = StreamInvalidator::new(feed, cache.clone(), settings());

    inv.start();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(inv.state(), ConnectionState::Connected);
    assert_eq!(inv.dirty_count(), 2);
    assert!(cache.get("events", "days=7").await.is_some());

    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(inv.dirty_count(), 0);
    assert_eq!(cache.get("events", "days=7").await, None);
    assert_eq!(cache.get("countries", "ES").await.as_deref(), Some("cached"));

    inv.stop().await;
}

#[tokio::test(start_paused = true)]
async fn empty_dirty_set_leaves_cache_alone() {
    let cache = CacheStore::memory();
    cache.set("events", "days=7", "cached", Duration::from_secs(3600)).await;

    let feed = ScriptedFeed::new(vec![Step::DeliverAndHold(vec![])]);
    let inv = StreamInvalidator::new(feed, cache.clone(), settings());

    inv.start();
    tokio::time::sleep(Duration::from_secs(185)).await;

    assert!(cache.get("events", "days=7").await.is_some());
    inv.stop().await;
}

#[tokio::test(start_paused = true)]
async fn start_is_idempotent_and_stop_ends_the_task() {
    let feed = ScriptedFeed::new(vec![Step::DeliverAndHold(vec![])]);
    let inv = StreamInvalidator::new(feed.clone(), CacheStore::memory(), settings());

    inv.start();
    inv.start();
    tokio::time::sleep(Duration::from_millis(10)).await;
    inv.start();
    assert!(inv.is_running());
    assert_eq!(feed.connect_times().len(), 1);

    inv.stop().await;
    assert!(!inv.is_running());
    assert_eq!(inv.state(), ConnectionState::Disconnected);

    // stopped means no further reconnects
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(feed.connect_times().len(), 1);

    // stop twice is harmless
    inv.stop().await;
}

#[tokio::test(start_paused = true)]
async fn silent_connection_is_dropped_after_idle_timeout() {
    let feed = ScriptedFeed::new(vec![
        Step::DeliverAndHold(vec![edit("Q1")]),
        Step::DeliverAndHold(vec![]),
    ]);
    let mut s = settings();
    s.idle_timeout = Duration::from_secs(45);
    s.flush_interval = Duration::from_secs(3600);
    let inv = StreamInvalidator::new(feed.clone(), CacheStore::memory(), s);

    inv.start();
    tokio::time::sleep(Duration::from_secs(100)).await;

    // idle for 45s, then the 1s reconnect delay
    let times = feed.connect_times();
    assert_eq!(times.len(), 3);
    let gaps = gaps(&times);
    assert_close(gaps[0], Duration::from_secs(46));
    assert_close(gaps[1], Duration::from_secs(46));
    assert_eq!(inv.dirty_count(), 1);

    inv.stop().await;
}

#[tokio::test(start_paused = true)]
async fn messages_keep_the_connection_alive() {
    let feed = ScriptedFeed::new(vec![Step::DeliverAndHold(vec![])]);
    let mut s = settings();
    s.idle_timeout = Duration::from_secs(45);
    let inv = StreamInvalidator::new(feed.clone(), CacheStore::memory(), s);

    inv.start();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let tx = feed.held.lock()[0].clone();
    for i in 0..4 {
        tokio::time::sleep(Duration::from_secs(30)).await;
        tx.send(edit(&format!("Q{i}"))).await.unwrap();
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(feed.connect_times().len(), 1);
    assert_eq!(inv.state(), ConnectionState::Connected);
    inv.stop().await;
}

#[tokio::test]
async fn failed_flush_keeps_dirty_ids() {
    let dir = tempfile::tempdir().unwrap();
    let sqlite = SqliteCache::open(&dir.path().join("cache.sqlite")).await.unwrap();
    let inv = StreamInvalidator::new(
        ScriptedFeed::new(vec![]),
        CacheStore::Sqlite(sqlite.clone()),
        settings(),
    );
    inv.handle_message(&edit("Q42"));
    sqlite.close().await;

    assert_eq!(inv.flush_now().await, 0);
    assert_eq!(inv.dirty_count(), 1);
}

#[tokio::test]
async fn sse_feed_decodes_event_stream_body() {
    let server = MockServer::start().await;
    let body = format!(
        ":ok\n\nevent: message\nid: [1]\ndata: {}\n\nevent: message\ndata: {}\n\n",
        edit("Q42"),
        edit("Q7")
    );
    Mock::given(method("GET"))
        .and(path("/v2/stream/recentchange"))
        .and(header("accept", "text/event-stream"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let feed = SseChangeFeed::new(
        format!("{}/v2/stream/recentchange", server.uri()),
        "unrest-map-tests/0.0",
    )
    .unwrap();
    let mut rx = feed.connect().await.unwrap();

    assert_eq!(rx.recv().await, Some(edit("Q42")));
    assert_eq!(rx.recv().await, Some(edit("Q7")));
    // body exhausted, channel closes
    assert_eq!(rx.recv().await, None);
}

#[tokio::test]
async fn sse_feed_reports_http_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let feed = SseChangeFeed::new(server.uri(), "unrest-map-tests/0.0").unwrap();
    let err = feed.connect().await.unwrap_err();
    assert!(matches!(err, FeedError::Status(503)));
}
