use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, middleware, routing::get};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use unrest_cache::CacheStore;
use unrest_sparql::SparqlClient;

use crate::{
    AppState,
    config::AppConfig,
    events::EventService,
    handlers,
    invalidator::{InvalidatorSettings, SseChangeFeed, StreamInvalidator},
    middleware as app_middleware,
    sweeper::CacheSweeper,
};

pub struct UnrestServer {
    addr: SocketAddr,
    app: Router,
    state: AppState,
    sweeper: CacheSweeper,
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        // Event feed
        .route("/api/events", get(handlers::list_events))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    let req_id = req
                        .extensions()
                        .get::<axum::http::HeaderValue>()
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        // Outermost, so the trace span sees the id.
        .layer(middleware::from_fn(app_middleware::request_id))
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Opens the cache and wires the query client and invalidator.
    pub async fn build(self) -> anyhow::Result<UnrestServer> {
        let cfg = &self.config;

        let cache = CacheStore::open(&cfg.cache.path).await;
        let client = SparqlClient::new(cfg.upstream.client_config())?;
        let events = EventService::new(
            Arc::new(client),
            cache.clone(),
            cfg.cache.namespace.clone(),
            cfg.cache_ttl(),
        );

        let invalidator = if cfg.stream.enabled {
            let feed = SseChangeFeed::new(&cfg.stream.url, &cfg.upstream.user_agent)?;
            Some(Arc::new(StreamInvalidator::new(
                Arc::new(feed),
                cache.clone(),
                InvalidatorSettings {
                    namespace: cfg.cache.namespace.clone(),
                    flush_interval: std::time::Duration::from_secs(cfg.stream.flush_interval_secs),
                    backoff_base: std::time::Duration::from_millis(cfg.stream.backoff_base_ms),
                    backoff_max: std::time::Duration::from_millis(cfg.stream.backoff_max_ms),
                    idle_timeout: std::time::Duration::from_secs(cfg.stream.idle_timeout_secs),
                },
            )))
        } else {
            tracing::info!("change stream disabled, relying on cache TTL only");
            None
        };

        let sweeper = CacheSweeper::new(cache, cfg.sweep_interval());

        let state = AppState {
            events: Arc::new(events),
            invalidator,
        };

        Ok(UnrestServer {
            addr: self.addr,
            app: build_app(state.clone()),
            state,
            sweeper,
        })
    }
}

impl UnrestServer {
    pub async fn run(self) -> anyhow::Result<()> {
        self.sweeper.start();
        if let Some(inv) = &self.state.invalidator {
            inv.start();
        }

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        let served = axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        if let Some(inv) = &self.state.invalidator {
            inv.stop().await;
        }
        self.sweeper.stop().await;
        served?;
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
