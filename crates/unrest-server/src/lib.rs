pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod invalidator;
pub mod middleware;
pub mod observability;
pub mod server;
pub mod sweeper;

use std::sync::Arc;

pub use config::{AppConfig, CacheConfig, ServerConfig, StreamConfig, UpstreamConfig};
pub use error::{ApiError, FieldError, ValidationError};
pub use events::{CacheStatus, EventQuery, EventRequest, EventService, EventsPayload};
pub use invalidator::{
    ChangeFeed, ConnectionState, FeedError, InvalidatorSettings, ReconnectBackoff, SseChangeFeed,
    StreamInvalidator,
};
pub use observability::init_tracing;
pub use server::{ServerBuilder, UnrestServer, build_app};
pub use sweeper::CacheSweeper;

/// Shared handler state; the composition root owns the invalidator lifecycle.
#[derive(Clone)]
pub struct AppState {
    pub events: Arc<EventService>,
    pub invalidator: Option<Arc<StreamInvalidator>>,
}
