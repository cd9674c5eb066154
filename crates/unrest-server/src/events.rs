//! Request orchestration for `GET /api/events`.
//!
//! ```text
//! EventQuery --validate--> EventRequest --cache key--> CacheStore
//!                                             | miss
//!                         EventSource (point + range, concurrently)
//!                                             |
//!                  merge -> type filter -> bbox filter -> validate -> cache set
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, instrument};
use unrest_cache::CacheStore;
use unrest_core::{
    BBox, CoreError, EventType, filter_by_bbox, filter_by_types, merge_and_normalize,
    validate_feature_collection,
};
use unrest_sparql::EventSource;

use crate::error::{ApiError, FieldError, ValidationError};

pub const DEFAULT_DAYS: u32 = 7;
pub const MAX_DAYS: u32 = 30;

/// Raw query parameters, exactly as received.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventQuery {
    pub days: Option<String>,
    pub types: Option<String>,
    pub bbox: Option<String>,
}

/// A validated request.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRequest {
    pub days: u32,
    /// `None` means every type.
    pub types: Option<BTreeSet<EventType>>,
    pub bbox: Option<BBox>,
}

impl Default for EventRequest {
    fn default() -> Self {
        Self {
            days: DEFAULT_DAYS,
            types: None,
            bbox: None,
        }
    }
}

impl EventQuery {
    /// Checks every parameter and reports all failures together.
    ///
    /// A malformed `bbox` is not an error: it is dropped and the request is
    /// served unfiltered.
    pub fn validate(&self) -> Result<EventRequest, ValidationError> {
        let mut errors = Vec::new();

        let days = match self.days.as_deref().map(str::trim) {
            None | Some("") => DEFAULT_DAYS,
            Some(raw) => match raw.parse::<u32>() {
                Ok(d) if (1..=MAX_DAYS).contains(&d) => d,
                _ => {
                    errors.push(FieldError::new(
                        "days",
                        format!("must be an integer between 1 and {MAX_DAYS}, got '{raw}'"),
                    ));
                    DEFAULT_DAYS
                }
            },
        };

        let types = match self.types.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => {
                let mut set = BTreeSet::new();
                for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                    match part.parse::<EventType>() {
                        Ok(t) => {
                            set.insert(t);
                        }
                        Err(_) => errors.push(FieldError::new(
                            "types",
                            format!(
                                "unknown event type '{part}', expected one of protest, riot, conflict, battle"
                            ),
                        )),
                    }
                }
                // Asking for all four is the same request as asking for none.
                (!set.is_empty() && set.len() < EventType::ALL.len()).then_some(set)
            }
        };

        let bbox = self.bbox.as_deref().and_then(|raw| {
            let parsed = BBox::parse(raw);
            if parsed.is_none() {
                debug!(bbox = raw, "ignoring malformed bbox");
            }
            parsed
        });

        if errors.is_empty() {
            Ok(EventRequest { days, types, bbox })
        } else {
            Err(ValidationError { errors })
        }
    }
}

impl EventRequest {
    /// Deterministic key built from the normalized parameters.
    pub fn cache_key(&self) -> String {
        let types = match &self.types {
            Some(set) => set
                .iter()
                .map(EventType::as_str)
                .collect::<Vec<_>>()
                .join(","),
            None => "all".to_string(),
        };
        let bbox = self
            .bbox
            .map(|b| b.to_string())
            .unwrap_or_else(|| "none".to_string());
        format!("events:v1:days={};types={types};bbox={bbox}", self.days)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

/// A serialized FeatureCollection and where it came from.
#[derive(Debug, Clone)]
pub struct EventsPayload {
    pub body: String,
    pub cache: CacheStatus,
}

/// Serves event collections from cache, or builds them from the upstream.
pub struct EventService {
    source: Arc<dyn EventSource>,
    cache: CacheStore,
    namespace: String,
    ttl: Duration,
}

impl EventService {
    pub fn new(
        source: Arc<dyn EventSource>,
        cache: CacheStore,
        namespace: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            source,
            cache,
            namespace: namespace.into(),
            ttl,
        }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[instrument(skip(self), fields(days = request.days))]
    pub async fn get_events(&self, request: &EventRequest) -> Result<EventsPayload, ApiError> {
        let key = request.cache_key();

        if let Some(body) = self.cache.get(&self.namespace, &key).await {
            return Ok(EventsPayload {
                body,
                cache: CacheStatus::Hit,
            });
        }

        // Both halves or nothing: a partial result would under-report events.
        let (points, ranges) = tokio::try_join!(
            self.source.query_recent_point_events(request.days),
            self.source.query_recent_range_events(request.days),
        )?;

        let mut collection = merge_and_normalize(&points, &ranges);
        if let Some(types) = &request.types {
            filter_by_types(&mut collection, types);
        }
        if let Some(bbox) = &request.bbox {
            filter_by_bbox(&mut collection, bbox);
        }

        let payload = serde_json::to_value(&collection).map_err(CoreError::from)?;
        validate_feature_collection(&payload)?;
        let body = serde_json::to_string(&payload).map_err(CoreError::from)?;

        self.cache.set(&self.namespace, &key, &body, self.ttl).await;
        info!(
            point_rows = points.len(),
            range_rows = ranges.len(),
            features = collection.len(),
            "built event collection"
        );

        Ok(EventsPayload {
            body,
            cache: CacheStatus::Miss,
        })
    }
}
