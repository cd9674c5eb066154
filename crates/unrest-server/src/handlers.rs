use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderName, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::{AppState, error::ApiError, events::EventQuery};

pub const GEO_JSON: &str = "application/geo+json";
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    cache: String,
    stream: String,
    dirty_ids: usize,
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let (stream, dirty_ids) = match &state.invalidator {
        Some(inv) => (inv.state().to_string(), inv.dirty_count()),
        None => ("disabled".to_string(), 0),
    };
    let body = ReadyResponse {
        status: "ready",
        cache: state.events.cache().kind().to_string(),
        stream,
        dirty_ids,
    };
    (StatusCode::OK, Json(body))
}

/// `GET /api/events?days=&types=&bbox=`
pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventQuery>,
) -> Result<Response, ApiError> {
    let request = query.validate()?;
    let payload = state.events.get_events(&request).await?;

    Ok((
        [(CONTENT_TYPE, GEO_JSON), (X_CACHE, payload.cache.as_str())],
        payload.body,
    )
        .into_response())
}
