//! API error type and its HTTP mapping.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use unrest_core::CoreError;
use unrest_sparql::UpstreamError;

/// A single rejected query parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Every parameter that failed validation, in query order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid request parameters: {}", .errors.iter().map(|e| e.field).collect::<Vec<_>>().join(", "))]
pub struct ValidationError {
    pub errors: Vec<FieldError>,
}

/// Errors surfaced by the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Inbound parameters failed validation (400).
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The upstream query failed after retries, or returned garbage (502).
    #[error("upstream failure: {0}")]
    Upstream(#[from] UpstreamError),

    /// The normalized payload did not pass the canonical shape check (500).
    #[error("payload failed schema validation: {0}")]
    Schema(#[from] CoreError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Schema(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Validation(v) => {
                tracing::debug!(error = %v, "rejected request");
                json!({
                    "error": "invalid_request",
                    "message": "One or more query parameters are invalid",
                    "details": v.errors,
                })
            }
            Self::Upstream(e) => {
                tracing::error!(error = %e, "upstream query failed");
                json!({
                    "error": "upstream_unavailable",
                    "message": "Event data is temporarily unavailable, please retry later",
                })
            }
            Self::Schema(e) => {
                tracing::error!(error = %e, "normalized payload rejected");
                json!({
                    "error": "internal",
                    "message": "Failed to build a valid event payload",
                })
            }
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let v = ValidationError {
            errors: vec![FieldError::new("days", "must be between 1 and 30")],
        };
        assert_eq!(ApiError::from(v).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::from(UpstreamError::RateLimited).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::from(UpstreamError::Malformed("x".into())).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::from(CoreError::schema_violation("features[0]", "bad")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn validation_message_lists_fields() {
        let v = ValidationError {
            errors: vec![
                FieldError::new("days", "bad"),
                FieldError::new("types", "bad"),
            ],
        };
        assert_eq!(v.to_string(), "invalid request parameters: days, types");
    }
}
