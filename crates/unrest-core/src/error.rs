use thiserror::Error;

/// Core error types for event normalization and payload checks
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid timestamp: {0}")]
    InvalidDateTime(String),

    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Schema violation at {path}: {message}")]
    SchemaViolation { path: String, message: String },
}

impl CoreError {
    /// Create a new InvalidDateTime error
    pub fn invalid_date_time(datetime: impl Into<String>) -> Self {
        Self::InvalidDateTime(datetime.into())
    }

    /// Create a new UnknownEventType error
    pub fn unknown_event_type(value: impl Into<String>) -> Self {
        Self::UnknownEventType(value.into())
    }

    /// Create a new SchemaViolation error
    pub fn schema_violation(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaViolation {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Convenience result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_event_type_message() {
        let err = CoreError::unknown_event_type("parade");
        assert_eq!(err.to_string(), "Unknown event type: parade");
    }

    #[test]
    fn test_schema_violation_message() {
        let err = CoreError::schema_violation("features[0].properties.id", "must match Q\\d+");
        assert_eq!(
            err.to_string(),
            "Schema violation at features[0].properties.id: must match Q\\d+"
        );
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err: serde_json::Error =
            serde_json::from_str::<serde_json::Value>("{ invalid json }").unwrap_err();
        let core_err: CoreError = json_err.into();
        assert!(matches!(core_err, CoreError::JsonError(_)));
    }
}
