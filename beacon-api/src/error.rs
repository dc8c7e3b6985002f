//! Error types for the beacon gateway API.
//!
//! Every failure a handler can produce is converted into an [`ApiError`]
//! carrying an [`ErrorCode`], and serialized as JSON with the matching HTTP
//! status. Internal detail (stack traces, storage errors) goes to logs, never
//! into a response body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use beacon_resolver::ResolveError;
use beacon_storage::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
///
/// Each code maps to one HTTP status and names a category of failure a
/// caller can react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The textual identifier could not be decoded
    InvalidIdentifier,

    /// A request parameter (hint, limit, id) is malformed
    InvalidInput,

    /// No relay held the record within the resolution deadline
    RecordNotFound,

    /// The record or its author is banned
    RecordBanned,

    /// Another request for the same resource is in flight and did not finish
    /// within the wait budget
    AdmissionTimeout,

    /// The admission bucket is over capacity
    Overloaded,

    /// The record store failed
    StorageError,

    /// Unexpected failure, including recovered panics
    InternalError,
}

impl ErrorCode {
    /// The HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidIdentifier | ErrorCode::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorCode::RecordNotFound => StatusCode::NOT_FOUND,
            ErrorCode::RecordBanned => StatusCode::GONE,
            ErrorCode::AdmissionTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::StorageError | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// A default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::InvalidIdentifier => "Identifier could not be decoded",
            ErrorCode::InvalidInput => "Invalid request parameter",
            ErrorCode::RecordNotFound => "Record not found on any relay",
            ErrorCode::RecordBanned => "Record is banned",
            ErrorCode::AdmissionTimeout => "Timed out waiting for an in-flight request",
            ErrorCode::Overloaded => "Server overloaded, try again shortly",
            ErrorCode::StorageError => "Storage operation failed",
            ErrorCode::InternalError => "Internal server error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.default_message().to_string(),
            details: None,
        }
    }

    /// Add additional details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors
    // ========================================================================

    pub fn invalid_identifier(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidIdentifier, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn record_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RecordNotFound, message)
    }

    pub fn record_banned(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::RecordBanned, reason)
    }

    pub fn admission_timeout() -> Self {
        Self::from_code(ErrorCode::AdmissionTimeout)
    }

    pub fn overloaded() -> Self {
        Self::from_code(ErrorCode::Overloaded)
    }

    pub fn storage_error() -> Self {
        Self::from_code(ErrorCode::StorageError)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

/// Allows ApiError to be returned directly from Axum handlers:
/// ```ignore
/// async fn handler() -> Result<Json<Response>, ApiError> {
///     Err(ApiError::record_not_found("no relay held this record"))
/// }
/// ```
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self);
        (status, body).into_response()
    }
}

// ============================================================================
// CONVERSIONS FROM LOWER LAYERS
// ============================================================================

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Decode(e) => ApiError::invalid_identifier(e.to_string()),
            ResolveError::NotFound { kind } => ApiError::record_not_found(format!(
                "No relay held this {} within the deadline; \
                 retry with a relay hint (`?hint=`) or an author pointer",
                kind
            )),
            ResolveError::Banned { reason } => ApiError::record_banned(reason),
            ResolveError::Store(e) => {
                tracing::error!(error = %e, "storage error during resolution");
                ApiError::storage_error()
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "storage error");
        ApiError::storage_error()
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::PointerKind;

    #[test]
    fn test_error_code_status_mapping() {
        assert_eq!(
            ErrorCode::InvalidIdentifier.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ErrorCode::RecordNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::RecordBanned.status_code(), StatusCode::GONE);
        assert_eq!(
            ErrorCode::AdmissionTimeout.status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ErrorCode::Overloaded.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ErrorCode::InternalError.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_not_found_suggests_hints() {
        let err: ApiError = ResolveError::NotFound {
            kind: PointerKind::Raw,
        }
        .into();
        assert_eq!(err.code, ErrorCode::RecordNotFound);
        assert!(err.message.contains("hint"));
        assert!(err.message.contains("record id"));
    }

    #[test]
    fn test_banned_carries_reason() {
        let err: ApiError = ResolveError::Banned {
            reason: "spam".to_string(),
        }
        .into();
        assert_eq!(err.code, ErrorCode::RecordBanned);
        assert_eq!(err.message, "spam");
    }

    #[test]
    fn test_error_serialization() -> Result<(), serde_json::Error> {
        let err = ApiError::overloaded();
        let json = serde_json::to_string(&err)?;

        assert!(json.contains("OVERLOADED"));
        assert!(!json.contains("details"));

        let deserialized: ApiError = serde_json::from_str(&json)?;
        assert_eq!(deserialized, err);
        Ok(())
    }

    #[test]
    fn test_error_with_details() {
        let err = ApiError::invalid_input("bad hint")
            .with_details(serde_json::json!({ "hint": "???" }));
        assert_eq!(err.details, Some(serde_json::json!({ "hint": "???" })));
    }
}
