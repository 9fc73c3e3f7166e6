//! # Error Handling
//!
//! Unified problem+json error responses for the dashboard API, with trace id propagation.

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use utoipa::ToSchema;

use crate::models::collection::UnknownCollection;
use crate::store::StoreError;
use crate::telemetry;
use crate::writer::WriterError;

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Suggested retry delay in seconds (optional)
    pub retry_after: Option<u64>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given status code and message
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            retry_after: None,
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    /// Set retry after delay
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    /// Trace id of the running request, or a short correlation id outside of one.
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().to_string()[..8]).into_boxed_str())
            })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        if let Some(retry_after) = self.retry_after
            && let Ok(header_value) = HeaderValue::from_str(&retry_after.to_string())
        {
            headers.insert("retry-after", header_value);
        }

        (self.status, headers, axum::Json(self)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        validation_error(
            "Invalid query parameters",
            json!({ "query": rejection.body_text() }),
        )
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(error: sea_orm::DbErr) -> Self {
        match error {
            sea_orm::DbErr::RecordNotFound(record) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Record not found: {}", record),
            ),
            sea_orm::DbErr::Conn(connection_err) => {
                tracing::error!("Database connection error: {:?}", connection_err);
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Database service unavailable",
                )
            }
            _ => {
                tracing::error!("Database error: {:?}", error);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Database error occurred",
                )
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound { id, .. } => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Record '{}' not found", id),
            ),
            StoreError::Unavailable(reason) => {
                tracing::error!(%reason, "Store unavailable");
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Store unavailable",
                )
                .with_retry_after(1)
            }
            StoreError::Database(db_err) => db_err.into(),
        }
    }
}

impl From<WriterError> for ApiError {
    fn from(error: WriterError) -> Self {
        match error {
            WriterError::AppendOnly(collection) => forbidden(Some(&format!(
                "Collection '{}' is append-only",
                collection
            ))),
            WriterError::InvalidStatus { collection, status } => validation_error(
                &format!("Status '{}' is not valid for '{}'", status, collection),
                json!({ "status": status, "allowed": collection.status_labels() }),
            ),
            WriterError::Store(store_err) => store_err.into(),
        }
    }
}

impl From<UnknownCollection> for ApiError {
    fn from(error: UnknownCollection) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", error.to_string())
    }
}

/// Create an unauthorized error (401)
pub fn unauthorized(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
}

/// Create a forbidden error (403)
pub fn forbidden(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Insufficient permissions");
    ApiError::new(StatusCode::FORBIDDEN, "FORBIDDEN", msg)
}

/// Create a validation error with field details
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}

/// Deletes must be explicitly confirmed by the caller.
pub fn confirmation_required() -> ApiError {
    ApiError::new(
        StatusCode::BAD_REQUEST,
        "CONFIRMATION_REQUIRED",
        "Deleting a record requires confirm=true",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Collection;
    use axum::http::StatusCode;
    use serde_json::json;

    #[test]
    fn test_api_error_basic() {
        let error = ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            "Test error message",
        );

        assert_eq!(error.code, Box::from("VALIDATION_FAILED"));
        assert_eq!(error.message, Box::from("Test error message"));
        assert_eq!(error.details, None);
        assert_eq!(error.retry_after, None);
        assert!(error.trace_id.is_some());
    }

    #[test]
    fn test_api_error_with_details() {
        let error = ApiError::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", "Test error message")
            .with_details(json!({"field": "value"}));

        assert_eq!(error.details, Some(Box::new(json!({"field": "value"}))));
    }

    #[test]
    fn store_errors_map_to_statuses() {
        let not_found: ApiError = StoreError::NotFound {
            path: "users/a/patients".into(),
            id: "x".into(),
        }
        .into();
        assert_eq!(not_found.status, StatusCode::NOT_FOUND);

        let unavailable: ApiError = StoreError::Unavailable("down".into()).into();
        assert_eq!(unavailable.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(unavailable.retry_after, Some(1));
    }

    #[test]
    fn writer_errors_map_to_statuses() {
        let append_only: ApiError = WriterError::AppendOnly(Collection::WebhookLogs).into();
        assert_eq!(append_only.status, StatusCode::FORBIDDEN);

        let invalid: ApiError = WriterError::InvalidStatus {
            collection: Collection::Patients,
            status: "Closed".into(),
        }
        .into();
        assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
        assert_eq!(invalid.code, Box::from("VALIDATION_FAILED"));
        assert_eq!(
            invalid.details.as_deref().map(|d| d["allowed"][0].clone()),
            Some(json!("Lead"))
        );
    }

    #[test]
    fn unknown_collection_is_not_found() {
        let error: ApiError = UnknownCollection("invoices".into()).into();
        assert_eq!(error.status, StatusCode::NOT_FOUND);
        assert_eq!(error.code, Box::from("NOT_FOUND"));
    }

    #[test]
    fn confirmation_required_code() {
        let error = confirmation_required();
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert_eq!(error.code, Box::from("CONFIRMATION_REQUIRED"));
    }

    #[tokio::test]
    async fn test_into_response_content_type() {
        let response = unauthorized(None).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers()["content-type"],
            "application/problem+json"
        );
    }
}
