use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Application-wide error types with appropriate HTTP status codes.
///
/// Every variant is translated to a response in one place
/// ([`IntoResponse`]), so handlers and services only ever return
/// `AppResult<T>` and never build error bodies themselves.
///
/// # Client vs. Server Errors
///
/// Client errors carry a message that is safe to show. Server-side variants
/// (`Storage`, `Internal`, `ConfigError`) are logged with their detail but
/// answered with a generic message.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Validation failed: {}", .0.join(", "))]
    Validation(Vec<String>),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Rate limit exceeded, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl AppError {
    /// Shorthand for the 404 raised when a product id does not resolve.
    pub fn product_not_found(id: impl std::fmt::Display) -> Self {
        AppError::NotFound(format!("Couldn't find Product with 'id'={id}"))
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) | AppError::SerializationError(_) => StatusCode::BAD_REQUEST,
            AppError::Validation(_) | AppError::Conflict(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Storage(_) | AppError::Internal(_) | AppError::ConfigError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Error response body shared by every failing endpoint.
///
/// `errors` is present for validation failures and `retry_after` for
/// throttled requests; both are omitted otherwise.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorResponse {
    fn new(error: &str, message: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            message: message.into(),
            errors: None,
            retry_after: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            // Full detail stays server-side
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let body = match self {
            AppError::NotFound(msg) => ErrorResponse::new("Record not found", msg),
            AppError::BadRequest(msg) => ErrorResponse::new("Bad request", msg),
            AppError::SerializationError(e) => {
                ErrorResponse::new("Bad request", sanitize_serde_error(&e))
            }
            AppError::Validation(messages) => ErrorResponse {
                message: messages.join(", "),
                errors: Some(messages),
                ..ErrorResponse::new("Validation failed", "")
            },
            AppError::Conflict(msg) => ErrorResponse {
                errors: Some(vec![msg.clone()]),
                ..ErrorResponse::new("Validation failed", msg)
            },
            AppError::Unauthorized(msg) => ErrorResponse::new("Unauthorized", msg),
            AppError::Forbidden(msg) => ErrorResponse::new("Forbidden", msg),
            AppError::PayloadTooLarge(msg) => ErrorResponse::new("Payload too large", msg),
            AppError::RateLimited { retry_after } => return rate_limited_response(retry_after),
            AppError::Storage(_) | AppError::Internal(_) => ErrorResponse::new(
                "Internal server error",
                "An internal error occurred. Please contact support if the issue persists.",
            ),
            AppError::ConfigError(_) => ErrorResponse::new(
                "Internal server error",
                "Service configuration error. Please contact support.",
            ),
        };

        (status, axum::Json(body)).into_response()
    }
}

/// Build the 429 response for a throttled request.
///
/// Shared by the rate limiting middleware and the [`AppError::RateLimited`]
/// variant so both produce the same header and body.
pub fn rate_limited_response(retry_after: u64) -> Response {
    let body = ErrorResponse {
        retry_after: Some(retry_after),
        ..ErrorResponse::new(
            "Rate limit exceeded",
            format!("Too many requests. Retry after {retry_after} seconds."),
        )
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, axum::Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    response
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return AppError::PayloadTooLarge(rejection.body_text());
        }
        match rejection {
            JsonRejection::JsonSyntaxError(_) => {
                AppError::BadRequest("Malformed JSON in request body".to_string())
            }
            JsonRejection::JsonDataError(_) => {
                AppError::BadRequest(sanitize_data_error(&rejection.body_text()))
            }
            other => AppError::BadRequest(other.body_text()),
        }
    }
}

/// Sanitize serde error messages to avoid leaking internal type information.
fn sanitize_serde_error(e: &serde_json::Error) -> String {
    sanitize_message(&e.to_string())
}

fn sanitize_message(msg: &str) -> String {
    if msg.contains("missing field")
        && let Some(start) = msg.find('`')
        && let Some(end) = msg[start + 1..].find('`')
    {
        let field = &msg[start + 1..start + 1 + end];
        return format!("Missing required field: {field}");
    }

    if msg.contains("unknown variant") || msg.contains("invalid type") {
        return "Invalid data type in request body".to_string();
    }

    if msg.contains("EOF while parsing") || msg.contains("expected") {
        return "Malformed JSON in request body".to_string();
    }

    "Invalid request format".to_string()
}

/// Well-formed JSON of the wrong shape is never reported as malformed.
fn sanitize_data_error(msg: &str) -> String {
    match sanitize_message(msg) {
        sanitized if sanitized.starts_with("Missing required field") => sanitized,
        _ => "Invalid data type in request body".to_string(),
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_not_found_envelope() {
        let response = AppError::product_not_found(42).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = body_json(response).await;
        assert_eq!(body["error"], "Record not found");
        assert_eq!(body["message"], "Couldn't find Product with 'id'=42");
        assert!(body.get("errors").is_none());
    }

    #[tokio::test]
    async fn test_validation_envelope_lists_every_message() {
        let response = AppError::Validation(vec![
            "Name is required".to_string(),
            "Price must be greater than or equal to 0".to_string(),
        ])
        .into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = body_json(response).await;
        assert_eq!(body["error"], "Validation failed");
        assert_eq!(body["errors"].as_array().unwrap().len(), 2);
        assert_eq!(
            body["message"],
            "Name is required, Price must be greater than or equal to 0"
        );
    }

    #[tokio::test]
    async fn test_rate_limited_sets_retry_after() {
        let response = AppError::RateLimited { retry_after: 17 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "17");

        let body = body_json(response).await;
        assert_eq!(body["error"], "Rate limit exceeded");
        assert_eq!(body["retry_after"], 17);
        assert_eq!(body["message"], "Too many requests. Retry after 17 seconds.");
    }

    #[tokio::test]
    async fn test_internal_errors_hide_detail() {
        let response = AppError::Storage("connection refused at 10.0.0.3".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert!(!body["message"].as_str().unwrap().contains("10.0.0.3"));
    }

    #[test]
    fn test_sanitize_missing_field() {
        let err = serde_json::from_str::<std::collections::HashMap<String, u32>>("{\"a\": ")
            .unwrap_err();
        assert_eq!(sanitize_serde_error(&err), "Malformed JSON in request body");
        assert_eq!(
            sanitize_message("missing field `product` at line 1 column 2"),
            "Missing required field: product"
        );
    }

    #[test]
    fn test_data_errors_are_not_malformed_json() {
        assert_eq!(
            sanitize_data_error("invalid value: expected a map at line 1 column 14"),
            "Invalid data type in request body"
        );
        assert_eq!(
            sanitize_data_error("missing field `product` at line 1 column 2"),
            "Missing required field: product"
        );
    }
}
