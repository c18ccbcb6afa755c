use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use summon_core::error::{self, ApiError};

/// Internal error type that converts to structured API responses
#[derive(Debug)]
pub enum AppError {
    /// Validation error (400)
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
    },
    /// Authenticated but not allowed (403). Missing or invalid credentials
    /// get the bearer challenge in `auth::unauthorized_challenge` instead.
    Forbidden {
        message: String,
        docs_hint: Option<String>,
    },
    /// Unknown route or resource (404)
    NotFound { message: String },
    /// Identity-provider exchange failed (502). Never retried.
    Upstream { message: String },
    /// Internal error (500)
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();

        let (status, api_error) = match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: error::codes::VALIDATION_FAILED.to_string(),
                    message,
                    field,
                    received,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::Forbidden { message, docs_hint } => (
                StatusCode::FORBIDDEN,
                ApiError {
                    error: error::codes::FORBIDDEN.to_string(),
                    message,
                    field: None,
                    received: None,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::NotFound { message } => (
                StatusCode::NOT_FOUND,
                ApiError {
                    error: error::codes::NOT_FOUND.to_string(),
                    message,
                    field: None,
                    received: None,
                    request_id,
                    docs_hint: None,
                },
            ),
            AppError::Upstream { message } => {
                tracing::warn!(event = "upstream_identity_failure", error = %message);
                (
                    StatusCode::BAD_GATEWAY,
                    ApiError {
                        error: error::codes::AUTHORIZATION_FAILED.to_string(),
                        message,
                        field: None,
                        received: None,
                        request_id,
                        docs_hint: Some(
                            "The identity-provider exchange failed. Restart the authorization flow."
                                .to_string(),
                        ),
                    },
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError {
                        error: error::codes::INTERNAL_ERROR.to_string(),
                        message: "An internal error occurred".to_string(),
                        field: None,
                        received: None,
                        request_id,
                        docs_hint: None,
                    },
                )
            }
        };

        (status, Json(api_error)).into_response()
    }
}
