use axum::Extension;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};

use summon_core::session::SessionContext;
use summon_mcp_runtime::tools::RegistryProfile;

use crate::error::AppError;
use crate::routes::{enforce_transport_auth, header_value};
use crate::sessions::OutboundRoute;
use crate::state::AppState;

const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

/// Current bidirectional Streamable-HTTP transport. Preferred over `/sse`.
pub fn router() -> Router<AppState> {
    Router::new().route("/mcp", post(mcp_post).get(mcp_get).delete(mcp_delete))
}

async fn mcp_get() -> Response {
    StatusCode::METHOD_NOT_ALLOWED.into_response()
}

async fn mcp_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    context: Option<Extension<SessionContext>>,
    body: Bytes,
) -> Response {
    let context = context.map(|Extension(context)| context);
    if let Some(rejection) = enforce_transport_auth(&state, &headers, context.as_ref()) {
        return rejection;
    }

    let incoming: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(_) => {
            return (
                StatusCode::OK,
                Json(json!({
                    "jsonrpc": "2.0",
                    "id": null,
                    "error": {
                        "code": -32700,
                        "message": "Parse error"
                    }
                })),
            )
                .into_response();
        }
    };

    match header_value(&headers, MCP_SESSION_ID_HEADER) {
        Some(session_id) => {
            let Some(session) = state.sessions.info(&session_id) else {
                return AppError::NotFound {
                    message: format!("No MCP session '{session_id}'"),
                }
                .into_response();
            };
            if session.login.as_deref() != context.as_ref().map(|c| c.login.as_str()) {
                return AppError::Forbidden {
                    message: "Session belongs to a different authenticated user".to_string(),
                    docs_hint: None,
                }
                .into_response();
            }
            match state.sessions.deliver(&session_id, incoming).await {
                Ok(responses) => jsonrpc_http_response(responses, None),
                Err(_) => AppError::NotFound {
                    message: format!("No MCP session '{session_id}'"),
                }
                .into_response(),
            }
        }
        None => {
            if !contains_initialize(&incoming) {
                return AppError::Validation {
                    message: "Mcp-Session-Id header is required".to_string(),
                    field: None,
                    received: None,
                    docs_hint: Some(
                        "Open a session with an initialize request first; the response \
                         carries the Mcp-Session-Id header to send on every later request."
                            .to_string(),
                    ),
                }
                .into_response();
            }

            let profile = if context.is_some() {
                RegistryProfile::Authenticated
            } else {
                RegistryProfile::Anonymous
            };
            let session = state
                .sessions
                .open(context, profile, OutboundRoute::RequestReply);

            tracing::info!(
                event = "mcp_session_opened",
                session_id = %session.id,
                user = session.login.as_deref().unwrap_or("anonymous"),
                "streamable session accepted"
            );

            match state.sessions.deliver(&session.id, incoming).await {
                Ok(responses) => jsonrpc_http_response(responses, Some(&session.id)),
                Err(_) => {
                    AppError::Internal("session worker unavailable".to_string()).into_response()
                }
            }
        }
    }
}

async fn mcp_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    context: Option<Extension<SessionContext>>,
) -> Response {
    let context = context.map(|Extension(context)| context);
    if let Some(rejection) = enforce_transport_auth(&state, &headers, context.as_ref()) {
        return rejection;
    }

    let Some(session_id) = header_value(&headers, MCP_SESSION_ID_HEADER) else {
        return AppError::Validation {
            message: "Mcp-Session-Id header is required".to_string(),
            field: None,
            received: None,
            docs_hint: None,
        }
        .into_response();
    };

    let Some(session) = state.sessions.info(&session_id) else {
        return AppError::NotFound {
            message: format!("No MCP session '{session_id}'"),
        }
        .into_response();
    };
    if session.login.as_deref() != context.as_ref().map(|c| c.login.as_str()) {
        return AppError::Forbidden {
            message: "Session belongs to a different authenticated user".to_string(),
            docs_hint: None,
        }
        .into_response();
    }

    state.sessions.close(&session_id);
    StatusCode::NO_CONTENT.into_response()
}

fn contains_initialize(payload: &Value) -> bool {
    let is_initialize =
        |message: &Value| message.get("method").and_then(Value::as_str) == Some("initialize");
    match payload {
        Value::Array(items) => items.iter().any(is_initialize),
        other => is_initialize(other),
    }
}

fn jsonrpc_http_response(responses: Vec<Value>, session_id: Option<&str>) -> Response {
    let mut response = if responses.is_empty() {
        StatusCode::ACCEPTED.into_response()
    } else if responses.len() == 1 {
        (
            StatusCode::OK,
            Json(responses.into_iter().next().unwrap_or(Value::Null)),
        )
            .into_response()
    } else {
        (StatusCode::OK, Json(Value::Array(responses))).into_response()
    };

    if let Some(session_id) = session_id {
        if let Ok(value) = HeaderValue::from_str(session_id) {
            response
                .headers_mut()
                .insert(MCP_SESSION_ID_HEADER, value);
        }
    }
    response
}
