use std::convert::Infallible;
use std::time::Duration;

use axum::Extension;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures::StreamExt;
use futures::stream;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use summon_core::session::SessionContext;
use summon_mcp_runtime::tools::RegistryProfile;

use crate::error::AppError;
use crate::routes::enforce_transport_auth;
use crate::sessions::OutboundRoute;
use crate::state::AppState;

/// Legacy single-direction event-stream transport. Deprecated in favor of
/// `/mcp`, kept functional for backward compatibility.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sse", get(sse_connect))
        .route("/sse/message", post(sse_message))
}

async fn sse_connect(
    State(state): State<AppState>,
    headers: HeaderMap,
    context: Option<Extension<SessionContext>>,
) -> Response {
    let context = context.map(|Extension(context)| context);
    if let Some(rejection) = enforce_transport_auth(&state, &headers, context.as_ref()) {
        return rejection;
    }

    let profile = if context.is_some() {
        RegistryProfile::Authenticated
    } else {
        RegistryProfile::Anonymous
    };

    let (events_tx, events_rx) = mpsc::channel::<Value>(64);
    let session = state
        .sessions
        .open(context, profile, OutboundRoute::EventStream(events_tx));

    tracing::info!(
        event = "sse_session_opened",
        session_id = %session.id,
        user = session.login.as_deref().unwrap_or("anonymous"),
        "legacy event stream accepted"
    );

    // First event tells the client where to POST its messages; every
    // JSON-RPC response for this session then flows down the same stream.
    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("/sse/message?sessionId={}", session.id));
    let messages = ReceiverStream::new(events_rx).map(|response| {
        Ok::<_, Infallible>(Event::default().event("message").data(response.to_string()))
    });
    let stream = stream::once(std::future::ready(Ok::<_, Infallible>(endpoint))).chain(messages);

    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(20))
                .text("keep-alive"),
        )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct SseMessageParams {
    #[serde(rename = "sessionId")]
    session_id: String,
}

async fn sse_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SseMessageParams>,
    context: Option<Extension<SessionContext>>,
    body: Bytes,
) -> Response {
    let context = context.map(|Extension(context)| context);
    if let Some(rejection) = enforce_transport_auth(&state, &headers, context.as_ref()) {
        return rejection;
    }

    // No prior established event stream means there is no session to
    // deliver to.
    let Some(session) = state.sessions.info(&params.session_id) else {
        return AppError::NotFound {
            message: format!("No event stream with sessionId '{}'", params.session_id),
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

    let incoming: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(_) => {
            return AppError::Validation {
                message: "Request body must be valid JSON".to_string(),
                field: None,
                received: None,
                docs_hint: None,
            }
            .into_response();
        }
    };

    match state.sessions.deliver(&params.session_id, incoming).await {
        Ok(_) => StatusCode::ACCEPTED.into_response(),
        Err(_) => AppError::NotFound {
            message: format!("No event stream with sessionId '{}'", params.session_id),
        }
        .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use chrono::Duration;
    use serde_json::json;
    use tower::ServiceExt;

    use summon_core::session::SessionContext;
    use summon_mcp_runtime::audit::MemoryAuditSink;

    use crate::routes::test_support::{test_app, test_state};

    #[tokio::test]
    async fn sse_requires_a_valid_token_when_auth_is_on() {
        let state = test_state(Arc::new(MemoryAuditSink::new()), true);
        let app = test_app(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/sse")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key("www-authenticate"));
    }

    #[tokio::test]
    async fn sse_opens_an_event_stream_for_a_valid_token() {
        let state = test_state(Arc::new(MemoryAuditSink::new()), true);
        let token = state.tokens.mint(
            SessionContext::new("octocat", "", "", "gho_x"),
            Duration::hours(1),
        );
        let app = test_app(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/sse")
                    .header(header::AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .expect("content-type header should exist")
            .to_str()
            .expect("header should be ascii");
        assert!(content_type.starts_with("text/event-stream"));
    }

    #[tokio::test]
    async fn message_submission_without_an_established_stream_is_an_error() {
        let sink = Arc::new(MemoryAuditSink::new());
        let state = test_state(sink.clone(), true);
        let token = state.tokens.mint(
            SessionContext::new("octocat", "", "", "gho_x"),
            Duration::hours(1),
        );
        let app = test_app(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sse/message?sessionId=never-opened")
                    .header(header::AUTHORIZATION, format!("Bearer {token}"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" }).to_string(),
                    ))
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(sink.events().is_empty());
    }
}
