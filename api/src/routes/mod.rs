use axum::Router;
use axum::extract::OriginalUri;
use axum::http::HeaderMap;
use axum::http::header::{AUTHORIZATION, HOST};
use axum::response::Response;

use summon_core::session::SessionContext;

use crate::auth::unauthorized_challenge;
use crate::error::AppError;
use crate::state::{AppState, ServerConfig};

pub mod mcp;
pub mod oauth;
pub mod sse;

/// The full fixed HTTP surface. Anything outside the declared path families
/// falls through to a 404 with no side effects.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(oauth::router())
        .merge(sse::router())
        .merge(mcp::router())
        .fallback(not_found)
}

async fn not_found(OriginalUri(uri): OriginalUri) -> AppError {
    AppError::NotFound {
        message: format!("No route for '{}'", uri.path()),
    }
}

/// Reject transport requests that lack a valid session context before any
/// tool code runs. `None` means the request may proceed.
pub(crate) fn enforce_transport_auth(
    state: &AppState,
    headers: &HeaderMap,
    context: Option<&SessionContext>,
) -> Option<Response> {
    if !state.config.require_auth || context.is_some() {
        return None;
    }
    let description = if headers.contains_key(AUTHORIZATION) {
        "Invalid or expired access token"
    } else {
        "Missing access token"
    };
    Some(unauthorized_challenge(
        &request_base_url(&state.config, headers),
        description,
    ))
}

/// Externally visible base URL: configured override first, then forwarded
/// headers, then the Host header.
pub(crate) fn request_base_url(config: &ServerConfig, headers: &HeaderMap) -> String {
    if let Some(base) = &config.public_base_url {
        return base.clone();
    }

    let forwarded_proto = first_header_token(headers, "x-forwarded-proto");
    let forwarded_host = first_header_token(headers, "x-forwarded-host");
    let host = forwarded_host.or_else(|| {
        headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned)
    });

    if let Some(host) = host {
        let proto = forwarded_proto.unwrap_or_else(|| {
            if host.contains("localhost") || host.starts_with("127.0.0.1") {
                "http".to_string()
            } else {
                "https".to_string()
            }
        });
        return format!("{}://{}", proto.trim_end_matches(':'), host);
    }

    "http://127.0.0.1:3000".to_string()
}

pub(crate) fn header_value(headers: &HeaderMap, key: &str) -> Option<String> {
    headers
        .get(key)
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned)
}

pub(crate) fn first_header_token(headers: &HeaderMap, key: &str) -> Option<String> {
    headers
        .get(key)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToOwned::to_owned)
}
