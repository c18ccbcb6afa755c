use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::Json;
use axum::extract::Request;
use axum::http::header::WWW_AUTHENTICATE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tower::{Layer, Service, ServiceExt};

use summon_core::auth::TokenStore;

/// Tower Layer that validates the `Authorization: Bearer <token>` header
/// against the token store and injects the decoded `SessionContext` into
/// request extensions. Silently continues on failure — the front-door
/// endpoints are unauthenticated, and transport handlers enforce the
/// challenge themselves before any tool code runs.
#[derive(Clone)]
pub struct InjectAuthLayer {
    tokens: Arc<TokenStore>,
}

impl InjectAuthLayer {
    pub fn new(tokens: Arc<TokenStore>) -> Self {
        Self { tokens }
    }
}

impl<S> Layer<S> for InjectAuthLayer {
    type Service = InjectAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InjectAuthService {
            inner,
            tokens: self.tokens.clone(),
        }
    }
}

#[derive(Clone)]
pub struct InjectAuthService<S> {
    inner: S,
    tokens: Arc<TokenStore>,
}

impl<S> Service<Request> for InjectAuthService<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let not_ready = self.inner.clone();
        let ready = std::mem::replace(&mut self.inner, not_ready);

        if let Some(token) = extract_bearer_token(&req) {
            if let Some(context) = self.tokens.validate(&token) {
                req.extensions_mut().insert(context);
            }
        }

        Box::pin(async move { Ok(ready.oneshot(req).await.into_response()) })
    }
}

/// Extract bearer token from the Authorization header.
fn extract_bearer_token(req: &Request) -> Option<String> {
    let auth_header = req.headers().get("authorization")?.to_str().ok()?;
    auth_header.strip_prefix("Bearer ").map(|s| s.to_owned())
}

/// 401 response with an RFC 9728 bearer challenge pointing at the
/// protected-resource metadata, so MCP clients can discover the flow.
pub fn unauthorized_challenge(base_url: &str, description: &str) -> Response {
    let resource_metadata = format!("{base_url}/.well-known/oauth-protected-resource/mcp");
    let description = description.replace('"', "'");
    let challenge = format!(
        "Bearer realm=\"summon-mcp\", error=\"invalid_token\", error_description=\"{description}\", resource_metadata=\"{resource_metadata}\""
    );
    let mut response = (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": "invalid_token",
            "error_description": description,
        })),
    )
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&challenge) {
        response.headers_mut().insert(WWW_AUTHENTICATE, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;

    use super::{extract_bearer_token, unauthorized_challenge};

    #[test]
    fn bearer_extraction_requires_the_bearer_scheme() {
        let req = Request::builder()
            .uri("/mcp")
            .header("authorization", "Bearer summon_at_abc")
            .body(Body::empty())
            .expect("request should build");
        assert_eq!(extract_bearer_token(&req).as_deref(), Some("summon_at_abc"));

        let req = Request::builder()
            .uri("/mcp")
            .header("authorization", "Basic dXNlcjpwYXNz")
            .body(Body::empty())
            .expect("request should build");
        assert!(extract_bearer_token(&req).is_none());
    }

    #[test]
    fn challenge_carries_resource_metadata_and_401() {
        let response = unauthorized_challenge("https://summon.example.com", "Missing access token");
        assert_eq!(response.status(), 401);
        let challenge = response
            .headers()
            .get("www-authenticate")
            .expect("www-authenticate header should exist")
            .to_str()
            .expect("header should be ascii");
        assert!(challenge.contains("resource_metadata="));
        assert!(challenge.contains("invalid_token"));
    }
}
