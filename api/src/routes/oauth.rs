use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use url::Url;
use uuid::Uuid;

use summon_core::auth::{generate_auth_code, random_hex};
use summon_core::session::SessionContext;

use crate::error::AppError;
use crate::routes::request_base_url;
use crate::state::{
    AppState, IssuedAuthCode, PendingAuthorization, RegisteredClient,
};

const OAUTH_SCOPES: [&str; 1] = ["mcp"];
const DCR_TOKEN_AUTH_METHODS: [&str; 2] = ["none", "client_secret_post"];
const AUTH_CODE_TTL_MINUTES: i64 = 10;
const PENDING_AUTH_TTL_MINUTES: i64 = 10;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/authorize", get(authorize_form).post(authorize_submit))
        .route("/callback", get(callback))
        .route("/register", post(register))
        .route("/token", post(token))
        .route(
            "/.well-known/oauth-authorization-server",
            get(authorization_server_metadata),
        )
        .route(
            "/.well-known/oauth-authorization-server/mcp",
            get(authorization_server_metadata),
        )
        .route(
            "/.well-known/oauth-protected-resource",
            get(oauth_protected_resource_metadata),
        )
        .route(
            "/.well-known/oauth-protected-resource/mcp",
            get(oauth_protected_resource_metadata),
        )
}

// ──────────────────────────────────────────────
// GET /authorize
// ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AuthorizeParams {
    pub response_type: String,
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub code_challenge: Option<String>,
    #[serde(default)]
    pub code_challenge_method: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

pub async fn authorize_form(
    State(state): State<AppState>,
    Query(params): Query<AuthorizeParams>,
) -> Result<Html<String>, AppError> {
    validate_authorize_params(&params)?;
    validate_oauth_client(&state, &params.client_id, &params.redirect_uri)?;

    let client_name = state
        .clients
        .get(&params.client_id)
        .and_then(|client| client.client_name)
        .unwrap_or_else(|| params.client_id.clone());

    Ok(Html(render_consent_form(
        &client_name,
        &params.client_id,
        &params.redirect_uri,
        params.code_challenge.as_deref().unwrap_or(""),
        params.state.as_deref().unwrap_or(""),
    )))
}

fn validate_authorize_params(params: &AuthorizeParams) -> Result<(), AppError> {
    if params.response_type != "code" {
        return Err(AppError::Validation {
            message: "response_type must be 'code'".to_string(),
            field: Some("response_type".to_string()),
            received: Some(Value::String(params.response_type.clone())),
            docs_hint: Some("Only Authorization Code flow is supported.".to_string()),
        });
    }
    if params.code_challenge.is_some() {
        let method = params.code_challenge_method.as_deref().unwrap_or("S256");
        if method != "S256" {
            return Err(AppError::Validation {
                message: "code_challenge_method must be 'S256'".to_string(),
                field: Some("code_challenge_method".to_string()),
                received: Some(Value::String(method.to_string())),
                docs_hint: Some("Only PKCE S256 is supported.".to_string()),
            });
        }
    }
    Ok(())
}

fn is_valid_loopback_redirect(redirect_uri: &str) -> bool {
    let Ok(url) = Url::parse(redirect_uri) else {
        return false;
    };

    if url.scheme() != "http" {
        return false;
    }

    let Some(host) = url.host_str() else {
        return false;
    };
    if host != "127.0.0.1" && host != "localhost" && host != "::1" {
        return false;
    }

    if url.port().is_none() {
        return false;
    }

    if url.path() != "/callback" {
        return false;
    }

    if url.fragment().is_some() {
        return false;
    }

    true
}

fn validate_oauth_client(
    state: &AppState,
    client_id: &str,
    redirect_uri: &str,
) -> Result<RegisteredClient, AppError> {
    if client_id.trim().is_empty() {
        return Err(AppError::Validation {
            message: "client_id is required".to_string(),
            field: Some("client_id".to_string()),
            received: None,
            docs_hint: Some("Register an OAuth client via POST /register first.".to_string()),
        });
    }

    if redirect_uri.trim().is_empty() {
        return Err(AppError::Validation {
            message: "redirect_uri is required".to_string(),
            field: Some("redirect_uri".to_string()),
            received: None,
            docs_hint: Some("Provide a valid redirect URI for this client.".to_string()),
        });
    }

    let client = state
        .clients
        .get(client_id)
        .ok_or_else(|| AppError::Validation {
            message: format!("Unknown OAuth client_id '{}'", client_id),
            field: Some("client_id".to_string()),
            received: Some(Value::String(client_id.to_string())),
            docs_hint: Some("Use a client_id issued by POST /register.".to_string()),
        })?;

    let exact_match = client
        .redirect_uris
        .iter()
        .any(|allowed| allowed == redirect_uri);
    if exact_match {
        return Ok(client);
    }

    if client.allow_loopback_redirect && is_valid_loopback_redirect(redirect_uri) {
        return Ok(client);
    }

    Err(AppError::Validation {
        message: "redirect_uri is not allowed for this client".to_string(),
        field: Some("redirect_uri".to_string()),
        received: Some(Value::String(redirect_uri.to_string())),
        docs_hint: Some(
            "Use one of the registered redirect URIs, or a loopback callback \
             if this client registered loopback redirects."
                .to_string(),
        ),
    })
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

fn render_consent_form(
    client_name: &str,
    client_id: &str,
    redirect_uri: &str,
    code_challenge: &str,
    state: &str,
) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Summon — Authorize</title>
<style>
body {{ font-family: system-ui, sans-serif; max-width: 400px; margin: 60px auto; padding: 0 20px; }}
h1 {{ font-size: 1.4em; }}
button {{ margin-top: 20px; padding: 10px 24px; background: #111; color: #fff; border: none; cursor: pointer; font-size: 1em; }}
.info {{ color: #666; font-size: 0.9em; margin-top: 8px; }}
</style>
</head>
<body>
<h1>Authorize {client_name_escaped}</h1>
<p class="info">This MCP client wants to call Summon tools as you. Continue to GitHub to sign in.</p>
<form method="POST" action="/authorize">
<input type="hidden" name="client_id" value="{client_id_escaped}">
<input type="hidden" name="redirect_uri" value="{redirect_uri_escaped}">
<input type="hidden" name="code_challenge" value="{code_challenge_escaped}">
<input type="hidden" name="state" value="{state_escaped}">
<button type="submit">Continue with GitHub</button>
</form>
</body>
</html>"#,
        client_name_escaped = html_escape(client_name),
        client_id_escaped = html_escape(client_id),
        redirect_uri_escaped = html_escape(redirect_uri),
        code_challenge_escaped = html_escape(code_challenge),
        state_escaped = html_escape(state),
    )
}

// ──────────────────────────────────────────────
// POST /authorize
// ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AuthorizeSubmit {
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub code_challenge: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

pub async fn authorize_submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<AuthorizeSubmit>,
) -> Result<impl IntoResponse, AppError> {
    validate_oauth_client(&state, &form.client_id, &form.redirect_uri)?;

    let nonce = random_hex(16);
    state.pending.insert(
        nonce.clone(),
        PendingAuthorization {
            client_id: form.client_id.clone(),
            redirect_uri: form.redirect_uri,
            state: form.state,
            code_challenge: form
                .code_challenge
                .filter(|challenge| !challenge.is_empty()),
            expires_at: Utc::now() + Duration::minutes(PENDING_AUTH_TTL_MINUTES),
        },
    );

    let base = request_base_url(&state.config, &headers);
    let callback_uri = format!("{base}/callback");
    let upstream = state.github.authorize_redirect_url(&nonce, &callback_uri)?;

    tracing::info!(
        event = "oauth_authorize_redirect",
        client_id = %form.client_id,
        "redirecting caller to the identity provider"
    );

    Ok(Redirect::to(&upstream))
}

// ──────────────────────────────────────────────
// GET /callback
// ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

pub async fn callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Result<Response, AppError> {
    let nonce = params.state.as_deref().unwrap_or_default();
    let pending = state
        .pending
        .take(nonce)
        .ok_or_else(|| AppError::Validation {
            message: "Unknown or expired authorization request".to_string(),
            field: Some("state".to_string()),
            received: None,
            docs_hint: Some("Restart the authorization flow from /authorize.".to_string()),
        })?;

    // The provider denied (or the user cancelled). No session is created;
    // the error travels back to the requesting client.
    if let Some(error) = params.error {
        tracing::warn!(
            event = "oauth_callback_denied",
            client_id = %pending.client_id,
            upstream_error = %error,
            upstream_description = %params.error_description.unwrap_or_default(),
            "identity provider denied the authorization"
        );
        let redirect = redirect_with_query(
            &pending.redirect_uri,
            &[("error", "access_denied")],
            pending.state.as_deref(),
        )?;
        return Ok(redirect.into_response());
    }

    let code = params.code.as_deref().filter(|code| !code.is_empty()).ok_or_else(|| {
        AppError::Validation {
            message: "Callback is missing the authorization code".to_string(),
            field: Some("code".to_string()),
            received: None,
            docs_hint: None,
        }
    })?;

    let base = request_base_url(&state.config, &headers);
    let callback_uri = format!("{base}/callback");
    let upstream_token = state.github.exchange_code(code, &callback_uri).await?;
    let user = state.github.fetch_user(&upstream_token).await?;

    let context = SessionContext {
        name: user.name.unwrap_or_else(|| user.login.clone()),
        email: user.email.unwrap_or_default(),
        login: user.login,
        access_token: upstream_token,
    };

    let (local_code, code_hash) = generate_auth_code();
    state.codes.insert(
        code_hash,
        IssuedAuthCode {
            context: context.clone(),
            client_id: pending.client_id.clone(),
            redirect_uri: pending.redirect_uri.clone(),
            code_challenge: pending.code_challenge.clone(),
            expires_at: Utc::now() + Duration::minutes(AUTH_CODE_TTL_MINUTES),
        },
    );

    tracing::info!(
        event = "oauth_callback_success",
        client_id = %pending.client_id,
        login = %context.login,
        "upstream authorization completed, code issued"
    );

    let redirect = redirect_with_query(
        &pending.redirect_uri,
        &[("code", &local_code)],
        pending.state.as_deref(),
    )?;
    Ok(redirect.into_response())
}

fn redirect_with_query(
    redirect_uri: &str,
    pairs: &[(&str, &str)],
    state: Option<&str>,
) -> Result<Redirect, AppError> {
    let mut url = Url::parse(redirect_uri).map_err(|e| AppError::Validation {
        message: format!("Invalid redirect_uri: {e}"),
        field: Some("redirect_uri".to_string()),
        received: Some(Value::String(redirect_uri.to_string())),
        docs_hint: None,
    })?;
    for (key, value) in pairs {
        url.query_pairs_mut().append_pair(key, value);
    }
    if let Some(state) = state {
        url.query_pairs_mut().append_pair("state", state);
    }
    Ok(Redirect::to(url.as_str()))
}

// ──────────────────────────────────────────────
// POST /token
// ──────────────────────────────────────────────

#[derive(Debug)]
pub enum TokenRequest {
    AuthorizationCode {
        code: String,
        client_id: String,
        redirect_uri: String,
        code_verifier: Option<String>,
    },
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub scope: String,
}

#[derive(Debug)]
struct OauthRequestError {
    code: &'static str,
    description: String,
}

fn parse_token_request(headers: &HeaderMap, body: &[u8]) -> Result<TokenRequest, OauthRequestError> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    let params: HashMap<String, String> = if content_type.contains("application/json") {
        let value: Value = serde_json::from_slice(body).map_err(|_| OauthRequestError {
            code: "invalid_request",
            description: "Invalid JSON token request body.".to_string(),
        })?;
        let object = value.as_object().ok_or_else(|| OauthRequestError {
            code: "invalid_request",
            description: "Token request body must be a JSON object.".to_string(),
        })?;
        object
            .iter()
            .filter_map(|(key, value)| value.as_str().map(|s| (key.clone(), s.to_string())))
            .collect()
    } else {
        url::form_urlencoded::parse(body).into_owned().collect()
    };

    let grant_type = params
        .get("grant_type")
        .map(String::as_str)
        .unwrap_or_default();

    match grant_type {
        "authorization_code" => Ok(TokenRequest::AuthorizationCode {
            code: required_form_param(&params, "code")?,
            client_id: required_form_param(&params, "client_id")?,
            redirect_uri: required_form_param(&params, "redirect_uri")?,
            code_verifier: params
                .get("code_verifier")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
        }),
        other => Err(OauthRequestError {
            code: "unsupported_grant_type",
            description: format!(
                "Unsupported grant_type '{other}'. Only authorization_code is supported; \
                 expired sessions restart the flow at /authorize."
            ),
        }),
    }
}

fn required_form_param(
    params: &HashMap<String, String>,
    key: &str,
) -> Result<String, OauthRequestError> {
    let value = params.get(key).map(String::as_str).unwrap_or("").trim();
    if value.is_empty() {
        return Err(OauthRequestError {
            code: "invalid_request",
            description: format!("Missing required field '{key}'"),
        });
    }
    Ok(value.to_string())
}

fn verify_pkce_s256(verifier: &str, challenge: &str) -> bool {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest) == challenge
}

pub async fn token(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let request = match parse_token_request(&headers, &body) {
        Ok(request) => request,
        Err(err) => {
            return oauth_error_response(StatusCode::BAD_REQUEST, err.code, &err.description);
        }
    };

    let TokenRequest::AuthorizationCode {
        code,
        client_id,
        redirect_uri,
        code_verifier,
    } = request;

    let Some(issued) = state.codes.take(&code) else {
        return oauth_error_response(
            StatusCode::BAD_REQUEST,
            "invalid_grant",
            "Authorization code is invalid, expired or already used.",
        );
    };

    if issued.client_id != client_id || issued.redirect_uri != redirect_uri {
        return oauth_error_response(
            StatusCode::BAD_REQUEST,
            "invalid_grant",
            "Authorization code was issued to a different client or redirect URI.",
        );
    }

    if let Some(challenge) = &issued.code_challenge {
        let Some(verifier) = code_verifier else {
            return oauth_error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                "code_verifier is required for this authorization code.",
            );
        };
        if !verify_pkce_s256(&verifier, challenge) {
            return oauth_error_response(
                StatusCode::BAD_REQUEST,
                "invalid_grant",
                "PKCE verification failed.",
            );
        }
    }

    let login = issued.context.login.clone();
    let expires_in = state.config.token_ttl.num_seconds();
    let access_token = state.tokens.mint(issued.context, state.config.token_ttl);

    tracing::info!(
        event = "oauth_token_issued",
        client_id = %client_id,
        login = %login,
        "session token issued"
    );

    (
        StatusCode::OK,
        Json(TokenResponse {
            access_token,
            token_type: "bearer".to_string(),
            expires_in,
            scope: OAUTH_SCOPES.join(" "),
        }),
    )
        .into_response()
}

// ──────────────────────────────────────────────
// POST /register — dynamic client registration
// ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct DynamicClientRegistrationRequest {
    redirect_uris: Vec<String>,
    #[serde(default)]
    client_name: Option<String>,
    #[serde(default)]
    grant_types: Vec<String>,
    #[serde(default)]
    response_types: Vec<String>,
    #[serde(default)]
    token_endpoint_auth_method: Option<String>,
}

#[derive(Debug, Serialize)]
struct DynamicClientRegistrationResponse {
    client_id: String,
    client_id_issued_at: i64,
    redirect_uris: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_name: Option<String>,
    grant_types: Vec<String>,
    response_types: Vec<String>,
    code_challenge_methods_supported: Vec<String>,
    token_endpoint_auth_method: String,
}

pub async fn register(State(state): State<AppState>, body: Bytes) -> Response {
    let request: DynamicClientRegistrationRequest = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::warn!(
                event = "oauth_dcr_rejected",
                reason = "invalid_json_body",
                parse_error = %err,
                "dynamic client registration rejected"
            );
            return oauth_error_response(
                StatusCode::BAD_REQUEST,
                "invalid_client_metadata",
                "Request body must be valid JSON.",
            );
        }
    };

    match register_inner(&state, request) {
        Ok(registration) => {
            tracing::info!(
                event = "oauth_dcr_success",
                client_id = %registration.client_id,
                client_name = ?registration.client_name,
                redirect_uri_count = registration.redirect_uris.len(),
                "dynamic client registration succeeded"
            );
            (StatusCode::CREATED, Json(registration)).into_response()
        }
        Err(err) => app_error_to_oauth_response(err),
    }
}

fn register_inner(
    state: &AppState,
    request: DynamicClientRegistrationRequest,
) -> Result<DynamicClientRegistrationResponse, AppError> {
    if request.redirect_uris.is_empty() {
        return Err(AppError::Validation {
            message: "redirect_uris must not be empty".to_string(),
            field: Some("redirect_uris".to_string()),
            received: None,
            docs_hint: Some("Provide at least one HTTPS redirect URI.".to_string()),
        });
    }

    let mut normalized_redirects = Vec::with_capacity(request.redirect_uris.len());
    for redirect in request.redirect_uris {
        let parsed = Url::parse(redirect.trim()).map_err(|_| AppError::Validation {
            message: "redirect_uri is invalid".to_string(),
            field: Some("redirect_uris".to_string()),
            received: Some(Value::String(redirect.clone())),
            docs_hint: Some("Use a valid absolute URI.".to_string()),
        })?;

        let is_https = parsed.scheme() == "https";
        let is_loopback_http = parsed.scheme() == "http"
            && matches!(
                parsed.host_str(),
                Some("localhost") | Some("127.0.0.1") | Some("::1")
            );

        if !is_https && !is_loopback_http {
            return Err(AppError::Validation {
                message: "redirect_uri must use https or loopback http".to_string(),
                field: Some("redirect_uris".to_string()),
                received: Some(Value::String(redirect)),
                docs_hint: Some(
                    "Use HTTPS, or localhost/127.0.0.1 for native callbacks.".to_string(),
                ),
            });
        }

        normalized_redirects.push(parsed.to_string());
    }

    normalized_redirects.sort();
    normalized_redirects.dedup();

    let allow_loopback_redirect = normalized_redirects
        .iter()
        .any(|uri| uri.starts_with("http://"));

    let grant_types = if request.grant_types.is_empty() {
        vec!["authorization_code".to_string()]
    } else {
        request.grant_types
    };

    let response_types = if request.response_types.is_empty() {
        vec!["code".to_string()]
    } else {
        request.response_types
    };

    let token_endpoint_auth_method = request
        .token_endpoint_auth_method
        .unwrap_or_else(|| "none".to_string());
    if !DCR_TOKEN_AUTH_METHODS
        .iter()
        .any(|method| method == &token_endpoint_auth_method)
    {
        return Err(AppError::Validation {
            message: "token_endpoint_auth_method is not supported".to_string(),
            field: Some("token_endpoint_auth_method".to_string()),
            received: Some(Value::String(token_endpoint_auth_method)),
            docs_hint: Some("Supported methods: none, client_secret_post.".to_string()),
        });
    }

    let client_name = request
        .client_name
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    let client_id = format!("summon-mcp-{}", Uuid::now_v7().simple());
    state.clients.insert(RegisteredClient {
        client_id: client_id.clone(),
        redirect_uris: normalized_redirects.clone(),
        client_name: client_name.clone(),
        allow_loopback_redirect,
    });

    Ok(DynamicClientRegistrationResponse {
        client_id,
        client_id_issued_at: Utc::now().timestamp(),
        redirect_uris: normalized_redirects,
        client_name,
        grant_types,
        response_types,
        code_challenge_methods_supported: vec!["S256".to_string()],
        token_endpoint_auth_method,
    })
}

// ──────────────────────────────────────────────
// Discovery metadata
// ──────────────────────────────────────────────

pub async fn authorization_server_metadata(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Json<Value> {
    let base = request_base_url(&state.config, &headers);
    Json(json!({
        "issuer": base,
        "authorization_endpoint": format!("{base}/authorize"),
        "token_endpoint": format!("{base}/token"),
        "registration_endpoint": format!("{base}/register"),
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code"],
        "code_challenge_methods_supported": ["S256"],
        "token_endpoint_auth_methods_supported": DCR_TOKEN_AUTH_METHODS,
        "scopes_supported": OAUTH_SCOPES,
    }))
}

pub async fn oauth_protected_resource_metadata(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Json<Value> {
    let base = request_base_url(&state.config, &headers);
    Json(json!({
        "resource": format!("{base}/mcp"),
        "authorization_servers": [base],
        "scopes_supported": OAUTH_SCOPES,
    }))
}

// ──────────────────────────────────────────────
// OAuth-shaped error responses
// ──────────────────────────────────────────────

fn oauth_error_response(status: StatusCode, code: &str, description: &str) -> Response {
    (
        status,
        Json(json!({
            "error": code,
            "error_description": description,
        })),
    )
        .into_response()
}

fn app_error_to_oauth_response(err: AppError) -> Response {
    match err {
        AppError::Validation { message, docs_hint, .. } => oauth_error_response(
            StatusCode::BAD_REQUEST,
            "invalid_client_metadata",
            &with_docs_hint(message, docs_hint),
        ),
        AppError::Forbidden { message, docs_hint } => oauth_error_response(
            StatusCode::BAD_REQUEST,
            "access_denied",
            &with_docs_hint(message, docs_hint),
        ),
        _ => oauth_error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "server_error",
            "Internal server error.",
        ),
    }
}

fn with_docs_hint(message: String, docs_hint: Option<String>) -> String {
    if let Some(hint) = docs_hint {
        format!("{message} {hint}")
    } else {
        message
    }
}


#[cfg(test)]
mod http_tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use chrono::{Duration, Utc};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use summon_core::auth::generate_auth_code;
    use summon_core::session::SessionContext;
    use summon_mcp_runtime::audit::MemoryAuditSink;

    use crate::routes::test_support::{test_app, test_state};
    use crate::state::IssuedAuthCode;

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should be readable");
        serde_json::from_slice(&bytes).expect("body should be JSON")
    }

    #[tokio::test]
    async fn register_then_authorize_renders_the_consent_page() {
        let state = test_state(Arc::new(MemoryAuditSink::new()), true);
        let app = test_app(state);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/register")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        json!({
                            "redirect_uris": ["https://client.example.com/cb"],
                            "client_name": "Example MCP Client"
                        })
                        .to_string(),
                    ))
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::CREATED);
        let registration = body_json(response).await;
        let client_id = registration["client_id"]
            .as_str()
            .expect("client_id is a string")
            .to_string();
        assert!(client_id.starts_with("summon-mcp-"));
        assert_eq!(registration["token_endpoint_auth_method"], "none");

        let uri = format!(
            "/authorize?response_type=code&client_id={client_id}&redirect_uri=https%3A%2F%2Fclient.example.com%2Fcb&state=xyz"
        );
        let response = app
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should be readable");
        let html = String::from_utf8(bytes.to_vec()).expect("body should be UTF-8");
        assert!(html.contains("Continue with GitHub"));
        assert!(html.contains("Example MCP Client"));
    }

    #[tokio::test]
    async fn registration_rejects_plain_http_redirects() {
        let state = test_state(Arc::new(MemoryAuditSink::new()), true);
        let app = test_app(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/register")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        json!({ "redirect_uris": ["http://client.example.com/cb"] }).to_string(),
                    ))
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "invalid_client_metadata");
    }

    #[tokio::test]
    async fn authorize_with_an_unknown_client_is_rejected() {
        let state = test_state(Arc::new(MemoryAuditSink::new()), true);
        let app = test_app(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/authorize?response_type=code&client_id=missing&redirect_uri=https%3A%2F%2Fclient.example.com%2Fcb")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn token_exchanges_a_minted_code_for_a_validating_session_token() {
        let state = test_state(Arc::new(MemoryAuditSink::new()), true);
        let (code, code_hash) = generate_auth_code();
        state.codes.insert(
            code_hash,
            IssuedAuthCode {
                context: SessionContext::new("octocat", "The Octocat", "octo@example.com", "gho_x"),
                client_id: "client-1".to_string(),
                redirect_uri: "https://client.example.com/cb".to_string(),
                code_challenge: None,
                expires_at: Utc::now() + Duration::minutes(10),
            },
        );
        let app = test_app(state.clone());

        let body = format!(
            "grant_type=authorization_code&code={code}&client_id=client-1&redirect_uri=https%3A%2F%2Fclient.example.com%2Fcb"
        );
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/token")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from(body))
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::OK);
        let payload = body_json(response).await;
        assert_eq!(payload["token_type"], "bearer");

        let access_token = payload["access_token"]
            .as_str()
            .expect("access_token is a string");
        let context = state
            .tokens
            .validate(access_token)
            .expect("issued token must validate");
        assert_eq!(context.login, "octocat");
    }

    #[tokio::test]
    async fn token_rejects_unknown_codes_and_mismatched_clients() {
        let state = test_state(Arc::new(MemoryAuditSink::new()), true);
        let (code, code_hash) = generate_auth_code();
        state.codes.insert(
            code_hash,
            IssuedAuthCode {
                context: SessionContext::new("octocat", "", "", "gho_x"),
                client_id: "client-1".to_string(),
                redirect_uri: "https://client.example.com/cb".to_string(),
                code_challenge: None,
                expires_at: Utc::now() + Duration::minutes(10),
            },
        );
        let app = test_app(state);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/token")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from(
                        "grant_type=authorization_code&code=never-issued&client_id=client-1&redirect_uri=https%3A%2F%2Fclient.example.com%2Fcb",
                    ))
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "invalid_grant");

        let body = format!(
            "grant_type=authorization_code&code={code}&client_id=other-client&redirect_uri=https%3A%2F%2Fclient.example.com%2Fcb"
        );
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/token")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from(body))
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "invalid_grant");
    }

    #[tokio::test]
    async fn callback_with_an_unknown_state_creates_no_session() {
        let state = test_state(Arc::new(MemoryAuditSink::new()), true);
        let app = test_app(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/callback?code=abc&state=never-issued")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn discovery_metadata_points_at_the_fixed_endpoints() {
        let state = test_state(Arc::new(MemoryAuditSink::new()), true);
        let app = test_app(state);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/.well-known/oauth-authorization-server")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(
            body["authorization_endpoint"],
            "https://summon.example.com/authorize"
        );
        assert_eq!(body["token_endpoint"], "https://summon.example.com/token");
        assert_eq!(body["grant_types_supported"], json!(["authorization_code"]));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/.well-known/oauth-protected-resource/mcp")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");
        let body = body_json(response).await;
        assert_eq!(body["resource"], "https://summon.example.com/mcp");
    }
}
