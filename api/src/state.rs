use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use summon_core::auth::{TokenStore, hash_token};
use summon_core::session::SessionContext;
use summon_mcp_runtime::audit::AuditSink;

use crate::github::GitHubClient;
use crate::sessions::SessionManager;

/// A dynamically registered OAuth client. The registry keeps what later
/// authorization requests are validated against; the full registration
/// document is echoed back to the client once, at registration time.
#[derive(Clone, Debug)]
pub struct RegisteredClient {
    pub client_id: String,
    pub redirect_uris: Vec<String>,
    pub client_name: Option<String>,
    pub allow_loopback_redirect: bool,
}

#[derive(Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<String, RegisteredClient>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, client: RegisteredClient) {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        clients.insert(client.client_id.clone(), client);
    }

    pub fn get(&self, client_id: &str) -> Option<RegisteredClient> {
        let clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        clients.get(client_id).cloned()
    }
}

/// A client authorization request parked while the caller round-trips
/// through the upstream identity provider. Keyed by the upstream `state`
/// nonce; expired entries die when taken.
#[derive(Clone, Debug)]
pub struct PendingAuthorization {
    pub client_id: String,
    pub redirect_uri: String,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct PendingAuthorizations {
    entries: Mutex<HashMap<String, PendingAuthorization>>,
}

impl PendingAuthorizations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, nonce: String, pending: PendingAuthorization) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(nonce, pending);
    }

    /// Single use: removes the entry. Returns `None` for unknown or expired nonces.
    pub fn take(&self, nonce: &str) -> Option<PendingAuthorization> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let pending = entries.remove(nonce)?;
        if Utc::now() > pending.expires_at {
            return None;
        }
        Some(pending)
    }
}

/// A local authorization code minted after a successful upstream callback,
/// holding the session context until the client redeems it at `/token`.
#[derive(Clone, Debug)]
pub struct IssuedAuthCode {
    pub context: SessionContext,
    pub client_id: String,
    pub redirect_uri: String,
    pub code_challenge: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct AuthCodes {
    entries: Mutex<HashMap<String, IssuedAuthCode>>,
}

impl AuthCodes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, code_hash: String, issued: IssuedAuthCode) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(code_hash, issued);
    }

    /// Redeem a code. Single use: the entry is removed even when expired.
    pub fn take(&self, code: &str) -> Option<IssuedAuthCode> {
        let hash = hash_token(code);
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let issued = entries.remove(&hash)?;
        if Utc::now() > issued.expires_at {
            return None;
        }
        Some(issued)
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Overrides header-derived base URLs in redirects and metadata.
    pub public_base_url: Option<String>,
    pub token_ttl: Duration,
    /// `false` only for the anonymous deployment (`SUMMON_NO_AUTH`).
    pub require_auth: bool,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let no_auth = std::env::var("SUMMON_NO_AUTH")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        let token_ttl_secs = std::env::var("SUMMON_TOKEN_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(3600);
        let public_base_url = std::env::var("SUMMON_PUBLIC_BASE_URL")
            .ok()
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty());

        Self {
            public_base_url,
            token_ttl: Duration::seconds(token_ttl_secs),
            require_auth: !no_auth,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub tokens: Arc<TokenStore>,
    pub clients: Arc<ClientRegistry>,
    pub pending: Arc<PendingAuthorizations>,
    pub codes: Arc<AuthCodes>,
    pub github: GitHubClient,
    pub sessions: Arc<SessionManager>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(github: GitHubClient, config: ServerConfig, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            tokens: Arc::new(TokenStore::new()),
            clients: Arc::new(ClientRegistry::new()),
            pending: Arc::new(PendingAuthorizations::new()),
            codes: Arc::new(AuthCodes::new()),
            github,
            sessions: Arc::new(SessionManager::new(audit)),
            config: Arc::new(config),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use summon_core::auth::generate_auth_code;
    use summon_core::session::SessionContext;

    use super::{AuthCodes, IssuedAuthCode, PendingAuthorization, PendingAuthorizations};

    fn issued(expires_in: Duration) -> IssuedAuthCode {
        IssuedAuthCode {
            context: SessionContext::new("octocat", "The Octocat", "octo@example.com", "gho_x"),
            client_id: "client-1".to_string(),
            redirect_uri: "https://client.example.com/cb".to_string(),
            code_challenge: None,
            expires_at: Utc::now() + expires_in,
        }
    }

    #[test]
    fn auth_codes_are_single_use() {
        let codes = AuthCodes::new();
        let (code, hash) = generate_auth_code();
        codes.insert(hash, issued(Duration::minutes(10)));

        assert!(codes.take(&code).is_some());
        assert!(codes.take(&code).is_none());
    }

    #[test]
    fn expired_auth_codes_cannot_be_redeemed() {
        let codes = AuthCodes::new();
        let (code, hash) = generate_auth_code();
        codes.insert(hash, issued(Duration::seconds(-1)));
        assert!(codes.take(&code).is_none());
    }

    #[test]
    fn pending_authorizations_expire_and_are_single_use() {
        let pending = PendingAuthorizations::new();
        pending.insert(
            "nonce-1".to_string(),
            PendingAuthorization {
                client_id: "client-1".to_string(),
                redirect_uri: "https://client.example.com/cb".to_string(),
                state: None,
                code_challenge: None,
                expires_at: Utc::now() + Duration::minutes(10),
            },
        );

        assert!(pending.take("nonce-1").is_some());
        assert!(pending.take("nonce-1").is_none());
        assert!(pending.take("never-inserted").is_none());
    }
}
