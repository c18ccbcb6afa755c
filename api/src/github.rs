use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Deserialize;
use url::Url;

use crate::error::AppError;

const DEFAULT_AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
const DEFAULT_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const DEFAULT_USER_URL: &str = "https://api.github.com/user";
const GITHUB_SCOPES: &str = "read:user user:email";

/// Minimal profile attributes fetched after the code exchange.
#[derive(Debug, Deserialize)]
pub struct GitHubUser {
    pub login: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpstreamTokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Client for the upstream identity provider. Endpoints are overridable via
/// env for local testing against a stub provider.
#[derive(Clone)]
pub struct GitHubClient {
    client_id: String,
    client_secret: String,
    authorize_endpoint: String,
    token_endpoint: String,
    user_endpoint: String,
    http: reqwest::Client,
}

impl GitHubClient {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        let endpoint = |var: &str, default: &str| {
            std::env::var(var)
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            authorize_endpoint: endpoint("SUMMON_GITHUB_AUTHORIZE_URL", DEFAULT_AUTHORIZE_URL),
            token_endpoint: endpoint("SUMMON_GITHUB_TOKEN_URL", DEFAULT_TOKEN_URL),
            user_endpoint: endpoint("SUMMON_GITHUB_USER_URL", DEFAULT_USER_URL),
            http: reqwest::Client::new(),
        }
    }

    /// Where to send the caller's user agent to authorize. `state` is the
    /// server-side nonce binding the upstream leg to the pending client
    /// request; `redirect_uri` is this server's `/callback`.
    pub fn authorize_redirect_url(
        &self,
        state: &str,
        redirect_uri: &str,
    ) -> Result<String, AppError> {
        let mut url = Url::parse(&self.authorize_endpoint).map_err(|e| {
            AppError::Internal(format!("Invalid identity-provider authorize URL: {e}"))
        })?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", GITHUB_SCOPES)
            .append_pair("state", state);
        Ok(url.into())
    }

    /// Exchange the provider's authorization code for an upstream access
    /// token. One round trip; failures surface immediately, never retried.
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<String, AppError> {
        let response = self
            .http
            .post(&self.token_endpoint)
            .header(ACCEPT, "application/json")
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ])
            .send()
            .await
            .map_err(|e| AppError::Upstream {
                message: format!("Identity-provider token exchange failed: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(AppError::Upstream {
                message: format!(
                    "Identity-provider token exchange returned {}",
                    response.status()
                ),
            });
        }

        let payload: UpstreamTokenResponse =
            response.json().await.map_err(|e| AppError::Upstream {
                message: format!("Identity-provider token response was malformed: {e}"),
            })?;

        if let Some(error) = payload.error {
            let description = payload.error_description.unwrap_or_default();
            return Err(AppError::Upstream {
                message: format!("Identity provider rejected the exchange: {error} {description}"),
            });
        }

        payload
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AppError::Upstream {
                message: "Identity provider returned no access token".to_string(),
            })
    }

    /// Fetch the minimal profile for the authenticated upstream user.
    pub async fn fetch_user(&self, access_token: &str) -> Result<GitHubUser, AppError> {
        let response = self
            .http
            .get(&self.user_endpoint)
            .bearer_auth(access_token)
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, "summon-api")
            .send()
            .await
            .map_err(|e| AppError::Upstream {
                message: format!("Identity-provider profile fetch failed: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(AppError::Upstream {
                message: format!(
                    "Identity-provider profile fetch returned {}",
                    response.status()
                ),
            });
        }

        response.json().await.map_err(|e| AppError::Upstream {
            message: format!("Identity-provider profile response was malformed: {e}"),
        })
    }
}
