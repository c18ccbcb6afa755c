use serde::{Deserialize, Serialize};

/// Identity attributes bound to one authenticated session.
///
/// Built once by the authorization front-door from the upstream provider's
/// profile response, then carried unchanged for the session's lifetime. The
/// upstream `access_token` is opaque and must never appear in logs or tool
/// output; only `login` surfaces (in audit records).
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionContext {
    pub login: String,
    pub name: String,
    pub email: String,
    pub access_token: String,
}

impl SessionContext {
    pub fn new(
        login: impl Into<String>,
        name: impl Into<String>,
        email: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            login: login.into(),
            name: name.into(),
            email: email.into(),
            access_token: access_token.into(),
        }
    }
}

// Manual Debug: the upstream access token stays out of debug output.
impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("login", &self.login)
            .field("name", &self.name)
            .field("email", &self.email)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::SessionContext;

    #[test]
    fn debug_output_redacts_upstream_access_token() {
        let context = SessionContext::new("octocat", "The Octocat", "octo@example.com", "gho_secret");
        let rendered = format!("{context:?}");
        assert!(!rendered.contains("gho_secret"));
        assert!(rendered.contains("octocat"));
    }
}
