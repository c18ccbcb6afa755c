use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::session::SessionContext;

/// Generate a session token. Returns `(full_token, sha256_hash)`.
/// Format: `summon_at_` + 32 random bytes hex-encoded.
pub fn generate_session_token() -> (String, String) {
    let raw = random_hex(32);
    let full_token = format!("summon_at_{raw}");
    let hash = hash_token(&full_token);
    (full_token, hash)
}

/// Generate an authorization code. Returns `(code, sha256_hash)`.
/// 32 random bytes hex-encoded (no prefix).
pub fn generate_auth_code() -> (String, String) {
    let code = random_hex(32);
    let hash = hash_token(&code);
    (code, hash)
}

/// SHA-256 hex digest of a token string.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// `len_bytes` random bytes, hex-encoded.
pub fn random_hex(len_bytes: usize) -> String {
    let mut bytes = vec![0_u8; len_bytes];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Clone, Debug)]
struct IssuedToken {
    context: SessionContext,
    expires_at: DateTime<Utc>,
}

/// The mapping from issued session tokens to their session contexts.
///
/// This is the only process-wide mutable state in the system. The
/// authorization front-door is the sole writer (at mint time); everything
/// else only reads through [`TokenStore::validate`]. Tokens are stored by
/// SHA-256 hash, so the store itself never holds a presentable credential.
/// Expired entries are dropped when touched; there are no background timers.
pub struct TokenStore {
    entries: Mutex<HashMap<String, IssuedToken>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Mint a fresh token bound to `context`, valid for `ttl`.
    /// Returns the full token for the caller; only its hash is retained.
    pub fn mint(&self, context: SessionContext, ttl: Duration) -> String {
        let (token, hash) = generate_session_token();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            hash,
            IssuedToken {
                context,
                expires_at: Utc::now() + ttl,
            },
        );
        token
    }

    /// Validate a presented token. Returns the bound context, or `None` for
    /// anything unknown, tampered or expired. An expired entry is removed.
    pub fn validate(&self, token: &str) -> Option<SessionContext> {
        let hash = hash_token(token);
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let issued = entries.get(&hash)?;
        if Utc::now() > issued.expires_at {
            entries.remove(&hash);
            return None;
        }
        Some(issued.context.clone())
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}
