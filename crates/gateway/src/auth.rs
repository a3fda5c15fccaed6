//! Admin token checks and short-lived login sessions.

use std::time::{Duration, Instant};

use {
    dashmap::DashMap,
    secrecy::{ExposeSecret, Secret},
};

use paird_config::AuthConfig;

/// Admin access settings resolved at startup.
#[derive(Clone)]
pub struct ResolvedAuth {
    token: Option<Secret<String>>,
    protect_reads: bool,
}

impl std::fmt::Debug for ResolvedAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedAuth")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("protect_reads", &self.protect_reads)
            .finish()
    }
}

impl ResolvedAuth {
    pub fn new(token: Option<String>, protect_reads: bool) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()).map(Secret::new),
            protect_reads,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(
            config
                .admin_token
                .as_ref()
                .map(|t| t.expose_secret().clone()),
            config.protect_reads,
        )
    }

    /// Without a configured token every request is let through.
    pub fn is_enabled(&self) -> bool {
        self.token.is_some()
    }

    pub fn protect_reads(&self) -> bool {
        self.protect_reads
    }

    pub fn verify(&self, candidate: &str) -> bool {
        self.token
            .as_ref()
            .is_some_and(|t| safe_equal(t.expose_secret(), candidate))
    }
}

/// Constant-time comparison for equal-length inputs.
pub fn safe_equal(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes()
        .iter()
        .zip(b.as_bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// 32 random bytes, URL-safe base64.
pub fn generate_token() -> String {
    use {base64::Engine, rand::RngCore};

    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Cookie sessions issued by `/api/auth/login`. In memory only; a restart
/// logs everyone out.
pub struct LoginSessions {
    tokens: DashMap<String, Instant>,
    ttl: Duration,
}

impl LoginSessions {
    pub fn new(ttl: Duration) -> Self {
        Self {
            tokens: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn create(&self) -> String {
        let token = generate_token();
        self.tokens.insert(token.clone(), Instant::now() + self.ttl);
        token
    }

    pub fn validate(&self, token: &str) -> bool {
        let now = Instant::now();
        match self.tokens.get(token).map(|e| *e.value()) {
            Some(expires_at) if expires_at > now => true,
            Some(_) => {
                self.tokens.remove(token);
                false
            },
            None => false,
        }
    }

    pub fn revoke(&self, token: &str) {
        self.tokens.remove(token);
    }

    /// Drop expired sessions. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.tokens.len();
        self.tokens.retain(|_, expires_at| *expires_at > now);
        before - self.tokens.len()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
