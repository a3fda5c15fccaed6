/// Config schema types (server, auth, sessions, sidecar).
use std::path::PathBuf;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PairdConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub sessions: SessionsConfig,
    pub sidecar: SidecarConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to. Defaults to "0.0.0.0" since the service is
    /// usually deployed behind a platform router.
    pub bind: String,
    /// Port to listen on. Defaults to 3000.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 3000,
        }
    }
}

/// Admin capability token settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Token gating every session-mutating endpoint. When unset, the gate is open.
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub admin_token: Option<Secret<String>>,
    /// Also require the token for the read-only status and QR endpoints.
    pub protect_reads: bool,
    /// Lifetime of the cookie issued by the login endpoint, in seconds.
    pub login_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_token: None,
            protect_reads: false,
            login_ttl_secs: 3600,
        }
    }
}

impl AuthConfig {
    /// Whether an admin token is configured (and non-empty).
    #[must_use]
    pub fn has_admin_token(&self) -> bool {
        self.admin_token
            .as_ref()
            .is_some_and(|t| !t.expose_secret().is_empty())
    }
}

/// Session lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Directory holding one sub-directory per session.
    pub dir: PathBuf,
    /// Sessions still pairing after this many seconds are evicted. 0 disables.
    pub pairing_timeout_secs: u64,
    /// How long an explicit stop waits for the connection to close.
    pub stop_timeout_secs: u64,
    /// Interval of the stale-session reaper.
    pub reap_interval_secs: u64,
    /// Per-session event channel capacity.
    pub event_buffer: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("sessions"),
            pairing_timeout_secs: 300,
            stop_timeout_secs: 5,
            reap_interval_secs: 30,
            event_buffer: 64,
        }
    }
}

/// Baileys sidecar connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    /// WebSocket URL of the sidecar.
    pub url: String,
    /// Spawn and supervise the sidecar process.
    pub auto_start: bool,
    /// Directory containing the sidecar `package.json`.
    pub dir: Option<PathBuf>,
    /// Connection attempts before giving up.
    pub connect_retries: u32,
    /// Timeout for request/response exchanges such as pairing codes.
    pub request_timeout_secs: u64,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:18791".into(),
            auto_start: true,
            dir: None,
            connect_retries: 10,
            request_timeout_secs: 30,
        }
    }
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn defaults_match_original_deployment() {
        let cfg = PairdConfig::default();
        assert_eq!(cfg.server.port, 3000);
        assert_eq!(cfg.sessions.dir, PathBuf::from("sessions"));
        assert_eq!(cfg.sessions.pairing_timeout_secs, 300);
        assert!(!cfg.auth.protect_reads);
        assert!(!cfg.auth.has_admin_token());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: PairdConfig = toml::from_str(
            r#"
            [auth]
            admin_token = "s3cret"

            [sessions]
            dir = "/var/lib/paird"
            "#,
        )
        .unwrap();
        assert!(cfg.auth.has_admin_token());
        assert_eq!(cfg.auth.login_ttl_secs, 3600);
        assert_eq!(cfg.sessions.dir, PathBuf::from("/var/lib/paird"));
        assert_eq!(cfg.sessions.stop_timeout_secs, 5);
        assert_eq!(cfg.server.port, 3000);
    }

    #[test]
    fn empty_token_is_not_a_token() {
        let cfg: PairdConfig = toml::from_str("[auth]\nadmin_token = \"\"\n").unwrap();
        assert!(!cfg.auth.has_admin_token());
    }
}
