//! Semantic checks on a loaded configuration.

use secrecy::ExposeSecret;

use crate::schema::PairdConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "sessions.stop_timeout_secs"
    pub path: &'static str,
    pub message: String,
}

impl Diagnostic {
    fn error(path: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            path,
            message: message.into(),
        }
    }

    fn warning(path: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            path,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}: {}", self.severity, self.path, self.message)
    }
}

/// Check a config for values the gateway cannot run with, plus security
/// warnings. Errors should abort startup; warnings are logged.
pub fn validate(config: &PairdConfig) -> Vec<Diagnostic> {
    let mut out = Vec::new();

    match config.auth.admin_token.as_ref() {
        None => out.push(Diagnostic::warning(
            "auth.admin_token",
            "no admin token configured; session endpoints are unprotected",
        )),
        Some(token) if token.expose_secret().trim().is_empty() => out.push(Diagnostic::error(
            "auth.admin_token",
            "admin token is empty",
        )),
        Some(token) if token.expose_secret().len() < 12 => out.push(Diagnostic::warning(
            "auth.admin_token",
            "admin token is shorter than 12 characters",
        )),
        Some(_) => {},
    }

    if config.auth.login_ttl_secs == 0 {
        out.push(Diagnostic::error(
            "auth.login_ttl_secs",
            "login cookie lifetime must be positive",
        ));
    }
    if config.sessions.dir.as_os_str().is_empty() {
        out.push(Diagnostic::error("sessions.dir", "sessions directory is empty"));
    }
    if config.sessions.stop_timeout_secs == 0 {
        out.push(Diagnostic::error(
            "sessions.stop_timeout_secs",
            "stop timeout must be positive",
        ));
    }
    if config.sessions.event_buffer == 0 {
        out.push(Diagnostic::error(
            "sessions.event_buffer",
            "event buffer must hold at least one event",
        ));
    }
    if config.sessions.pairing_timeout_secs > 0 && config.sessions.reap_interval_secs == 0 {
        out.push(Diagnostic::error(
            "sessions.reap_interval_secs",
            "reap interval must be positive when a pairing timeout is set",
        ));
    }
    if !config.sidecar.url.starts_with("ws://") && !config.sidecar.url.starts_with("wss://") {
        out.push(Diagnostic::error(
            "sidecar.url",
            format!("expected a ws:// or wss:// URL, got {:?}", config.sidecar.url),
        ));
    }
    if config.sidecar.request_timeout_secs == 0 {
        out.push(Diagnostic::error(
            "sidecar.request_timeout_secs",
            "request timeout must be positive",
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use {super::*, secrecy::Secret};

    fn errors(config: &PairdConfig) -> Vec<&'static str> {
        validate(config)
            .into_iter()
            .filter(|d| d.severity == Severity::Error)
            .map(|d| d.path)
            .collect()
    }

    #[test]
    fn default_config_only_warns_about_token() {
        let diags = validate(&PairdConfig::default());
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, Severity::Warning);
        assert_eq!(diags[0].path, "auth.admin_token");
    }

    #[test]
    fn empty_token_is_an_error() {
        let mut cfg = PairdConfig::default();
        cfg.auth.admin_token = Some(Secret::new("  ".into()));
        assert_eq!(errors(&cfg), vec!["auth.admin_token"]);
    }

    #[test]
    fn strong_token_is_clean() {
        let mut cfg = PairdConfig::default();
        cfg.auth.admin_token = Some(Secret::new("a-long-enough-token".into()));
        assert!(validate(&cfg).is_empty());
    }

    #[test]
    fn zero_timeouts_are_errors() {
        let mut cfg = PairdConfig::default();
        cfg.sessions.stop_timeout_secs = 0;
        cfg.sessions.reap_interval_secs = 0;
        cfg.sidecar.request_timeout_secs = 0;
        let errs = errors(&cfg);
        assert!(errs.contains(&"sessions.stop_timeout_secs"));
        assert!(errs.contains(&"sessions.reap_interval_secs"));
        assert!(errs.contains(&"sidecar.request_timeout_secs"));
    }

    #[test]
    fn rejects_http_sidecar_url() {
        let mut cfg = PairdConfig::default();
        cfg.sidecar.url = "http://localhost:1".into();
        assert_eq!(errors(&cfg), vec!["sidecar.url"]);
    }
}
