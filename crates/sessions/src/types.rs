//! Session identifiers, lifecycle states, credential records and pairing artifacts.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const MAX_SESSION_ID_LEN: usize = 64;

/// Caller-supplied session key. Doubles as a directory name, so the
/// character set is restricted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::validation("session id", "must not be empty"));
        }
        if raw.len() > MAX_SESSION_ID_LEN {
            return Err(Error::validation(
                "session id",
                format!("must be at most {MAX_SESSION_ID_LEN} characters"),
            ));
        }
        if raw.starts_with('.') {
            return Err(Error::validation("session id", "must not start with '.'"));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
        {
            return Err(Error::validation(
                "session id",
                format!("unsupported character {bad:?}"),
            ));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Phone number in international format, digits only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Accepts `+1 (555) 123-4567` style input and keeps the digits.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut digits = String::with_capacity(raw.len());
        for c in raw.trim().chars() {
            match c {
                '0'..='9' => digits.push(c),
                '+' | ' ' | '-' | '(' | ')' => {},
                other => {
                    return Err(Error::validation(
                        "phone number",
                        format!("unexpected character {other:?}"),
                    ));
                },
            }
        }
        if !(7..=15).contains(&digits.len()) {
            return Err(Error::validation(
                "phone number",
                "expected 7 to 15 digits including the country code",
            ));
        }
        Ok(Self(digits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Unstarted,
    Connecting,
    AwaitingPairing,
    Authenticated,
    Closed,
}

impl LifecycleState {
    /// States in which a connection handle exists.
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::AwaitingPairing | Self::Authenticated
        )
    }

    /// Still waiting for the user to link the device.
    #[must_use]
    pub fn is_pairing(self) -> bool {
        matches!(self, Self::Connecting | Self::AwaitingPairing)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unstarted => "unstarted",
            Self::Connecting => "connecting",
            Self::AwaitingPairing => "awaiting_pairing",
            Self::Authenticated => "authenticated",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Serialized authentication material owned by the protocol library.
///
/// The format is opaque here; only `registered` and `me.id` are read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialRecord(serde_json::Value);

impl Default for CredentialRecord {
    fn default() -> Self {
        Self::empty()
    }
}

impl CredentialRecord {
    #[must_use]
    pub fn empty() -> Self {
        Self(serde_json::Value::Object(serde_json::Map::new()))
    }

    #[must_use]
    pub fn from_value(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }

    /// Whether a previous pairing completed with this material.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.0
            .get("registered")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    /// Account JID the material belongs to, once known.
    pub fn account(&self) -> Option<&str> {
        self.0.get("me")?.get("id")?.as_str()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            serde_json::Value::Object(map) => map.is_empty(),
            serde_json::Value::Null => true,
            _ => false,
        }
    }
}

/// A numeric pairing code with its advisory expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingCode {
    pub code: String,
    pub issued_at_ms: u64,
    pub expires_in_seconds: u64,
}

impl PairingCode {
    #[must_use]
    pub fn expires_at_ms(&self) -> u64 {
        self.issued_at_ms
            .saturating_add(self.expires_in_seconds.saturating_mul(1000))
    }

    #[must_use]
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms()
    }
}

/// The current challenge a user must complete to link a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PairingArtifact {
    Qr { payload: String, issued_at_ms: u64 },
    Code(PairingCode),
}

impl PairingArtifact {
    /// Expired pairing codes are absent to a state-aware reader. QR payloads
    /// are superseded, never expired, on this side.
    #[must_use]
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        match self {
            Self::Qr { .. } => false,
            Self::Code(code) => code.is_expired_at(now_ms),
        }
    }

    pub fn qr_payload(&self) -> Option<&str> {
        match self {
            Self::Qr { payload, .. } => Some(payload),
            Self::Code(_) => None,
        }
    }

    pub fn pairing_code(&self) -> Option<&PairingCode> {
        match self {
            Self::Qr { .. } => None,
            Self::Code(code) => Some(code),
        }
    }
}

/// Why a connection closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CloseReason {
    /// Network drop or protocol error reported by the library.
    ConnectionLost(String),
    /// The device was unlinked from the phone, or a logout was requested.
    LoggedOut,
    /// Local stop request or forced eviction.
    Stopped,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(detail) => write!(f, "connection lost: {detail}"),
            Self::LoggedOut => f.write_str("logged out"),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}

/// Source of wall-clock time in unix milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    #[must_use]
    pub fn new(start_ms: u64) -> Self {
        Self(AtomicU64::new(start_ms))
    }

    pub fn advance_secs(&self, secs: u64) {
        self.0.fetch_add(secs * 1000, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}
