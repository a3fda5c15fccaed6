//! In-memory cache of the current pairing artifact per session.

use dashmap::DashMap;

use crate::types::{PairingArtifact, PairingCode, SessionId};

/// Holds at most one artifact per session. New writes overwrite.
#[derive(Debug, Default)]
pub struct ArtifactCache {
    entries: DashMap<SessionId, PairingArtifact>,
}

impl ArtifactCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_qr(&self, id: &SessionId, payload: impl Into<String>, now_ms: u64) {
        self.set(id, PairingArtifact::Qr {
            payload: payload.into(),
            issued_at_ms: now_ms,
        });
    }

    pub fn set_pairing_code(
        &self,
        id: &SessionId,
        code: impl Into<String>,
        expires_in_seconds: u64,
        now_ms: u64,
    ) {
        self.set(
            id,
            PairingArtifact::Code(PairingCode {
                code: code.into(),
                issued_at_ms: now_ms,
                expires_in_seconds,
            }),
        );
    }

    pub fn set(&self, id: &SessionId, artifact: PairingArtifact) {
        self.entries.insert(id.clone(), artifact);
    }

    /// Raw read: returns the stored value even if the code has expired.
    pub fn get(&self, id: &SessionId) -> Option<PairingArtifact> {
        self.entries.get(id).map(|a| a.value().clone())
    }

    /// State-aware read: expired pairing codes are treated as absent.
    pub fn current(&self, id: &SessionId, now_ms: u64) -> Option<PairingArtifact> {
        self.get(id).filter(|a| !a.is_expired_at(now_ms))
    }

    pub fn clear(&self, id: &SessionId) -> Option<PairingArtifact> {
        self.entries.remove(id).map(|(_, a)| a)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    fn sid(s: &str) -> SessionId {
        SessionId::parse(s).unwrap()
    }

    #[test]
    fn qr_overwrites_previous_qr() {
        let cache = ArtifactCache::new();
        cache.set_qr(&sid("alice"), "1@first", 0);
        cache.set_qr(&sid("alice"), "1@second", 10);
        assert_eq!(
            cache.get(&sid("alice")).unwrap().qr_payload(),
            Some("1@second")
        );
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn code_replaces_qr() {
        let cache = ArtifactCache::new();
        cache.set_qr(&sid("bob"), "1@abc", 0);
        cache.set_pairing_code(&sid("bob"), "123456", 120, 5);
        let artifact = cache.get(&sid("bob")).unwrap();
        assert!(artifact.qr_payload().is_none());
        assert_eq!(artifact.pairing_code().unwrap().code, "123456");
    }

    #[test]
    fn expired_code_is_absent_but_raw_value_remains() {
        let cache = ArtifactCache::new();
        cache.set_pairing_code(&sid("bob"), "123456", 120, 1_000);
        assert!(cache.current(&sid("bob"), 1_000 + 119_000).is_some());
        assert!(cache.current(&sid("bob"), 1_000 + 121_000).is_none());
        assert!(cache.get(&sid("bob")).is_some());
    }

    #[test]
    fn sessions_are_independent() {
        let cache = ArtifactCache::new();
        cache.set_qr(&sid("a"), "1@a", 0);
        cache.set_qr(&sid("b"), "1@b", 0);
        cache.clear(&sid("a"));
        assert!(cache.get(&sid("a")).is_none());
        assert_eq!(cache.get(&sid("b")).unwrap().qr_payload(), Some("1@b"));
    }
}
