//! Connection lifecycle manager.
//!
//! Creates or reuses one connection per session, drives each session's
//! event channel through the state machine in [`crate::machine`], and keeps
//! the registry, artifact cache and credential store in step with it.

use std::{
    collections::{BTreeMap, BTreeSet},
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    base64::Engine,
    futures::FutureExt,
    serde::Serialize,
    tokio::sync::mpsc,
    tracing::{debug, error, info, warn},
};

use crate::{
    artifacts::ArtifactCache,
    connection::{ConnectionEvent, Connector},
    error::{Error, Result},
    machine::{self, Effect, SessionEvent},
    registry::{SessionEntry, SessionRegistry},
    store::CredentialStore,
    types::{
        Clock, CloseReason, LifecycleState, PairingArtifact, PairingCode, PhoneNumber, SessionId,
        SystemClock,
    },
};

/// Tunables for the lifecycle manager.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// How long stop/logout wait for the connection to close.
    pub stop_timeout: Duration,
    /// Sessions still pairing after this long are evicted by [`LifecycleManager::evict_stale`].
    pub pairing_timeout: Option<Duration>,
    /// Capacity of each session's event channel.
    pub event_buffer: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(5),
            pairing_timeout: Some(Duration::from_secs(300)),
            event_buffer: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StartOutcome {
    Started,
    Reused,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub id: SessionId,
    pub state: LifecycleState,
    pub in_memory: bool,
    pub has_credentials: bool,
    pub registered: bool,
    pub account: Option<String>,
    pub created_at_ms: Option<u64>,
}

/// Owns the session state machines. Cheap to clone.
#[derive(Clone)]
pub struct LifecycleManager {
    inner: Arc<Inner>,
}

struct Inner {
    registry: SessionRegistry,
    artifacts: ArtifactCache,
    store: Arc<dyn CredentialStore>,
    connector: Arc<dyn Connector>,
    clock: Arc<dyn Clock>,
    config: LifecycleConfig,
    next_generation: AtomicU64,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        connector: Arc<dyn Connector>,
        config: LifecycleConfig,
    ) -> Self {
        Self::with_clock(store, connector, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn CredentialStore>,
        connector: Arc<dyn Connector>,
        config: LifecycleConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: SessionRegistry::new(),
                artifacts: ArtifactCache::new(),
                store,
                connector,
                clock,
                config,
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    pub fn artifacts(&self) -> &ArtifactCache {
        &self.inner.artifacts
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.store
    }

    /// Create the session's connection, or report that one is already live.
    pub async fn start(&self, id: &SessionId) -> Result<StartOutcome> {
        let _creation = self.inner.registry.lock(id).await;
        if let Some(entry) = self.inner.registry.get(id) {
            debug!(session = %id, state = %entry.state(), "reusing live session");
            return Ok(StartOutcome::Reused);
        }
        self.inner.open(id).await?;
        Ok(StartOutcome::Started)
    }

    /// Ask for a numeric pairing code for `phone`, starting the session if needed.
    pub async fn request_pairing_code(
        &self,
        id: &SessionId,
        phone: &PhoneNumber,
    ) -> Result<PairingCode> {
        self.start(id).await?;
        let entry = self
            .inner
            .registry
            .get(id)
            .ok_or_else(|| Error::not_found(id))?;

        let snapshot = entry.snapshot();
        if snapshot.state == LifecycleState::Authenticated || snapshot.registered {
            return Err(Error::already_authenticated(id));
        }

        let grant = entry
            .handle()
            .request_pairing_code(phone)
            .await
            .map_err(|e| Error::connection(id, "request pairing code", e))?;
        let code = PairingCode {
            code: grant.code,
            issued_at_ms: self.inner.clock.now_ms(),
            expires_in_seconds: grant.expires_in_seconds,
        };

        match self
            .inner
            .apply(&entry, SessionEvent::PairingCode(code.clone()))
            .await
        {
            Some(_) => {
                info!(session = %id, expires_in = code.expires_in_seconds, "pairing code issued");
                Ok(code)
            },
            // Linked or closed while the request was in flight.
            None if entry.state() == LifecycleState::Authenticated => {
                Err(Error::already_authenticated(id))
            },
            None => Err(Error::not_found(id)),
        }
    }

    /// Disconnect: close the connection, keep the credentials.
    ///
    /// The session is `Closed` when this returns, whether or not the
    /// library ever reports the close.
    pub async fn stop(&self, id: &SessionId) -> Result<()> {
        let _creation = self.inner.registry.lock(id).await;
        let entry = self
            .inner
            .registry
            .get(id)
            .ok_or_else(|| Error::not_found(id))?;
        self.inner
            .teardown(&entry, CloseReason::Stopped, false)
            .await;
        info!(session = %id, "session stopped");
        Ok(())
    }

    /// Log out: unlink the device if live, then delete stored credentials.
    pub async fn logout(&self, id: &SessionId) -> Result<()> {
        let _creation = self.inner.registry.lock(id).await;
        let live = self.inner.registry.get(id);
        if let Some(entry) = &live {
            self.inner
                .teardown(entry, CloseReason::LoggedOut, true)
                .await;
        }
        self.inner.artifacts.clear(id);
        self.inner.registry.forget_closed(id);

        let deleted = self.inner.store.delete(id).await?;
        if live.is_none() && !deleted {
            return Err(Error::not_found(id));
        }
        info!(session = %id, "session logged out, credentials deleted");
        Ok(())
    }

    pub async fn status(&self, id: &SessionId) -> Result<SessionStatus> {
        let has_credentials = self.inner.store.exists(id).await?;

        if let Some(entry) = self.inner.registry.get(id) {
            let snapshot = entry.snapshot();
            return Ok(SessionStatus {
                id: id.clone(),
                state: snapshot.state,
                in_memory: true,
                has_credentials,
                registered: snapshot.registered,
                account: snapshot.account,
                created_at_ms: Some(entry.created_at_ms()),
            });
        }

        let (registered, account) = if has_credentials {
            match self.inner.store.load(id).await {
                Ok(record) => (
                    record.is_registered(),
                    record.account().map(str::to_string),
                ),
                Err(e) => {
                    warn!(session = %id, error = %e, "stored credentials unreadable");
                    (false, None)
                },
            }
        } else {
            (false, None)
        };

        let state = if self.inner.registry.closed_at(id).is_some() {
            LifecycleState::Closed
        } else {
            LifecycleState::Unstarted
        };

        Ok(SessionStatus {
            id: id.clone(),
            state,
            in_memory: false,
            has_credentials,
            registered,
            account,
            created_at_ms: None,
        })
    }

    /// Current lifecycle state, `Unstarted` for unknown identifiers.
    pub fn state(&self, id: &SessionId) -> LifecycleState {
        match self.inner.registry.get(id) {
            Some(entry) => entry.state(),
            None if self.inner.registry.closed_at(id).is_some() => LifecycleState::Closed,
            None => LifecycleState::Unstarted,
        }
    }

    /// The artifact a user should act on, if any. Never returns one for an
    /// authenticated session or an expired code.
    pub fn pairing_artifact(&self, id: &SessionId) -> Option<PairingArtifact> {
        if let Some(entry) = self.inner.registry.get(id)
            && entry.state() == LifecycleState::Authenticated
        {
            return None;
        }
        self.inner.artifacts.current(id, self.inner.clock.now_ms())
    }

    /// Wait up to `wait` for a live session to leave `Connecting`, then read
    /// its artifact.
    pub async fn wait_for_artifact(&self, id: &SessionId, wait: Duration) -> Option<PairingArtifact> {
        if let Some(entry) = self.inner.registry.get(id) {
            let mut rx = entry.subscribe();
            drop(entry);
            let _ = tokio::time::timeout(
                wait,
                rx.wait_for(|s| s.state != LifecycleState::Connecting),
            )
            .await;
        }
        self.pairing_artifact(id)
    }

    /// Every live session plus every session stored on disk, by id.
    pub async fn list(&self) -> Result<Vec<SessionStatus>> {
        let mut ids: BTreeSet<SessionId> = self.inner.store.list().await?.into_iter().collect();
        ids.extend(
            self.inner
                .registry
                .entries()
                .iter()
                .map(|e| e.id().clone()),
        );

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push(self.status(&id).await?);
        }
        Ok(out)
    }

    /// Every stored file of the session, by name.
    pub async fn export(&self, id: &SessionId) -> Result<BTreeMap<String, String>> {
        self.inner
            .store
            .export(id)
            .await?
            .ok_or_else(|| Error::not_found(id))
    }

    /// The raw credential file, base64-encoded.
    pub async fn credentials_base64(&self, id: &SessionId) -> Result<String> {
        let raw = self
            .inner
            .store
            .read_credentials_raw(id)
            .await?
            .ok_or_else(|| Error::not_found(id))?;
        Ok(base64::engine::general_purpose::STANDARD.encode(raw))
    }

    /// Stop sessions that have been pairing for longer than the configured
    /// timeout. Returns the evicted identifiers.
    pub async fn evict_stale(&self) -> Vec<SessionId> {
        let Some(max_age) = self.inner.config.pairing_timeout else {
            return Vec::new();
        };
        let max_age_ms = u64::try_from(max_age.as_millis()).unwrap_or(u64::MAX);
        let now = self.inner.clock.now_ms();

        let stale: Vec<Arc<SessionEntry>> = self
            .inner
            .registry
            .entries()
            .into_iter()
            .filter(|e| {
                e.state().is_pairing() && now.saturating_sub(e.created_at_ms()) >= max_age_ms
            })
            .collect();

        let mut evicted = Vec::new();
        for candidate in stale {
            let id = candidate.id().clone();
            let _creation = self.inner.registry.lock(&id).await;
            // Re-check under the lock: it may have linked or been replaced.
            let Some(entry) = self.inner.registry.get(&id) else {
                continue;
            };
            if entry.generation() != candidate.generation() || !entry.state().is_pairing() {
                continue;
            }
            warn!(session = %id, "pairing timed out, evicting session");
            self.inner
                .teardown(&entry, CloseReason::Stopped, false)
                .await;
            evicted.push(id);
        }
        evicted
    }

    /// Stop every live session. Credentials are kept.
    pub async fn shutdown(&self) {
        let entries = self.inner.registry.entries();
        if entries.is_empty() {
            return;
        }
        info!(count = entries.len(), "stopping live sessions");
        futures::future::join_all(entries.iter().map(|entry| async move {
            let _creation = self.inner.registry.lock(entry.id()).await;
            self.inner
                .teardown(entry, CloseReason::Stopped, false)
                .await;
        }))
        .await;
    }
}

impl Inner {
    /// Load credentials, connect and register. Caller holds the creation lock.
    async fn open(self: &Arc<Self>, id: &SessionId) -> Result<Arc<SessionEntry>> {
        let record = self.store.load(id).await?;

        let (tx, rx) = mpsc::channel(self.config.event_buffer.max(1));
        let handle = self
            .connector
            .connect(id, &record, tx)
            .await
            .map_err(|e| Error::connection(id, "connect", e))?;

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let entry = Arc::new(SessionEntry::new(
            id.clone(),
            generation,
            self.clock.now_ms(),
            handle,
            record.is_registered(),
            record.account().map(str::to_string),
        ));
        self.registry.put(Arc::clone(&entry));

        let driver = tokio::spawn(Arc::clone(self).drive(Arc::clone(&entry), rx));
        entry.set_driver(driver.abort_handle());

        info!(
            session = %id,
            generation,
            resumed = record.is_registered(),
            "session started"
        );
        Ok(entry)
    }

    /// Consume one session's events in order until it closes.
    async fn drive(self: Arc<Self>, entry: Arc<SessionEntry>, mut events: mpsc::Receiver<ConnectionEvent>) {
        while let Some(event) = events.recv().await {
            if AssertUnwindSafe(self.handle_event(&entry, event))
                .catch_unwind()
                .await
                .is_err()
            {
                error!(session = %entry.id(), "panic while handling connection event");
            }
            if entry.state() == LifecycleState::Closed {
                return;
            }
        }

        debug!(session = %entry.id(), "event stream ended without close");
        self.apply(
            &entry,
            SessionEvent::Close(CloseReason::ConnectionLost("event stream ended".into())),
        )
        .await;
    }

    async fn handle_event(&self, entry: &SessionEntry, event: ConnectionEvent) {
        let event = match event {
            ConnectionEvent::CredentialsUpdate { record, ack } => {
                let _transition = entry.lock_transitions().await;
                // A closed session may already be logged out and deleted.
                if entry.state() == LifecycleState::Closed {
                    warn!(session = %entry.id(), "credential update after close rejected");
                    ack.complete(false);
                    return;
                }
                match self.store.save(entry.id(), &record).await {
                    Ok(()) => {
                        entry.update(|s| {
                            s.registered = record.is_registered();
                            if let Some(account) = record.account() {
                                s.account = Some(account.to_string());
                            }
                        });
                        debug!(session = %entry.id(), "credentials persisted");
                        ack.complete(true);
                    },
                    Err(e) => {
                        error!(session = %entry.id(), error = %e, "failed to persist credentials");
                        ack.complete(false);
                    },
                }
                return;
            },
            ConnectionEvent::Connecting => SessionEvent::Connecting,
            ConnectionEvent::Qr(payload) => {
                debug!(session = %entry.id(), "QR challenge received");
                SessionEvent::Qr(payload)
            },
            ConnectionEvent::Open { account } => SessionEvent::Open { account },
            ConnectionEvent::Close(reason) => {
                info!(session = %entry.id(), %reason, "connection closed");
                SessionEvent::Close(reason)
            },
        };
        self.apply(entry, event).await;
    }

    /// Run one transition and its effects. Returns the new state, or `None`
    /// if the event was ignored.
    async fn apply(&self, entry: &SessionEntry, event: SessionEvent) -> Option<LifecycleState> {
        let _transition = entry.lock_transitions().await;
        let now = self.clock.now_ms();
        let from = entry.state();

        let Some(transition) = machine::transition(from, &event, now) else {
            debug!(session = %entry.id(), state = %from, ?event, "event ignored");
            return None;
        };

        if let SessionEvent::Open {
            account: Some(account),
        } = &event
        {
            entry.update(|s| s.account = Some(account.clone()));
        }
        for effect in &transition.effects {
            self.execute(entry, effect, now).await;
        }
        entry.update(|s| s.state = transition.next);

        if from != transition.next {
            info!(session = %entry.id(), from = %from, to = %transition.next, "session state changed");
        }
        Some(transition.next)
    }

    async fn execute(&self, entry: &SessionEntry, effect: &Effect, now: u64) {
        let id = entry.id();
        match effect {
            Effect::StoreArtifact(artifact) => {
                self.artifacts.set(id, artifact.clone());
                if let Err(e) = self.store.write_artifact(id, artifact).await {
                    warn!(session = %id, error = %e, "failed to mirror pairing artifact to disk");
                }
            },
            Effect::ClearArtifact => {
                self.artifacts.clear(id);
                // Best effort: the files may never have been written.
                if let Err(e) = self.store.clear_artifact(id).await {
                    debug!(session = %id, error = %e, "failed to remove pairing artifact files");
                }
            },
            Effect::WriteConnectedMarker { account } => {
                if let Err(e) = self
                    .store
                    .write_connected_marker(id, now, account.as_deref())
                    .await
                {
                    error!(session = %id, error = %e, "failed to write connected marker");
                }
            },
            Effect::Evict => {
                self.registry.remove_if_generation(id, entry.generation());
                self.registry.mark_closed(id, now);
            },
        }
    }

    /// Close locally, then tear the connection down within the stop timeout.
    async fn teardown(&self, entry: &SessionEntry, reason: CloseReason, logout: bool) {
        self.apply(entry, SessionEvent::Close(reason)).await;

        let handle = Arc::clone(entry.handle());
        let close = async move {
            if logout {
                handle.logout().await
            } else {
                handle.close().await
            }
        };
        match tokio::time::timeout(self.config.stop_timeout, close).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => {
                warn!(session = %entry.id(), error = %e, "connection did not close cleanly");
            },
            Err(_) => {
                warn!(session = %entry.id(), "connection close timed out, evicted anyway");
            },
        }
        entry.abort_driver();
    }
}
