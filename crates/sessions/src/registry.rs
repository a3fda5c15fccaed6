//! Live session handles keyed by identifier.

use std::sync::{Arc, OnceLock};

use {
    dashmap::DashMap,
    tokio::{
        sync::{Mutex, MutexGuard, OwnedMutexGuard, watch},
        task::AbortHandle,
    },
};

use crate::{
    connection::ConnectionHandle,
    types::{LifecycleState, SessionId},
};

/// Observable part of a session, published through a watch channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: LifecycleState,
    pub account: Option<String>,
    /// The credential record says a pairing already completed.
    pub registered: bool,
}

/// One live connection of a session.
pub struct SessionEntry {
    id: SessionId,
    generation: u64,
    created_at_ms: u64,
    handle: Arc<dyn ConnectionHandle>,
    snapshot: watch::Sender<SessionSnapshot>,
    /// Serializes transitions between the driver task and direct calls.
    transitions: Mutex<()>,
    driver: OnceLock<AbortHandle>,
}

impl SessionEntry {
    pub fn new(
        id: SessionId,
        generation: u64,
        created_at_ms: u64,
        handle: Arc<dyn ConnectionHandle>,
        registered: bool,
        account: Option<String>,
    ) -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot {
            state: LifecycleState::Connecting,
            account,
            registered,
        });
        Self {
            id,
            generation,
            created_at_ms,
            handle,
            snapshot,
            transitions: Mutex::new(()),
            driver: OnceLock::new(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    pub fn handle(&self) -> &Arc<dyn ConnectionHandle> {
        &self.handle
    }

    pub fn state(&self) -> LifecycleState {
        self.snapshot.borrow().state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut SessionSnapshot)) {
        self.snapshot.send_modify(f);
    }

    pub(crate) async fn lock_transitions(&self) -> MutexGuard<'_, ()> {
        self.transitions.lock().await
    }

    pub(crate) fn set_driver(&self, handle: AbortHandle) {
        let _ = self.driver.set(handle);
    }

    pub(crate) fn abort_driver(&self) {
        if let Some(handle) = self.driver.get() {
            handle.abort();
        }
    }
}

/// Held while a session is created or torn down. Dropping it unlocks and
/// discards the identifier's mutex when nobody else holds or awaits it.
pub struct CreationGuard<'a> {
    registry: &'a SessionRegistry,
    id: SessionId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for CreationGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // The map holds the last reference unless another caller cloned it.
        self.registry
            .creation
            .remove_if(&self.id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Single source of truth for "is this session running".
///
/// Only the lifecycle manager mutates it. Creation for an identifier is
/// serialized through [`SessionRegistry::lock`].
#[derive(Default)]
pub struct SessionRegistry {
    live: DashMap<SessionId, Arc<SessionEntry>>,
    creation: DashMap<SessionId, Arc<Mutex<()>>>,
    closed: DashMap<SessionId, u64>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<SessionEntry>> {
        self.live.get(id).map(|e| Arc::clone(e.value()))
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.live.contains_key(id)
    }

    /// Insert a live entry, replacing whatever was there.
    pub fn put(&self, entry: Arc<SessionEntry>) -> Option<Arc<SessionEntry>> {
        self.closed.remove(entry.id());
        self.live.insert(entry.id().clone(), entry)
    }

    pub fn remove(&self, id: &SessionId) -> Option<Arc<SessionEntry>> {
        self.live.remove(id).map(|(_, e)| e)
    }

    /// Remove the entry only if it still belongs to `generation`, so a late
    /// close from an old connection cannot evict its successor.
    pub fn remove_if_generation(&self, id: &SessionId, generation: u64) -> Option<Arc<SessionEntry>> {
        self.live
            .remove_if(id, |_, e| e.generation() == generation)
            .map(|(_, e)| e)
    }

    /// Remember that `id` closed in this process.
    pub fn mark_closed(&self, id: &SessionId, at_ms: u64) {
        if !self.live.contains_key(id) {
            self.closed.insert(id.clone(), at_ms);
        }
    }

    pub fn closed_at(&self, id: &SessionId) -> Option<u64> {
        self.closed.get(id).map(|v| *v.value())
    }

    /// Drop the closed marker, once nothing of the session is left.
    pub fn forget_closed(&self, id: &SessionId) {
        self.closed.remove(id);
    }

    /// Per-identifier creation lock. Holders may await freely; other
    /// identifiers are unaffected.
    pub async fn lock(&self, id: &SessionId) -> CreationGuard<'_> {
        let mutex = Arc::clone(
            self.creation
                .entry(id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        CreationGuard {
            registry: self,
            id: id.clone(),
            guard: Some(mutex.lock_owned().await),
        }
    }

    /// Identifiers with a creation lock or a closed marker in memory.
    pub fn tracked_ids(&self) -> usize {
        self.creation.len() + self.closed.len()
    }

    pub fn entries(&self) -> Vec<Arc<SessionEntry>> {
        self.live.iter().map(|e| Arc::clone(e.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}
