//! In-process connector for tests. Nothing touches the network; events are
//! injected by hand through [`FakeConnector`].

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use {async_trait::async_trait, dashmap::DashMap};

use crate::{
    connection::{ConnectionEvent, ConnectionHandle, Connector, EventSender, PairingCodeGrant, PersistAck},
    types::{CloseReason, CredentialRecord, PhoneNumber, SessionId},
};

/// Connection handle that records what was asked of it.
pub struct FakeHandle {
    grant: PairingCodeGrant,
    hang_on_close: bool,
    closed: AtomicBool,
    logged_out: AtomicBool,
    code_requests: AtomicUsize,
    last_phone: Mutex<Option<String>>,
}

impl FakeHandle {
    fn new(grant: PairingCodeGrant, hang_on_close: bool) -> Self {
        Self {
            grant,
            hang_on_close,
            closed: AtomicBool::new(false),
            logged_out: AtomicBool::new(false),
            code_requests: AtomicUsize::new(0),
            last_phone: Mutex::new(None),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_logged_out(&self) -> bool {
        self.logged_out.load(Ordering::SeqCst)
    }

    pub fn code_requests(&self) -> usize {
        self.code_requests.load(Ordering::SeqCst)
    }

    pub fn last_phone(&self) -> Option<String> {
        self.last_phone
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl ConnectionHandle for FakeHandle {
    async fn request_pairing_code(&self, phone: &PhoneNumber) -> anyhow::Result<PairingCodeGrant> {
        if self.is_closed() {
            anyhow::bail!("connection closed");
        }
        self.code_requests.fetch_add(1, Ordering::SeqCst);
        *self.last_phone.lock().unwrap_or_else(|e| e.into_inner()) = Some(phone.to_string());
        Ok(self.grant.clone())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if self.hang_on_close {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn logout(&self) -> anyhow::Result<()> {
        self.logged_out.store(true, Ordering::SeqCst);
        self.close().await
    }
}

struct FakeLink {
    events: EventSender,
    handle: Arc<FakeHandle>,
    credentials: CredentialRecord,
}

/// Scriptable [`Connector`].
///
/// Connections made with registered credentials report `Open` straight
/// away unless [`FakeConnector::without_auto_open`] is used.
pub struct FakeConnector {
    links: DashMap<SessionId, FakeLink>,
    connects: AtomicUsize,
    fail: AtomicBool,
    delay_ms: AtomicU64,
    grant: PairingCodeGrant,
    auto_open_registered: bool,
    hang_on_close: bool,
}

impl Default for FakeConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeConnector {
    pub fn new() -> Self {
        Self {
            links: DashMap::new(),
            connects: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
            grant: PairingCodeGrant {
                code: "123456".into(),
                expires_in_seconds: 120,
            },
            auto_open_registered: true,
            hang_on_close: false,
        }
    }

    #[must_use]
    pub fn with_pairing_code(mut self, code: impl Into<String>, expires_in_seconds: u64) -> Self {
        self.grant = PairingCodeGrant {
            code: code.into(),
            expires_in_seconds,
        };
        self
    }

    #[must_use]
    pub fn with_connect_delay(self, delay: Duration) -> Self {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
        self
    }

    #[must_use]
    pub fn without_auto_open(mut self) -> Self {
        self.auto_open_registered = false;
        self
    }

    /// Handles never finish closing.
    #[must_use]
    pub fn with_hanging_close(mut self) -> Self {
        self.hang_on_close = true;
        self
    }

    pub fn fail_connects(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Handle of the most recent connection for `id`.
    pub fn handle(&self, id: &SessionId) -> Option<Arc<FakeHandle>> {
        self.links.get(id).map(|l| Arc::clone(&l.handle))
    }

    /// Credentials the most recent connection for `id` was opened with.
    pub fn last_credentials(&self, id: &SessionId) -> Option<CredentialRecord> {
        self.links.get(id).map(|l| l.credentials.clone())
    }

    pub fn last_phone(&self, id: &SessionId) -> Option<String> {
        self.handle(id).and_then(|h| h.last_phone())
    }

    fn sender(&self, id: &SessionId) -> Option<EventSender> {
        self.links.get(id).map(|l| l.events.clone())
    }

    /// Deliver an event on the current connection. Returns `false` if no
    /// one is listening any more.
    pub async fn emit(&self, id: &SessionId, event: ConnectionEvent) -> bool {
        match self.sender(id) {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    pub async fn qr(&self, id: &SessionId, payload: &str) -> bool {
        self.emit(id, ConnectionEvent::Qr(payload.to_string())).await
    }

    pub async fn open(&self, id: &SessionId, account: Option<&str>) -> bool {
        self.emit(id, ConnectionEvent::Open {
            account: account.map(str::to_string),
        })
        .await
    }

    pub async fn close(&self, id: &SessionId, reason: CloseReason) -> bool {
        self.emit(id, ConnectionEvent::Close(reason)).await
    }

    /// Push new credentials and wait for the persistence ack.
    pub async fn update_credentials(&self, id: &SessionId, record: CredentialRecord) -> Option<bool> {
        let (ack, done) = PersistAck::channel();
        if !self
            .emit(id, ConnectionEvent::CredentialsUpdate { record, ack })
            .await
        {
            return None;
        }
        Some(done.await.unwrap_or(false))
    }

    /// Drop the event sender so the stream ends without a close event.
    pub fn drop_link(&self, id: &SessionId) {
        self.links.remove(id);
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        id: &SessionId,
        credentials: &CredentialRecord,
        events: EventSender,
    ) -> anyhow::Result<Arc<dyn ConnectionHandle>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("connection refused");
        }

        let handle = Arc::new(FakeHandle::new(self.grant.clone(), self.hang_on_close));
        if self.auto_open_registered && credentials.is_registered() {
            let _ = events
                .send(ConnectionEvent::Open {
                    account: credentials.account().map(str::to_string),
                })
                .await;
        }
        self.links.insert(id.clone(), FakeLink {
            events,
            handle: Arc::clone(&handle),
            credentials: credentials.clone(),
        });
        Ok(handle)
    }
}
