//! Seam to the external pairing-protocol library.
//!
//! A [`Connector`] opens one connection per session and reports everything
//! that happens on it as [`ConnectionEvent`]s on the channel it was given.
//! The lifecycle manager consumes that channel in order.

use std::sync::Arc;

use {anyhow::Result, async_trait::async_trait, tokio::sync::{mpsc, oneshot}};

use crate::types::{CloseReason, CredentialRecord, PhoneNumber, SessionId};

/// Sending half of a session's event channel.
pub type EventSender = mpsc::Sender<ConnectionEvent>;

/// Completion signal for a credential update.
///
/// The manager completes it only after the record is on disk. A connector
/// must not confirm the update to the library before it resolves; a dropped
/// ack counts as a failed write.
#[derive(Debug)]
pub struct PersistAck(oneshot::Sender<bool>);

impl PersistAck {
    pub fn channel() -> (Self, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), rx)
    }

    pub fn complete(self, persisted: bool) {
        let _ = self.0.send(persisted);
    }
}

/// Something the library reported about a connection.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// Socket is (re)connecting.
    Connecting,
    /// A fresh QR challenge. Supersedes any earlier one.
    Qr(String),
    /// Authentication completed.
    Open { account: Option<String> },
    /// New credential material that must be persisted.
    CredentialsUpdate {
        record: CredentialRecord,
        ack: PersistAck,
    },
    /// The connection is gone.
    Close(CloseReason),
}

/// A pairing code issued by the library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingCodeGrant {
    pub code: String,
    pub expires_in_seconds: u64,
}

/// Live connection for one session.
#[async_trait]
pub trait ConnectionHandle: Send + Sync {
    /// Ask the network for a numeric code the phone owner can enter.
    async fn request_pairing_code(&self, phone: &PhoneNumber) -> Result<PairingCodeGrant>;

    /// Close the socket, keeping the linked device.
    async fn close(&self) -> Result<()>;

    /// Unlink the device from the account, then close.
    async fn logout(&self) -> Result<()>;
}

/// Opens connections bound to a session's credentials.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        id: &SessionId,
        credentials: &CredentialRecord,
        events: EventSender,
    ) -> Result<Arc<dyn ConnectionHandle>>;
}
