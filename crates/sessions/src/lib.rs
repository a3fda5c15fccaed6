//! Session lifecycle for linked WhatsApp devices.
//!
//! Each session owns a credential record on disk under
//! `<sessions_dir>/<id>/creds.json` and at most one live connection. The
//! [`LifecycleManager`] starts, reuses and tears down connections; the
//! [`SessionRegistry`] says which sessions are live; the [`ArtifactCache`]
//! holds the QR payload or pairing code a user should act on.

pub mod artifacts;
pub mod connection;
pub mod error;
pub mod lifecycle;
pub mod machine;
pub mod registry;
pub mod store;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use {
    artifacts::ArtifactCache,
    connection::{
        ConnectionEvent, ConnectionHandle, Connector, EventSender, PairingCodeGrant, PersistAck,
    },
    error::{Error, Result},
    lifecycle::{LifecycleConfig, LifecycleManager, SessionStatus, StartOutcome},
    registry::{CreationGuard, SessionEntry, SessionRegistry, SessionSnapshot},
    store::{CredentialStore, FsCredentialStore},
    types::{
        Clock, CloseReason, CredentialRecord, LifecycleState, ManualClock, PairingArtifact,
        PairingCode, PhoneNumber, SessionId, SystemClock,
    },
};
