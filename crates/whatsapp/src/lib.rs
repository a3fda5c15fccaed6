//! WhatsApp connections through the Baileys sidecar.
//!
//! The sidecar is a Node.js process that speaks the WhatsApp Web protocol
//! and exposes a local WebSocket. [`WhatsAppConnector`] plugs it into the
//! session lifecycle manager.

pub mod client;
pub mod connector;
pub mod error;
pub mod process;
pub mod protocol;

pub use {
    client::SidecarClient,
    connector::{SidecarConnection, SidecarSettings, WhatsAppConnector},
    error::{Error, Result},
    process::{SidecarProcess, SidecarProcessConfig, find_sidecar_dir},
    protocol::{GatewayMessage, SidecarMessage},
};
