//! [`Connector`] backed by the Baileys sidecar.

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    tokio::sync::Mutex,
    tracing::{debug, info},
};

use paird_sessions::{
    ConnectionHandle, Connector, CredentialRecord, EventSender, PairingCodeGrant, PhoneNumber,
    SessionId,
};

use crate::{client::SidecarClient, error::Result, protocol::GatewayMessage};

/// Settings for reaching the sidecar.
#[derive(Debug, Clone)]
pub struct SidecarSettings {
    pub url: String,
    pub connect_retries: u32,
    pub request_timeout: Duration,
}

/// Opens one sidecar account per session.
///
/// The socket is dialed on first use and re-dialed if it dropped.
pub struct WhatsAppConnector {
    settings: SidecarSettings,
    client: Mutex<Option<Arc<SidecarClient>>>,
}

impl WhatsAppConnector {
    pub fn new(settings: SidecarSettings) -> Self {
        Self {
            settings,
            client: Mutex::new(None),
        }
    }

    /// Use an already-connected client.
    pub fn with_client(settings: SidecarSettings, client: Arc<SidecarClient>) -> Self {
        Self {
            settings,
            client: Mutex::new(Some(client)),
        }
    }

    async fn client(&self) -> Result<Arc<SidecarClient>> {
        let mut slot = self.client.lock().await;
        if let Some(client) = slot.as_ref()
            && client.is_open()
        {
            return Ok(Arc::clone(client));
        }
        if slot.is_some() {
            info!(url = %self.settings.url, "sidecar link dropped, reconnecting");
        }
        let client = SidecarClient::connect_with_retry(
            &self.settings.url,
            self.settings.connect_retries,
            self.settings.request_timeout,
        )
        .await?;
        *slot = Some(Arc::clone(&client));
        Ok(client)
    }
}

#[async_trait]
impl Connector for WhatsAppConnector {
    async fn connect(
        &self,
        id: &SessionId,
        credentials: &CredentialRecord,
        events: EventSender,
    ) -> anyhow::Result<Arc<dyn ConnectionHandle>> {
        let client = self.client().await?;
        let account_id = id.as_str().to_string();

        client.register(&account_id, events);
        let login = GatewayMessage::Login {
            account_id: account_id.clone(),
            creds: credentials.as_value().clone(),
        };
        if let Err(e) = client.send(&login) {
            client.unregister(&account_id);
            return Err(e.into());
        }
        debug!(session = %id, registered = credentials.is_registered(), "login sent to sidecar");

        Ok(Arc::new(SidecarConnection { client, account_id }))
    }
}

/// One account on the sidecar socket.
pub struct SidecarConnection {
    client: Arc<SidecarClient>,
    account_id: String,
}

#[async_trait]
impl ConnectionHandle for SidecarConnection {
    async fn request_pairing_code(&self, phone: &PhoneNumber) -> anyhow::Result<PairingCodeGrant> {
        Ok(self
            .client
            .request_pairing_code(&self.account_id, phone.as_str())
            .await?)
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.client.unregister(&self.account_id);
        self.client.send(&GatewayMessage::Close {
            account_id: self.account_id.clone(),
        })?;
        Ok(())
    }

    async fn logout(&self) -> anyhow::Result<()> {
        self.client.unregister(&self.account_id);
        self.client.send(&GatewayMessage::Logout {
            account_id: self.account_id.clone(),
        })?;
        Ok(())
    }
}
