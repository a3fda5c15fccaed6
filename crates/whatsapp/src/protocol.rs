//! JSON messages exchanged with the Baileys sidecar over WebSocket.
//!
//! Every frame is one text message tagged by `type`. Accounts are keyed by
//! the session identifier.

use serde::{Deserialize, Serialize};

/// Gateway → sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayMessage {
    /// Open a socket for the account using the given credential record.
    Login {
        account_id: String,
        creds: serde_json::Value,
    },
    RequestPairingCode {
        request_id: String,
        account_id: String,
        phone_number: String,
    },
    /// Answer to `creds_update`: the revision is (or is not) on disk.
    CredsSaved {
        account_id: String,
        revision: u64,
        ok: bool,
    },
    Close {
        account_id: String,
    },
    Logout {
        account_id: String,
    },
}

/// Sidecar → gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarMessage {
    Qr {
        account_id: String,
        data: String,
    },
    Connecting {
        account_id: String,
    },
    Connected {
        account_id: String,
        #[serde(default)]
        phone_number: Option<String>,
    },
    Disconnected {
        account_id: String,
        #[serde(default)]
        reason: String,
    },
    LoggedOut {
        account_id: String,
    },
    /// New credential material. The sidecar holds it back from the
    /// library until `creds_saved` arrives for the same revision.
    CredsUpdate {
        account_id: String,
        revision: u64,
        creds: serde_json::Value,
    },
    PairingCode {
        request_id: String,
        account_id: String,
        code: String,
        expires_in_seconds: u64,
    },
    Error {
        #[serde(default)]
        request_id: Option<String>,
        #[serde(default)]
        account_id: Option<String>,
        error: String,
    },
}

impl SidecarMessage {
    pub fn account_id(&self) -> Option<&str> {
        match self {
            Self::Qr { account_id, .. }
            | Self::Connecting { account_id }
            | Self::Connected { account_id, .. }
            | Self::Disconnected { account_id, .. }
            | Self::LoggedOut { account_id }
            | Self::CredsUpdate { account_id, .. }
            | Self::PairingCode { account_id, .. } => Some(account_id),
            Self::Error { account_id, .. } => account_id.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use {super::*, serde_json::json};

    #[test]
    fn gateway_messages_are_type_tagged() {
        let msg = GatewayMessage::RequestPairingCode {
            request_id: "r1".into(),
            account_id: "bob".into(),
            phone_number: "15551234567".into(),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "type": "request_pairing_code",
                "request_id": "r1",
                "account_id": "bob",
                "phone_number": "15551234567"
            })
        );

        let saved = GatewayMessage::CredsSaved {
            account_id: "alice".into(),
            revision: 3,
            ok: true,
        };
        assert_eq!(serde_json::to_value(&saved).unwrap()["type"], "creds_saved");
    }

    #[test]
    fn sidecar_messages_parse_with_defaults() {
        let msg: SidecarMessage =
            serde_json::from_str(r#"{"type":"connected","account_id":"alice"}"#).unwrap();
        assert_eq!(msg, SidecarMessage::Connected {
            account_id: "alice".into(),
            phone_number: None,
        });

        let err: SidecarMessage =
            serde_json::from_str(r#"{"type":"error","error":"boom"}"#).unwrap();
        assert_eq!(err.account_id(), None);
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(serde_json::from_str::<SidecarMessage>(r#"{"type":"inbound_message"}"#).is_err());
    }
}
