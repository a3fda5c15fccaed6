#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Drives the connector against an in-process fake sidecar.

use std::{sync::Arc, time::Duration};

use {
    futures::{SinkExt, StreamExt},
    paird_sessions::{
        CloseReason, ConnectionEvent, ConnectionHandle, Connector, CredentialRecord, PhoneNumber,
        SessionId,
    },
    paird_whatsapp::{GatewayMessage, SidecarMessage, SidecarSettings, WhatsAppConnector},
    serde_json::json,
    tokio::{net::TcpListener, sync::mpsc},
    tokio_tungstenite::{accept_async, tungstenite::Message},
};

/// Fake sidecar: frames it receives come out of `inbound`, frames pushed
/// into `outbound` go to the client. Dropping `outbound` closes the socket.
struct FakeSidecar {
    url: String,
    inbound: mpsc::UnboundedReceiver<GatewayMessage>,
    outbound: mpsc::UnboundedSender<SidecarMessage>,
}

impl FakeSidecar {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (in_tx, inbound) = mpsc::unbounded_channel();
        let (outbound, mut out_rx) = mpsc::unbounded_channel::<SidecarMessage>();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            let (mut sink, mut reader) = ws.split();
            loop {
                tokio::select! {
                    frame = reader.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            let msg: GatewayMessage = serde_json::from_str(&text).unwrap();
                            let _ = in_tx.send(msg);
                        },
                        Some(Ok(_)) => {},
                        _ => break,
                    },
                    out = out_rx.recv() => match out {
                        Some(msg) => {
                            let json = serde_json::to_string(&msg).unwrap();
                            sink.send(Message::Text(json.into())).await.unwrap();
                        },
                        None => {
                            let _ = sink.close().await;
                            break;
                        },
                    },
                }
            }
        });

        Self {
            url: format!("ws://{addr}"),
            inbound,
            outbound,
        }
    }

    async fn next(&mut self) -> GatewayMessage {
        tokio::time::timeout(Duration::from_secs(2), self.inbound.recv())
            .await
            .expect("frame in time")
            .expect("socket open")
    }

    fn push(&self, msg: SidecarMessage) {
        self.outbound.send(msg).unwrap();
    }
}

fn connector(url: &str) -> WhatsAppConnector {
    WhatsAppConnector::new(SidecarSettings {
        url: url.to_string(),
        connect_retries: 3,
        request_timeout: Duration::from_secs(2),
    })
}

async fn next_event(rx: &mut mpsc::Receiver<ConnectionEvent>) -> ConnectionEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("event in time")
        .expect("channel open")
}

#[tokio::test]
async fn login_then_qr_and_open_are_routed() {
    let mut sidecar = FakeSidecar::start().await;
    let connector = connector(&sidecar.url);
    let id = SessionId::parse("alice").unwrap();
    let (tx, mut rx) = mpsc::channel(16);

    let creds = CredentialRecord::from_value(json!({"noiseKey": "k"}));
    let _handle = connector.connect(&id, &creds, tx).await.unwrap();

    assert_eq!(sidecar.next().await, GatewayMessage::Login {
        account_id: "alice".into(),
        creds: json!({"noiseKey": "k"}),
    });

    sidecar.push(SidecarMessage::Qr {
        account_id: "alice".into(),
        data: "1@abc".into(),
    });
    // Frames for other accounts are not delivered here.
    sidecar.push(SidecarMessage::Qr {
        account_id: "mallory".into(),
        data: "1@nope".into(),
    });
    sidecar.push(SidecarMessage::Connected {
        account_id: "alice".into(),
        phone_number: Some("15551234567".into()),
    });

    assert!(matches!(next_event(&mut rx).await, ConnectionEvent::Qr(p) if p == "1@abc"));
    assert!(matches!(
        next_event(&mut rx).await,
        ConnectionEvent::Open { account: Some(a) } if a == "15551234567"
    ));
}

#[tokio::test]
async fn creds_saved_follows_the_ack() {
    let mut sidecar = FakeSidecar::start().await;
    let connector = connector(&sidecar.url);
    let id = SessionId::parse("alice").unwrap();
    let (tx, mut rx) = mpsc::channel(16);
    let _handle = connector
        .connect(&id, &CredentialRecord::empty(), tx)
        .await
        .unwrap();
    sidecar.next().await;

    sidecar.push(SidecarMessage::CredsUpdate {
        account_id: "alice".into(),
        revision: 4,
        creds: json!({"registered": true}),
    });
    let ConnectionEvent::CredentialsUpdate { record, ack } = next_event(&mut rx).await else {
        panic!("expected a credentials update");
    };
    assert!(record.is_registered());

    // Nothing is confirmed before the ack.
    assert!(
        tokio::time::timeout(Duration::from_millis(50), sidecar.inbound.recv())
            .await
            .is_err()
    );

    ack.complete(true);
    assert_eq!(sidecar.next().await, GatewayMessage::CredsSaved {
        account_id: "alice".into(),
        revision: 4,
        ok: true,
    });
}

#[tokio::test]
async fn pairing_code_round_trip() {
    let mut sidecar = FakeSidecar::start().await;
    let connector = connector(&sidecar.url);
    let id = SessionId::parse("bob").unwrap();
    let (tx, _rx) = mpsc::channel(16);
    let handle = connector
        .connect(&id, &CredentialRecord::empty(), tx)
        .await
        .unwrap();
    sidecar.next().await;

    let phone = PhoneNumber::parse("+1 555 123 4567").unwrap();
    let request = tokio::spawn(async move { handle.request_pairing_code(&phone).await });

    let GatewayMessage::RequestPairingCode {
        request_id,
        account_id,
        phone_number,
    } = sidecar.next().await
    else {
        panic!("expected a pairing code request");
    };
    assert_eq!(account_id, "bob");
    assert_eq!(phone_number, "15551234567");

    sidecar.push(SidecarMessage::PairingCode {
        request_id,
        account_id: "bob".into(),
        code: "123456".into(),
        expires_in_seconds: 120,
    });

    let grant = request.await.unwrap().unwrap();
    assert_eq!(grant.code, "123456");
    assert_eq!(grant.expires_in_seconds, 120);
}

#[tokio::test]
async fn sidecar_error_fails_the_request() {
    let mut sidecar = FakeSidecar::start().await;
    let connector = connector(&sidecar.url);
    let id = SessionId::parse("bob").unwrap();
    let (tx, _rx) = mpsc::channel(16);
    let handle = connector
        .connect(&id, &CredentialRecord::empty(), tx)
        .await
        .unwrap();
    sidecar.next().await;

    let phone = PhoneNumber::parse("15551234567").unwrap();
    let request = tokio::spawn(async move { handle.request_pairing_code(&phone).await });
    let GatewayMessage::RequestPairingCode { request_id, .. } = sidecar.next().await else {
        panic!("expected a pairing code request");
    };
    sidecar.push(SidecarMessage::Error {
        request_id: Some(request_id),
        account_id: Some("bob".into()),
        error: "rate limited".into(),
    });

    let err = request.await.unwrap().unwrap_err();
    assert!(err.to_string().contains("rate limited"));
}

#[tokio::test]
async fn socket_loss_closes_every_account() {
    let mut sidecar = FakeSidecar::start().await;
    let connector = Arc::new(connector(&sidecar.url));
    let (tx, mut rx) = mpsc::channel(16);
    let _handle = connector
        .connect(
            &SessionId::parse("carol").unwrap(),
            &CredentialRecord::empty(),
            tx,
        )
        .await
        .unwrap();
    sidecar.next().await;

    drop(sidecar.outbound);
    assert!(matches!(
        next_event(&mut rx).await,
        ConnectionEvent::Close(CloseReason::ConnectionLost(_))
    ));
}

#[tokio::test]
async fn close_unregisters_and_notifies_sidecar() {
    let mut sidecar = FakeSidecar::start().await;
    let connector = connector(&sidecar.url);
    let (tx, mut rx) = mpsc::channel(16);
    let handle = connector
        .connect(
            &SessionId::parse("dave").unwrap(),
            &CredentialRecord::empty(),
            tx,
        )
        .await
        .unwrap();
    sidecar.next().await;

    handle.close().await.unwrap();
    assert_eq!(sidecar.next().await, GatewayMessage::Close {
        account_id: "dave".into(),
    });

    sidecar.push(SidecarMessage::Qr {
        account_id: "dave".into(),
        data: "1@late".into(),
    });
    assert!(
        tokio::time::timeout(Duration::from_millis(100), rx.recv())
            .await
            .map_or(true, |e| e.is_none())
    );
}

#[tokio::test]
async fn backed_up_session_does_not_stall_others() {
    let mut sidecar = FakeSidecar::start().await;
    let connector = connector(&sidecar.url);

    // Never drained, so it fills after one event.
    let (slow_tx, mut slow_rx) = mpsc::channel(1);
    let _slow = connector
        .connect(
            &SessionId::parse("slow").unwrap(),
            &CredentialRecord::empty(),
            slow_tx,
        )
        .await
        .unwrap();
    sidecar.next().await;

    let (fast_tx, mut fast_rx) = mpsc::channel(16);
    let _fast = connector
        .connect(
            &SessionId::parse("fast").unwrap(),
            &CredentialRecord::empty(),
            fast_tx,
        )
        .await
        .unwrap();
    sidecar.next().await;

    for n in 0..8 {
        sidecar.push(SidecarMessage::Qr {
            account_id: "slow".into(),
            data: format!("1@slow-{n}"),
        });
    }
    sidecar.push(SidecarMessage::Qr {
        account_id: "fast".into(),
        data: "1@fast".into(),
    });

    assert!(matches!(next_event(&mut fast_rx).await, ConnectionEvent::Qr(p) if p == "1@fast"));

    // The backed-up session still gets its frames, in order.
    for n in 0..8 {
        let want = format!("1@slow-{n}");
        assert!(matches!(next_event(&mut slow_rx).await, ConnectionEvent::Qr(p) if p == want));
    }
}
