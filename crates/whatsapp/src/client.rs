//! WebSocket link to the sidecar.
//!
//! One socket carries every account. Inbound frames are routed to the
//! event channel registered for their `account_id`; pairing-code requests
//! are matched to answers by `request_id`.
//!
//! Each account gets its own forwarding task between the socket reader and
//! the session's bounded channel, so one session that falls behind never
//! holds up frames for the others.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    dashmap::DashMap,
    futures::{SinkExt, StreamExt},
    tokio::{
        net::TcpStream,
        sync::{mpsc, oneshot},
    },
    tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message},
    tracing::{debug, info, warn},
};

use paird_sessions::{
    CloseReason, ConnectionEvent, CredentialRecord, EventSender, PairingCodeGrant, PersistAck,
};

use crate::{
    error::{Error, Result},
    protocol::{GatewayMessage, SidecarMessage},
};

const MAX_BACKOFF: Duration = Duration::from_secs(5);

type PendingReply = oneshot::Sender<std::result::Result<PairingCodeGrant, String>>;

/// Unbounded per-account queue, drained into the session's channel.
type AccountQueue = mpsc::UnboundedSender<ConnectionEvent>;

/// Shared state between the client handle and its socket task.
struct Routes {
    accounts: DashMap<String, AccountQueue>,
    pending: DashMap<String, PendingReply>,
    open: AtomicBool,
}

pub struct SidecarClient {
    url: String,
    write_tx: mpsc::UnboundedSender<String>,
    routes: Arc<Routes>,
    request_timeout: Duration,
}

impl SidecarClient {
    /// Dial the sidecar once.
    pub async fn connect(url: &str, request_timeout: Duration) -> Result<Arc<Self>> {
        let (ws_stream, _response) = connect_async(url)
            .await
            .map_err(|e| Error::connect(url, e))?;
        info!(url, "connected to sidecar");

        let (write_tx, write_rx) = mpsc::unbounded_channel::<String>();
        let routes = Arc::new(Routes {
            accounts: DashMap::new(),
            pending: DashMap::new(),
            open: AtomicBool::new(true),
        });

        tokio::spawn(run_socket(
            ws_stream,
            write_rx,
            write_tx.clone(),
            Arc::clone(&routes),
        ));

        Ok(Arc::new(Self {
            url: url.to_string(),
            write_tx,
            routes,
            request_timeout,
        }))
    }

    /// Dial with exponential backoff, giving up after `attempts` failures.
    pub async fn connect_with_retry(
        url: &str,
        attempts: u32,
        request_timeout: Duration,
    ) -> Result<Arc<Self>> {
        let mut backoff = Duration::from_millis(250);
        let mut attempt = 1;
        loop {
            match Self::connect(url, request_timeout).await {
                Ok(client) => return Ok(client),
                Err(e) if attempt >= attempts.max(1) => return Err(e),
                Err(e) => {
                    debug!(url, attempt, error = %e, "sidecar not ready, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    attempt += 1;
                },
            }
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_open(&self) -> bool {
        self.routes.open.load(Ordering::SeqCst)
    }

    pub fn send(&self, msg: &GatewayMessage) -> Result<()> {
        let json = serde_json::to_string(msg)?;
        if !self.is_open() {
            return Err(Error::Disconnected);
        }
        self.write_tx.send(json).map_err(|_| Error::Disconnected)
    }

    /// Route this account's frames to `events` from now on.
    pub fn register(&self, account_id: &str, events: EventSender) {
        self.routes
            .accounts
            .insert(account_id.to_string(), forward(account_id, events));
    }

    pub fn unregister(&self, account_id: &str) {
        self.routes.accounts.remove(account_id);
    }

    pub async fn request_pairing_code(
        &self,
        account_id: &str,
        phone_number: &str,
    ) -> Result<PairingCodeGrant> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.routes.pending.insert(request_id.clone(), tx);

        let sent = self.send(&GatewayMessage::RequestPairingCode {
            request_id: request_id.clone(),
            account_id: account_id.to_string(),
            phone_number: phone_number.to_string(),
        });
        if let Err(e) = sent {
            self.routes.pending.remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(Ok(grant))) => Ok(grant),
            Ok(Ok(Err(message))) => Err(Error::Sidecar(message)),
            Ok(Err(_)) => Err(Error::Disconnected),
            Err(_) => {
                self.routes.pending.remove(&request_id);
                Err(Error::Timeout {
                    what: "pairing code request",
                    after: self.request_timeout,
                })
            },
        }
    }
}

type SidecarSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn run_socket(
    ws_stream: SidecarSocket,
    mut write_rx: mpsc::UnboundedReceiver<String>,
    write_tx: mpsc::UnboundedSender<String>,
    routes: Arc<Routes>,
) {
    let (mut ws_sink, mut ws_reader) = ws_stream.split();

    loop {
        tokio::select! {
            msg = ws_reader.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<SidecarMessage>(&text) {
                            Ok(msg) => route(&routes, &write_tx, msg),
                            Err(e) => warn!(error = %e, "unparseable sidecar frame"),
                        }
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if ws_sink.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("sidecar closed the socket");
                        break;
                    },
                    Some(Ok(_)) => {},
                    Some(Err(e)) => {
                        warn!(error = %e, "sidecar socket error");
                        break;
                    },
                }
            },
            out = write_rx.recv() => {
                let Some(json) = out else { break };
                if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                    warn!(error = %e, "failed to write to sidecar");
                    break;
                }
            },
        }
    }

    routes.open.store(false, Ordering::SeqCst);
    routes.pending.clear();

    // Every account on this socket is gone with it.
    let accounts: Vec<(String, AccountQueue)> = routes
        .accounts
        .iter()
        .map(|e| (e.key().clone(), e.value().clone()))
        .collect();
    routes.accounts.clear();
    for (account_id, queue) in accounts {
        debug!(account_id, "closing account after sidecar disconnect");
        let _ = queue.send(ConnectionEvent::Close(CloseReason::ConnectionLost(
            "sidecar disconnected".into(),
        )));
    }
    warn!("sidecar connection ended");
}

fn route(routes: &Routes, write_tx: &mpsc::UnboundedSender<String>, msg: SidecarMessage) {
    let event = match msg {
        SidecarMessage::PairingCode {
            request_id,
            code,
            expires_in_seconds,
            ..
        } => {
            if let Some((_, reply)) = routes.pending.remove(&request_id) {
                let _ = reply.send(Ok(PairingCodeGrant {
                    code,
                    expires_in_seconds,
                }));
            }
            return;
        },
        SidecarMessage::Error {
            request_id: Some(request_id),
            error,
            ..
        } => {
            if let Some((_, reply)) = routes.pending.remove(&request_id) {
                let _ = reply.send(Err(error));
            }
            return;
        },
        SidecarMessage::Error {
            request_id: None,
            account_id,
            error,
        } => {
            warn!(account_id = account_id.as_deref().unwrap_or("-"), error, "sidecar reported an error");
            return;
        },
        SidecarMessage::CredsUpdate {
            account_id,
            revision,
            creds,
        } => {
            let (ack, done) = PersistAck::channel();
            let write_tx = write_tx.clone();
            let acked_account = account_id.clone();
            // Answer once the write finished, without stalling other frames.
            tokio::spawn(async move {
                let ok = done.await.unwrap_or(false);
                let reply = GatewayMessage::CredsSaved {
                    account_id: acked_account,
                    revision,
                    ok,
                };
                if let Ok(json) = serde_json::to_string(&reply) {
                    let _ = write_tx.send(json);
                }
            });
            (account_id, ConnectionEvent::CredentialsUpdate {
                record: CredentialRecord::from_value(creds),
                ack,
            })
        },
        SidecarMessage::Qr { account_id, data } => (account_id, ConnectionEvent::Qr(data)),
        SidecarMessage::Connecting { account_id } => (account_id, ConnectionEvent::Connecting),
        SidecarMessage::Connected {
            account_id,
            phone_number,
        } => (account_id, ConnectionEvent::Open {
            account: phone_number,
        }),
        SidecarMessage::Disconnected { account_id, reason } => {
            let queue = routes.accounts.remove(&account_id).map(|(_, tx)| tx);
            deliver(queue, &account_id, ConnectionEvent::Close(CloseReason::ConnectionLost(reason)));
            return;
        },
        SidecarMessage::LoggedOut { account_id } => {
            let queue = routes.accounts.remove(&account_id).map(|(_, tx)| tx);
            deliver(queue, &account_id, ConnectionEvent::Close(CloseReason::LoggedOut));
            return;
        },
    };

    let (account_id, event) = event;
    let queue = routes.accounts.get(&account_id).map(|e| e.value().clone());
    deliver(queue, &account_id, event);
}

fn deliver(queue: Option<AccountQueue>, account_id: &str, event: ConnectionEvent) {
    match queue {
        Some(tx) => {
            if tx.send(event).is_err() {
                debug!(account_id, "session no longer listening");
            }
        },
        None => debug!(account_id, "frame for unregistered account dropped"),
    }
}

/// Spawn the task that moves one account's frames into its session channel,
/// in arrival order. It ends once the queue is dropped and drained, or the
/// session stops listening.
fn forward(account_id: &str, events: EventSender) -> AccountQueue {
    let (tx, mut rx) = mpsc::unbounded_channel::<ConnectionEvent>();
    let account_id = account_id.to_string();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if events.send(event).await.is_err() {
                debug!(account_id, "session no longer listening");
                break;
            }
        }
    });
    tx
}
