use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use {
    anyhow::Context,
    axum::{Json, Router, extract::State, http::header, response::IntoResponse, routing::get},
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    tower_http::{
        catch_panic::CatchPanicLayer,
        cors::{Any, CorsLayer},
        sensitive_headers::SetSensitiveRequestHeadersLayer,
        trace::TraceLayer,
    },
    tracing::{debug, info, warn},
};

use {
    paird_config::PairdConfig,
    paird_sessions::{CredentialStore, FsCredentialStore, LifecycleConfig, LifecycleManager},
    paird_whatsapp::{
        SidecarProcess, SidecarProcessConfig, SidecarSettings, WhatsAppConnector,
        find_sidecar_dir,
    },
};

use crate::{
    auth::{LoginSessions, ResolvedAuth},
    auth_middleware::ADMIN_TOKEN_HEADER,
    auth_routes::auth_router,
    session_routes::session_router,
    state::{AppState, GatewayState},
};

// ── Router ───────────────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app_state = AppState { gateway: state };

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api/auth", auth_router())
        .merge(session_router(app_state.clone()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .layer(SetSensitiveRequestHeadersLayer::new([
            header::AUTHORIZATION,
            header::COOKIE,
            header::HeaderName::from_static(ADMIN_TOKEN_HEADER),
        ]))
        .with_state(app_state)
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let gw = &state.gateway;
    Json(serde_json::json!({
        "status": "ok",
        "version": gw.version,
        "sessions": gw.manager.registry().len(),
        "uptime_secs": gw.started_at.elapsed().as_secs(),
    }))
}

// ── Background tasks ─────────────────────────────────────────────────────────

/// Periodically evict sessions stuck pairing and expired login cookies.
pub fn spawn_reaper(
    state: Arc<GatewayState>,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let evicted = state.manager.evict_stale().await;
                    if !evicted.is_empty() {
                        info!(count = evicted.len(), "evicted stale pairing sessions");
                    }
                    let expired = state.logins.evict_expired();
                    if expired > 0 {
                        debug!(count = expired, "expired login sessions removed");
                    }
                },
            }
        }
    })
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Start the sidecar if configured, build the lifecycle manager and serve
/// until `shutdown` fires. Live sessions are stopped before returning.
pub async fn start_gateway(config: PairdConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let sessions_dir: PathBuf = config.sessions.dir.clone();
    std::fs::create_dir_all(&sessions_dir).with_context(|| {
        format!("failed to create sessions directory {}", sessions_dir.display())
    })?;

    let mut sidecar = if config.sidecar.auto_start {
        Some(spawn_sidecar(&config).await?)
    } else {
        None
    };

    let connector = WhatsAppConnector::new(SidecarSettings {
        url: config.sidecar.url.clone(),
        connect_retries: config.sidecar.connect_retries,
        request_timeout: Duration::from_secs(config.sidecar.request_timeout_secs),
    });
    let store: Arc<dyn CredentialStore> = Arc::new(FsCredentialStore::new(sessions_dir.clone()));
    let manager = LifecycleManager::new(store, Arc::new(connector), lifecycle_config(&config));

    let auth = ResolvedAuth::from_config(&config.auth);
    let logins = LoginSessions::new(Duration::from_secs(config.auth.login_ttl_secs));
    let state = GatewayState::new(manager.clone(), auth, logins);
    let app = build_gateway_app(Arc::clone(&state));

    let (bind, port) = (config.server.bind.as_str(), config.server.port);
    let listener = tokio::net::TcpListener::bind((bind, port))
        .await
        .with_context(|| format!("failed to bind {bind}:{port}"))?;
    let local = listener.local_addr()?;

    print_banner(&state, &config, local, &sessions_dir);

    let reaper = spawn_reaper(
        Arc::clone(&state),
        Duration::from_secs(config.sessions.reap_interval_secs.max(1)),
        shutdown.child_token(),
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.clone().cancelled_owned())
    .await?;

    info!("shutting down");
    shutdown.cancel();
    let _ = reaper.await;
    manager.shutdown().await;
    if let Some(process) = sidecar.as_mut() {
        process.stop().await;
    }
    Ok(())
}

pub fn lifecycle_config(config: &PairdConfig) -> LifecycleConfig {
    let pairing = config.sessions.pairing_timeout_secs;
    LifecycleConfig {
        stop_timeout: Duration::from_secs(config.sessions.stop_timeout_secs),
        pairing_timeout: (pairing > 0).then(|| Duration::from_secs(pairing)),
        event_buffer: config.sessions.event_buffer,
    }
}

async fn spawn_sidecar(config: &PairdConfig) -> anyhow::Result<SidecarProcess> {
    let port = url::Url::parse(&config.sidecar.url)
        .with_context(|| format!("invalid sidecar url {}", config.sidecar.url))?
        .port_or_known_default()
        .context("sidecar url has no port")?;
    let sidecar_dir = find_sidecar_dir(config.sidecar.dir.as_deref())?;
    SidecarProcess::spawn(&SidecarProcessConfig { sidecar_dir, port }).await
}

fn print_banner(state: &GatewayState, config: &PairdConfig, addr: SocketAddr, dir: &std::path::Path) {
    let mut lines = vec![
        format!("paird v{}", state.version),
        format!("listening: http://{addr}"),
        format!("sessions: {}", dir.display()),
        format!("sidecar: {}", config.sidecar.url),
    ];
    if state.auth.is_enabled() {
        lines.push(format!(
            "admin token: required{}",
            if state.auth.protect_reads() {
                " (reads included)"
            } else {
                ""
            }
        ));
    } else {
        lines.push("⚠ no admin token set; every route is open".into());
    }

    let width = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    if !state.auth.is_enabled() {
        warn!("ADMIN_TOKEN is not set; session management is unauthenticated");
    }
}
