mod config_commands;
mod session_commands;

use std::path::PathBuf;

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    tokio_util::sync::CancellationToken,
    tracing::{error, info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use paird_config::{PairdConfig, Severity};

#[derive(Parser)]
#[command(name = "paird", about = "paird: WhatsApp session gateway", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery in ./ and ~/.config/paird/).
    #[arg(long, global = true, env = "PAIRD_CONFIG")]
    config: Option<PathBuf>,
    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,
    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,
    /// Session storage directory (overrides config value).
    #[arg(long, global = true)]
    sessions_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server (default when no subcommand is provided).
    Serve,
    /// Inspect or remove stored sessions.
    Sessions {
        #[command(subcommand)]
        action: session_commands::SessionAction,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// File (explicit or discovered), then environment, then command-line flags.
fn resolve_config(cli: &Cli) -> anyhow::Result<PairdConfig> {
    let mut config = match &cli.config {
        Some(path) => paird_config::load_config(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => paird_config::discover_and_load(),
    };
    paird_config::apply_env_overrides(&mut config);
    apply_cli_overrides(cli, &mut config);
    Ok(config)
}

fn apply_cli_overrides(cli: &Cli, config: &mut PairdConfig) {
    if let Some(bind) = &cli.bind {
        config.server.bind = bind.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(dir) = &cli.sessions_dir {
        config.sessions.dir = dir.clone();
    }
}

/// Cancelled on Ctrl-C or SIGTERM.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        trigger.cancel();
    });
    token
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {},
                _ = term.recv() => {},
            }
        },
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
        },
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

async fn serve(config: PairdConfig) -> anyhow::Result<()> {
    let diagnostics = paird_config::validate(&config);
    for d in &diagnostics {
        match d.severity {
            Severity::Error => error!(path = d.path, "{}", d.message),
            Severity::Warning => warn!(path = d.path, "{}", d.message),
        }
    }
    let errors = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .count();
    if errors > 0 {
        anyhow::bail!("configuration has {errors} error(s); run `paird config check`");
    }

    paird_gateway::start_gateway(config, shutdown_token()).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "paird starting");

    let config = resolve_config(&cli)?;

    match cli.command {
        None | Some(Commands::Serve) => serve(config).await,
        Some(Commands::Sessions { action }) => {
            session_commands::handle_sessions(action, &config).await
        },
        Some(Commands::Config { action }) => config_commands::handle_config(action, &config),
    }
}
