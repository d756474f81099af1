use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

mod admission;
mod channel;
mod commands;
mod config;
mod dispatcher;
mod error;
mod handlers;
mod metrics;
mod models;
mod persistence;
mod pods;
mod registry;
mod relay;
mod service;
#[cfg(test)]
mod test_helpers;

use crate::admission::AdmissionController;
use crate::channel::MessageChannel;
use crate::channel::telegram::{TelegramChannel, build_bot, run_bot};
use crate::config::{
    AdmissionConfig, DispatchConfig, FileConfig, StorageConfig, TelegramConfig, TelezooConfig,
};
use crate::dispatcher::Dispatcher;
use crate::handlers::StatusState;
use crate::metrics::RelayMetrics;
use crate::persistence::{CheckpointService, UserDb};
use crate::pods::PodDirectory;
use crate::registry::SessionStore;
use crate::service::RelayService;

#[derive(Parser)]
#[command(name = "telezoo")]
#[command(about = "Telegram relay to a pool of inference pods")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Custom data directory (defaults to ~/.telezoo)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot in the foreground (default)
    Run,

    /// List stored users
    Users(UsersArgs),

    /// Validate and print the configured pods
    Pods,
}

#[derive(Parser)]
struct UsersArgs {
    /// Output as JSON, one user per line
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = TelezooConfig::new(cli.data_dir.clone())?;

    // Values already in the environment win over both files
    if let Err(e) = dotenvy::from_path(config.dotenv_path())
        && !e.not_found()
    {
        return Err(e).context("Failed to read .env in data directory");
    }
    dotenvy::dotenv().ok();

    match cli.command {
        None | Some(Commands::Run) => run(config, cli.debug).await,
        Some(Commands::Users(args)) => users_command(&config, args.json),
        Some(Commands::Pods) => pods_command(&config),
    }
}

fn load_file_config(config: &TelezooConfig) -> Result<FileConfig> {
    config::load_config(&config.data_dir)
        .extract()
        .with_context(|| {
            format!(
                "Failed to load configuration (config file: {})",
                config.config_toml_path().display()
            )
        })
}

fn init_logging(config: &TelezooConfig, debug: bool) -> Result<()> {
    let default_directive = if debug {
        "telezoo=debug,pod_client=debug,tower_http=debug,info"
    } else {
        "telezoo=info,pod_client=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    let log_path = config.log_path();
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file: {}", log_path.display()))?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(log_file)),
        )
        .with(env_filter)
        .init();
    Ok(())
}

async fn run(config: TelezooConfig, debug: bool) -> Result<()> {
    init_logging(&config, debug)?;

    info!("Starting telezoo");
    info!("Data directory: {}", config.data_dir.display());

    let file_config = load_file_config(&config)?;
    let telegram_config = TelegramConfig::from_file(&file_config.telegram)?;
    let dispatch_config = DispatchConfig::from_file(&file_config.dispatch);
    let admission_config = AdmissionConfig::from_file(&file_config.admission);
    let storage_config = StorageConfig::from_file(&file_config.storage);
    let messages = Arc::new(file_config.messages.clone());

    let pods = Arc::new(PodDirectory::new(file_config.pods.pools())?);
    for mode in models::Mode::ALL {
        info!("{} pods: {}", mode, pods.pods_for(mode).join(", "));
    }

    // Restore users
    let store = Arc::new(SessionStore::new(pods));
    let db = UserDb::new(&config.db_path);
    let records = db
        .load_all()
        .with_context(|| format!("Failed to load users from {}", db.path().display()))?;
    let report = store.restore(records);
    if store.is_empty() {
        info!("No stored users in {}", db.path().display());
    } else {
        info!(
            "Restored {} users ({} reset to idle, {} moved to a new pod)",
            report.loaded, report.reset, report.migrated
        );
    }

    let metrics = Arc::new(RelayMetrics::new());
    let cancel = CancellationToken::new();

    let checkpoint = Arc::new(CheckpointService::new(
        db,
        store.clone(),
        storage_config.checkpoint_interval,
    ));
    checkpoint.clone().start(cancel.clone());

    let backend = Arc::new(
        pod_client::PodClient::new(dispatch_config.pod_client_config())
            .context("Failed to build pod HTTP client")?,
    );
    let bot = build_bot(&telegram_config.token)?;
    let channel: Arc<dyn MessageChannel> =
        Arc::new(TelegramChannel::new(bot.clone(), telegram_config.parse_mode));

    let admission = Arc::new(AdmissionController::new(
        store.clone(),
        admission_config,
        metrics.clone(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        backend,
        channel.clone(),
        dispatch_config,
        messages.clone(),
        metrics.clone(),
    ));
    let service = Arc::new(RelayService::new(
        store.clone(),
        admission,
        dispatcher,
        channel,
        messages,
        metrics.clone(),
    ));

    if file_config.server.enabled {
        let addr = format!("{}:{}", file_config.server.host, file_config.server.port)
            .parse::<SocketAddr>()
            .context("Invalid status server address")?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind status server on {}", addr))?;
        info!("Status server listening on http://{}", listener.local_addr()?);

        let app = handlers::router(StatusState {
            store: store.clone(),
            metrics: metrics.clone(),
        });
        let shutdown = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                error!("Status server error: {}", e);
            }
        });
    }

    tokio::spawn(shutdown_signal(cancel.clone()));

    run_bot(bot, service, cancel.clone()).await;
    cancel.cancel();

    // Perform cleanup after shutdown
    info!("Saving users...");
    match checkpoint.checkpoint() {
        Ok(n) => info!("Saved {} users", n),
        Err(e) => warn!("Failed to save users during shutdown: {:#}", e),
    }

    let snapshot = metrics.snapshot();
    info!(
        "Handled {} messages, {} jobs finished, {} abandoned, uptime {}s",
        snapshot.users.messages_received,
        snapshot.jobs.finished,
        snapshot.jobs.abandoned,
        snapshot.uptime_secs
    );

    info!("Shutdown complete");
    Ok(())
}

/// Cancel `cancel` on the first termination signal.
#[cfg(unix)]
async fn shutdown_signal(cancel: CancellationToken) {
    use tokio::signal::unix::{SignalKind, signal};

    let kinds = [
        ("SIGINT", SignalKind::interrupt()),
        ("SIGTERM", SignalKind::terminate()),
        ("SIGHUP", SignalKind::hangup()),
        ("SIGQUIT", SignalKind::quit()),
    ];
    let mut streams = Vec::new();
    for (name, kind) in kinds {
        match signal(kind) {
            Ok(stream) => streams.push((name, stream)),
            Err(e) => warn!("Failed to install {} handler: {}", name, e),
        }
    }

    let (tx, mut rx) = tokio::sync::mpsc::channel::<&'static str>(1);
    for (name, mut stream) in streams {
        let tx = tx.clone();
        tokio::spawn(async move {
            if stream.recv().await.is_some() {
                let _ = tx.send(name).await;
            }
        });
    }
    drop(tx);

    tokio::select! {
        Some(name) = rx.recv() => info!("Received {}, shutting down...", name),
        _ = cancel.cancelled() => return,
    }
    cancel.cancel();
}

#[cfg(not(unix))]
async fn shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for Ctrl+C: {}", e);
                return;
            }
            info!("Received Ctrl+C, shutting down...");
        }
        _ = cancel.cancelled() => return,
    }
    cancel.cancel();
}

fn users_command(config: &TelezooConfig, json: bool) -> Result<()> {
    let db = UserDb::new(&config.db_path);
    let mut users = db
        .load_all()
        .with_context(|| format!("Failed to load users from {}", db.path().display()))?;
    users.sort_by_key(|u| u.channel_id);

    if json {
        for user in &users {
            println!("{}", serde_json::to_string(user)?);
        }
        return Ok(());
    }

    if users.is_empty() {
        println!("No users in {}", db.path().display());
        return Ok(());
    }

    println!(
        "{:<14} {:<20} {:<6} {:<38} {}",
        "CHANNEL", "USERNAME", "MODE", "SESSION", "POD"
    );
    for user in &users {
        println!(
            "{:<14} {:<20} {:<6} {:<38} {}",
            user.channel_id.to_string(),
            user.username.as_deref().unwrap_or("-"),
            user.mode.as_str(),
            if user.session_id.is_empty() {
                "-"
            } else {
                &user.session_id
            },
            user.server
        );
    }
    println!("{} users", users.len());
    Ok(())
}

fn pods_command(config: &TelezooConfig) -> Result<()> {
    let file_config = load_file_config(config)?;
    let pods = PodDirectory::new(file_config.pods.pools())?;
    for mode in models::Mode::ALL {
        println!("{}:", mode);
        for pod in pods.pods_for(mode) {
            println!("  {}", pod);
        }
    }
    Ok(())
}
