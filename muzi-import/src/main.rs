//! muzi-import: listening-history import service
//!
//! `serve` runs the HTTP API used by the web front end. `spotify` and
//! `lastfm` run a single import from the command line.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use muzi_common::config::{database_path, ensure_root_folder, resolve_root_folder, TomlConfig};
use muzi_common::events::ProgressUpdate;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use muzi_import::models::{ImportJob, Platform};
use muzi_import::services::{LastFmImporter, ProgressReporter, SpotifyImporter};
use muzi_import::sources::{self, LastFmClient, LastFmCredentials};
use muzi_import::{build_router, AppState, ImportConfig};

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5780";
const DEFAULT_LOG_FILTER: &str = "muzi_import=info,muzi_common=info,tower_http=info";

#[derive(Parser, Debug)]
#[command(name = "muzi-import")]
#[command(about = "Listening history import service for muzi")]
#[command(version)]
struct Cli {
    /// Data root folder (holds muzi.db)
    #[arg(long, global = true)]
    root_folder: Option<PathBuf>,

    /// TOML config file
    #[arg(short, long, global = true, env = "MUZI_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API (default)
    Serve {
        /// Port on 127.0.0.1; overrides --bind
        #[arg(short, long, env = "MUZI_IMPORT_PORT")]
        port: Option<u16>,

        /// Full bind address, e.g. 0.0.0.0:5780
        #[arg(long, env = "MUZI_IMPORT_BIND")]
        bind: Option<String>,
    },
    /// Import Spotify extended streaming history files
    Spotify {
        #[arg(long)]
        user_id: i64,

        /// Export JSON files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Import scrobbles from a LastFM account
    Lastfm {
        #[arg(long)]
        user_id: i64,

        #[arg(long)]
        username: String,

        #[arg(long, env = "LASTFM_API_KEY")]
        api_key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let toml_config = TomlConfig::load_or_default(cli.config.as_deref())?;

    let default_filter = toml_config.log_level.as_deref().unwrap_or(DEFAULT_LOG_FILTER);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting muzi-import v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let import_config = ImportConfig::resolve(toml_config.import.as_ref())?;

    let root_folder = resolve_root_folder(cli.root_folder.as_deref(), &toml_config);
    ensure_root_folder(&root_folder)?;
    let db_path = database_path(&root_folder);
    info!("Database: {}", db_path.display());
    let db = muzi_common::db::init_database(&db_path)
        .await
        .context("Failed to open database")?;

    match cli.command.unwrap_or(Command::Serve {
        port: None,
        bind: None,
    }) {
        Command::Serve { port, bind } => {
            let addr = match (port, bind, toml_config.bind_addr) {
                (Some(port), _, _) => format!("127.0.0.1:{}", port),
                (None, Some(bind), _) => bind,
                (None, None, Some(bind)) => bind,
                (None, None, None) => DEFAULT_BIND_ADDR.to_string(),
            };
            serve(db, import_config, &addr).await
        }
        Command::Spotify { user_id, files } => import_spotify_files(db, import_config, user_id, files).await,
        Command::Lastfm {
            user_id,
            username,
            api_key,
        } => {
            let credentials = LastFmCredentials { username, api_key };
            import_lastfm_account(db, import_config, user_id, credentials).await
        }
    }
}

async fn serve(db: SqlitePool, config: ImportConfig, addr: &str) -> Result<()> {
    let state = AppState::new(db, config);
    let jobs = state.jobs.clone();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            jobs.cancel_all().await;
        })
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn import_spotify_files(
    db: SqlitePool,
    config: ImportConfig,
    user_id: i64,
    files: Vec<PathBuf>,
) -> Result<()> {
    let mut buffers = Vec::with_capacity(files.len());
    for path in &files {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        buffers.push((name, data));
    }

    let report = sources::decode_exports_blocking(buffers, user_id)
        .await
        .context("Export decoding aborted")?;
    for (name, e) in &report.failures {
        warn!("Skipped {}: {}", name, e);
    }
    if report.all_failed() {
        bail!("none of the given files is a valid Spotify export");
    }

    let (mut reporter, rx) = ProgressReporter::new(ImportJob::new(user_id, Platform::Spotify));
    let logger = tokio::spawn(log_progress(rx));
    let cancel = cancel_on_ctrl_c();

    let importer = SpotifyImporter::new(db, &config);
    let result = importer.run(user_id, report.events, &mut reporter, &cancel).await;
    drop(reporter);
    logger.await.ok();

    let last = result?;
    info!("{} tracks imported from Spotify for user {}", last.tracks_imported, user_id);
    Ok(())
}

async fn import_lastfm_account(
    db: SqlitePool,
    config: ImportConfig,
    user_id: i64,
    credentials: LastFmCredentials,
) -> Result<()> {
    let client = LastFmClient::new(&config, credentials, user_id)?;
    let username = client.username().to_string();

    let (mut reporter, rx) = ProgressReporter::new(ImportJob::new(user_id, Platform::LastFm));
    let logger = tokio::spawn(log_progress(rx));
    let cancel = cancel_on_ctrl_c();

    let importer = LastFmImporter::new(db, &config);
    let result = importer
        .run(user_id, Arc::new(client), &mut reporter, &cancel)
        .await;
    drop(reporter);
    logger.await.ok();

    let last = result?;
    info!("{} tracks imported from LastFM for user {}", last.tracks_imported, username);
    Ok(())
}

/// Log every progress snapshot until the reporter goes away
async fn log_progress(mut rx: watch::Receiver<ProgressUpdate>) {
    while rx.changed().await.is_ok() {
        let update = rx.borrow_and_update().clone();
        info!(
            "Progress: {}/{} units ({:.0}%), {} tracks imported",
            update.completed_units,
            update.total_units,
            update.percentage(),
            update.tracks_imported
        );
        if update.is_terminal() {
            break;
        }
    }
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, cancelling import");
            token.cancel();
        }
    });
    cancel
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
