mod config;
mod db;
mod error;
mod logger;
mod models;
mod routes;
mod services;
mod state;

use crate::config::AppConfig;
use crate::db::connection::create_pool;
use crate::db::migrate::migrate;
use crate::services::backup_scheduler::BackupTicker;
use crate::state::AppState;
use clap::Parser;
use crm_storage::remote::s3::S3ObjectStore;
use crm_storage::remote::ObjectStore;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// CRM backup and storage server
#[derive(Parser, Debug)]
#[command(name = "crm-backup-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Port to listen on (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (overrides LOG_LEVEL)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::from_env();
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    logger::init(&config.log_level)?;
    config.validate()?;
    tracing::info!("Starting CRM backup server on port {}", config.port);

    if config.cron_secret.is_empty() {
        tracing::warn!("CRON_SECRET is not set, the backup trigger will reject every call");
    }

    std::fs::create_dir_all(&config.local_storage_root)?;
    std::fs::create_dir_all(&config.backups_dir)?;

    // Initialize database
    let pool = create_pool(&config.database_path)?;
    migrate(&pool)?;

    // Remote object store is optional
    let remote: Option<Arc<dyn ObjectStore>> = match &config.s3 {
        Some(s3) => match S3ObjectStore::connect(s3).await {
            Ok(store) => Some(Arc::new(store) as Arc<dyn ObjectStore>),
            Err(e) => {
                tracing::warn!(error = %e, "Remote storage unavailable, continuing without it");
                None
            }
        },
        None => {
            tracing::info!("S3_BUCKET not set, remote storage disabled");
            None
        }
    };

    let state = Arc::new(AppState::new(pool, config.clone(), remote));

    // In-process backup tick
    let ticker = match &config.backup_tick_cron {
        Some(cron) => match start_ticker(state.clone(), cron).await {
            Ok(t) => Some(t),
            Err(e) => {
                tracing::warn!(cron = %cron, error = %e, "Failed to start backup tick");
                None
            }
        },
        None => None,
    };

    let app = routes::create_router(state.clone());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    let cancel = CancellationToken::new();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    tracing::info!("Shutting down...");
    cancel.cancel();

    if let Some(t) = ticker {
        if let Err(e) = t.shutdown().await {
            tracing::warn!("Backup tick shutdown error: {}", e);
        }
    }

    db::connection::close_pool(&state.db);
    tracing::info!("Server stopped");

    Ok(())
}

async fn start_ticker(state: Arc<AppState>, cron: &str) -> anyhow::Result<BackupTicker> {
    let ticker = BackupTicker::new(state).await?;
    ticker.schedule(cron).await?;
    ticker.start().await?;
    Ok(ticker)
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl+c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
        _ = cancel.cancelled() => {}
    }

    cancel.cancel();
}
