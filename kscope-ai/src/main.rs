//! AI ingestion service (kscope-ai) - Main entry point
//!
//! Runs one stream worker per inbound AI result stream until Ctrl+C or
//! SIGTERM, then lets every worker finish its current message.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use kscope_ai::consumers::Dispatcher;
use kscope_ai::services::{HttpSearchIndex, NoopSearchIndex, SearchIndex};
use kscope_ai::stream::{SqliteStreamLog, StreamTransport, StreamWorker, WorkerSettings};
use kscope_ai::IngestState;
use kscope_common::config::IngestConfig;
use kscope_common::db::init_database;
use kscope_common::events::streams;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for kscope-ai
#[derive(Parser, Debug)]
#[command(name = "kscope-ai")]
#[command(about = "AI result ingestion service for Kaleidoscope")]
#[command(version)]
struct Args {
    /// Config file (TOML)
    #[arg(short, long, env = "KSCOPE_CONFIG")]
    config: Option<PathBuf>,

    /// Root folder holding the database
    #[arg(short, long, env = "KSCOPE_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Database file, overrides the root folder location
    #[arg(short, long, env = "KSCOPE_DATABASE_PATH")]
    database: Option<PathBuf>,

    /// Consumer name of this instance within the group
    #[arg(long, env = "KSCOPE_CONSUMER_NAME")]
    consumer_name: Option<String>,

    /// Base URL of the search index
    #[arg(long, env = "KSCOPE_SEARCH_INDEX_URL")]
    search_index_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kscope_ai=info,kscope_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = IngestConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(root_folder) = args.root_folder {
        config.root_folder = Some(root_folder);
    }
    if let Some(database) = args.database {
        config.database_path = Some(database);
    }
    if let Some(consumer_name) = args.consumer_name {
        config.consumer_name = Some(consumer_name);
    }
    if let Some(url) = args.search_index_url {
        config.search_index_url = Some(url);
    }

    let db_path = config.database_path();
    info!("Starting Kaleidoscope AI ingestion, database {}", db_path.display());

    let db = init_database(&db_path)
        .await
        .context("Failed to initialize database")?;

    let search_index: Arc<dyn SearchIndex> = match &config.search_index_url {
        Some(url) => {
            info!("Search index at {}", url);
            Arc::new(HttpSearchIndex::new(url).context("Failed to create search index client")?)
        }
        None => {
            warn!("No search index configured, search asset documents are dropped");
            Arc::new(NoopSearchIndex)
        }
    };

    let transport: Arc<dyn StreamTransport> = Arc::new(SqliteStreamLog::new(db.clone()));
    let consumer_name = config.consumer_name();
    let settings = WorkerSettings::from_config(&config, &consumer_name);
    let state = IngestState::new(db, transport.clone(), search_index, config);
    let cancel = state.shutdown.clone();
    let dispatcher = Dispatcher::new(state);

    let mut workers = Vec::with_capacity(streams::INBOUND.len());
    for stream in streams::INBOUND {
        let worker = StreamWorker::new(stream, transport.clone(), dispatcher.clone(), settings.clone());
        let token = cancel.child_token();
        workers.push((stream, tokio::spawn(worker.run(token))));
    }
    info!(consumer = %consumer_name, workers = workers.len(), "Stream workers started");

    shutdown_signal().await;
    cancel.cancel();

    for (stream, handle) in workers {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(stream, error = %err, "Stream worker failed"),
            Err(err) => error!(stream, error = %err, "Stream worker panicked"),
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install signal handler");
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
