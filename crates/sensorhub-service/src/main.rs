//! Sensorhub Service - Gateway ingestion, aggregation and HTTP API.
//!
//! Run with: `cargo run -p sensorhub-service`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use sensorhub_service::{AppState, Config, Scheduler, api, ws};
use sensorhub_store::Store;

/// Sensorhub Service - Gateway ingestion, aggregation and HTTP API.
#[derive(Parser, Debug)]
#[command(name = "sensorhub-service")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long)]
    bind: Option<String>,

    /// Database path (overrides config).
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Separate bind address for gateway pushes (overrides config).
    #[arg(long)]
    ingest_bind: Option<String>,

    /// Disable scheduled aggregation.
    #[arg(long)]
    no_scheduler: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sensorhub_service=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default().unwrap_or_default(),
    };

    // Override config with CLI args
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(db_path) = args.database {
        config.storage.path = db_path;
    }
    if let Some(ingest_bind) = args.ingest_bind {
        config.ingest.bind = Some(ingest_bind);
    }
    if args.no_scheduler {
        config.aggregation.interval_secs = None;
    }
    config.validate()?;

    info!("Opening database at {:?}", config.storage.path);
    let store = Store::open(&config.storage.path)
        .with_context(|| format!("opening database at {}", config.storage.path.display()))?;

    let state = AppState::new(store, config.clone());
    let cancel = CancellationToken::new();

    let sweeper = state
        .dedup
        .spawn_sweeper(config.ingest.sweep_interval(), cancel.clone());
    let scheduler = Scheduler::new(Arc::clone(&state)).start(cancel.clone());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = Router::new().merge(api::router()).merge(ws::router());
    let ingest_addr: Option<SocketAddr> = match &config.ingest.bind {
        Some(bind) => Some(bind.parse()?),
        None => {
            // Without a dedicated listener, gateways push to the main one
            app = app.merge(api::ingest_router());
            None
        }
    };
    let app = app
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::clone(&state));

    let ingest_server = match ingest_addr {
        Some(addr) => {
            let gateway_app = api::ingest_router()
                .layer(TraceLayer::new_for_http())
                .with_state(Arc::clone(&state));
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("binding ingest listener on {}", addr))?;
            info!("Accepting gateway pushes on {}", addr);

            let shutdown = cancel.clone();
            Some(tokio::spawn(async move {
                axum::serve(listener, gateway_app)
                    .with_graceful_shutdown(async move { shutdown.cancelled().await })
                    .await
            }))
        }
        None => None,
    };

    let addr: SocketAddr = config.server.bind.parse()?;
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding server on {}", addr))?;
    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Shutdown requested"),
                _ = shutdown.cancelled() => {}
            }
        })
        .await?;

    cancel.cancel();
    if let Some(handle) = ingest_server {
        handle.await??;
    }
    if let Some(handle) = scheduler {
        handle.await?;
    }
    sweeper.await?;

    info!("Service stopped");
    Ok(())
}
