//! Payrail Server
//!
//! Runs the payment lifecycle engine behind a thin HTTP API.

mod api;
mod config;
mod engine;
mod server;
mod shutdown;
mod state;

use clap::Parser;
use config::{ConfigLoader, get_database_url};
use engine::{Backends, Engine};
use server::{build_router, run_server};
use shutdown::spawn_config_reload_handler;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Payrail - payment lifecycle engine
#[derive(Parser, Debug)]
#[command(name = "payrail-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "PAYRAIL_CONFIG", default_value = "./payrail.toml")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long, env = "PAYRAIL_LISTEN")]
    listen: Option<SocketAddr>,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "PAYRAIL_LOG_JSON", default_value = "false")]
    log_json: bool,

    /// Use in-process stores seeded from the [dev] section instead of Postgres
    #[arg(long, default_value = "false")]
    in_memory: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    tracing::info!("Starting payrail-server v{}", env!("CARGO_PKG_VERSION"));

    let config_loader = Arc::new(ConfigLoader::new(&args.config, args.listen));
    let loaded_config = config_loader
        .load()
        .inspect_err(|e| tracing::error!(error = %e, path = ?args.config, "Invalid configuration"))?;
    let listen_addr = loaded_config.server.listen;
    tracing::info!(path = ?args.config, "Configuration loaded");

    let (backends, db_pool) = if args.in_memory {
        tracing::warn!("Running with in-memory stores, nothing is persisted");
        (Backends::in_memory(&loaded_config.dev).await, None)
    } else {
        let db_pool = connect_postgres(args.migrate).await?;
        (Backends::postgres(db_pool.clone()), Some(db_pool))
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine = Engine::start(&loaded_config, backends, shutdown_rx)?;

    // SIGHUP pushes a fresh risk policy into the running processor.
    let reload_notify = spawn_config_reload_handler(config_loader, engine.risk_policy.clone());

    let router = build_router(engine.state.clone());

    let result = run_server(router, listen_addr).await;

    reload_notify.notify_one();

    tracing::info!("Stopping background processors...");
    if shutdown_tx.send(true).is_err() {
        tracing::debug!("Background processors already stopped");
    }
    engine.join().await;

    if let Some(db_pool) = db_pool {
        tracing::info!("Closing database connections...");
        db_pool.close().await;
    }
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

/// Open the pool from `DATABASE_URL`, optionally applying migrations.
async fn connect_postgres(migrate: bool) -> anyhow::Result<PgPool> {
    let database_url = get_database_url().inspect_err(|e| tracing::error!(error = %e, "No database configured"))?;

    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .inspect_err(|e| tracing::error!(error = %e, "Postgres connection failed"))?;
    tracing::info!("Postgres pool ready");

    if migrate {
        sqlx::migrate!("../migrations")
            .run(&db_pool)
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Migration failed"))?;
        tracing::info!("Schema migrated");
    }
    Ok(db_pool)
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
