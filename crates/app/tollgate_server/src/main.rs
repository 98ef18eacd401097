//! Tollgate server binary.
//!
//! Reads `TOLLGATE_*` configuration from the environment (and `.env`),
//! connects to PostgreSQL, runs migrations and serves the API until SIGINT or
//! SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tollgate_api::config::ApiConfig;
use tollgate_core::store::{IdentityStore, MemoryStore, PgStore};

/// CLI arguments. Flags override the corresponding environment variables.
#[derive(Parser, Debug)]
#[command(name = "tollgate_server", about = "Tollgate identity and token server")]
struct Args {
    /// Address to listen on (overrides TOLLGATE_BIND_ADDR).
    #[arg(long)]
    bind: Option<String>,

    /// PostgreSQL connection URL (overrides TOLLGATE_DATABASE_URL).
    #[arg(long)]
    database_url: Option<String>,

    /// Maximum number of database connections in the pool.
    #[arg(long, env = "TOLLGATE_DB_MAX_CONNECTIONS", default_value_t = 10)]
    max_connections: u32,

    /// Do not run embedded migrations at start-up.
    #[arg(long, default_value_t = false)]
    skip_migrations: bool,

    /// Keep all state in memory. Data is lost on exit.
    #[arg(long, default_value_t = false)]
    in_memory: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,tollgate_api=debug,tollgate_core=debug")
            }),
        )
        .init();

    let args = Args::parse();

    let mut config = ApiConfig::from_env()?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(url) = args.database_url {
        config.database_url = Some(url);
    }

    info!(
        version = tollgate_core::version(),
        bind = %config.bind_addr,
        in_memory = args.in_memory,
        "starting tollgate_server"
    );

    let store: Arc<dyn IdentityStore> = if args.in_memory {
        warn!("using the in-memory store; nothing is persisted");
        Arc::new(MemoryStore::new())
    } else {
        let url = config
            .database_url
            .clone()
            .ok_or("TOLLGATE_DATABASE_URL (or --database-url) is required")?;
        info!(max_connections = args.max_connections, "configuring connection pool");
        let pool = PgPoolOptions::new()
            .max_connections(args.max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&url)
            .await?;
        if args.skip_migrations {
            info!("skipping database migrations");
        } else {
            info!("running database migrations");
            tollgate_api::migrate(&pool).await?;
        }
        Arc::new(PgStore::new(pool))
    };

    let shutdown_timeout = Duration::from_secs(config.shutdown_timeout_secs);
    let state = tollgate_api::AppState::new(config, store)?;
    let bind_addr = state.config.bind_addr.clone();
    let app = tollgate_api::router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %listener.local_addr()?, "API listening");

    let shutdown = CancellationToken::new();
    let watcher = tokio::spawn(watch_signals(shutdown.clone()));

    let server = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        }
    });
    let abort = server.abort_handle();

    // Once shutdown starts, in-flight requests get a bounded drain period.
    let result = tokio::select! {
        result = server => Some(result),
        _ = async {
            shutdown.cancelled().await;
            tokio::time::sleep(shutdown_timeout).await;
        } => None,
    };
    match result {
        Some(joined) => joined??,
        None => {
            warn!(timeout_secs = shutdown_timeout.as_secs(), "shutdown timed out, closing remaining connections");
            abort.abort();
        }
    }

    shutdown.cancel();
    watcher.await?;
    info!("tollgate_server stopped");
    Ok(())
}

/// Cancels `shutdown` on SIGINT or SIGTERM, or when the server stops on its
/// own.
async fn watch_signals(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();
}
