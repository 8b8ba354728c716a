//! DSAGrind authentication API server.
//!
//! Serves the `/api/auth` routes. Uses PostgreSQL when a database URL is
//! given, otherwise keeps users in memory.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dsagrind_api::AppState;
use dsagrind_api::config::ApiConfig;
use dsagrind_api::services::default_collaborators;
use dsagrind_core::cache::MemoryCache;
use dsagrind_core::store::{MemoryUserStore, PgUserStore, UserStore};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DEFAULT_LOG_FILTER: &str = "info,dsagrind_api=debug,dsagrind_core=debug";
const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// CLI arguments for the API server.
#[derive(Parser, Debug)]
#[command(name = "dsagrind_api_server", about = "DSAGrind authentication API server")]
struct Args {
    /// Port to listen on; overrides the port in `BIND_ADDR` (0 = ephemeral).
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// PostgreSQL connection URL. Users are kept in memory when unset.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 5)]
    max_connections: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let args = Args::parse();
    let mut config = ApiConfig::from_env();
    if let Some(url) = args.database_url {
        config.pg_connection_url = Some(url);
    }
    if let Some(port) = args.port {
        let host = config
            .bind_addr
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| "127.0.0.1".into());
        config.bind_addr = format!("{host}:{port}");
    }

    info!(
        bind_addr = %config.bind_addr,
        oauth_providers = ?config.oauth.configured_providers(),
        "starting dsagrind_api_server"
    );

    let store: Arc<dyn UserStore> = match &config.pg_connection_url {
        Some(url) => {
            info!(max_connections = args.max_connections, "connecting to PostgreSQL");
            let pool = PgPoolOptions::new()
                .max_connections(args.max_connections)
                .acquire_timeout(Duration::from_secs(30))
                .connect(url)
                .await?;
            info!("running database migrations");
            dsagrind_api::migrate(&pool).await?;
            Arc::new(PgUserStore::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set, users are kept in memory and lost on exit");
            Arc::new(MemoryUserStore::new())
        }
    };

    let cache = Arc::new(MemoryCache::new());
    let sweeper = cache.spawn_cleanup_task(CACHE_SWEEP_INTERVAL);

    let deps = default_collaborators(&config, store, cache);
    let state = AppState::new(config.clone(), deps);
    let app = dsagrind_api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "REST API listening");

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
                return;
            }
            info!("shutdown requested");
            shutdown.cancel();
        }
    });

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await?;

    sweeper.abort();
    info!("server stopped");
    Ok(())
}
