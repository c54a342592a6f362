use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use crumble_metrics::ServerMetrics;
use crumble_server::{AppState, router};
use crumble_storage::memory::MemoryStorage;
use crumble_storage::postgres::PostgresStorage;

#[derive(Parser)]
#[command(name = "crumble", about = "Terrain server for streaming, persistent, destructible worlds")]
pub struct Args {
    /// Address the HTTP server binds to
    #[arg(short, long, env = "CRUMBLE_LISTEN", default_value = "0.0.0.0:4000")]
    pub listen: SocketAddr,

    /// Postgres connection string. Worlds are kept in memory when absent.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Generated chunks kept in memory (0 disables the cache)
    #[arg(long, default_value_t = 256)]
    pub cache_size: usize,

    /// Connection attempts before giving up on the database
    #[arg(long, default_value_t = 30)]
    pub connect_retries: u32,
}

async fn connect(url: &str, retries: u32) -> Result<PostgresStorage> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match PostgresStorage::connect(url).await {
            Ok(storage) => return Ok(storage),
            Err(e) if attempt < retries => {
                warn!("Failed to connect to storage: {:#}. Retrying {}/{} in 2s...", e, attempt, retries);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Could not connect to storage after {} attempts", attempt));
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let summary = format!(
        "Storage: {} | Cache: {} chunks",
        if args.database_url.is_some() { "postgres" } else { "memory" },
        args.cache_size
    );
    let metrics = Arc::new(ServerMetrics::new(summary));

    let state = match &args.database_url {
        Some(url) => {
            info!("Connecting to storage...");
            let storage = Arc::new(connect(url, args.connect_retries.max(1)).await?);
            AppState::new(storage, args.cache_size, metrics.clone())
        }
        None => {
            warn!("DATABASE_URL not set, terrain edits will not survive a restart");
            AppState::new(Arc::new(MemoryStorage::new()), args.cache_size, metrics.clone())
        }
    };

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("Failed to bind {}", args.listen))?;
    info!("Crumble listening on {}", args.listen);

    axum::serve(listener, router(Arc::new(state)))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await
        .context("Server error")?;

    info!("Shutting down\n{}", metrics.generate_report());
    Ok(())
}
