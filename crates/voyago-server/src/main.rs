//! # voyago-server
//!
//! Realtime messaging backend for the Voyago tourism platform.
//!
//! This binary provides:
//! - **REST API** (axum) for conversation history and message sending
//!   (multipart, with attachments stored to a local uploads directory)
//! - **WebSocket gateway** tracking per-process presence and pushing
//!   `newMessage` / `getOnlineUsers` events to connected clients
//! - **Cross-process fan-out** over PostgreSQL LISTEN/NOTIFY, so emits
//!   reach clients connected to other server processes sharing the same
//!   database; setup failure degrades to single-process delivery
//! - **Per-IP rate limiting** to protect against abuse

mod api;
mod config;
mod error;
mod rate_limit;
mod uploads;
mod ws;

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use voyago_realtime::{FanoutAdapter, Gateway};
use voyago_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::rate_limit::RateLimiter;
use crate::uploads::UploadStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,voyago_server=debug")),
        )
        .init();

    info!("Starting Voyago messaging server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(
        instance = %config.instance_name,
        http_addr = %config.http_addr,
        fanout_channel = %config.fanout_channel,
        "Loaded configuration"
    );

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    // Message store: the database is required; without it neither history
    // nor sends can work, so failure here is fatal.
    let db = Database::connect(&config.database_url).await?;

    // Fan-out adapter over the same pool.  Setup failure is NOT fatal: the
    // gateway then serves only clients connected to this process.
    let fanout = match FanoutAdapter::connect(db.pool().clone(), &config.fanout_channel).await {
        Ok(adapter) => {
            info!(channel = %config.fanout_channel, origin = %adapter.origin(),
                  "Fan-out adapter connected");
            Some(adapter)
        }
        Err(e) => {
            error!(error = %e, "Fan-out adapter setup failed; \
                   continuing in single-process mode");
            None
        }
    };

    let gateway = Arc::new(Gateway::new(fanout));
    gateway.spawn_fanout_listener();

    // Attachment storage (creates directory if missing)
    let uploads = Arc::new(
        UploadStore::new(config.uploads_dir.clone(), config.max_upload_size).await
            .map_err(|e| anyhow::anyhow!("upload store init failed: {e}"))?,
    );

    let rate_limiter = RateLimiter::default();

    let app_state = AppState {
        db,
        gateway: gateway.clone(),
        uploads,
        rate_limiter: rate_limiter.clone(),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    let limiter = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            limiter.purge_stale(600.0).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP + WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            gateway.shutdown().await;
        }
    }

    Ok(())
}
