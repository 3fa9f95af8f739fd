//! # parley-server
//!
//! One-to-one real-time messaging server.
//!
//! This binary provides:
//! - **REST API** (axum) for accounts, sessions, and the message log
//! - **Push channel** (WebSocket) that delivers presence changes and
//!   freshly committed messages to connected clients
//! - **Presence registry** tracking which users have live connections
//! - **Message relay** that pushes each committed message to the
//!   receiver's live connections, falling back to store-only delivery
//! - **SQLite persistence** for users and per-conversation message logs

mod api;
mod config;
mod error;
mod presence;
mod relay;
mod sessions;
mod throttle;
mod ws;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use parley_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::presence::PresenceRegistry;
use crate::relay::MessageRelay;
use crate::sessions::SessionStore;
use crate::throttle::AuthThrottle;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_server=debug")),
        )
        .init();

    info!("Starting parley server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    let database = match config.db_path {
        Some(ref path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    let store = Arc::new(Mutex::new(database));

    let sessions = Arc::new(SessionStore::new(Duration::from_secs(
        config.session_ttl_secs,
    )));

    let presence = Arc::new(PresenceRegistry::new());
    let relay = Arc::new(MessageRelay::new(presence.clone()));
    let throttle = AuthThrottle::default();

    let app_state = AppState {
        store,
        sessions,
        presence,
        relay,
        throttle: throttle.clone(),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic cleanup: expired sessions and stale throttle windows.
    let sessions = app_state.sessions.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            sessions.purge_expired();
            throttle.purge_stale();
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP server (blocks until shutdown)
    // -----------------------------------------------------------------------
    let http_addr = app_state.config.http_addr;

    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
