//! Ad-slot broker
//!
//! A Telegram bot where channel owners list ad slots and advertisers buy
//! them. Conversations run through a pure state machine; orders move
//! through a guarded lifecycle backed by SQLite.

mod api;
mod channels;
mod config;
mod db;
mod domain;
mod error;
mod gate;
mod messaging;
mod notify;
mod orders;
mod runtime;
mod session;
mod state_machine;
mod telegram;

use api::{create_router, AppState};
use config::BrokerConfig;
use db::Database;
use orders::SimulatedGateway;
use runtime::poller::{run_expiry, run_poller};
use runtime::{Broker, CallGuard, DatabaseLedger, Guarded};
use session::InMemorySessionStore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use telegram::TelegramClient;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const EXPIRY_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "adslot_broker=info,tower_http=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = BrokerConfig::from_env()?;

    // Ensure database directory exists
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    tracing::info!(path = %config.db_path.display(), "Opening database");
    let db = Database::open(&config.db_path)?;

    let guard = CallGuard::new(config.worker_pool, config.call_timeout);
    let ledger = Arc::new(Guarded::new(DatabaseLedger::new(db), guard.clone()));
    let telegram = Arc::new(
        TelegramClient::connect(&config.api_base, &config.bot_token, config.poll_timeout).await?,
    );
    let messenger = Arc::new(Guarded::new(telegram.clone(), guard));
    let sessions = Arc::new(InMemorySessionStore::new());

    let broker = Arc::new(Broker::new(
        ledger.clone(),
        messenger,
        sessions.clone(),
        Arc::new(SimulatedGateway),
        config.admins.clone(),
    ));
    tracing::info!(
        admins = config.admins.len(),
        workers = config.worker_pool,
        call_timeout = ?config.call_timeout,
        "Broker ready"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Could not listen for shutdown signal");
                return;
            }
            tracing::info!("Shutdown requested");
            shutdown.cancel();
        }
    });

    let poller = tokio::spawn(run_poller(
        telegram,
        broker.clone(),
        config.worker_pool,
        shutdown.clone(),
    ));
    let expiry = tokio::spawn(run_expiry(
        broker.lifecycle().clone(),
        config.post_retention,
        EXPIRY_INTERVAL,
        shutdown.clone(),
    ));

    // Start server
    let app = create_router(AppState::new(ledger, sessions));
    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    tracing::info!("Status server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move { shutdown.cancelled().await }
        })
        .await?;

    poller.await?;
    expiry.await?;
    tracing::info!("Stopped");
    Ok(())
}
