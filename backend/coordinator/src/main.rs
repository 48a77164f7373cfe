//! Bounty coordinator entry point.
//!
//! Wallets fund and act on bounties through the escrow contract; this
//! service prepares their calls, waits for the transactions to confirm and
//! mirrors the outcome into SQLite, where the REST API serves it.

mod amount;
mod api;
mod config;
mod coordinator;
mod db;
mod errors;
mod ledger;
mod lifecycle;
mod model;
mod validate;

use std::sync::Arc;

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use coordinator::Coordinator;
use ledger::rpc::JsonRpcLedger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    let pool = db::init_pool(&config.database_url, &config.pool).await?;

    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;
    let ledger = Arc::new(JsonRpcLedger::new(
        client,
        config.rpc_url.clone(),
        config.escrow_address.clone(),
        config.confirmation.required_confirmations,
    ));
    info!(
        "Escrow {} via {} ({} confirmation(s))",
        config.escrow_address, config.rpc_url, config.confirmation.required_confirmations
    );

    // Cancelled on Ctrl-C: in-flight confirmation waits give up and the
    // server drains.
    let shutdown = CancellationToken::new();
    let coordinator = Coordinator::new(
        pool,
        ledger,
        config.policy.clone(),
        config.confirmation.clone(),
        shutdown.clone(),
    );

    // ─── REST API ─────────────────────────────────────────
    let api_state = Arc::new(api::ApiState { coordinator });
    let app = api::router(api_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
