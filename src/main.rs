use dotenvy::dotenv;
use log::{error, info};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use storebot::gate::{CannedResponder, LogOnlyDelivery};
use storebot::shared::config::AppConfig;
use storebot::shared::state::AppState;
use storebot::shared::utils::create_conn;
use storebot::{identity, ingest, ledger, schema_guard, tenancy};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .write_style(env_logger::WriteStyle::Always)
        .init();

    let config = AppConfig::from_env()?;

    let pool = match create_conn(&config.database) {
        Ok(pool) => pool,
        Err(e) => {
            error!("failed to create database pool: {e}");
            return Err(e.into());
        }
    };

    // Reconcile live schema to the declared shape before taking traffic.
    // Partial repair failures are logged and tolerated; an unusable store is not.
    schema_guard::ensure_schema(&pool)?;

    let state = Arc::new(AppState {
        conn: pool,
        responder: Arc::new(CannedResponder {
            reply: config.responder.canned_reply.clone(),
        }),
        delivery: Arc::new(LogOnlyDelivery),
        config: config.clone(),
    });

    let app = axum::Router::new()
        .merge(ingest::configure_webhook_routes())
        .merge(tenancy::configure_tenancy_routes())
        .merge(identity::configure_identity_routes())
        .merge(ledger::configure_ledger_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("starting HTTP server on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
