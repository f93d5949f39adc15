//! Main Entrypoint for the Parley API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing the database connection pool and running migrations.
//! 3. Wiring the room gateway, token issuer, and session orchestrator.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use parley_api::{config::Config, db::Db, router::create_router, state::AppState};
use parley_core::{
    orchestrator::SessionOrchestrator,
    room::HttpRoomGateway,
    token::{ApiCredentials, TokenIssuer},
    webhook::WebhookReceiver,
};
use sqlx::PgPool;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Database ---
    let pool = PgPool::connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    let db = Arc::new(Db::new(pool));
    db.run_migrations().await?;
    info!("Database connection established and migrations are up-to-date.");

    // --- 4. Wire Shared Services ---
    // Missing credentials fail here, at startup, by design.
    let credentials = ApiCredentials::new(
        config.room_server_api_key.clone(),
        config.room_server_api_secret.clone(),
    )
    .context("Room server credentials are not configured")?;
    let issuer = TokenIssuer::new(credentials.clone());
    let gateway = Arc::new(HttpRoomGateway::new(
        &config.room_server_url,
        issuer.clone(),
    ));
    let webhook_receiver = WebhookReceiver::new(credentials);

    let orchestrator = Arc::new(SessionOrchestrator::new(
        gateway,
        db.clone(),
        db.clone(),
        issuer,
        config.room_server_url.clone(),
    ));

    let app_state = Arc::new(AppState {
        db,
        orchestrator,
        webhook_receiver,
        config: Arc::new(config.clone()),
    });

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        room_server = %config.room_server_url,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
