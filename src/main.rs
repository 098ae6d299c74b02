//! Redemption Key Server - Main Application Entry Point
//!
//! A Discord bot that lets server owners mint single-use keys and lets any
//! member redeem a key for the buyer role. Temporary keys grant the role for
//! a limited number of minutes, after which it is removed automatically.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (Discord interactions endpoint + keep-alive page)
//! - **Database**: SQLite with sqlx (async queries)
//! - **Authentication**: Ed25519 signature on every interaction
//! - **Platform**: Discord REST API via reqwest
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Create database connection pool
//! 3. Create or upgrade the schema
//! 4. Build the Discord client and key service
//! 5. Re-arm role expiries that were pending at shutdown
//! 6. Register slash commands (when an application id is configured)
//! 7. Start server on configured port

mod config;
mod db;
mod error;
mod handlers;
mod middleware;
mod models;
mod services;
mod state;
#[cfg(test)]
mod test_support;

use std::{sync::Arc, time::Duration};

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use ed25519_dalek::VerifyingKey;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::{
    services::{
        discord::DiscordClient,
        expiry::{ExpiryScheduler, RetryPolicy},
        key_store::SqliteKeyStore,
        lifecycle::KeyService,
    },
    state::AppState,
};

/// Build the HTTP router.
///
/// `/interactions` sits behind signature verification; `/` and `/health`
/// are public.
pub(crate) fn router(state: AppState, public_key: VerifyingKey) -> Router {
    let signed_routes = Router::new()
        .route(
            "/interactions",
            post(handlers::interactions::handle_interaction),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            public_key,
            middleware::signature::verify_signature,
        ));

    Router::new()
        .route("/", get(handlers::health::index))
        .route("/health", get(handlers::health::health_check))
        .merge(signed_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with tracing subscriber. Reads RUST_LOG environment variable (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = config::Config::from_env()?;
    tracing::info!("Configuration loaded");

    let public_key = middleware::signature::parse_public_key(&config.discord_public_key)?;

    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    db::initialize(&pool).await?;
    tracing::info!("Database schema ready");

    let discord = Arc::new(DiscordClient::new(
        &config.discord_api_base,
        &config.discord_bot_token,
        config.owner_role_name.clone(),
    )?);
    let store = Arc::new(SqliteKeyStore::new(pool.clone()));

    let expiry = ExpiryScheduler::new(
        store.clone(),
        discord.clone(),
        discord.clone(),
        RetryPolicy {
            attempts: config.expiry_retry_attempts,
            backoff: Duration::from_secs(config.expiry_retry_backoff_secs),
        },
    );

    // Dropping the handles detaches the expiry tasks
    let recovered = expiry.recover().await?;
    tracing::info!("Re-armed {} role expiries", recovered.len());

    let keys = KeyService::new(
        store,
        discord.clone(),
        discord.clone(),
        discord.clone(),
        expiry,
        config.buyer_role_name.clone(),
    );

    if let Some(application_id) = &config.discord_application_id {
        match discord.register_commands(application_id).await {
            Ok(()) => tracing::info!("Slash commands synced globally"),
            Err(e) => tracing::error!("Failed to sync slash commands: {}", e),
        }
    }

    let state = AppState {
        pool,
        keys: Arc::new(keys),
    };
    let app = router(state, public_key);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
