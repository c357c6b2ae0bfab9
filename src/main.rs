use anyhow::Result;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gatewatch::api::{self, AppState};
use gatewatch::audit::initialize_audit_system;
use gatewatch::clock::SystemClock;
use gatewatch::config::{ConfigManager, LoggingConfig};
use gatewatch::rate_limiter::RateLimiter;
use gatewatch::security::initialize_security_engine;

fn init_tracing(config: &LoggingConfig) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv().ok();

    let config_manager = ConfigManager::new().await?;
    let config = config_manager.into_config();

    init_tracing(&config.logging);

    let audit_logger = initialize_audit_system(&config.logging).await?;
    let engine = initialize_security_engine(config.clone(), audit_logger.clone()).await?;
    let rate_limiter = Arc::new(RateLimiter::new(
        config.api_security.enable_rate_limiting,
        Arc::new(SystemClock),
    ));

    if config.server.admin_api_key.is_none() {
        tracing::warn!("No admin API key configured; admin routes are open");
    }

    let app = api::create_router(AppState::new(engine, rate_limiter));

    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&address).await?;
    audit_logger
        .log_system(&format!("GateWatch started on {}", address))
        .await;
    tracing::info!(address = %address, "GateWatch listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
