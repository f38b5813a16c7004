// Main entry point for API server

use std::sync::Arc;

use anyhow::{Context, Result};
use otp_core::domains::auth::JwtService;
use otp_core::domains::otp::{OtpService, OtpSettings, DEFAULT_MESSAGE_TEMPLATE};
use otp_core::domains::sessions::{SessionManager, SessionRegistry};
use otp_core::kernel::{
    start_scheduler, BridgeTransport, PostgresOtpStore, PostgresSessionStore, ServerDeps,
};
use otp_core::{server::build_app, Config};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wa_bridge::{BridgeOptions, BridgeService};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,otp_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting OTP gateway");

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    tokio::fs::create_dir_all(&config.sessions_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.sessions_dir.display()))?;

    // Wire the core
    let bridge = Arc::new(BridgeService::new(BridgeOptions {
        base_url: config.bridge_url.clone(),
        poll_wait: std::time::Duration::from_secs(25),
    }));
    let session_store = Arc::new(PostgresSessionStore::new(pool.clone()));
    let sessions = SessionManager::new(
        SessionRegistry::new(),
        session_store.clone(),
        Arc::new(BridgeTransport::new(bridge)),
        config.lifecycle_settings(),
    );
    let otp = OtpService::new(
        Arc::new(PostgresOtpStore::new(pool.clone())),
        sessions.clone(),
        OtpSettings {
            ttl: config.otp_ttl,
            message_template: config
                .otp_message_template
                .clone()
                .unwrap_or_else(|| DEFAULT_MESSAGE_TEMPLATE.to_string()),
            country_code: config.default_country_code.clone(),
        },
    );
    let deps = Arc::new(ServerDeps::new(
        session_store,
        sessions,
        otp,
        Arc::new(JwtService::new(&config.jwt_secret, config.jwt_issuer.clone())),
        config.expose_codes,
    ));

    let _scheduler = start_scheduler(
        deps.health.clone(),
        deps.otp.clone(),
        config.health_check_interval,
        config.otp_sweep_interval,
    )
    .await
    .context("Failed to start scheduled tasks")?;

    let app = build_app(deps, &config.allowed_origins)?;

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .context("Server error")?;

    Ok(())
}
