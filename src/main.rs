use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use filevault::config::Config;
use filevault::db::Database;
use filevault::storage::build_provider;
use filevault::{create_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "filevault=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting filevault...");

    // Load configuration
    let config = Config::load()?;
    tracing::info!("Configuration loaded");

    // Initialize database
    let db = Database::with_busy_timeout(
        &config.database.path,
        config.database.max_connections,
        Duration::from_secs(config.database.busy_timeout_secs),
    )
    .await?;
    db.run_migrations().await?;
    tracing::info!("Database initialized");

    let provider = build_provider(&config.storage);
    tracing::info!("Blob store: {}", provider.storage_type());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::new(config, db, provider);

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
