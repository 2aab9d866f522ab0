pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod storage;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::db::Database;
use crate::services::ContentStore;
use crate::storage::StorageProvider;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<Config>,
    pub content: Arc<ContentStore>,
}

impl AppState {
    pub fn new(config: Config, db: Database, provider: Arc<dyn StorageProvider>) -> Self {
        let timeout = Duration::from_secs(config.storage.timeout_secs);
        let content = Arc::new(ContentStore::new(db.clone(), provider, timeout));
        Self {
            db,
            config: Arc::new(config),
            content,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (no identity required)
    let public_routes = Router::new()
        .route("/public/shares", get(handlers::share::list_public_shares))
        .route("/public/share/:token", get(handlers::share::get_public_share))
        .route(
            "/public/share/:token/download",
            get(handlers::share::download_public_share),
        );

    // Routes acting on the caller's own vault
    let protected_routes = Router::new()
        .route(
            "/files",
            get(handlers::file::list_files).post(handlers::file::upload_file),
        )
        .route("/files/search", get(handlers::file::search_files))
        .route(
            "/files/:id",
            get(handlers::file::get_file).delete(handlers::file::delete_file),
        )
        .route("/files/:id/download", get(handlers::file::download_file))
        .route("/files/:id/share", post(handlers::file::toggle_share))
        .route("/shares", get(handlers::share::list_my_shares))
        .route("/stats", get(handlers::stats::get_stats))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::identity::identity_middleware,
        ));

    // Combine all routes under /api/v1
    Router::new()
        .nest("/api/v1", public_routes.merge(protected_routes))
        .layer(DefaultBodyLimit::max(state.config.server.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
