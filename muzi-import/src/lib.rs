//! muzi-import library interface
//!
//! Listening-history import: Spotify export decoding, paginated LastFM
//! fetching, windowed duplicate removal, bulk insert into `history`, and
//! per-job progress streams.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod sources;
pub mod utils;

pub use crate::config::ImportConfig;
pub use crate::error::{ApiError, ApiResult};

use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use crate::services::JobManager;

/// Multipart framing allowance on top of the file payloads
const UPLOAD_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// In-flight import jobs and their progress channels
    pub jobs: JobManager,
    pub config: Arc<ImportConfig>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last failed import, for diagnostics
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(db: SqlitePool, config: ImportConfig) -> Self {
        Self {
            db,
            jobs: JobManager::new(config.job_retention()),
            config: Arc::new(config),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let body_limit = state
        .config
        .max_upload_bytes
        .saturating_mul(state.config.max_upload_files)
        .saturating_add(UPLOAD_OVERHEAD_BYTES);

    Router::new()
        .merge(api::import_routes())
        .merge(api::progress_routes())
        .merge(api::health_routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
