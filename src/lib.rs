pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod models;
pub mod repository;
pub mod service;
pub mod state;
pub mod storage;
pub mod utils;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::handlers::{
    delete_file, download_file, get_file, health_check, list_files, upload_file,
};
pub use crate::state::AppState;

/// Room for multipart boundaries and part headers on top of the file bytes.
pub const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Build the application router.
pub fn create_app(state: AppState) -> Router {
    let body_limit = usize::try_from(state.config.max_request_size)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(list_files))
        .route("/files", get(list_files))
        .route(
            "/upload",
            post(upload_file).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/download/{id}", get(download_file))
        .route("/files/{id}/download", get(download_file))
        .route("/delete/{id}", post(delete_file))
        .route("/files/{id}/delete", post(delete_file))
        .route("/files/{id}", get(get_file).delete(delete_file))
        .route("/healthz", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
