use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;
use sha2::{Digest, Sha512};
use sqlx::SqlitePool;

use crate::{
    config::Config,
    repository::FileRepository,
    service::{FileService, UploadLimits},
    storage::Storage,
};

/// Central application state shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Upload/list/download/delete operations.
    pub service: Arc<FileService>,

    /// Application configuration loaded from environment variables or `.env`.
    pub config: Arc<Config>,

    /// Signs the flash message cookie.
    pub cookie_key: Key,
}

impl AppState {
    pub fn new(config: Config, pool: SqlitePool, storage: Arc<dyn Storage>) -> Self {
        let limits = UploadLimits {
            max_request_size: config.max_request_size,
            allowed_extensions: config.allowed_extensions.clone(),
        };
        let service = FileService::new(FileRepository::new(pool), storage, limits);

        Self {
            service: Arc::new(service),
            cookie_key: derive_cookie_key(&config.secret_key),
            config: Arc::new(config),
        }
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

/// Stretch a secret of any length into the 64 bytes a cookie `Key` needs.
fn derive_cookie_key(secret: &str) -> Key {
    let digest = Sha512::digest(secret.as_bytes());
    Key::from(digest.as_slice())
}
