//! Test helpers for the HTTP API tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum_test::TestServer;
use axum_test::multipart::{MultipartForm, Part};
use filemanager::config::Config;
use filemanager::database::init_db;
use filemanager::storage::LocalStorage;
use filemanager::{AppState, create_app};
use tempfile::TempDir;

/// A running app backed by its own temporary database and upload dir.
pub struct TestApp {
    pub server: TestServer,
    pub upload_dir: PathBuf,
    _dir: TempDir,
}

impl TestApp {
    /// Names of files currently in the upload directory.
    pub fn stored_files(&self) -> Vec<String> {
        list_dir(&self.upload_dir)
    }
}

fn list_dir(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("Failed to read upload dir")
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Create a test configuration rooted in `dir`.
pub fn create_test_config(dir: &Path) -> Config {
    Config {
        database_url: format!("sqlite://{}", dir.join("test.db").display()),
        upload_dir: dir.join("uploads").display().to_string(),
        max_request_size: 1024,
        secret_key: "test-secret-key-for-testing-only".to_string(),
        bind_addr: "127.0.0.1:0".to_string(),
        reconcile_on_startup: false,
        ..Config::default()
    }
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

pub async fn spawn_app_with(customize: impl FnOnce(&mut Config)) -> TestApp {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mut config = create_test_config(dir.path());
    customize(&mut config);

    let pool = init_db(&config.database_url)
        .await
        .expect("Failed to create test database");
    let storage = LocalStorage::new(&config.upload_dir)
        .await
        .expect("Failed to create upload dir");
    let upload_dir = storage.base_path().to_path_buf();

    let state = AppState::new(config, pool, Arc::new(storage));
    let server = TestServer::new(create_app(state)).expect("Failed to create test server");

    TestApp {
        server,
        upload_dir,
        _dir: dir,
    }
}

/// Multipart form with one `file` part per `(name, content)` pair.
pub fn files_form(files: &[(&str, &[u8])]) -> MultipartForm {
    files.iter().fold(MultipartForm::new(), |form, (name, content)| {
        form.add_part(
            "file",
            Part::bytes(content.to_vec())
                .file_name(name.to_string())
                .mime_type("application/octet-stream"),
        )
    })
}
