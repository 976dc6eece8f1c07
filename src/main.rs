use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use filemanager::{
    AppState, config::Config, create_app, database::init_db, storage::LocalStorage,
};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    if config.uses_default_secret() {
        warn!("SECRET_KEY is not set; flash cookies are signed with the default secret");
    }

    let pool = init_db(&config.database_url)
        .await
        .context("Failed to connect to db")?;

    let storage = LocalStorage::new(&config.upload_dir)
        .await
        .context("Failed to create upload directory")?;

    let bind_addr = config.bind_addr.clone();
    let reconcile = config.reconcile_on_startup;
    let app_state = AppState::new(config, pool, Arc::new(storage));

    // Before serving: an in-flight upload would look like an orphan
    if reconcile {
        let report = app_state
            .service
            .reconcile()
            .await
            .context("Startup consistency check failed")?;
        info!(
            "Consistency check: {} orphaned file(s) removed, {} record(s) missing their file",
            report.orphaned_files_removed.len(),
            report.dangling_records.len()
        );
    }

    let app = create_app(app_state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
