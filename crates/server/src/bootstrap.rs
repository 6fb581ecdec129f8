use std::sync::Arc;

use orgchart_core::config::{AppConfig, ConfigError, LoadOptions};
use orgchart_core::workflow::{DirectoryError, DirectoryProvider, RequestStore, WorkflowEngine};
use orgchart_directory::GraphClient;
use orgchart_store::{connect_with_settings, migrations, DbPool, SqlRequestStore};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub directory: Arc<GraphClient>,
    pub engine: Arc<WorkflowEngine>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("directory client initialization failed: {0}")]
    Directory(#[source] DirectoryError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let directory =
        Arc::new(GraphClient::new(&config.directory, &config.mail).map_err(BootstrapError::Directory)?);
    info!(
        event_name = "system.bootstrap.directory_ready",
        base_url = %config.directory.base_url,
        "directory client initialized"
    );

    let store: Arc<dyn RequestStore> = Arc::new(SqlRequestStore::new(db_pool.clone()));
    let provider: Arc<dyn DirectoryProvider> = directory.clone();
    let engine = Arc::new(WorkflowEngine::new(provider, store));

    Ok(Application { config, db_pool, directory, engine })
}
