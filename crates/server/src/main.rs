mod api;
mod auth;
mod bootstrap;
mod health;
mod jobs;

use std::time::Duration;

use anyhow::Result;
use axum::{middleware, Router};
use orgchart_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use orgchart_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    jobs::spawn_all(&app);

    let api_state =
        api::ApiState { engine: app.engine.clone(), directory: app.directory.clone() };
    let auth_state = auth::AuthState::new(app.config.server.api_key.clone());
    let router = Router::new()
        .nest("/api/employees", api::router(api_state))
        .layer(middleware::from_fn_with_state(auth_state, auth::require_api_key))
        .merge(health::router(app.db_pool.clone()));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        event_name = "system.server.started",
        bind_address = %address,
        "orgchart-server listening"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, router).with_graceful_shutdown(async {
        shutdown_rx.await.ok();
    });
    let server_task = tokio::spawn(async move { server.await });

    tokio::signal::ctrl_c().await?;
    tracing::info!(event_name = "system.server.stopping", "shutdown signal received");
    let _ = shutdown_tx.send(());

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    match tokio::time::timeout(grace, server_task).await {
        Ok(joined) => joined??,
        Err(_) => {
            tracing::warn!(
                event_name = "system.server.shutdown_timeout",
                grace_secs = app.config.server.graceful_shutdown_secs,
                "graceful shutdown window elapsed, exiting"
            );
        }
    }

    app.db_pool.close().await;
    tracing::info!(event_name = "system.server.stopped", "orgchart-server stopped");

    Ok(())
}
