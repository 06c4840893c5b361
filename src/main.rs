use axum::{routing::get, Router};
use printshop_api::{
    config::{init_tracing, load_config},
    db::establish_connection_from_app_config,
    events, AppState,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    init_tracing(config.log_level(), config.log_json);

    info!(environment = %config.environment, "starting printshop-api");

    let db = Arc::new(establish_connection_from_app_config(&config).await?);

    let (event_sender, event_receiver) = events::channel(1024);
    tokio::spawn(events::process_events(event_receiver));

    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::new(db, config, event_sender)?;

    let app = Router::new()
        .route("/health", get(health))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shut down cleanly");
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
    }
}
