use anyhow::Context;
use context_chat::api::{build_router, AppState};
use context_chat::chat::ChatPipeline;
use context_chat::config::Config;
use context_chat::telemetry;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::load().context("Failed to load configuration")?;
    telemetry::init(&config.logging)?;

    info!("Starting context-chat v{}", env!("CARGO_PKG_VERSION"));

    let pipeline = Arc::new(ChatPipeline::from_config(&config).context("Failed to build pipeline")?);

    // Connect eagerly so a misconfigured index shows up at startup; requests
    // retry the connection if this fails
    if let Err(e) = pipeline.index().get().await {
        warn!("Vector index not reachable yet: {}", e);
    }

    let state = AppState::new(pipeline, config.server.stream_buffer);
    let app = build_router(state, config.server.max_body_bytes);

    let address = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;
    info!("Listening on {}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
}
