//! Inference process entry point (spec §2, §4.4, §6).

use anyhow::Result;
use fraudpipe::config::Config;
use fraudpipe::inference;
use fraudpipe::logging;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init("fraudpipe_inference", "info");

    let config = Config::from_env()?;
    tracing::info!(bind = %config.inference_bind_addr, "starting inference service");

    let state = inference::build_state(&config).await?;
    let app = inference::router(state);

    let listener = TcpListener::bind(config.inference_bind_addr).await?;
    let server = axum::serve(listener, app).with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
    });

    if let Err(e) = server.await {
        tracing::error!(error = %e, "inference server exited with an error");
    }

    tracing::info!("inference shutdown complete");
    Ok(())
}
