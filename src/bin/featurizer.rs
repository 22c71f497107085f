//! Featurizer process entry point (spec §2, §4.3, §5).

use anyhow::Result;
use fraudpipe::config::Config;
use fraudpipe::featurizer;
use fraudpipe::logging;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init("fraudpipe_featurizer", "info");

    let config = Config::from_env()?;
    tracing::info!(stream = %config.stream_key, "starting featurizer service");

    let handles = featurizer::build_handles(&config).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let consumer = tokio::spawn(featurizer::run(handles.clone(), shutdown_rx));

    let app = featurizer::router(handles);
    let listener = TcpListener::bind(config.featurizer_bind_addr).await?;
    tracing::info!(bind = %config.featurizer_bind_addr, "featurizer health/metrics surface listening");
    let server = axum::serve(listener, app).with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
    });

    if let Err(e) = server.await {
        tracing::error!(error = %e, "featurizer health server exited with an error");
    }

    tracing::info!("shutting down featurizer service");
    let _ = shutdown_tx.send(true);
    let _ = consumer.await;

    tracing::info!("featurizer shutdown complete");
    Ok(())
}
