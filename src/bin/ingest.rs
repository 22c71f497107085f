//! Ingest process entry point (spec §2, §5, §6).

use anyhow::Result;
use fraudpipe::config::Config;
use fraudpipe::ingest;
use fraudpipe::logging;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init("fraudpipe_ingest", "info");

    let config = Config::from_env()?;
    tracing::info!(bind = %config.ingest_bind_addr, "starting ingest service");

    let state = ingest::build_state(&config).await?;
    let app = ingest::router(state.clone());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let flush_task = tokio::spawn(ingest::run_periodic_flush(
        state.clone(),
        config.columnar.flush_interval,
        shutdown_rx,
    ));

    let listener = TcpListener::bind(config.ingest_bind_addr).await?;
    let server = axum::serve(listener, app).with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
    });

    if let Err(e) = server.await {
        tracing::error!(error = %e, "ingest server exited with an error");
    }

    tracing::info!("shutting down ingest service");
    let _ = shutdown_tx.send(true);
    let _ = flush_task.await;

    if let Err(e) = ingest::flush_and_record(&state).await {
        tracing::error!(error = %e, "final flush on shutdown failed");
    }

    tracing::info!("ingest shutdown complete");
    Ok(())
}
