use anyhow::Result;
use octolabd::logging::{self, LogFormat};
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    let format = if octolab_core::config::is_production_mode() {
        LogFormat::Json
    } else {
        LogFormat::Human
    };
    logging::init(format);

    let app = octolabd::bootstrap().await?;
    info!(
        effective_runtime = ?app.selector.effective(),
        "octolabd starting"
    );

    let (worker_handle, shutdown_tx) = octolabd::spawn_teardown_worker(&app);

    let (signal_tx, mut signal_rx) = tokio::sync::mpsc::channel::<()>(1);
    ctrlc::set_handler(move || {
        let _ = signal_tx.blocking_send(());
    })?;
    signal_rx.recv().await;

    info!("shutdown signal received, draining teardown worker");
    shutdown_tx.send(true).ok();
    worker_handle.await?;

    info!("octolabd stopped");
    Ok(())
}
