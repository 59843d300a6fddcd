use crate::commands::common::App;
use crate::error::CliError;

/// Run the connectivity monitor until Ctrl-C.
pub async fn run_watch(app: &App) -> Result<(), CliError> {
    app.require_sync()?;

    let monitor = app.coordinator.start();
    println!(
        "Watching connectivity every {}s (Ctrl-C to stop)",
        app.coordinator.poll_interval().as_secs()
    );

    let interrupted = tokio::signal::ctrl_c().await;
    monitor.shutdown().await;
    interrupted?;

    let counts = app.records.counts().await;
    println!(
        "Stopped. {} synced, {} waiting to sync",
        counts.synced,
        counts.unsynced()
    );
    Ok(())
}
