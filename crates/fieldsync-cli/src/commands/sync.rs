use crate::commands::common::{describe_outcome, format_bulk_report, resolve_record_id, App};
use crate::error::CliError;

pub async fn run_sync(id: Option<&str>, app: &App) -> Result<(), CliError> {
    app.require_sync()?;
    if !ensure_online(app).await {
        return Ok(());
    }

    if let Some(id) = id {
        let record_id = resolve_record_id(id, &app.records).await?;
        let outcome = app.engine().sync_record(&record_id).await?;
        println!("{}", describe_outcome(&record_id, &outcome));
        return Ok(());
    }

    let report = app.coordinator.sync_now().await;
    println!("{}", format_bulk_report(&report));
    Ok(())
}

pub async fn run_retry(app: &App) -> Result<(), CliError> {
    app.require_sync()?;
    if !ensure_online(app).await {
        return Ok(());
    }

    let report = app.engine().retry_failed().await;
    println!("{}", format_bulk_report(&report));
    Ok(())
}

async fn ensure_online(app: &App) -> bool {
    if app.probe.is_online().await {
        return true;
    }

    let waiting = app.records.counts().await.unsynced();
    println!("Offline: {waiting} report(s) waiting to sync");
    false
}
