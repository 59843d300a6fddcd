use crate::commands::common::{resolve_record_id, App};
use crate::error::CliError;

pub async fn run_delete(id: &str, app: &App) -> Result<(), CliError> {
    let record_id = resolve_record_id(id, &app.records).await?;

    if !app.records.remove_record(&record_id).await? {
        return Err(CliError::RecordNotFound(id.to_string()));
    }
    println!("{record_id}");
    Ok(())
}

pub async fn run_clear_synced(app: &App) -> Result<(), CliError> {
    let removed = app.records.clear_synced_records().await?;
    println!("Removed {removed} synced report(s)");
    Ok(())
}
