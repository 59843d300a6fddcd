use crate::commands::common::{build_payload, App};
use crate::error::CliError;

pub async fn run_add(fields: &[String], json: Option<&str>, app: &App) -> Result<(), CliError> {
    let payload = build_payload(fields, json)?;
    let outcome = app.coordinator.submit(payload).await?;

    println!("{}", outcome.record_id);
    if outcome.success {
        println!("{}", outcome.message);
    } else {
        eprintln!("{}", outcome.message);
    }
    Ok(())
}
