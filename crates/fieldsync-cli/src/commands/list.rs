use fieldsync_core::SyncStatusKind;

use crate::cli::StatusFilter;
use crate::commands::common::{format_record_lines, record_to_list_item, App, RecordListItem};
use crate::error::CliError;

pub async fn run_list(
    status: Option<StatusFilter>,
    as_json: bool,
    app: &App,
) -> Result<(), CliError> {
    let wanted = status.map(SyncStatusKind::from);
    let records = app
        .records
        .list()
        .await
        .into_iter()
        .filter(|record| wanted.map_or(true, |kind| record.kind() == kind))
        .collect::<Vec<_>>();

    if as_json {
        let json_items = records
            .iter()
            .map(record_to_list_item)
            .collect::<Vec<RecordListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No cached reports.");
        return Ok(());
    }

    for line in format_record_lines(&records) {
        println!("{line}");
    }
    Ok(())
}
