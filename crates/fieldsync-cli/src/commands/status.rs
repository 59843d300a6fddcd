use fieldsync_core::{RecordCounts, SyncState};
use serde::Serialize;

use crate::commands::common::App;
use crate::error::CliError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub online: bool,
    pub state: SyncState,
    pub label: &'static str,
    pub counts: RecordCounts,
    pub total: usize,
    pub sync_configured: bool,
}

pub async fn run_status(as_json: bool, app: &App) -> Result<(), CliError> {
    let online = app.probe.is_online().await;
    let counts = app.records.counts().await;
    let report = build_status_report(online, counts, app.settings.submit_endpoint.is_some());

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for line in format_status_lines(&report) {
        println!("{line}");
    }
    Ok(())
}

pub fn build_status_report(online: bool, counts: RecordCounts, sync_configured: bool) -> StatusReport {
    let state = SyncState::from_parts(online, false, &counts);
    StatusReport {
        online,
        state,
        label: state.label(),
        counts,
        total: counts.total(),
        sync_configured,
    }
}

pub fn format_status_lines(report: &StatusReport) -> Vec<String> {
    let mut lines = vec![
        report.label.to_string(),
        format!(
            "pending {}  syncing {}  synced {}  failed {}  (total {})",
            report.counts.pending,
            report.counts.syncing,
            report.counts.synced,
            report.counts.failed,
            report.total
        ),
    ];
    if !report.sync_configured {
        lines.push("No submit endpoint configured; reports stay cached locally.".to_string());
    }
    lines
}
