use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fieldsync_core::connectivity::{
    ConnectivityProbe, HttpConnectivityProbe, StaticProbe, SyncCoordinator,
};
use fieldsync_core::db::SqliteKeyValueStore;
use fieldsync_core::models::CachedRecord;
use fieldsync_core::store::RecordStore;
use fieldsync_core::sync::{
    HttpSubmitClient, SubmitClient, SubmitError, SubmitReceipt, SubmitResult, SyncEngine,
};
use fieldsync_core::util::normalize_text_option;
use fieldsync_core::{
    BulkSyncReport, RecordId, RecordManager, ReportPayload, SyncOutcome, SyncSettings,
};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::CliError;

const PROBE_TIMEOUT_SECS: u64 = 4;

#[derive(Debug, Serialize)]
pub struct RecordListItem {
    pub id: String,
    pub status: String,
    pub summary: String,
    pub created_at: i64,
    pub created_at_iso: String,
    pub updated_at: i64,
    pub relative_time: String,
    pub attempts: u32,
    pub server_reference_id: Option<String>,
    pub sync_error: Option<String>,
    pub payload: ReportPayload,
}

/// Paths and flags shared by every command.
pub struct Context {
    pub db_path: PathBuf,
    pub config_path: PathBuf,
    pub offline: bool,
}

impl Context {
    pub fn settings(&self) -> SyncSettings {
        load_settings(&self.config_path)
    }

    pub async fn open(&self) -> Result<App, CliError> {
        open_app(&self.db_path, self.settings(), self.offline).await
    }
}

/// Fully wired record manager, engine and coordinator for one invocation.
pub struct App {
    pub settings: SyncSettings,
    pub records: Arc<RecordManager>,
    pub probe: Arc<dyn ConnectivityProbe>,
    pub coordinator: Arc<SyncCoordinator>,
}

impl App {
    pub fn engine(&self) -> &Arc<SyncEngine> {
        self.coordinator.engine()
    }

    pub fn require_sync(&self) -> Result<(), CliError> {
        if self.settings.submit_endpoint.is_none() {
            return Err(CliError::SyncNotConfigured);
        }
        Ok(())
    }
}

pub async fn open_app(
    db_path: &Path,
    settings: SyncSettings,
    offline: bool,
) -> Result<App, CliError> {
    settings.validate()?;

    let kv = SqliteKeyValueStore::open(db_path)?;
    let store = RecordStore::with_key(Arc::new(kv), settings.storage_key.clone());
    let records = Arc::new(RecordManager::open(store).await);

    let client = build_submit_client(&settings)?;
    let probe = build_probe(&settings, offline)?;
    let engine = Arc::new(SyncEngine::new(Arc::clone(&records), client));
    let coordinator = Arc::new(
        SyncCoordinator::new(engine, Arc::clone(&probe))
            .with_poll_interval(settings.poll_interval()),
    );

    Ok(App {
        settings,
        records,
        probe,
        coordinator,
    })
}

fn build_submit_client(settings: &SyncSettings) -> Result<Arc<dyn SubmitClient>, CliError> {
    let Some(endpoint) = settings.submit_endpoint.clone() else {
        return Ok(Arc::new(UnconfiguredSubmitClient));
    };

    let client =
        HttpSubmitClient::new(endpoint, settings.api_token.clone(), settings.request_timeout())
            .map_err(|error| CliError::Config(error.to_string()))?;
    Ok(Arc::new(client))
}

fn build_probe(
    settings: &SyncSettings,
    offline: bool,
) -> Result<Arc<dyn ConnectivityProbe>, CliError> {
    if offline {
        return Ok(Arc::new(StaticProbe(false)));
    }

    match settings.probe_url() {
        Some(url) => Ok(Arc::new(HttpConnectivityProbe::new(
            url,
            Duration::from_secs(PROBE_TIMEOUT_SECS),
        )?)),
        None => {
            tracing::debug!("No submit endpoint configured; running offline");
            Ok(Arc::new(StaticProbe(false)))
        }
    }
}

/// Stand-in used when no submit endpoint is configured. The probe reports
/// offline in that case, so this is only reached by an explicit sync.
struct UnconfiguredSubmitClient;

#[async_trait]
impl SubmitClient for UnconfiguredSubmitClient {
    async fn submit(&self, _record: &CachedRecord) -> SubmitResult<SubmitReceipt> {
        Err(SubmitError::InvalidConfiguration(
            "no submit endpoint configured".to_string(),
        ))
    }
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("FIELDSYNC_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fieldsync")
        .join("fieldsync.db")
}

pub fn resolve_config_path(cli_config_path: Option<PathBuf>) -> PathBuf {
    cli_config_path
        .or_else(|| env::var_os("FIELDSYNC_CONFIG").map(PathBuf::from))
        .unwrap_or_else(default_config_path)
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fieldsync")
        .join("settings.json")
}

/// Settings file plus `FIELDSYNC_*` environment overrides.
pub fn load_settings(path: &Path) -> SyncSettings {
    SyncSettings::load_from_path(path).with_env_overrides()
}

/// Build a payload from `key=value` pairs or a raw JSON object.
pub fn build_payload(fields: &[String], json: Option<&str>) -> Result<ReportPayload, CliError> {
    if let Some(raw) = json {
        let value: Value = serde_json::from_str(raw)?;
        let payload = ReportPayload::from_value(value)?;
        if payload.is_empty() {
            return Err(CliError::EmptyReport);
        }
        return Ok(payload);
    }

    let mut map = Map::new();
    for raw in fields {
        let (key, value) = parse_field(raw)?;
        map.insert(key, Value::String(value));
    }
    if map.is_empty() {
        return Err(CliError::EmptyReport);
    }
    Ok(ReportPayload::new(map))
}

pub fn parse_field(raw: &str) -> Result<(String, String), CliError> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| CliError::InvalidField(raw.to_string()))?;
    let key = normalize_text_option(Some(key.to_string()))
        .ok_or_else(|| CliError::InvalidField(raw.to_string()))?;
    Ok((key, value.trim().to_string()))
}

pub fn normalize_record_identifier(id: &str) -> Result<String, CliError> {
    let normalized = id.trim();
    if normalized.is_empty() {
        Err(CliError::EmptyRecordId)
    } else {
        Ok(normalized.to_string())
    }
}

/// Resolve a full id or a unique id prefix to a cached record id.
pub async fn resolve_record_id(query: &str, records: &RecordManager) -> Result<RecordId, CliError> {
    let query = normalize_record_identifier(query)?;
    if let Ok(id) = query.parse::<RecordId>() {
        if records.get(&id).await.is_some() {
            return Ok(id);
        }
    }

    let prefix = query.to_ascii_lowercase();
    let matching_ids = records
        .list()
        .await
        .into_iter()
        .map(|record| record.id)
        .filter(|id| id.to_string().starts_with(&prefix))
        .take(3)
        .collect::<Vec<_>>();

    match matching_ids.as_slice() {
        [] => Err(CliError::RecordNotFound(query)),
        [id] => Ok(*id),
        _ => {
            let options = matching_ids
                .iter()
                .map(short_id)
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousRecordId(format!(
                "Report ID prefix '{query}' is ambiguous. Matches: {options}"
            )))
        }
    }
}

pub fn short_id(id: &RecordId) -> String {
    id.to_string().chars().take(13).collect()
}

pub fn format_record_lines(records: &[CachedRecord]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    records
        .iter()
        .map(|record| {
            let short_id = short_id(&record.id);
            let status = record.kind().as_str();
            let summary = truncate(&record.payload.summary(), 32);
            let relative_time = format_relative_time(record.created_at, now_ms);

            match (record.server_reference_id(), record.sync_error()) {
                (Some(reference), _) => format!(
                    "{short_id:<13}  {status:<8}  {summary:<32}  {relative_time:<10}  ref {reference}"
                ),
                (_, Some(error)) => format!(
                    "{short_id:<13}  {status:<8}  {summary:<32}  {relative_time:<10}  {}",
                    truncate(error, 60)
                ),
                _ => format!("{short_id:<13}  {status:<8}  {summary:<32}  {relative_time}"),
            }
        })
        .collect()
}

pub fn record_to_list_item(record: &CachedRecord) -> RecordListItem {
    let now_ms = Utc::now().timestamp_millis();
    RecordListItem {
        id: record.id.to_string(),
        status: record.kind().to_string(),
        summary: record.payload.summary(),
        created_at: record.created_at,
        created_at_iso: format_timestamp(record.created_at),
        updated_at: record.updated_at,
        relative_time: format_relative_time(record.created_at, now_ms),
        attempts: record.attempts,
        server_reference_id: record.server_reference_id().map(str::to_string),
        sync_error: record.sync_error().map(str::to_string),
        payload: record.payload.clone(),
    }
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .map_or_else(|| timestamp_ms.to_string(), |value| value.to_rfc3339())
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

pub fn truncate(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_bulk_report(report: &BulkSyncReport) -> String {
    if report.already_running {
        return "A sync is already running; nothing was started".to_string();
    }
    if report.attempted() == 0 && report.skipped_count == 0 {
        return "Nothing to sync".to_string();
    }

    let mut line = format!(
        "Synced {}, failed {}",
        report.success_count, report.failed_count
    );
    if report.skipped_count > 0 {
        line.push_str(&format!(", skipped {}", report.skipped_count));
    }
    line
}

pub fn describe_outcome(id: &RecordId, outcome: &SyncOutcome) -> String {
    match outcome {
        SyncOutcome::Synced { reference_id } => format!("{id} synced (reference {reference_id})"),
        SyncOutcome::AlreadySynced { reference_id } => {
            format!("{id} was already synced (reference {reference_id})")
        }
        SyncOutcome::Failed { message } => format!("{id} failed: {message}"),
        SyncOutcome::NotFound => format!("{id} no longer exists"),
        SyncOutcome::InFlight => format!("{id} is already being synced"),
    }
}
