use std::path::Path;

use fieldsync_core::util::normalize_text_option;
use fieldsync_core::SyncSettings;

use crate::cli::ConfigCommands;
use crate::commands::common::load_settings;
use crate::error::CliError;

const REDACTED: &str = "[REDACTED]";

pub fn run_config(command: ConfigCommands, config_path: &Path) -> Result<(), CliError> {
    match command {
        ConfigCommands::Show => run_config_show(config_path),
        ConfigCommands::Init {
            submit_endpoint,
            api_token,
            connectivity_url,
            poll_interval_secs,
            request_timeout_secs,
            storage_key,
        } => {
            let updates = SettingsUpdate {
                submit_endpoint,
                api_token,
                connectivity_url,
                poll_interval_secs,
                request_timeout_secs,
                storage_key,
            };
            run_config_init(updates, config_path)
        }
    }
}

fn run_config_show(config_path: &Path) -> Result<(), CliError> {
    let settings = redacted(load_settings(config_path));
    println!("# {}", config_path.display());
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

/// Explicit values passed to `config init`.
#[derive(Debug, Default)]
pub struct SettingsUpdate {
    pub submit_endpoint: Option<String>,
    pub api_token: Option<String>,
    pub connectivity_url: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub storage_key: Option<String>,
}

fn run_config_init(updates: SettingsUpdate, config_path: &Path) -> Result<(), CliError> {
    // Env overrides stay out of the file.
    let existing = SyncSettings::load_from_path(config_path);
    let settings = merge_settings(existing, updates);
    settings.validate()?;
    settings.save_to_path(config_path)?;

    println!("Saved sync settings to {}", config_path.display());
    if settings.submit_endpoint.is_none() {
        println!("No submit endpoint set; reports will stay cached locally.");
    }
    Ok(())
}

pub fn merge_settings(existing: SyncSettings, updates: SettingsUpdate) -> SyncSettings {
    SyncSettings {
        submit_endpoint: normalize_text_option(updates.submit_endpoint)
            .or(existing.submit_endpoint)
            .map(|endpoint| endpoint.trim_end_matches('/').to_string()),
        api_token: normalize_text_option(updates.api_token).or(existing.api_token),
        connectivity_url: normalize_text_option(updates.connectivity_url)
            .or(existing.connectivity_url),
        poll_interval_secs: updates
            .poll_interval_secs
            .unwrap_or(existing.poll_interval_secs),
        request_timeout_secs: updates
            .request_timeout_secs
            .unwrap_or(existing.request_timeout_secs),
        storage_key: normalize_text_option(updates.storage_key).unwrap_or(existing.storage_key),
    }
    .normalized()
}

pub fn redacted(mut settings: SyncSettings) -> SyncSettings {
    if settings.api_token.is_some() {
        settings.api_token = Some(REDACTED.to_string());
    }
    settings
}
