//! Settings loading and validation
//!
//! Settings live in a JSON file; every field is optional and falls back to
//! its documented default. Credentials are never read from the file.

use crate::error::SyncError;
use dunesync_types::Settings;
use std::path::Path;
use tokio::fs;
use tracing::info;

/// Load settings from `path`; a missing file yields the defaults
pub async fn load_settings(path: &Path) -> Result<Settings, SyncError> {
    if !fs::try_exists(path).await? {
        info!("No settings file at {}, using defaults", path.display());
        return Ok(Settings::default());
    }

    let content = fs::read_to_string(path).await?;
    let settings = serde_json::from_str(&content)
        .map_err(|e| SyncError::Serialization(format!("{}: {}", path.display(), e)))?;

    info!("Loaded settings from {}", path.display());
    Ok(settings)
}

/// Save settings to `path` as pretty JSON
pub async fn save_settings(path: &Path, settings: &Settings) -> Result<(), SyncError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let content = serde_json::to_string_pretty(settings)
        .map_err(|e| SyncError::Serialization(e.to_string()))?;
    fs::write(path, content).await?;

    Ok(())
}

/// Check settings before a run; returns the execution id to sync
pub fn validate_settings(settings: &Settings) -> Result<u64, SyncError> {
    let execution_id = settings
        .sync
        .execution_id
        .ok_or_else(|| SyncError::InvalidConfig("execution_id is required".to_string()))?;

    if settings.sync.page_size == 0 {
        return Err(SyncError::InvalidConfig(
            "page_size must be greater than zero".to_string(),
        ));
    }
    if settings.client.requests_per_minute == 0 {
        return Err(SyncError::InvalidConfig(
            "requests_per_minute must be greater than zero".to_string(),
        ));
    }
    if let Some(bound) = settings.sync.upper_bound {
        if bound < settings.sync.start_offset {
            return Err(SyncError::InvalidConfig(format!(
                "upper_bound {} is below start_offset {}",
                bound, settings.sync.start_offset
            )));
        }
    }
    for name in [&settings.store.table, &settings.store.checkpoint_table] {
        if !is_sql_identifier(name) {
            return Err(SyncError::InvalidConfig(format!("invalid table name: {}", name)));
        }
    }

    Ok(execution_id)
}

/// Plain unquoted SQL identifier: letters, digits and underscores, not
/// starting with a digit
pub fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
