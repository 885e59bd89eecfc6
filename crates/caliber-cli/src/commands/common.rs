use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use caliber_core::clock::SystemClock;
use caliber_core::config::{ConfigError, EngineConfig, RemoteConfig};
use caliber_core::models::{
    CacheFilter, ConflictLogEntry, LocalEntityRecord, MutationId, OpenConflict, PendingMutation,
};
use caliber_core::remote::SupabaseBackend;
use caliber_core::services::SyncStore;
use caliber_core::util::format_millis;
use chrono::Utc;
use serde::Serialize;

use crate::error::CliError;

const SHORT_ID_LEN: usize = 13;

#[derive(Debug, Serialize)]
pub struct MutationItem {
    pub id: String,
    pub kind: String,
    pub entity_kind: String,
    pub entity_id: String,
    pub status: String,
    pub attempts: u32,
    pub enqueued_at: i64,
    pub enqueued_at_iso: String,
    pub last_attempt_at: Option<i64>,
    pub retryable: bool,
    pub last_error: Option<String>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct OpenConflictItem {
    pub mutation_id: String,
    pub entity_kind: String,
    pub entity_id: String,
    pub local_timestamp: i64,
    pub remote_timestamp: i64,
    pub detected_at: i64,
    pub detected_at_iso: String,
    pub local_value: serde_json::Value,
    pub remote_value: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct ConflictLogItem {
    pub id: i64,
    pub entity_kind: String,
    pub entity_id: String,
    pub local_timestamp: i64,
    pub remote_timestamp: i64,
    pub resolved_at: i64,
    pub resolved_at_iso: String,
    pub resolution: String,
}

#[derive(Debug, Serialize)]
pub struct EntityItem {
    pub id: String,
    pub entity_kind: String,
    pub dirty: bool,
    pub updated_at: i64,
    pub remote_updated_at: Option<i64>,
    pub relative_time: String,
    pub data: serde_json::Value,
}

pub async fn open_store(db_path: &Path) -> Result<SyncStore, CliError> {
    Ok(SyncStore::open_path(db_path, Arc::new(SystemClock)).await?)
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_db_path.or_else(|| env::var_os("CALIBER_DB_PATH").map(PathBuf::from))
    {
        return Ok(path);
    }
    default_db_path()
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("caliber").join("caliber.db"))
        .ok_or_else(|| {
            CliError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                "Failed to resolve CLI data directory; pass --db-path or set CALIBER_DB_PATH",
            ))
        })
}

pub fn env_lookup(name: &str) -> Option<String> {
    env::var(name).ok()
}

/// Build the Supabase backend, treating missing credentials as "sync not configured".
pub fn supabase_backend(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<SupabaseBackend, CliError> {
    let config = match RemoteConfig::from_lookup(lookup) {
        Ok(config) => config,
        Err(ConfigError::MissingVar(_)) => return Err(CliError::SyncNotConfigured),
        Err(error) => return Err(error.into()),
    };
    Ok(SupabaseBackend::new(config)?)
}

pub fn engine_config(lookup: impl Fn(&str) -> Option<String>) -> Result<EngineConfig, CliError> {
    Ok(EngineConfig::from_lookup(lookup)?)
}

/// Every mutation still in the queue, whatever its status.
pub async fn list_queued(store: &SyncStore) -> Result<Vec<PendingMutation>, CliError> {
    let mut mutations = store.list_in_flight().await?;
    mutations.extend(store.list_pending().await?);
    mutations.extend(store.list_failed().await?);
    Ok(mutations)
}

pub async fn resolve_mutation_id(query: &str, store: &SyncStore) -> Result<MutationId, CliError> {
    let query = normalize_mutation_identifier(query)?;
    if let Ok(id) = query.parse::<MutationId>() {
        if store.get_mutation(&id).await?.is_some() {
            return Ok(id);
        }
    }

    let queued = list_queued(store).await?;
    let query = query.to_ascii_lowercase();
    let matching = queued
        .iter()
        .filter(|mutation| mutation.id.to_string().starts_with(&query))
        .map(|mutation| mutation.id)
        .collect::<Vec<_>>();

    match matching.as_slice() {
        [] => Err(CliError::MutationNotFound(query)),
        [id] => Ok(*id),
        _ => {
            let options = matching
                .iter()
                .take(3)
                .map(|id| short_id(&id.to_string()))
                .collect::<Vec<_>>()
                .join(", ");

            Err(CliError::AmbiguousMutationId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn normalize_mutation_identifier(id: &str) -> Result<&str, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyMutationId)
    } else {
        Ok(trimmed)
    }
}

/// Parse a JSON argument, reading piped stdin when the argument is omitted.
pub fn resolve_json_input(raw: Option<String>) -> Result<serde_json::Value, CliError> {
    parse_json_payload(&json_text(raw)?)
}

pub fn resolve_json_object(raw: Option<String>) -> Result<serde_json::Value, CliError> {
    parse_json_object(&json_text(raw)?)
}

fn json_text(raw: Option<String>) -> Result<String, CliError> {
    match raw.and_then(|value| normalize_content(&value)) {
        Some(raw) => Ok(raw),
        None => read_piped_stdin()?.ok_or(CliError::EmptyPayload),
    }
}

pub fn parse_json_payload(raw: &str) -> Result<serde_json::Value, CliError> {
    serde_json::from_str(raw).map_err(|error| CliError::InvalidPayload(error.to_string()))
}

pub fn parse_json_object(raw: &str) -> Result<serde_json::Value, CliError> {
    let value = parse_json_payload(raw)?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(CliError::InvalidPayload("expected a JSON object".to_string()))
    }
}

/// Parse `FIELD=VALUE`. The value is read as JSON when it parses, else as a string.
pub fn parse_field_filter(raw: &str) -> Result<CacheFilter, CliError> {
    let Some((field, value)) = raw.split_once('=') else {
        return Err(CliError::InvalidFilter(raw.to_string()));
    };
    let field = field.trim();
    if field.is_empty() {
        return Err(CliError::InvalidFilter(raw.to_string()));
    }
    let value = value.trim();
    let value = serde_json::from_str::<serde_json::Value>(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok(CacheFilter::field_equals(field, value))
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}

pub fn short_id(id: &str) -> String {
    id.chars().take(SHORT_ID_LEN).collect()
}

pub fn mutation_to_item(mutation: &PendingMutation) -> MutationItem {
    MutationItem {
        id: mutation.id.to_string(),
        kind: mutation.kind.to_string(),
        entity_kind: mutation.entity_kind.clone(),
        entity_id: mutation.entity_id.clone(),
        status: mutation.status.to_string(),
        attempts: mutation.attempts,
        enqueued_at: mutation.enqueued_at,
        enqueued_at_iso: format_millis(mutation.enqueued_at),
        last_attempt_at: mutation.last_attempt_at,
        retryable: mutation.retryable,
        last_error: mutation.last_error.clone(),
        payload: mutation.payload.clone(),
    }
}

pub fn open_conflict_to_item(open: &OpenConflict) -> OpenConflictItem {
    OpenConflictItem {
        mutation_id: open.mutation_id.to_string(),
        entity_kind: open.conflict.entity_kind.clone(),
        entity_id: open.conflict.entity_id.clone(),
        local_timestamp: open.conflict.local_timestamp,
        remote_timestamp: open.conflict.remote_timestamp,
        detected_at: open.detected_at,
        detected_at_iso: format_millis(open.detected_at),
        local_value: open.conflict.local_value.clone(),
        remote_value: open.conflict.remote_value.clone(),
    }
}

pub fn conflict_log_to_item(entry: &ConflictLogEntry) -> ConflictLogItem {
    ConflictLogItem {
        id: entry.id,
        entity_kind: entry.entity_kind.clone(),
        entity_id: entry.entity_id.clone(),
        local_timestamp: entry.local_timestamp,
        remote_timestamp: entry.remote_timestamp,
        resolved_at: entry.resolved_at,
        resolved_at_iso: format_millis(entry.resolved_at),
        resolution: entry.resolution.clone(),
    }
}

pub fn entity_to_item(record: &LocalEntityRecord) -> EntityItem {
    let now_ms = Utc::now().timestamp_millis();
    EntityItem {
        id: record.id.clone(),
        entity_kind: record.entity_kind.clone(),
        dirty: record.dirty,
        updated_at: record.updated_at,
        remote_updated_at: record.remote_updated_at,
        relative_time: format_relative_time(record.updated_at, now_ms),
        data: record.data.clone(),
    }
}

pub fn format_mutation_lines(mutations: &[PendingMutation]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    mutations
        .iter()
        .map(|mutation| {
            let short_id = short_id(&mutation.id.to_string());
            let entity = mutation.entity_key().to_string();
            let age = format_relative_time(mutation.enqueued_at, now_ms);
            let line = format!(
                "{short_id:<13}  {:<6}  {entity:<32}  {:<9}  attempts={}  {age}",
                mutation.kind, mutation.status, mutation.attempts
            );
            match &mutation.last_error {
                Some(error) => format!("{line}  error={error}"),
                None => line,
            }
        })
        .collect()
}

pub fn format_open_conflict_lines(conflicts: &[OpenConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|open| {
            format!(
                "{}  {:<13}  {}  local={} remote={}",
                format_sync_timestamp(open.detected_at),
                short_id(&open.mutation_id.to_string()),
                open.conflict.entity_key(),
                open.conflict.local_timestamp,
                open.conflict.remote_timestamp
            )
        })
        .collect()
}

pub fn format_conflict_log_lines(entries: &[ConflictLogEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            format!(
                "{}  {:<10}  {}/{}  local={} remote={}",
                format_sync_timestamp(entry.resolved_at),
                entry.resolution,
                entry.entity_kind,
                entry.entity_id,
                entry.local_timestamp,
                entry.remote_timestamp
            )
        })
        .collect()
}

pub fn format_entity_lines(records: &[LocalEntityRecord]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    records
        .iter()
        .map(|record| {
            let marker = if record.dirty { "*" } else { " " };
            let preview = entity_preview(&record.data, 48);
            let relative_time = format_relative_time(record.updated_at, now_ms);
            format!("{marker} {:<36}  {preview:<48}  {relative_time}", record.id)
        })
        .collect()
}

/// Single-line JSON preview, truncated with an ellipsis.
pub fn entity_preview(data: &serde_json::Value, max_chars: usize) -> String {
    let rendered = data.to_string();
    if rendered.chars().count() <= max_chars {
        rendered
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = rendered.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
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
