//! Remote backend interface the sync engine delivers mutations to.

mod supabase;
#[cfg(test)]
pub(crate) mod testing;

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use supabase::SupabaseBackend;

/// Authoritative server representation of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: String,
    pub data: serde_json::Value,
    /// Server `updated_at` (Unix ms), when the server returned one
    pub updated_at: Option<i64>,
}

impl RemoteRecord {
    /// Build a record from a returned row, reading `id` and `updated_at` out of it.
    ///
    /// `fallback_id` is used when the row carries no `id`.
    pub fn from_row(row: serde_json::Value, fallback_id: &str) -> Self {
        let id = crate::models::payload_entity_id(&row).unwrap_or_else(|| fallback_id.to_string());
        let updated_at = row
            .get("updated_at")
            .or_else(|| row.get("created_at"))
            .and_then(parse_timestamp_millis);
        Self {
            id,
            data: row,
            updated_at,
        }
    }
}

/// Parse an RFC 3339 string or integer milliseconds.
pub fn parse_timestamp_millis(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(number) => number.as_i64(),
        serde_json::Value::String(text) => {
            let text = text.trim();
            chrono::DateTime::parse_from_rfc3339(text)
                .map(|parsed| parsed.timestamp_millis())
                .ok()
                .or_else(|| text.parse().ok())
        }
        _ => None,
    }
}

/// Failure reported by a remote backend for one delivery.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RemoteError {
    /// Network failure, 5xx, 408/429, or timeout; retried with backoff
    #[error("transient remote failure: {0}")]
    Transient(String),

    /// Validation, permission, or other terminal 4xx
    #[error("remote rejected mutation: {0}")]
    Rejected(String),

    /// The remote entity changed since the mutation's base version
    #[error("remote record {} changed concurrently", current.id)]
    Conflict { current: RemoteRecord },
}

impl RemoteError {
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Server the engine replays mutations against.
///
/// Futures are `Send` so a drain cycle can run on a spawned task.
pub trait RemoteBackend: Send + Sync {
    fn create(
        &self,
        entity_kind: &str,
        payload: &serde_json::Value,
    ) -> impl Future<Output = Result<RemoteRecord, RemoteError>> + Send;

    fn update(
        &self,
        entity_kind: &str,
        id: &str,
        payload: &serde_json::Value,
        base_updated_at: Option<i64>,
    ) -> impl Future<Output = Result<RemoteRecord, RemoteError>> + Send;

    fn delete(
        &self,
        entity_kind: &str,
        id: &str,
        base_updated_at: Option<i64>,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;
}
