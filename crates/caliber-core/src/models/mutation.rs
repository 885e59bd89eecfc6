//! Pending mutation model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::EntityKey;

/// A unique identifier for a queued mutation, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MutationId(Uuid);

impl MutationId {
    /// Create a new unique mutation ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for MutationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MutationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Kind of change a mutation applies to the remote backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl MutationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown mutation kind '{other}'")),
        }
    }
}

/// Delivery status of a queued mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    Pending,
    InFlight,
    Failed,
    Completed,
}

impl MutationStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Failed => "failed",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for MutationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_flight" => Ok(Self::InFlight),
            "failed" => Ok(Self::Failed),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown mutation status '{other}'")),
        }
    }
}

/// What happens to a mutation after a failed delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Stays eligible for automatic retry once its backoff elapses
    Retry,
    /// Surfaced to the user; never retried automatically
    Permanent,
}

/// A create/update/delete waiting to be confirmed by the remote backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMutation {
    /// Unique identifier
    pub id: MutationId,
    /// Create, update, or delete
    pub kind: MutationKind,
    /// Logical collection/table name
    pub entity_kind: String,
    /// Targeted entity id
    pub entity_id: String,
    /// Full record (create), partial diff (update), or key only (delete)
    pub payload: serde_json::Value,
    /// Remote `updated_at` (Unix ms) the change was based on
    pub base_updated_at: Option<i64>,
    /// Enqueue timestamp (Unix ms)
    pub enqueued_at: i64,
    /// Delivery attempts so far
    pub attempts: u32,
    /// Most recent attempt timestamp (Unix ms)
    pub last_attempt_at: Option<i64>,
    /// Delivery status
    pub status: MutationStatus,
    /// Whether a failed mutation may still be retried automatically
    pub retryable: bool,
    /// Last failure reason
    pub last_error: Option<String>,
}

impl PendingMutation {
    pub fn entity_key(&self) -> EntityKey {
        EntityKey::new(&self.entity_kind, &self.entity_id)
    }

    /// Permanently failed and waiting for the user.
    pub const fn is_surfaced(&self) -> bool {
        matches!(self.status, MutationStatus::Failed) && !self.retryable
    }
}

/// Pull the entity id out of a mutation payload.
///
/// Accepts string or integer `id` fields.
pub fn payload_entity_id(payload: &serde_json::Value) -> Option<String> {
    match payload.get("id")? {
        serde_json::Value::String(id) if !id.trim().is_empty() => Some(id.trim().to_string()),
        serde_json::Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}
