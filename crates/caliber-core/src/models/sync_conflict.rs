//! Sync conflict models

use serde::{Deserialize, Serialize};

use super::{EntityKey, MutationId};

/// Divergence between a pending local change and the authoritative remote value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub entity_kind: String,
    pub entity_id: String,
    /// Payload the local mutation wants to write
    pub local_value: serde_json::Value,
    /// Current server representation
    pub remote_value: serde_json::Value,
    /// When the local change was made (Unix ms)
    pub local_timestamp: i64,
    /// Server `updated_at` (Unix ms)
    pub remote_timestamp: i64,
}

impl ConflictRecord {
    pub fn entity_key(&self) -> EntityKey {
        EntityKey::new(&self.entity_kind, &self.entity_id)
    }
}

/// Conflict parked for the user, tied to the mutation it blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenConflict {
    pub mutation_id: MutationId,
    pub conflict: ConflictRecord,
    /// When the conflict was detected (Unix ms)
    pub detected_at: i64,
}

/// Audit entry for a resolved conflict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictLogEntry {
    /// Log row identifier
    pub id: i64,
    pub entity_kind: String,
    pub entity_id: String,
    /// Local change timestamp when the conflict occurred
    pub local_timestamp: i64,
    /// Remote timestamp that triggered the conflict
    pub remote_timestamp: i64,
    /// Resolution timestamp (Unix ms)
    pub resolved_at: i64,
    /// Resolution label (`use_local`, `use_remote`, `merge`)
    pub resolution: String,
}
