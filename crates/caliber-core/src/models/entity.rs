//! Cached entity model

use serde::{Deserialize, Serialize};
use std::fmt;

/// `(entity_kind, entity_id)` pair identifying one remote record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub entity_kind: String,
    pub entity_id: String,
}

impl EntityKey {
    pub fn new(entity_kind: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_kind: entity_kind.into(),
            entity_id: entity_id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_kind, self.entity_id)
    }
}

/// Local mirror of a remote entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalEntityRecord {
    /// Entity id
    pub id: String,
    /// Logical collection/table name
    pub entity_kind: String,
    /// Denormalized snapshot
    pub data: serde_json::Value,
    /// Last local write (Unix ms)
    pub updated_at: i64,
    /// Last server-confirmed `updated_at` (Unix ms)
    pub remote_updated_at: Option<i64>,
    /// Has at least one unresolved pending mutation
    pub dirty: bool,
}

impl LocalEntityRecord {
    pub fn key(&self) -> EntityKey {
        EntityKey::new(&self.entity_kind, &self.id)
    }
}

/// Filter for listing cached entities
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheFilter {
    /// Top-level JSON field that must equal the given value
    pub field_equals: Option<(String, serde_json::Value)>,
    /// Only records with unresolved mutations
    pub dirty_only: bool,
}

impl CacheFilter {
    pub fn field_equals(field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            field_equals: Some((field.into(), value.into())),
            dirty_only: false,
        }
    }

    pub fn dirty() -> Self {
        Self {
            field_equals: None,
            dirty_only: true,
        }
    }

    #[must_use]
    pub const fn and_dirty(mut self) -> Self {
        self.dirty_only = true;
        self
    }

    pub fn matches(&self, record: &LocalEntityRecord) -> bool {
        if self.dirty_only && !record.dirty {
            return false;
        }
        match &self.field_equals {
            Some((field, expected)) => record.data.get(field) == Some(expected),
            None => true,
        }
    }
}

/// Shallow-merge `patch` into `base`, object keys only.
///
/// Non-object bases are replaced by the patch.
pub fn merge_json(base: &serde_json::Value, patch: &serde_json::Value) -> serde_json::Value {
    match (base, patch) {
        (serde_json::Value::Object(base), serde_json::Value::Object(patch)) => {
            let mut merged = base.clone();
            for (key, value) in patch {
                merged.insert(key.clone(), value.clone());
            }
            serde_json::Value::Object(merged)
        }
        _ => patch.clone(),
    }
}
