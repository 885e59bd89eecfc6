//! Data models for CaliberVault sync

mod entity;
mod mutation;
mod sync_conflict;

pub use entity::{merge_json, CacheFilter, EntityKey, LocalEntityRecord};
pub use mutation::{
    payload_entity_id, FailureDisposition, MutationId, MutationKind, MutationStatus,
    PendingMutation,
};
pub use sync_conflict::{ConflictLogEntry, ConflictRecord, OpenConflict};
