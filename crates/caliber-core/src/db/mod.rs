//! Database layer for CaliberVault sync

mod conflict_repository;
mod connection;
mod entity_cache;
mod metadata_repository;
mod migrations;
mod mutation_store;

pub use conflict_repository::{ConflictRepository, LibSqlConflictRepository};
pub use connection::{finish_transaction, Database};
pub use entity_cache::{EntityCache, LibSqlEntityCache};
pub use metadata_repository::{LibSqlMetadataRepository, MetadataRepository, LAST_SYNC_AT};
pub use mutation_store::{LibSqlMutationStore, MutationStore, NewMutation};
