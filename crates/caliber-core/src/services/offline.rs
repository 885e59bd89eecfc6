//! Optimistic read/write API for UI clients.

use crate::conflict::Resolution;
use crate::engine::SyncTrigger;
use crate::models::{
    CacheFilter, ConflictLogEntry, EntityKey, LocalEntityRecord, MutationId, OpenConflict,
    PendingMutation,
};
use crate::remote::RemoteRecord;
use crate::services::SyncStore;
use crate::{Error, Result};

/// Facade that applies writes to the cache immediately and queues them for sync.
#[derive(Clone, Debug)]
pub struct OfflineService {
    store: SyncStore,
    trigger: Option<SyncTrigger>,
}

impl OfflineService {
    pub const fn new(store: SyncStore) -> Self {
        Self {
            store,
            trigger: None,
        }
    }

    /// Ask the scheduler for a drain after every queued write.
    #[must_use]
    pub fn with_trigger(mut self, trigger: SyncTrigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub const fn store(&self) -> &SyncStore {
        &self.store
    }

    fn request_sync(&self) {
        if let Some(trigger) = &self.trigger {
            trigger.fire();
        }
    }

    pub async fn create(
        &self,
        entity_kind: &str,
        data: serde_json::Value,
    ) -> Result<LocalEntityRecord> {
        let (mutation, record) = self.store.record_create(entity_kind, data).await?;
        tracing::debug!(mutation_id = %mutation.id, entity = %record.key(), "Queued create");
        self.request_sync();
        Ok(record)
    }

    /// Fails with `NotFound` unless the entity is cached.
    pub async fn update(
        &self,
        entity_kind: &str,
        id: &str,
        patch: serde_json::Value,
    ) -> Result<LocalEntityRecord> {
        let (mutation, record) = self.store.record_update(entity_kind, id, patch).await?;
        tracing::debug!(mutation_id = %mutation.id, entity = %record.key(), "Queued update");
        self.request_sync();
        Ok(record)
    }

    pub async fn delete(&self, entity_kind: &str, id: &str) -> Result<PendingMutation> {
        let mutation = self.store.record_delete(entity_kind, id).await?;
        tracing::debug!(mutation_id = %mutation.id, entity = %mutation.entity_key(), "Queued delete");
        self.request_sync();
        Ok(mutation)
    }

    pub async fn get(&self, entity_kind: &str, id: &str) -> Result<Option<LocalEntityRecord>> {
        self.store.get_entity(entity_kind, id).await
    }

    pub async fn list(
        &self,
        entity_kind: &str,
        filter: Option<&CacheFilter>,
    ) -> Result<Vec<LocalEntityRecord>> {
        self.store.list_entities(entity_kind, filter).await
    }

    pub async fn pending(&self) -> Result<Vec<PendingMutation>> {
        self.store.list_pending().await
    }

    pub async fn failed(&self) -> Result<Vec<PendingMutation>> {
        self.store.list_failed().await
    }

    pub async fn open_conflicts(&self) -> Result<Vec<OpenConflict>> {
        self.store.open_conflicts().await
    }

    pub async fn conflict_log(&self, limit: usize) -> Result<Vec<ConflictLogEntry>> {
        self.store.conflict_log(limit).await
    }

    /// Force-retry a surfaced mutation with a fresh attempt count.
    pub async fn retry(&self, mutation_id: &MutationId) -> Result<PendingMutation> {
        let mutation = self.store.retry(mutation_id).await?;
        tracing::info!(mutation_id = %mutation.id, "Mutation queued for retry");
        self.request_sync();
        Ok(mutation)
    }

    pub async fn discard(&self, mutation_id: &MutationId) -> Result<bool> {
        let discarded = self.store.discard(mutation_id).await?;
        if discarded {
            tracing::info!(%mutation_id, "Discarded mutation");
        }
        Ok(discarded)
    }

    /// Settle an open conflict the way the user chose.
    pub async fn resolve_conflict(
        &self,
        mutation_id: &MutationId,
        resolution: Resolution,
    ) -> Result<ConflictLogEntry> {
        let open = self
            .store
            .open_conflict(mutation_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("open conflict for mutation {mutation_id}")))?;

        let entry = self
            .store
            .apply_resolution(mutation_id, &open.conflict, &resolution, true)
            .await?;
        tracing::info!(
            %mutation_id,
            entity = %open.conflict.entity_key(),
            resolution = resolution.label(),
            "Conflict resolved by user"
        );
        if resolution != Resolution::UseRemote {
            self.request_sync();
        }
        Ok(entry)
    }

    /// Fold freshly fetched server rows into the cache.
    ///
    /// Returns locally modified entities the server has since changed.
    pub async fn apply_remote_snapshot(
        &self,
        entity_kind: &str,
        records: &[RemoteRecord],
    ) -> Result<Vec<EntityKey>> {
        self.store.apply_remote_snapshot(entity_kind, records).await
    }

    pub async fn last_sync_at(&self) -> Result<Option<i64>> {
        self.store.last_sync_at().await
    }

    /// Drop every local trace of the signed-in user.
    pub async fn reset(&self) -> Result<()> {
        self.store.reset().await
    }
}
