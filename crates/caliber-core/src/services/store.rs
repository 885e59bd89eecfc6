//! Shared store handle used by the sync engine and the offline service.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libsql::Connection;
use tokio::sync::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::conflict::{is_divergent, Resolution, DIVERGENCE_TOLERANCE_MS};
use crate::db::{
    finish_transaction, ConflictRepository, Database, EntityCache, LibSqlConflictRepository,
    LibSqlEntityCache, LibSqlMetadataRepository, LibSqlMutationStore, MetadataRepository,
    MutationStore, NewMutation,
};
use crate::models::{
    merge_json, payload_entity_id, CacheFilter, ConflictLogEntry, ConflictRecord, EntityKey,
    FailureDisposition, LocalEntityRecord, MutationId, MutationKind, OpenConflict,
    PendingMutation,
};
use crate::remote::RemoteRecord;
use crate::{Error, Result};

/// Thread-safe handle over the local queue, cache, and conflict tables.
///
/// Each call locks the database for one statement or one transaction.
#[derive(Clone)]
pub struct SyncStore {
    db: Arc<Mutex<Database>>,
    clock: Arc<dyn Clock>,
    db_path: Option<PathBuf>,
}

impl std::fmt::Debug for SyncStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncStore")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

impl SyncStore {
    /// Open the store at a filesystem path, creating parent directories.
    ///
    /// A file that is not a database is moved aside and replaced once.
    pub async fn open_path(db_path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = match Database::open(&db_path).await {
            Ok(db) => db,
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Local queue at {} is not a database: {}. Moving it aside and starting fresh.",
                    db_path.display(),
                    error
                );
                Self::quarantine_corrupted_db_files(&db_path, clock.now_millis())?;
                Database::open(&db_path).await?
            }
            Err(error) => return Err(error),
        };

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            clock,
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory store on the system clock.
    pub async fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with_clock(Arc::new(SystemClock)).await
    }

    pub async fn open_in_memory_with_clock(clock: Arc<dyn Clock>) -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            clock,
            db_path: None,
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Current time on the store's clock (Unix ms).
    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    fn is_corrupted_db_error(error: &Error) -> bool {
        error
            .to_string()
            .to_ascii_lowercase()
            .contains("file is not a database")
    }

    fn quarantine_corrupted_db_files(db_path: &Path, now: i64) -> Result<()> {
        if !db_path.exists() {
            return Ok(());
        }
        let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
            return Ok(());
        };

        let backup_path = db_path.with_file_name(format!("{base_name}.corrupt-{now}"));
        std::fs::rename(db_path, &backup_path)?;
        tracing::warn!(
            "Moved corrupted queue file from {} to {}",
            db_path.display(),
            backup_path.display()
        );

        for suffix in ["-wal", "-shm"] {
            let sidecar = db_path.with_file_name(format!("{base_name}{suffix}"));
            if sidecar.exists() {
                std::fs::remove_file(&sidecar)?;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Mutation queue
    // -----------------------------------------------------------------------

    /// Persist a mutation as `Pending`.
    ///
    /// The entity id comes from the payload's `id`; creates without one get a
    /// generated id written into the payload. Updates and deletes capture the
    /// cached server timestamp as their base version.
    pub async fn enqueue(
        &self,
        kind: MutationKind,
        entity_kind: &str,
        payload: serde_json::Value,
    ) -> Result<PendingMutation> {
        let entity_kind = normalize_entity_kind(entity_kind)?;
        let (entity_id, payload) = resolve_entity_id(kind, payload)?;
        let now = self.now();

        let db = self.db.lock().await;
        let conn = db.connection();
        let base_updated_at = Self::cached_base(conn, kind, &entity_kind, &entity_id).await?;
        let mutation = LibSqlMutationStore::new(conn)
            .insert(
                NewMutation {
                    kind,
                    entity_kind,
                    entity_id,
                    payload,
                    base_updated_at,
                },
                now,
            )
            .await?;

        tracing::debug!(
            mutation_id = %mutation.id,
            kind = %mutation.kind,
            entity = %mutation.entity_key(),
            "Enqueued mutation"
        );
        Ok(mutation)
    }

    async fn cached_base(
        conn: &Connection,
        kind: MutationKind,
        entity_kind: &str,
        entity_id: &str,
    ) -> Result<Option<i64>> {
        if kind == MutationKind::Create {
            return Ok(None);
        }
        Ok(LibSqlEntityCache::new(conn)
            .get(entity_kind, entity_id)
            .await?
            .and_then(|record| record.remote_updated_at))
    }

    pub async fn get_mutation(&self, id: &MutationId) -> Result<Option<PendingMutation>> {
        let db = self.db.lock().await;
        LibSqlMutationStore::new(db.connection()).get(id).await
    }

    /// `Pending` and retryable `Failed` mutations in queue order.
    pub async fn list_pending(&self) -> Result<Vec<PendingMutation>> {
        let db = self.db.lock().await;
        LibSqlMutationStore::new(db.connection()).list_pending().await
    }

    /// Permanently failed mutations waiting for the user.
    pub async fn list_failed(&self) -> Result<Vec<PendingMutation>> {
        let db = self.db.lock().await;
        LibSqlMutationStore::new(db.connection()).list_failed().await
    }

    pub async fn list_in_flight(&self) -> Result<Vec<PendingMutation>> {
        let db = self.db.lock().await;
        LibSqlMutationStore::new(db.connection())
            .list_in_flight()
            .await
    }

    pub async fn mark_in_flight(&self, id: &MutationId) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlMutationStore::new(db.connection())
            .mark_in_flight(id)
            .await
    }

    /// Record a failed delivery attempt at the current time.
    pub async fn record_failure(
        &self,
        id: &MutationId,
        error: &str,
        disposition: FailureDisposition,
    ) -> Result<PendingMutation> {
        let now = self.now();
        let db = self.db.lock().await;
        LibSqlMutationStore::new(db.connection())
            .mark_failed(id, error, disposition, now)
            .await
    }

    pub async fn requeue(&self, id: &MutationId) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlMutationStore::new(db.connection()).requeue(id).await
    }

    pub async fn recover_in_flight(&self) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlMutationStore::new(db.connection())
            .recover_in_flight()
            .await
    }

    /// Entities whose lanes must wait: a surfaced failure or an open conflict.
    pub async fn blocked_entities(&self) -> Result<HashSet<EntityKey>> {
        let db = self.db.lock().await;
        let conn = db.connection();
        let mut blocked: HashSet<EntityKey> = LibSqlMutationStore::new(conn)
            .list_failed()
            .await?
            .iter()
            .map(PendingMutation::entity_key)
            .collect();
        blocked.extend(
            LibSqlConflictRepository::new(conn)
                .blocked_entities()
                .await?,
        );
        Ok(blocked)
    }

    /// Remove a delivered mutation and fold the confirmed record into the cache.
    ///
    /// Later mutations for the same entity are moved onto the confirmed
    /// version and keep their optimistic values in the cache.
    pub async fn complete_delivery(
        &self,
        mutation: &PendingMutation,
        confirmed: Option<&RemoteRecord>,
    ) -> Result<()> {
        let now = self.now();
        let db = self.db.lock().await;
        let conn = db.connection();
        conn.execute("BEGIN TRANSACTION", ()).await?;

        let result = async {
            let store = LibSqlMutationStore::new(conn);
            let cache = LibSqlEntityCache::new(conn);
            let key = mutation.entity_key();

            store.mark_completed(&mutation.id).await?;
            let remaining = store.count_for_entity(&key).await?;

            match (mutation.kind, confirmed) {
                (MutationKind::Delete, _) => {
                    if remaining == 0 {
                        cache.remove(&key.entity_kind, &key.entity_id).await?;
                    }
                }
                (_, Some(record)) => {
                    if let Some(updated_at) = record.updated_at {
                        store.advance_base(&key, updated_at).await?;
                    }
                    if remaining == 0 {
                        cache
                            .reconcile(
                                &key.entity_kind,
                                &key.entity_id,
                                &record.data,
                                record.updated_at,
                                now,
                            )
                            .await?;
                    } else {
                        let data = match cache.get(&key.entity_kind, &key.entity_id).await? {
                            Some(local) => merge_json(&record.data, &local.data),
                            None => record.data.clone(),
                        };
                        cache
                            .reconcile(
                                &key.entity_kind,
                                &key.entity_id,
                                &data,
                                record.updated_at,
                                now,
                            )
                            .await?;
                        cache.mark_dirty(&key.entity_kind, &key.entity_id).await?;
                    }
                }
                (_, None) => {
                    if remaining == 0 {
                        cache.clear_dirty(&key.entity_kind, &key.entity_id).await?;
                    }
                }
            }
            Ok(())
        }
        .await;

        finish_transaction(conn, result).await
    }

    // -----------------------------------------------------------------------
    // Conflicts
    // -----------------------------------------------------------------------

    /// Park a conflict for the user and surface its mutation.
    pub async fn park_conflict(
        &self,
        mutation: &PendingMutation,
        conflict: &ConflictRecord,
    ) -> Result<OpenConflict> {
        let now = self.now();
        let db = self.db.lock().await;
        let conn = db.connection();
        conn.execute("BEGIN TRANSACTION", ()).await?;

        let result = async {
            let parked = LibSqlConflictRepository::new(conn)
                .park(&mutation.id, conflict, now)
                .await?;
            LibSqlMutationStore::new(conn)
                .mark_failed(&mutation.id, "conflict", FailureDisposition::Permanent, now)
                .await?;
            Ok(parked)
        }
        .await;

        finish_transaction(conn, result).await
    }

    /// Apply a non-manual resolution to a conflicted mutation and log it.
    ///
    /// `UseLocal` and `Merge` requeue the mutation against the remote version,
    /// turning a create into an update; `UseRemote` drops it and adopts the remote value. With `reset_attempts`
    /// the requeued mutation starts over with a clean attempt count.
    pub async fn apply_resolution(
        &self,
        mutation_id: &MutationId,
        conflict: &ConflictRecord,
        resolution: &Resolution,
        reset_attempts: bool,
    ) -> Result<ConflictLogEntry> {
        if *resolution == Resolution::Manual {
            return Err(Error::InvalidInput(
                "manual is not a conflict resolution".to_string(),
            ));
        }

        let now = self.now();
        let db = self.db.lock().await;
        let conn = db.connection();
        conn.execute("BEGIN TRANSACTION", ()).await?;

        let result = async {
            let store = LibSqlMutationStore::new(conn);
            let cache = LibSqlEntityCache::new(conn);
            let conflicts = LibSqlConflictRepository::new(conn);
            let key = conflict.entity_key();

            let mutation = store
                .get(mutation_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("mutation {mutation_id}")))?;
            conflicts.remove(mutation_id).await?;

            match resolution {
                Resolution::UseLocal | Resolution::Merge(_) => {
                    let payload = match resolution {
                        Resolution::Merge(merged) => merged,
                        _ => &mutation.payload,
                    };
                    if reset_attempts {
                        store.reset_for_retry(mutation_id).await?;
                    }
                    // The row exists remotely now, so a create goes out as an update.
                    let kind = match mutation.kind {
                        MutationKind::Create => MutationKind::Update,
                        kind => kind,
                    };
                    store
                        .rebase(mutation_id, kind, payload, Some(conflict.remote_timestamp))
                        .await?;
                    if let Resolution::Merge(merged) = resolution {
                        if mutation.kind != MutationKind::Delete {
                            if let Some(local) = cache.get(&key.entity_kind, &key.entity_id).await?
                            {
                                cache
                                    .upsert(
                                        &key.entity_kind,
                                        &key.entity_id,
                                        &merge_json(&local.data, merged),
                                        now,
                                    )
                                    .await?;
                            }
                        }
                    }
                }
                Resolution::UseRemote => {
                    store.discard(mutation_id).await?;
                    cache
                        .reconcile(
                            &key.entity_kind,
                            &key.entity_id,
                            &conflict.remote_value,
                            Some(conflict.remote_timestamp),
                            now,
                        )
                        .await?;
                    if store.count_for_entity(&key).await? > 0 {
                        cache.mark_dirty(&key.entity_kind, &key.entity_id).await?;
                    }
                }
                Resolution::Manual => {}
            }

            conflicts.log(conflict, resolution.label(), now).await
        }
        .await;

        finish_transaction(conn, result).await
    }

    pub async fn open_conflicts(&self) -> Result<Vec<OpenConflict>> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection())
            .list_open()
            .await
    }

    pub async fn open_conflict(&self, mutation_id: &MutationId) -> Result<Option<OpenConflict>> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection())
            .get(mutation_id)
            .await
    }

    /// Most recent conflict resolutions first.
    pub async fn conflict_log(&self, limit: usize) -> Result<Vec<ConflictLogEntry>> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection())
            .list_log(limit)
            .await
    }

    // -----------------------------------------------------------------------
    // User recovery actions
    // -----------------------------------------------------------------------

    /// Force-retry a surfaced mutation.
    pub async fn retry(&self, id: &MutationId) -> Result<PendingMutation> {
        let db = self.db.lock().await;
        let conn = db.connection();
        if LibSqlConflictRepository::new(conn).get(id).await?.is_some() {
            return Err(Error::InvalidInput(format!(
                "mutation {id} has an open conflict; resolve it instead"
            )));
        }

        let store = LibSqlMutationStore::new(conn);
        store.reset_for_retry(id).await?;
        store
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("mutation {id}")))
    }

    /// Drop a mutation and any open conflict for it. Returns whether it existed.
    ///
    /// The cache record loses its dirty flag once nothing references it, and a
    /// never-confirmed create disappears from the cache with its mutation.
    pub async fn discard(&self, id: &MutationId) -> Result<bool> {
        let db = self.db.lock().await;
        let conn = db.connection();
        conn.execute("BEGIN TRANSACTION", ()).await?;

        let result = async {
            let store = LibSqlMutationStore::new(conn);
            let cache = LibSqlEntityCache::new(conn);
            let Some(mutation) = store.get(id).await? else {
                return Ok(false);
            };
            let key = mutation.entity_key();

            store.discard(id).await?;
            LibSqlConflictRepository::new(conn).remove(id).await?;

            if store.count_for_entity(&key).await? == 0 {
                let cached = cache.get(&key.entity_kind, &key.entity_id).await?;
                match cached {
                    Some(record)
                        if mutation.kind == MutationKind::Create
                            && record.remote_updated_at.is_none() =>
                    {
                        cache.remove(&key.entity_kind, &key.entity_id).await?;
                    }
                    Some(_) => cache.clear_dirty(&key.entity_kind, &key.entity_id).await?,
                    None => {}
                }
            }
            Ok(true)
        }
        .await;

        finish_transaction(conn, result).await
    }

    // -----------------------------------------------------------------------
    // Entity cache
    // -----------------------------------------------------------------------

    pub async fn get_entity(&self, entity_kind: &str, id: &str) -> Result<Option<LocalEntityRecord>> {
        let db = self.db.lock().await;
        LibSqlEntityCache::new(db.connection())
            .get(entity_kind, id)
            .await
    }

    pub async fn list_entities(
        &self,
        entity_kind: &str,
        filter: Option<&CacheFilter>,
    ) -> Result<Vec<LocalEntityRecord>> {
        let db = self.db.lock().await;
        LibSqlEntityCache::new(db.connection())
            .list(entity_kind, filter)
            .await
    }

    /// Optimistic create: write the cache record dirty and enqueue a `Create`.
    pub async fn record_create(
        &self,
        entity_kind: &str,
        data: serde_json::Value,
    ) -> Result<(PendingMutation, LocalEntityRecord)> {
        let entity_kind = normalize_entity_kind(entity_kind)?;
        let (entity_id, data) = resolve_entity_id(MutationKind::Create, data)?;
        let now = self.now();

        let db = self.db.lock().await;
        let conn = db.connection();
        conn.execute("BEGIN TRANSACTION", ()).await?;

        let result = async {
            let cache = LibSqlEntityCache::new(conn);
            cache.upsert(&entity_kind, &entity_id, &data, now).await?;
            cache.mark_dirty(&entity_kind, &entity_id).await?;
            let mutation = LibSqlMutationStore::new(conn)
                .insert(
                    NewMutation {
                        kind: MutationKind::Create,
                        entity_kind: entity_kind.clone(),
                        entity_id: entity_id.clone(),
                        payload: data,
                        base_updated_at: None,
                    },
                    now,
                )
                .await?;
            let record = cache
                .get(&entity_kind, &entity_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("{entity_kind}/{entity_id}")))?;
            Ok((mutation, record))
        }
        .await;

        finish_transaction(conn, result).await
    }

    /// Optimistic update: merge the patch into the cached record and enqueue an `Update`.
    pub async fn record_update(
        &self,
        entity_kind: &str,
        id: &str,
        patch: serde_json::Value,
    ) -> Result<(PendingMutation, LocalEntityRecord)> {
        let entity_kind = normalize_entity_kind(entity_kind)?;
        let serde_json::Value::Object(mut patch) = patch else {
            return Err(Error::InvalidInput(
                "update payload must be a JSON object".to_string(),
            ));
        };
        patch.insert("id".to_string(), serde_json::Value::String(id.to_string()));
        let patch = serde_json::Value::Object(patch);
        let now = self.now();

        let db = self.db.lock().await;
        let conn = db.connection();
        conn.execute("BEGIN TRANSACTION", ()).await?;

        let result = async {
            let cache = LibSqlEntityCache::new(conn);
            let cached = cache
                .get(&entity_kind, id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("{entity_kind}/{id}")))?;

            cache
                .upsert(&entity_kind, id, &merge_json(&cached.data, &patch), now)
                .await?;
            cache.mark_dirty(&entity_kind, id).await?;
            let mutation = LibSqlMutationStore::new(conn)
                .insert(
                    NewMutation {
                        kind: MutationKind::Update,
                        entity_kind: entity_kind.clone(),
                        entity_id: id.to_string(),
                        payload: patch,
                        base_updated_at: cached.remote_updated_at,
                    },
                    now,
                )
                .await?;
            let record = cache
                .get(&entity_kind, id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("{entity_kind}/{id}")))?;
            Ok((mutation, record))
        }
        .await;

        finish_transaction(conn, result).await
    }

    /// Optimistic delete: drop the cache record and enqueue a `Delete`.
    pub async fn record_delete(&self, entity_kind: &str, id: &str) -> Result<PendingMutation> {
        let entity_kind = normalize_entity_kind(entity_kind)?;
        let now = self.now();

        let db = self.db.lock().await;
        let conn = db.connection();
        conn.execute("BEGIN TRANSACTION", ()).await?;

        let result = async {
            let cache = LibSqlEntityCache::new(conn);
            let base_updated_at = cache
                .get(&entity_kind, id)
                .await?
                .and_then(|record| record.remote_updated_at);
            cache.remove(&entity_kind, id).await?;
            LibSqlMutationStore::new(conn)
                .insert(
                    NewMutation {
                        kind: MutationKind::Delete,
                        entity_kind: entity_kind.clone(),
                        entity_id: id.to_string(),
                        payload: serde_json::json!({ "id": id }),
                        base_updated_at,
                    },
                    now,
                )
                .await
        }
        .await;

        finish_transaction(conn, result).await
    }

    /// Fold a server snapshot into the cache.
    ///
    /// Dirty records keep their local values. Returns the dirty records whose
    /// server timestamp moved beyond the skew tolerance, which will likely
    /// conflict on their next delivery.
    pub async fn apply_remote_snapshot(
        &self,
        entity_kind: &str,
        records: &[RemoteRecord],
    ) -> Result<Vec<EntityKey>> {
        let entity_kind = normalize_entity_kind(entity_kind)?;
        let now = self.now();

        let db = self.db.lock().await;
        let conn = db.connection();
        conn.execute("BEGIN TRANSACTION", ()).await?;

        let result = async {
            let cache = LibSqlEntityCache::new(conn);
            let mut suspected = Vec::new();
            for record in records {
                match cache.get(&entity_kind, &record.id).await? {
                    Some(local) if local.dirty => {
                        let diverged = match (local.remote_updated_at, record.updated_at) {
                            (Some(known), Some(remote)) => {
                                is_divergent(known, remote, DIVERGENCE_TOLERANCE_MS)
                            }
                            (None, Some(_)) => true,
                            _ => false,
                        };
                        if diverged {
                            suspected.push(EntityKey::new(&entity_kind, &record.id));
                        }
                    }
                    _ => {
                        cache
                            .reconcile(&entity_kind, &record.id, &record.data, record.updated_at, now)
                            .await?;
                    }
                }
            }
            Ok(suspected)
        }
        .await;

        finish_transaction(conn, result).await
    }

    pub async fn purge_cache(&self, entity_kind: Option<&str>) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlEntityCache::new(db.connection())
            .purge(entity_kind)
            .await
    }

    // -----------------------------------------------------------------------
    // Metadata
    // -----------------------------------------------------------------------

    pub async fn last_sync_at(&self) -> Result<Option<i64>> {
        let db = self.db.lock().await;
        LibSqlMetadataRepository::new(db.connection())
            .last_sync_at()
            .await
    }

    pub async fn set_last_sync_at(&self, at: i64) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlMetadataRepository::new(db.connection())
            .set_last_sync_at(at)
            .await
    }

    /// Wipe queue, cache, conflicts, and metadata (logout).
    pub async fn reset(&self) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();
        conn.execute("BEGIN TRANSACTION", ()).await?;

        let result = async {
            LibSqlMutationStore::new(conn).clear().await?;
            LibSqlEntityCache::new(conn).purge(None).await?;
            LibSqlConflictRepository::new(conn).clear().await?;
            LibSqlMetadataRepository::new(conn).clear().await?;
            Ok(())
        }
        .await;

        finish_transaction(conn, result).await?;
        tracing::info!("Cleared local sync state");
        Ok(())
    }
}

fn normalize_entity_kind(entity_kind: &str) -> Result<String> {
    let entity_kind = entity_kind.trim();
    if entity_kind.is_empty() {
        return Err(Error::InvalidInput(
            "entity kind must not be empty".to_string(),
        ));
    }
    Ok(entity_kind.to_string())
}

/// Work out the targeted entity id, generating one for id-less creates.
fn resolve_entity_id(
    kind: MutationKind,
    payload: serde_json::Value,
) -> Result<(String, serde_json::Value)> {
    if let Some(id) = payload_entity_id(&payload) {
        return Ok((id, payload));
    }
    match (kind, payload) {
        (MutationKind::Create, serde_json::Value::Object(mut object)) => {
            let id = uuid::Uuid::now_v7().to_string();
            object.insert("id".to_string(), serde_json::Value::String(id.clone()));
            Ok((id, serde_json::Value::Object(object)))
        }
        (MutationKind::Create, _) => Err(Error::InvalidInput(
            "create payload must be a JSON object".to_string(),
        )),
        (kind, _) => Err(Error::InvalidInput(format!(
            "{kind} payload must include an id"
        ))),
    }
}
