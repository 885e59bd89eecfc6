//! Drain engine that replays queued mutations against the remote backend.
//!
//! A cycle groups pending mutations into per-entity lanes. Lanes run
//! concurrently up to the configured limit while each lane delivers its
//! mutations strictly in queue order and stops at the first one that does not
//! complete.

mod report;
mod scheduler;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::watch;

use crate::conflict::{ConflictResolver, Resolution};
use crate::config::EngineConfig;
use crate::models::{
    ConflictRecord, EntityKey, FailureDisposition, MutationKind, MutationStatus, PendingMutation,
};
use crate::remote::{RemoteBackend, RemoteError, RemoteRecord};
use crate::services::SyncStore;
use crate::state::SyncState;
use crate::{Error, Result};

pub use report::{DrainReport, MutationOutcome, MutationReport};
pub use scheduler::{SchedulerHandle, SyncScheduler, SyncTrigger};

/// Replays the durable queue against a `RemoteBackend`.
pub struct SyncEngine<B> {
    store: SyncStore,
    backend: B,
    resolver: ConflictResolver,
    config: EngineConfig,
    running: AtomicBool,
    cancel: AtomicBool,
    stopping: Arc<AtomicBool>,
    state: watch::Sender<SyncState>,
}

impl<B> std::fmt::Debug for SyncEngine<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .field("running", &self.running.load(Ordering::Relaxed))
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

/// Holds the run flag for the duration of one cycle.
struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl<B: RemoteBackend> SyncEngine<B> {
    /// Engine with the default last-write-wins resolver.
    pub fn new(store: SyncStore, backend: B, config: EngineConfig) -> Self {
        let (state, _) = watch::channel(SyncState::default());
        Self {
            store,
            backend,
            resolver: ConflictResolver::default(),
            config,
            running: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
            stopping: Arc::new(AtomicBool::new(false)),
            state,
        }
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: ConflictResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub const fn store(&self) -> &SyncStore {
        &self.store
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    pub(crate) fn publish(&self, state: SyncState) {
        self.state.send_replace(state);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop the current cycle before its next delivery.
    ///
    /// Deliveries already in flight finish or time out.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Set while a scheduler shuts down. Unlike `cancel`, no drain clears it.
    pub(crate) fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stopping)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst) || self.stopping.load(Ordering::SeqCst)
    }

    /// Run one drain cycle.
    ///
    /// Returns `Ok(None)` without doing anything when a cycle is already running.
    pub async fn drain(&self) -> Result<Option<DrainReport>> {
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            tracing::debug!("Drain already running; skipping trigger");
            return Ok(None);
        };

        self.cancel.store(false, Ordering::SeqCst);
        self.publish(SyncState::Syncing);

        let result = async {
            let report = self.run_cycle().await?;
            if !report.cancelled {
                self.store.set_last_sync_at(self.store.now()).await?;
            }
            Ok(report)
        }
        .await;

        match &result {
            Ok(report) => {
                tracing::info!(
                    succeeded = report.succeeded(),
                    failed = report.failed(),
                    conflicts = report.conflicts(),
                    cancelled = report.cancelled,
                    "Drain cycle finished"
                );
                self.publish(SyncState::Synced);
            }
            Err(error) => {
                tracing::warn!("Drain cycle failed: {error}");
                self.publish(SyncState::Error);
            }
        }

        result.map(Some)
    }

    async fn run_cycle(&self) -> Result<DrainReport> {
        let mut report = DrainReport::default();

        // The run flag is held, so any in-flight row belongs to a cycle that
        // crashed or whose future was dropped.
        report.recovered = self.store.recover_in_flight().await?;
        if report.recovered > 0 {
            tracing::info!(
                recovered = report.recovered,
                "Requeued mutations left in flight by an interrupted cycle"
            );
        }

        let pending = self.store.list_pending().await?;
        if pending.is_empty() {
            return Ok(report);
        }

        let blocked = self.store.blocked_entities().await?;

        let mut lanes = Vec::new();
        for (entity, lane) in group_lanes(pending) {
            if blocked.contains(&entity) {
                for mutation in lane {
                    report.push(mutation.id, entity.clone(), MutationOutcome::Blocked);
                }
                continue;
            }
            lanes.push(lane);
        }

        let deliveries: Vec<_> = lanes
            .into_iter()
            .map(|lane| self.drain_lane(lane))
            .collect();
        let results: Vec<Result<DrainReport>> = stream::iter(deliveries)
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        for result in results {
            report.extend(result?);
        }
        Ok(report)
    }

    async fn drain_lane(&self, lane: Vec<PendingMutation>) -> Result<DrainReport> {
        let mut report = DrainReport::default();

        for queued in lane {
            if self.is_cancelled() {
                report.cancelled = true;
                break;
            }

            // Earlier deliveries in this lane may have moved the base version.
            let Some(mutation) = self.store.get_mutation(&queued.id).await? else {
                continue;
            };
            let entity = mutation.entity_key();

            if mutation.is_surfaced() {
                report.push(mutation.id, entity, MutationOutcome::Blocked);
                break;
            }

            if mutation.status == MutationStatus::Failed {
                let now = self.store.now();
                if let Some(retry_at) = self
                    .config
                    .backoff
                    .retry_at(mutation.attempts, mutation.last_attempt_at)
                    .filter(|retry_at| now < *retry_at)
                {
                    report.push(mutation.id, entity, MutationOutcome::Deferred { retry_at });
                    break;
                }
            }

            if !self.process(mutation, &mut report).await? {
                break;
            }
        }

        Ok(report)
    }

    /// Deliver one mutation, resolving conflicts as they come up.
    ///
    /// Returns whether the lane may move on to the next mutation.
    async fn process(&self, mut mutation: PendingMutation, report: &mut DrainReport) -> Result<bool> {
        let entity = mutation.entity_key();
        let mut rebases = 0_u32;

        loop {
            self.store.mark_in_flight(&mutation.id).await?;

            match self.deliver(&mutation).await {
                Ok(confirmed) => {
                    self.store
                        .complete_delivery(&mutation, confirmed.as_ref())
                        .await?;
                    tracing::debug!(
                        mutation_id = %mutation.id,
                        %entity,
                        kind = %mutation.kind,
                        "Delivered mutation"
                    );
                    report.push(mutation.id, entity, MutationOutcome::Completed);
                    return Ok(true);
                }
                Err(RemoteError::Conflict { current }) => {
                    let conflict = conflict_record(&mutation, &current);
                    let resolution = if rebases >= self.config.max_conflict_rebases {
                        tracing::warn!(
                            mutation_id = %mutation.id,
                            %entity,
                            rebases,
                            "Conflict keeps recurring; leaving it to the user"
                        );
                        Resolution::Manual
                    } else {
                        self.resolver.resolve(&conflict)
                    };

                    if resolution == Resolution::Manual {
                        self.store.park_conflict(&mutation, &conflict).await?;
                        tracing::info!(mutation_id = %mutation.id, %entity, "Conflict needs the user");
                        report.push(mutation.id, entity, MutationOutcome::ConflictOpen);
                        return Ok(false);
                    }

                    self.store
                        .apply_resolution(&mutation.id, &conflict, &resolution, false)
                        .await?;
                    report.push(
                        mutation.id,
                        entity.clone(),
                        MutationOutcome::ConflictResolved {
                            resolution: resolution.label().to_string(),
                        },
                    );
                    if resolution == Resolution::UseRemote {
                        return Ok(true);
                    }

                    rebases += 1;
                    if self.is_cancelled() {
                        report.cancelled = true;
                        return Ok(false);
                    }
                    mutation = self
                        .store
                        .get_mutation(&mutation.id)
                        .await?
                        .ok_or_else(|| Error::NotFound(format!("mutation {}", mutation.id)))?;
                }
                Err(error) => {
                    let disposition = if error.is_transient()
                        && self.config.backoff.should_retry(mutation.attempts + 1)
                    {
                        FailureDisposition::Retry
                    } else {
                        FailureDisposition::Permanent
                    };
                    let failed = self
                        .store
                        .record_failure(&mutation.id, &error.to_string(), disposition)
                        .await?;

                    let error = error.to_string();
                    let outcome = match disposition {
                        FailureDisposition::Retry => {
                            tracing::debug!(
                                mutation_id = %failed.id,
                                %entity,
                                attempts = failed.attempts,
                                "Delivery failed; will retry: {error}"
                            );
                            MutationOutcome::Retrying {
                                attempts: failed.attempts,
                                error,
                            }
                        }
                        FailureDisposition::Permanent => {
                            tracing::warn!(
                                mutation_id = %failed.id,
                                %entity,
                                attempts = failed.attempts,
                                "Delivery failed permanently: {error}"
                            );
                            MutationOutcome::Failed {
                                attempts: failed.attempts,
                                error,
                            }
                        }
                    };
                    report.push(failed.id, entity, outcome);
                    return Ok(false);
                }
            }
        }
    }

    /// One remote call, bounded by the delivery timeout.
    async fn deliver(
        &self,
        mutation: &PendingMutation,
    ) -> std::result::Result<Option<RemoteRecord>, RemoteError> {
        let call = async {
            match mutation.kind {
                MutationKind::Create => self
                    .backend
                    .create(&mutation.entity_kind, &mutation.payload)
                    .await
                    .map(Some),
                MutationKind::Update => self
                    .backend
                    .update(
                        &mutation.entity_kind,
                        &mutation.entity_id,
                        &mutation.payload,
                        mutation.base_updated_at,
                    )
                    .await
                    .map(Some),
                MutationKind::Delete => self
                    .backend
                    .delete(
                        &mutation.entity_kind,
                        &mutation.entity_id,
                        mutation.base_updated_at,
                    )
                    .await
                    .map(|()| None),
            }
        };

        tokio::time::timeout(self.config.delivery_timeout, call)
            .await
            .unwrap_or_else(|_| {
                Err(RemoteError::Transient(format!(
                    "timed out after {}ms",
                    self.config.delivery_timeout.as_millis()
                )))
            })
    }
}

/// Split the queue into per-entity lanes, keeping queue order inside each lane
/// and ordering lanes by their oldest mutation.
fn group_lanes(pending: Vec<PendingMutation>) -> Vec<(EntityKey, Vec<PendingMutation>)> {
    let mut index: HashMap<EntityKey, usize> = HashMap::new();
    let mut lanes: Vec<(EntityKey, Vec<PendingMutation>)> = Vec::new();

    for mutation in pending {
        let entity = mutation.entity_key();
        if let Some(&position) = index.get(&entity) {
            lanes[position].1.push(mutation);
        } else {
            index.insert(entity.clone(), lanes.len());
            lanes.push((entity, vec![mutation]));
        }
    }
    lanes
}

fn conflict_record(mutation: &PendingMutation, current: &RemoteRecord) -> ConflictRecord {
    ConflictRecord {
        entity_kind: mutation.entity_kind.clone(),
        entity_id: mutation.entity_id.clone(),
        local_value: mutation.payload.clone(),
        remote_value: current.data.clone(),
        local_timestamp: mutation.enqueued_at,
        remote_timestamp: current.updated_at.unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffPolicy;
    use crate::clock::ManualClock;
    use crate::conflict::BuiltinStrategy;
    use crate::remote::testing::ScriptedBackend;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    async fn setup(
        backend: ScriptedBackend,
        config: EngineConfig,
    ) -> (SyncEngine<ScriptedBackend>, SyncStore, ManualClock) {
        let clock = ManualClock::new(1_000_000);
        let store = SyncStore::open_in_memory_with_clock(Arc::new(clock.clone()))
            .await
            .unwrap();
        let engine = SyncEngine::new(store.clone(), backend, config);
        (engine, store, clock)
    }

    fn config() -> EngineConfig {
        EngineConfig {
            sync_interval: None,
            ..EngineConfig::default()
        }
    }

    fn remote(id: &str, data: serde_json::Value, updated_at: i64) -> RemoteRecord {
        RemoteRecord {
            id: id.to_string(),
            data,
            updated_at: Some(updated_at),
        }
    }

    /// Cache and server both hold `item/42` at `base`; the server then moves to `server_at`.
    async fn diverged_item(
        store: &SyncStore,
        backend: &ScriptedBackend,
        base: i64,
        server_at: i64,
    ) -> PendingMutation {
        store
            .apply_remote_snapshot(
                "item",
                &[remote("42", json!({"id": "42", "price": 90}), base)],
            )
            .await
            .unwrap();
        backend.seed("item", "42", json!({"id": "42", "price": 120}), server_at);
        let (mutation, _) = store
            .record_update("item", "42", json!({"price": 100}))
            .await
            .unwrap();
        mutation
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delivers_each_entity_in_enqueue_order() {
        let backend = ScriptedBackend::new().with_latency(Duration::from_millis(20));
        let (engine, store, clock) = setup(backend.clone(), config()).await;

        store
            .record_create("item", json!({"id": "1", "price": 1}))
            .await
            .unwrap();
        clock.advance(1);
        store
            .record_create("item", json!({"id": "2", "price": 5}))
            .await
            .unwrap();
        clock.advance(1);
        store
            .record_update("item", "1", json!({"price": 2}))
            .await
            .unwrap();

        let report = engine.drain().await.unwrap().unwrap();
        assert_eq!(report.succeeded(), 3);
        assert_eq!(report.conflicts(), 0);
        assert!(!backend.overlapped_entity());

        let kinds: Vec<MutationKind> = backend
            .calls_for("item", "1")
            .iter()
            .map(|call| call.kind)
            .collect();
        assert_eq!(kinds, vec![MutationKind::Create, MutationKind::Update]);

        let cached = store.get_entity("item", "1").await.unwrap().unwrap();
        assert!(!cached.dirty);
        assert_eq!(cached.data["price"], 2);
        assert_eq!(backend.record("item", "1").unwrap().data["price"], 2);
        assert!(store.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn transient_failures_back_off_then_complete() {
        let backend = ScriptedBackend::new();
        let (engine, store, clock) = setup(backend.clone(), config()).await;
        store
            .apply_remote_snapshot("item", &[remote("42", json!({"id": "42", "price": 90}), 500_000)])
            .await
            .unwrap();
        backend.seed("item", "42", json!({"id": "42", "price": 90}), 500_000);
        backend.fail_next("item", "42", RemoteError::Transient("HTTP 503".into()));
        backend.fail_next("item", "42", RemoteError::Transient("HTTP 503".into()));

        let mutation = store
            .enqueue(MutationKind::Update, "item", json!({"id": "42", "price": 100}))
            .await
            .unwrap();

        let first = engine.drain().await.unwrap().unwrap();
        assert!(matches!(
            first.outcome_for(&mutation.id),
            Some(MutationOutcome::Retrying { attempts: 1, .. })
        ));

        let early = engine.drain().await.unwrap().unwrap();
        assert_eq!(
            early.outcome_for(&mutation.id),
            Some(&MutationOutcome::Deferred {
                retry_at: 1_001_000
            })
        );
        assert!(early.is_noop());

        clock.advance(1_000);
        let second = engine.drain().await.unwrap().unwrap();
        assert!(matches!(
            second.outcome_for(&mutation.id),
            Some(MutationOutcome::Retrying { attempts: 2, .. })
        ));

        clock.advance(1_999);
        assert!(engine.drain().await.unwrap().unwrap().is_noop());
        clock.advance(1);

        let recorded = store.get_mutation(&mutation.id).await.unwrap().unwrap();
        assert_eq!(recorded.attempts, 2);

        let third = engine.drain().await.unwrap().unwrap();
        assert_eq!(third.outcome_for(&mutation.id), Some(&MutationOutcome::Completed));
        assert!(store.get_mutation(&mutation.id).await.unwrap().is_none());

        let cached = store.get_entity("item", "42").await.unwrap().unwrap();
        assert_eq!(cached.data["price"], 100);
        assert!(!cached.dirty);
        assert_eq!(backend.calls_for("item", "42").len(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn retry_cap_surfaces_mutation() {
        let backend = ScriptedBackend::new();
        let config = EngineConfig {
            backoff: BackoffPolicy::new(10, 100, 2),
            ..config()
        };
        let (engine, store, clock) = setup(backend.clone(), config).await;
        backend.fail_next("item", "1", RemoteError::Transient("connection reset".into()));
        backend.fail_next("item", "1", RemoteError::Transient("connection reset".into()));
        let mutation = store
            .enqueue(MutationKind::Create, "item", json!({"id": "1"}))
            .await
            .unwrap();

        engine.drain().await.unwrap();
        clock.advance(1_000);
        let report = engine.drain().await.unwrap().unwrap();
        assert!(matches!(
            report.outcome_for(&mutation.id),
            Some(MutationOutcome::Failed { attempts: 2, .. })
        ));

        assert!(store.list_pending().await.unwrap().is_empty());
        let failed = store.list_failed().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert!(!engine.config().backoff.should_retry(failed[0].attempts));

        clock.advance(1_000);
        assert!(engine.drain().await.unwrap().unwrap().outcomes.is_empty());
        assert_eq!(backend.calls().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejected_mutation_is_surfaced_immediately() {
        let backend = ScriptedBackend::new();
        let (engine, store, _) = setup(backend.clone(), config()).await;
        backend.fail_next(
            "item",
            "1",
            RemoteError::Rejected("null value in column \"name\" (400)".into()),
        );
        let mutation = store
            .enqueue(MutationKind::Create, "item", json!({"id": "1"}))
            .await
            .unwrap();

        let report = engine.drain().await.unwrap().unwrap();
        assert!(matches!(
            report.outcome_for(&mutation.id),
            Some(MutationOutcome::Failed { attempts: 1, .. })
        ));
        assert_eq!(store.list_failed().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_drain_is_noop() {
        let (engine, store, _) = setup(ScriptedBackend::new(), config()).await;
        store
            .apply_remote_snapshot("item", &[remote("1", json!({"id": "1"}), 10)])
            .await
            .unwrap();
        let before = store.list_entities("item", None).await.unwrap();

        let report = engine.drain().await.unwrap().unwrap();
        assert!(report.is_noop());
        assert_eq!(store.list_entities("item", None).await.unwrap(), before);
        assert_eq!(store.last_sync_at().await.unwrap(), Some(1_000_000));
        assert_eq!(engine.state(), SyncState::Synced);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn tie_is_surfaced_and_blocks_the_entity() {
        let backend = ScriptedBackend::new();
        let (engine, store, clock) = setup(backend.clone(), config()).await;
        let mutation = diverged_item(&store, &backend, 500_000, 1_000_000).await;

        let report = engine.drain().await.unwrap().unwrap();
        assert_eq!(
            report.outcome_for(&mutation.id),
            Some(&MutationOutcome::ConflictOpen)
        );
        assert_eq!(backend.record("item", "42").unwrap().data["price"], 120);

        let open = store.open_conflicts().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].conflict.local_timestamp, 1_000_000);
        assert_eq!(open[0].conflict.remote_timestamp, 1_000_000);
        assert_eq!(store.list_failed().await.unwrap()[0].id, mutation.id);

        clock.advance(10);
        let (later, _) = store
            .record_update("item", "42", json!({"notes": "new scope"}))
            .await
            .unwrap();
        let report = engine.drain().await.unwrap().unwrap();
        assert_eq!(report.outcome_for(&later.id), Some(&MutationOutcome::Blocked));
        assert_eq!(backend.calls().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn newer_local_change_is_rebased_and_delivered() {
        let backend = ScriptedBackend::new();
        let (engine, store, _) = setup(backend.clone(), config()).await;
        let mutation = diverged_item(&store, &backend, 500_000, 900_000).await;

        let report = engine.drain().await.unwrap().unwrap();
        assert_eq!(report.conflicts(), 1);
        assert_eq!(report.outcome_for(&mutation.id), Some(&MutationOutcome::Completed));

        let calls = backend.calls_for("item", "42");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].base_updated_at, Some(900_000));
        assert_eq!(backend.record("item", "42").unwrap().data["price"], 100);

        let log = store.conflict_log(10).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].resolution, "use_local");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn newer_local_create_for_existing_row_is_sent_as_update() {
        let backend = ScriptedBackend::new();
        let (engine, store, _) = setup(backend.clone(), config()).await;
        backend.seed("item", "5", json!({"id": "5", "price": 1}), 500_000);
        let (mutation, _) = store
            .record_create("item", json!({"id": "5", "price": 2}))
            .await
            .unwrap();

        let report = engine.drain().await.unwrap().unwrap();
        let outcomes: Vec<&MutationOutcome> =
            report.outcomes.iter().map(|entry| &entry.outcome).collect();
        assert_eq!(
            outcomes,
            vec![
                &MutationOutcome::ConflictResolved {
                    resolution: "use_local".to_string()
                },
                &MutationOutcome::Completed,
            ]
        );
        assert_eq!(report.outcome_for(&mutation.id), Some(&MutationOutcome::Completed));

        let calls = backend.calls_for("item", "5");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].kind, MutationKind::Update);
        assert_eq!(calls[1].base_updated_at, Some(500_000));
        assert_eq!(backend.record("item", "5").unwrap().data["price"], 2);
        assert!(store.list_pending().await.unwrap().is_empty());
        assert!(store.open_conflicts().await.unwrap().is_empty());
        assert!(!store.get_entity("item", "5").await.unwrap().unwrap().dirty);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn newer_remote_change_discards_local() {
        let backend = ScriptedBackend::new();
        let (engine, store, _) = setup(backend.clone(), config()).await;
        let mutation = diverged_item(&store, &backend, 500_000, 2_000_000).await;

        let report = engine.drain().await.unwrap().unwrap();
        assert_eq!(
            report.outcome_for(&mutation.id),
            Some(&MutationOutcome::ConflictResolved {
                resolution: "use_remote".into()
            })
        );
        assert!(store.get_mutation(&mutation.id).await.unwrap().is_none());

        let cached = store.get_entity("item", "42").await.unwrap().unwrap();
        assert_eq!(cached.data["price"], 120);
        assert_eq!(cached.remote_updated_at, Some(2_000_000));
        assert!(!cached.dirty);
        assert_eq!(backend.calls_for("item", "42").len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn merge_strategy_delivers_combined_payload() {
        let backend = ScriptedBackend::new();
        let (engine, store, _) = setup(backend.clone(), config()).await;
        let engine = engine.with_resolver(ConflictResolver::new(BuiltinStrategy::MergeFields));
        store
            .apply_remote_snapshot("item", &[remote("42", json!({"id": "42"}), 500_000)])
            .await
            .unwrap();
        backend.seed(
            "item",
            "42",
            json!({"id": "42", "price": 120, "notes": null}),
            900_000,
        );
        store
            .record_update("item", "42", json!({"price": 100, "notes": "scope"}))
            .await
            .unwrap();

        let report = engine.drain().await.unwrap().unwrap();
        assert_eq!(report.succeeded(), 1);

        let server = backend.record("item", "42").unwrap();
        assert_eq!(server.data["price"], 120);
        assert_eq!(server.data["notes"], "scope");
        assert_eq!(store.conflict_log(1).await.unwrap()[0].resolution, "merge");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rebase_cap_parks_recurring_conflict() {
        let backend = ScriptedBackend::new();
        let config = EngineConfig {
            max_conflict_rebases: 0,
            ..config()
        };
        let (engine, store, _) = setup(backend.clone(), config).await;
        let mutation = diverged_item(&store, &backend, 500_000, 900_000).await;

        let report = engine.drain().await.unwrap().unwrap();
        assert_eq!(
            report.outcome_for(&mutation.id),
            Some(&MutationOutcome::ConflictOpen)
        );
        assert_eq!(store.open_conflicts().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn custom_strategy_closure_is_used() {
        let backend = ScriptedBackend::new();
        let (engine, store, _) = setup(backend.clone(), config()).await;
        let engine = engine.with_resolver(ConflictResolver::new(|_: &ConflictRecord| {
            Resolution::UseRemote
        }));
        let mutation = diverged_item(&store, &backend, 500_000, 900_000).await;

        engine.drain().await.unwrap();
        assert!(store.get_mutation(&mutation.id).await.unwrap().is_none());
        assert_eq!(backend.record("item", "42").unwrap().data["price"], 120);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn confirmed_delete_removes_remote_row_and_cache() {
        let backend = ScriptedBackend::new();
        let (engine, store, _) = setup(backend.clone(), config()).await;
        store
            .apply_remote_snapshot("item", &[remote("7", json!({"id": "7"}), 500_000)])
            .await
            .unwrap();
        backend.seed("item", "7", json!({"id": "7"}), 500_000);
        store.record_delete("item", "7").await.unwrap();

        let report = engine.drain().await.unwrap().unwrap();
        assert_eq!(report.succeeded(), 1);
        assert!(backend.record("item", "7").is_none());
        assert!(store.get_entity("item", "7").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_drain_returns_none() {
        let backend = ScriptedBackend::new().with_latency(Duration::from_millis(150));
        let (engine, store, _) = setup(backend, config()).await;
        store
            .enqueue(MutationKind::Create, "item", json!({"id": "1"}))
            .await
            .unwrap();
        let engine = Arc::new(engine);

        let first = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.drain().await }
        });
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(engine.is_running());
        assert!(engine.drain().await.unwrap().is_none());
        assert_eq!(first.await.unwrap().unwrap().unwrap().succeeded(), 1);
        assert!(!engine.is_running());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancel_stops_new_deliveries() {
        let backend = ScriptedBackend::new().with_latency(Duration::from_millis(100));
        let config = EngineConfig {
            concurrency: 1,
            ..config()
        };
        let (engine, store, _) = setup(backend.clone(), config).await;
        for id in ["1", "2", "3"] {
            store
                .enqueue(MutationKind::Create, "item", json!({ "id": id }))
                .await
                .unwrap();
        }
        let engine = Arc::new(engine);

        let drain = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.drain().await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        engine.cancel();

        let report = drain.await.unwrap().unwrap().unwrap();
        assert!(report.cancelled);
        assert_eq!(report.succeeded(), 1);
        assert_eq!(backend.calls().len(), 1);
        assert_eq!(store.list_pending().await.unwrap().len(), 2);
        assert_eq!(store.last_sync_at().await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stop_flag_survives_the_start_of_a_drain() {
        let backend = ScriptedBackend::new();
        let (engine, store, _) = setup(backend.clone(), config()).await;
        let mutation = store
            .enqueue(MutationKind::Create, "item", json!({"id": "1"}))
            .await
            .unwrap();
        let stop = engine.stop_flag();
        stop.store(true, Ordering::SeqCst);

        let report = engine.drain().await.unwrap().unwrap();
        assert!(report.cancelled);
        assert!(backend.calls().is_empty());
        assert!(store.get_mutation(&mutation.id).await.unwrap().is_some());

        stop.store(false, Ordering::SeqCst);
        let report = engine.drain().await.unwrap().unwrap();
        assert_eq!(report.outcome_for(&mutation.id), Some(&MutationOutcome::Completed));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn lanes_respect_concurrency_limit() {
        let backend = ScriptedBackend::new().with_latency(Duration::from_millis(30));
        let config = EngineConfig {
            concurrency: 2,
            ..config()
        };
        let (engine, store, _) = setup(backend.clone(), config).await;
        for id in ["1", "2", "3", "4", "5"] {
            store
                .enqueue(MutationKind::Create, "item", json!({ "id": id }))
                .await
                .unwrap();
        }

        let report = engine.drain().await.unwrap().unwrap();
        assert_eq!(report.succeeded(), 5);
        assert_eq!(backend.max_parallel(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn timeout_counts_as_transient_failure() {
        let backend = ScriptedBackend::new().with_latency(Duration::from_millis(300));
        let config = EngineConfig {
            delivery_timeout: Duration::from_millis(20),
            ..config()
        };
        let (engine, store, _) = setup(backend, config).await;
        let mutation = store
            .enqueue(MutationKind::Create, "item", json!({"id": "1"}))
            .await
            .unwrap();

        let report = engine.drain().await.unwrap().unwrap();
        assert!(matches!(
            report.outcome_for(&mutation.id),
            Some(MutationOutcome::Retrying { attempts: 1, .. })
        ));
        let stored = store.get_mutation(&mutation.id).await.unwrap().unwrap();
        assert!(stored.last_error.unwrap().contains("timed out"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cycle_requeues_interrupted_deliveries() {
        let backend = ScriptedBackend::new();
        let (engine, store, _) = setup(backend, config()).await;
        let mutation = store
            .enqueue(MutationKind::Create, "item", json!({"id": "1"}))
            .await
            .unwrap();
        store.mark_in_flight(&mutation.id).await.unwrap();

        let report = engine.drain().await.unwrap().unwrap();
        assert_eq!(report.recovered, 1);
        assert_eq!(report.outcome_for(&mutation.id), Some(&MutationOutcome::Completed));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dropped_drain_is_requeued_by_the_next_cycle() {
        let backend = ScriptedBackend::new().with_latency(Duration::from_millis(200));
        let (engine, store, _) = setup(backend.clone(), config()).await;
        let mutation = store
            .enqueue(MutationKind::Create, "item", json!({"id": "1"}))
            .await
            .unwrap();

        let dropped = tokio::time::timeout(Duration::from_millis(50), engine.drain()).await;
        assert!(dropped.is_err());
        assert!(!engine.is_running());
        let stuck = store.get_mutation(&mutation.id).await.unwrap().unwrap();
        assert_eq!(stuck.status, MutationStatus::InFlight);

        let report = engine.drain().await.unwrap().unwrap();
        assert_eq!(report.recovered, 1);
        assert_eq!(report.outcome_for(&mutation.id), Some(&MutationOutcome::Completed));
        assert!(store.get_mutation(&mutation.id).await.unwrap().is_none());
        assert!(store.list_in_flight().await.unwrap().is_empty());
    }

    #[test]
    fn lanes_keep_queue_order() {
        let mutation = |entity_id: &str, enqueued_at: i64| PendingMutation {
            id: crate::models::MutationId::new(),
            kind: MutationKind::Update,
            entity_kind: "item".into(),
            entity_id: entity_id.into(),
            payload: json!({ "id": entity_id }),
            base_updated_at: None,
            enqueued_at,
            attempts: 0,
            last_attempt_at: None,
            status: MutationStatus::Pending,
            retryable: true,
            last_error: None,
        };
        let pending = vec![mutation("a", 1), mutation("b", 2), mutation("a", 3)];

        let lanes = group_lanes(pending);
        assert_eq!(lanes.len(), 2);
        assert_eq!(lanes[0].0, EntityKey::new("item", "a"));
        let times: Vec<i64> = lanes[0].1.iter().map(|m| m.enqueued_at).collect();
        assert_eq!(times, vec![1, 3]);
    }
}
