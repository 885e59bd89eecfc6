//! In-memory server used by engine and service tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{RemoteBackend, RemoteError, RemoteRecord};
use crate::models::{merge_json, payload_entity_id, EntityKey, MutationKind};

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub kind: MutationKind,
    pub key: EntityKey,
    pub payload: Option<serde_json::Value>,
    pub base_updated_at: Option<i64>,
}

#[derive(Default)]
struct ServerState {
    records: HashMap<EntityKey, RemoteRecord>,
    scripted: HashMap<EntityKey, VecDeque<RemoteError>>,
    calls: Vec<Call>,
    in_flight: HashSet<EntityKey>,
    max_parallel: usize,
    overlapped_entity: bool,
    server_time: i64,
}

/// Server with real conflict detection plus scripted failures per entity.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    state: Arc<Mutex<ServerState>>,
    latency: Option<Duration>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        let backend = Self::default();
        backend.lock().server_time = 1_000_000;
        backend
    }

    /// Sleep this long inside every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }

    pub fn seed(&self, entity_kind: &str, id: &str, data: serde_json::Value, updated_at: i64) {
        self.lock().records.insert(
            EntityKey::new(entity_kind, id),
            RemoteRecord {
                id: id.to_string(),
                data,
                updated_at: Some(updated_at),
            },
        );
    }

    /// Queue an error returned by the next call for this entity.
    pub fn fail_next(&self, entity_kind: &str, id: &str, error: RemoteError) {
        self.lock()
            .scripted
            .entry(EntityKey::new(entity_kind, id))
            .or_default()
            .push_back(error);
    }

    pub fn record(&self, entity_kind: &str, id: &str) -> Option<RemoteRecord> {
        self.lock()
            .records
            .get(&EntityKey::new(entity_kind, id))
            .cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn calls_for(&self, entity_kind: &str, id: &str) -> Vec<Call> {
        let key = EntityKey::new(entity_kind, id);
        self.calls()
            .into_iter()
            .filter(|call| call.key == key)
            .collect()
    }

    pub fn max_parallel(&self) -> usize {
        self.lock().max_parallel
    }

    /// Whether two calls for the same entity were ever in progress together.
    pub fn overlapped_entity(&self) -> bool {
        self.lock().overlapped_entity
    }

    async fn handle(
        &self,
        kind: MutationKind,
        key: EntityKey,
        payload: Option<&serde_json::Value>,
        base_updated_at: Option<i64>,
    ) -> Result<Option<RemoteRecord>, RemoteError> {
        {
            let mut state = self.lock();
            state.calls.push(Call {
                kind,
                key: key.clone(),
                payload: payload.cloned(),
                base_updated_at,
            });
            if !state.in_flight.insert(key.clone()) {
                state.overlapped_entity = true;
            }
            state.max_parallel = state.max_parallel.max(state.in_flight.len());
        }

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        state.in_flight.remove(&key);

        if let Some(error) = state
            .scripted
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        let existing = state.records.get(&key).cloned();
        if let (Some(current), Some(base)) = (&existing, base_updated_at) {
            if current.updated_at.is_some_and(|remote| remote > base) {
                return Err(RemoteError::Conflict {
                    current: current.clone(),
                });
            }
        }

        state.server_time += 1_000;
        let now = state.server_time;
        match kind {
            MutationKind::Create => {
                if let Some(current) = existing {
                    return Err(RemoteError::Conflict { current });
                }
                let record = RemoteRecord {
                    id: key.entity_id.clone(),
                    data: payload.cloned().unwrap_or_default(),
                    updated_at: Some(now),
                };
                state.records.insert(key, record.clone());
                Ok(Some(record))
            }
            MutationKind::Update => {
                let Some(current) = existing else {
                    return Err(RemoteError::Rejected(format!("{key} does not exist")));
                };
                let record = RemoteRecord {
                    id: current.id,
                    data: merge_json(&current.data, payload.unwrap_or(&serde_json::Value::Null)),
                    updated_at: Some(now),
                };
                state.records.insert(key, record.clone());
                Ok(Some(record))
            }
            MutationKind::Delete => {
                state.records.remove(&key);
                Ok(None)
            }
        }
    }
}

impl RemoteBackend for ScriptedBackend {
    async fn create(
        &self,
        entity_kind: &str,
        payload: &serde_json::Value,
    ) -> Result<RemoteRecord, RemoteError> {
        let id = payload_entity_id(payload).unwrap_or_default();
        self.handle(
            MutationKind::Create,
            EntityKey::new(entity_kind, id),
            Some(payload),
            None,
        )
        .await?
        .ok_or_else(|| RemoteError::Rejected("create returned nothing".into()))
    }

    async fn update(
        &self,
        entity_kind: &str,
        id: &str,
        payload: &serde_json::Value,
        base_updated_at: Option<i64>,
    ) -> Result<RemoteRecord, RemoteError> {
        self.handle(
            MutationKind::Update,
            EntityKey::new(entity_kind, id),
            Some(payload),
            base_updated_at,
        )
        .await?
        .ok_or_else(|| RemoteError::Rejected("update returned nothing".into()))
    }

    async fn delete(
        &self,
        entity_kind: &str,
        id: &str,
        base_updated_at: Option<i64>,
    ) -> Result<(), RemoteError> {
        self.handle(
            MutationKind::Delete,
            EntityKey::new(entity_kind, id),
            None,
            base_updated_at,
        )
        .await
        .map(|_| ())
    }
}
