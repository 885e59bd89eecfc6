//! Durable mutation store implementation

use libsql::params::Params;
use libsql::{Connection, Row, Value};

use crate::error::{Error, Result};
use crate::models::{
    EntityKey, FailureDisposition, MutationId, MutationKind, MutationStatus, PendingMutation,
};

const MUTATION_COLUMNS: &str = "id, kind, entity_kind, entity_id, payload, base_updated_at, \
     enqueued_at, attempts, last_attempt_at, status, retryable, last_error";

/// New mutation as handed to [`MutationStore::insert`]
#[derive(Debug, Clone, PartialEq)]
pub struct NewMutation {
    pub kind: MutationKind,
    pub entity_kind: String,
    pub entity_id: String,
    pub payload: serde_json::Value,
    pub base_updated_at: Option<i64>,
}

/// Trait for pending mutation storage operations (async)
///
/// Every method is a single statement and therefore atomic per record.
#[allow(async_fn_in_trait)]
pub trait MutationStore {
    /// Persist a new `Pending` mutation with zero attempts
    async fn insert(&self, mutation: NewMutation, enqueued_at: i64) -> Result<PendingMutation>;

    /// Fetch one mutation by id
    async fn get(&self, id: &MutationId) -> Result<Option<PendingMutation>>;

    /// `Pending` and retryable `Failed` mutations, oldest first
    async fn list_pending(&self) -> Result<Vec<PendingMutation>>;

    /// Permanently failed mutations, oldest first
    async fn list_failed(&self) -> Result<Vec<PendingMutation>>;

    /// Mutations currently being delivered
    async fn list_in_flight(&self) -> Result<Vec<PendingMutation>>;

    /// Mark a queued mutation as being delivered
    async fn mark_in_flight(&self, id: &MutationId) -> Result<()>;

    /// Remove a delivered mutation
    async fn mark_completed(&self, id: &MutationId) -> Result<()>;

    /// Record a failed attempt
    async fn mark_failed(
        &self,
        id: &MutationId,
        error: &str,
        disposition: FailureDisposition,
        attempted_at: i64,
    ) -> Result<PendingMutation>;

    /// Put a mutation back to `Pending`, keeping its attempt history
    async fn requeue(&self, id: &MutationId) -> Result<()>;

    /// Requeue with a new kind, payload and base timestamp after a conflict
    async fn rebase(
        &self,
        id: &MutationId,
        kind: MutationKind,
        payload: &serde_json::Value,
        base_updated_at: Option<i64>,
    ) -> Result<()>;

    /// User-initiated retry: `Pending`, zero attempts, error cleared
    async fn reset_for_retry(&self, id: &MutationId) -> Result<()>;

    /// Drop a mutation without delivering it. Returns whether it existed.
    async fn discard(&self, id: &MutationId) -> Result<bool>;

    /// Turn `InFlight` leftovers from an interrupted cycle back into `Pending`
    async fn recover_in_flight(&self) -> Result<u64>;

    /// Number of queued mutations (any status) for an entity
    async fn count_for_entity(&self, key: &EntityKey) -> Result<u64>;

    /// Point an entity's queued, not in-flight mutations at a newly confirmed server version
    async fn advance_base(&self, key: &EntityKey, base_updated_at: i64) -> Result<u64>;

    /// Remove all records
    async fn clear(&self) -> Result<()>;
}

/// libSQL implementation of `MutationStore`
pub struct LibSqlMutationStore<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlMutationStore<'a> {
    /// Create a new store over the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn query_mutations(&self, sql: &str, params: Params) -> Result<Vec<PendingMutation>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut mutations = Vec::new();
        while let Some(row) = rows.next().await? {
            mutations.push(Self::parse_mutation(&row)?);
        }
        Ok(mutations)
    }

    fn expect_updated(id: &MutationId, affected: u64) -> Result<()> {
        if affected == 0 {
            return Err(Error::NotFound(format!("mutation {id}")));
        }
        Ok(())
    }

    /// Parse a mutation from a database row selected with `MUTATION_COLUMNS`
    fn parse_mutation(row: &Row) -> Result<PendingMutation> {
        let id: String = row.get(0)?;
        let kind: String = row.get(1)?;
        let payload: String = row.get(4)?;
        let status: String = row.get(9)?;

        Ok(PendingMutation {
            id: id
                .parse()
                .map_err(|_| Error::Database(format!("invalid mutation id '{id}'")))?,
            kind: kind.parse().map_err(Error::Database)?,
            entity_kind: row.get(2)?,
            entity_id: row.get(3)?,
            payload: serde_json::from_str(&payload)?,
            base_updated_at: row.get::<Option<i64>>(5)?,
            enqueued_at: row.get(6)?,
            attempts: u32::try_from(row.get::<i64>(7)?).unwrap_or(u32::MAX),
            last_attempt_at: row.get::<Option<i64>>(8)?,
            status: status.parse().map_err(Error::Database)?,
            retryable: row.get::<i64>(10)? != 0,
            last_error: row.get::<Option<String>>(11)?,
        })
    }
}

pub(crate) fn opt_integer(value: Option<i64>) -> Value {
    value.map_or(Value::Null, Value::Integer)
}

impl MutationStore for LibSqlMutationStore<'_> {
    async fn insert(&self, mutation: NewMutation, enqueued_at: i64) -> Result<PendingMutation> {
        let id = MutationId::new();
        let payload = serde_json::to_string(&mutation.payload)?;

        self.conn
            .execute(
                "INSERT INTO pending_mutations (
                    id, kind, entity_kind, entity_id, payload, base_updated_at,
                    enqueued_at, attempts, status, retryable
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, 0, 'pending', 1)",
                Params::Positional(vec![
                    Value::Text(id.as_str()),
                    Value::Text(mutation.kind.as_str().to_string()),
                    Value::Text(mutation.entity_kind.clone()),
                    Value::Text(mutation.entity_id.clone()),
                    Value::Text(payload),
                    opt_integer(mutation.base_updated_at),
                    Value::Integer(enqueued_at),
                ]),
            )
            .await?;

        Ok(PendingMutation {
            id,
            kind: mutation.kind,
            entity_kind: mutation.entity_kind,
            entity_id: mutation.entity_id,
            payload: mutation.payload,
            base_updated_at: mutation.base_updated_at,
            enqueued_at,
            attempts: 0,
            last_attempt_at: None,
            status: MutationStatus::Pending,
            retryable: true,
            last_error: None,
        })
    }

    async fn get(&self, id: &MutationId) -> Result<Option<PendingMutation>> {
        let sql = format!("SELECT {MUTATION_COLUMNS} FROM pending_mutations WHERE id = ?");
        let mut found = self
            .query_mutations(&sql, Params::Positional(vec![Value::Text(id.as_str())]))
            .await?;
        Ok(found.pop())
    }

    async fn list_pending(&self) -> Result<Vec<PendingMutation>> {
        let sql = format!(
            "SELECT {MUTATION_COLUMNS} FROM pending_mutations
             WHERE status = 'pending' OR (status = 'failed' AND retryable = 1)
             ORDER BY enqueued_at ASC, seq ASC"
        );
        self.query_mutations(&sql, Params::None).await
    }

    async fn list_failed(&self) -> Result<Vec<PendingMutation>> {
        let sql = format!(
            "SELECT {MUTATION_COLUMNS} FROM pending_mutations
             WHERE status = 'failed' AND retryable = 0
             ORDER BY enqueued_at ASC, seq ASC"
        );
        self.query_mutations(&sql, Params::None).await
    }

    async fn list_in_flight(&self) -> Result<Vec<PendingMutation>> {
        let sql = format!(
            "SELECT {MUTATION_COLUMNS} FROM pending_mutations
             WHERE status = 'in_flight'
             ORDER BY enqueued_at ASC, seq ASC"
        );
        self.query_mutations(&sql, Params::None).await
    }

    async fn mark_in_flight(&self, id: &MutationId) -> Result<()> {
        let affected = self
            .conn
            .execute(
                "UPDATE pending_mutations SET status = 'in_flight' WHERE id = ?",
                [id.as_str()],
            )
            .await?;
        Self::expect_updated(id, affected)
    }

    async fn mark_completed(&self, id: &MutationId) -> Result<()> {
        let affected = self
            .conn
            .execute("DELETE FROM pending_mutations WHERE id = ?", [id.as_str()])
            .await?;
        Self::expect_updated(id, affected)
    }

    async fn mark_failed(
        &self,
        id: &MutationId,
        error: &str,
        disposition: FailureDisposition,
        attempted_at: i64,
    ) -> Result<PendingMutation> {
        let retryable = i64::from(matches!(disposition, FailureDisposition::Retry));
        let affected = self
            .conn
            .execute(
                "UPDATE pending_mutations
                 SET status = 'failed',
                     attempts = attempts + 1,
                     last_attempt_at = ?,
                     last_error = ?,
                     retryable = ?
                 WHERE id = ?",
                Params::Positional(vec![
                    Value::Integer(attempted_at),
                    Value::Text(error.to_string()),
                    Value::Integer(retryable),
                    Value::Text(id.as_str()),
                ]),
            )
            .await?;
        Self::expect_updated(id, affected)?;

        self.get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("mutation {id}")))
    }

    async fn requeue(&self, id: &MutationId) -> Result<()> {
        let affected = self
            .conn
            .execute(
                "UPDATE pending_mutations SET status = 'pending', retryable = 1 WHERE id = ?",
                [id.as_str()],
            )
            .await?;
        Self::expect_updated(id, affected)
    }

    async fn rebase(
        &self,
        id: &MutationId,
        kind: MutationKind,
        payload: &serde_json::Value,
        base_updated_at: Option<i64>,
    ) -> Result<()> {
        let affected = self
            .conn
            .execute(
                "UPDATE pending_mutations
                 SET status = 'pending', retryable = 1, kind = ?, payload = ?, base_updated_at = ?
                 WHERE id = ?",
                Params::Positional(vec![
                    Value::Text(kind.as_str().to_string()),
                    Value::Text(serde_json::to_string(payload)?),
                    opt_integer(base_updated_at),
                    Value::Text(id.as_str()),
                ]),
            )
            .await?;
        Self::expect_updated(id, affected)
    }

    async fn reset_for_retry(&self, id: &MutationId) -> Result<()> {
        let affected = self
            .conn
            .execute(
                "UPDATE pending_mutations
                 SET status = 'pending', retryable = 1, attempts = 0,
                     last_attempt_at = NULL, last_error = NULL
                 WHERE id = ?",
                [id.as_str()],
            )
            .await?;
        Self::expect_updated(id, affected)
    }

    async fn discard(&self, id: &MutationId) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM pending_mutations WHERE id = ?", [id.as_str()])
            .await?;
        Ok(affected > 0)
    }

    async fn recover_in_flight(&self) -> Result<u64> {
        let affected = self
            .conn
            .execute(
                "UPDATE pending_mutations SET status = 'pending' WHERE status = 'in_flight'",
                (),
            )
            .await?;
        Ok(affected)
    }

    async fn count_for_entity(&self, key: &EntityKey) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM pending_mutations WHERE entity_kind = ? AND entity_id = ?",
                [key.entity_kind.as_str(), key.entity_id.as_str()],
            )
            .await?;
        let count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn advance_base(&self, key: &EntityKey, base_updated_at: i64) -> Result<u64> {
        let affected = self
            .conn
            .execute(
                "UPDATE pending_mutations SET base_updated_at = ?
                 WHERE entity_kind = ? AND entity_id = ? AND status != 'in_flight'",
                Params::Positional(vec![
                    Value::Integer(base_updated_at),
                    Value::Text(key.entity_kind.clone()),
                    Value::Text(key.entity_id.clone()),
                ]),
            )
            .await?;
        Ok(affected)
    }

    async fn clear(&self) -> Result<()> {
        self.conn.execute("DELETE FROM pending_mutations", ()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn update(entity_id: &str, payload: serde_json::Value) -> NewMutation {
        NewMutation {
            kind: MutationKind::Update,
            entity_kind: "item".into(),
            entity_id: entity_id.into(),
            payload,
            base_updated_at: Some(10),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_insert_and_get() {
        let db = setup().await;
        let store = LibSqlMutationStore::new(db.connection());

        let inserted = store
            .insert(update("42", json!({"id": "42", "price": 100})), 1_000)
            .await
            .unwrap();
        let fetched = store.get(&inserted.id).await.unwrap().unwrap();

        assert_eq!(fetched, inserted);
        assert_eq!(fetched.status, MutationStatus::Pending);
        assert_eq!(fetched.attempts, 0);
        assert_eq!(fetched.base_updated_at, Some(10));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_pending_is_fifo_with_tiebreak() {
        let db = setup().await;
        let store = LibSqlMutationStore::new(db.connection());

        let late = store.insert(update("1", json!({"n": 1})), 2_000).await.unwrap();
        let first = store.insert(update("2", json!({"n": 2})), 1_000).await.unwrap();
        let second = store.insert(update("3", json!({"n": 3})), 1_000).await.unwrap();

        let ids = store
            .list_pending()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![first.id, second.id, late.id]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_mark_failed_dispositions() {
        let db = setup().await;
        let store = LibSqlMutationStore::new(db.connection());

        let retry = store.insert(update("1", json!({})), 1).await.unwrap();
        let fatal = store.insert(update("2", json!({})), 2).await.unwrap();

        let failed = store
            .mark_failed(&retry.id, "timeout", FailureDisposition::Retry, 50)
            .await
            .unwrap();
        assert_eq!(failed.attempts, 1);
        assert_eq!(failed.last_attempt_at, Some(50));
        assert_eq!(failed.last_error.as_deref(), Some("timeout"));
        assert!(failed.retryable);

        store
            .mark_failed(&fatal.id, "400 bad request", FailureDisposition::Permanent, 60)
            .await
            .unwrap();

        let pending = store.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, retry.id);

        let surfaced = store.list_failed().await.unwrap();
        assert_eq!(surfaced.len(), 1);
        assert_eq!(surfaced[0].id, fatal.id);
        assert!(surfaced[0].is_surfaced());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_in_flight_excluded_and_recovered() {
        let db = setup().await;
        let store = LibSqlMutationStore::new(db.connection());

        let mutation = store.insert(update("1", json!({})), 1).await.unwrap();
        store.mark_in_flight(&mutation.id).await.unwrap();

        assert!(store.list_pending().await.unwrap().is_empty());
        assert_eq!(store.list_in_flight().await.unwrap().len(), 1);

        assert_eq!(store.recover_in_flight().await.unwrap(), 1);
        assert_eq!(store.list_pending().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_mark_completed_removes_record() {
        let db = setup().await;
        let store = LibSqlMutationStore::new(db.connection());

        let mutation = store.insert(update("1", json!({})), 1).await.unwrap();
        store.mark_completed(&mutation.id).await.unwrap();

        assert!(store.get(&mutation.id).await.unwrap().is_none());
        assert!(matches!(
            store.mark_completed(&mutation.id).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rebase_and_reset_for_retry() {
        let db = setup().await;
        let store = LibSqlMutationStore::new(db.connection());

        let mutation = store.insert(update("1", json!({"a": 1})), 1).await.unwrap();
        store
            .mark_failed(&mutation.id, "conflict", FailureDisposition::Permanent, 5)
            .await
            .unwrap();

        store
            .rebase(&mutation.id, MutationKind::Update, &json!({"a": 2}), Some(99))
            .await
            .unwrap();
        let rebased = store.get(&mutation.id).await.unwrap().unwrap();
        assert_eq!(rebased.status, MutationStatus::Pending);
        assert_eq!(rebased.payload, json!({"a": 2}));
        assert_eq!(rebased.base_updated_at, Some(99));
        assert_eq!(rebased.attempts, 1);

        store.reset_for_retry(&mutation.id).await.unwrap();
        let reset = store.get(&mutation.id).await.unwrap().unwrap();
        assert_eq!(reset.attempts, 0);
        assert_eq!(reset.last_error, None);
        assert_eq!(reset.last_attempt_at, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rebase_turns_create_into_update() {
        let db = setup().await;
        let store = LibSqlMutationStore::new(db.connection());
        let create = NewMutation {
            kind: MutationKind::Create,
            base_updated_at: None,
            ..update("5", json!({"id": "5", "price": 2}))
        };

        let mutation = store.insert(create, 1).await.unwrap();
        store
            .rebase(&mutation.id, MutationKind::Update, &mutation.payload, Some(500))
            .await
            .unwrap();

        let rebased = store.get(&mutation.id).await.unwrap().unwrap();
        assert_eq!(rebased.kind, MutationKind::Update);
        assert_eq!(rebased.base_updated_at, Some(500));
        assert_eq!(rebased.payload, json!({"id": "5", "price": 2}));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_count_discard_and_clear() {
        let db = setup().await;
        let store = LibSqlMutationStore::new(db.connection());
        let key = EntityKey::new("item", "1");

        let first = store.insert(update("1", json!({})), 1).await.unwrap();
        store.insert(update("1", json!({})), 2).await.unwrap();
        store.insert(update("2", json!({})), 3).await.unwrap();
        assert_eq!(store.count_for_entity(&key).await.unwrap(), 2);

        assert!(store.discard(&first.id).await.unwrap());
        assert!(!store.discard(&first.id).await.unwrap());
        assert_eq!(store.count_for_entity(&key).await.unwrap(), 1);

        store.clear().await.unwrap();
        assert!(store.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_advance_base_skips_in_flight_and_other_entities() {
        let db = setup().await;
        let store = LibSqlMutationStore::new(db.connection());

        let delivering = store.insert(update("1", json!({})), 1).await.unwrap();
        let queued = store.insert(update("1", json!({})), 2).await.unwrap();
        let other = store.insert(update("2", json!({})), 3).await.unwrap();
        store.mark_in_flight(&delivering.id).await.unwrap();

        let moved = store
            .advance_base(&EntityKey::new("item", "1"), 777)
            .await
            .unwrap();
        assert_eq!(moved, 1);

        for (id, expected) in [(queued.id, 777), (delivering.id, 10), (other.id, 10)] {
            let mutation = store.get(&id).await.unwrap().unwrap();
            assert_eq!(mutation.base_updated_at, Some(expected));
        }
    }
}
