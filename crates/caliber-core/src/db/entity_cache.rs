//! Local entity cache implementation

use libsql::params::Params;
use libsql::{Connection, Row, Value};

use super::mutation_store::opt_integer;
use crate::error::{Error, Result};
use crate::models::{CacheFilter, LocalEntityRecord};

const RECORD_COLUMNS: &str =
    "entity_id, entity_kind, data, updated_at, remote_updated_at, dirty";

/// Trait for cached entity storage operations (async)
#[allow(async_fn_in_trait)]
pub trait EntityCache {
    /// Insert or replace a record's data, keeping its dirty flag and remote timestamp
    async fn upsert(
        &self,
        entity_kind: &str,
        id: &str,
        data: &serde_json::Value,
        updated_at: i64,
    ) -> Result<LocalEntityRecord>;

    /// Fetch one record
    async fn get(&self, entity_kind: &str, id: &str) -> Result<Option<LocalEntityRecord>>;

    /// List records of one kind, most recently written first
    async fn list(
        &self,
        entity_kind: &str,
        filter: Option<&CacheFilter>,
    ) -> Result<Vec<LocalEntityRecord>>;

    /// Remove one record. Returns whether it existed.
    async fn remove(&self, entity_kind: &str, id: &str) -> Result<bool>;

    /// Flag a record as referenced by an unresolved mutation
    async fn mark_dirty(&self, entity_kind: &str, id: &str) -> Result<()>;

    /// Clear the unresolved-mutation flag
    async fn clear_dirty(&self, entity_kind: &str, id: &str) -> Result<()>;

    /// Store the server-confirmed representation and clear the dirty flag
    async fn reconcile(
        &self,
        entity_kind: &str,
        id: &str,
        data: &serde_json::Value,
        remote_updated_at: Option<i64>,
        updated_at: i64,
    ) -> Result<LocalEntityRecord>;

    /// Remove every record of one kind, or everything when `entity_kind` is `None`
    async fn purge(&self, entity_kind: Option<&str>) -> Result<u64>;
}

/// libSQL implementation of `EntityCache`
pub struct LibSqlEntityCache<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlEntityCache<'a> {
    /// Create a new cache over the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a record from a database row selected with `RECORD_COLUMNS`
    fn parse_record(row: &Row) -> Result<LocalEntityRecord> {
        let data: String = row.get(2)?;
        Ok(LocalEntityRecord {
            id: row.get(0)?,
            entity_kind: row.get(1)?,
            data: serde_json::from_str(&data)?,
            updated_at: row.get(3)?,
            remote_updated_at: row.get::<Option<i64>>(4)?,
            dirty: row.get::<i64>(5)? != 0,
        })
    }

    async fn set_dirty(&self, entity_kind: &str, id: &str, dirty: bool) -> Result<()> {
        self.conn
            .execute(
                "UPDATE entity_cache SET dirty = ? WHERE entity_kind = ? AND entity_id = ?",
                Params::Positional(vec![
                    Value::Integer(i64::from(dirty)),
                    Value::Text(entity_kind.to_string()),
                    Value::Text(id.to_string()),
                ]),
            )
            .await?;
        Ok(())
    }

    async fn require(&self, entity_kind: &str, id: &str) -> Result<LocalEntityRecord> {
        self.get(entity_kind, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{entity_kind}/{id}")))
    }
}

impl EntityCache for LibSqlEntityCache<'_> {
    async fn upsert(
        &self,
        entity_kind: &str,
        id: &str,
        data: &serde_json::Value,
        updated_at: i64,
    ) -> Result<LocalEntityRecord> {
        self.conn
            .execute(
                "INSERT INTO entity_cache (entity_kind, entity_id, data, updated_at, dirty)
                 VALUES (?, ?, ?, ?, 0)
                 ON CONFLICT(entity_kind, entity_id) DO UPDATE SET
                     data = excluded.data,
                     updated_at = excluded.updated_at",
                Params::Positional(vec![
                    Value::Text(entity_kind.to_string()),
                    Value::Text(id.to_string()),
                    Value::Text(serde_json::to_string(data)?),
                    Value::Integer(updated_at),
                ]),
            )
            .await?;

        self.require(entity_kind, id).await
    }

    async fn get(&self, entity_kind: &str, id: &str) -> Result<Option<LocalEntityRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM entity_cache WHERE entity_kind = ? AND entity_id = ?"
                ),
                [entity_kind, id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        entity_kind: &str,
        filter: Option<&CacheFilter>,
    ) -> Result<Vec<LocalEntityRecord>> {
        let dirty_clause = if filter.is_some_and(|filter| filter.dirty_only) {
            " AND dirty = 1"
        } else {
            ""
        };
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM entity_cache
                     WHERE entity_kind = ?{dirty_clause}
                     ORDER BY updated_at DESC, entity_id ASC"
                ),
                [entity_kind],
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            let record = Self::parse_record(&row)?;
            if filter.is_none_or(|filter| filter.matches(&record)) {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn remove(&self, entity_kind: &str, id: &str) -> Result<bool> {
        let affected = self
            .conn
            .execute(
                "DELETE FROM entity_cache WHERE entity_kind = ? AND entity_id = ?",
                [entity_kind, id],
            )
            .await?;
        Ok(affected > 0)
    }

    async fn mark_dirty(&self, entity_kind: &str, id: &str) -> Result<()> {
        self.set_dirty(entity_kind, id, true).await
    }

    async fn clear_dirty(&self, entity_kind: &str, id: &str) -> Result<()> {
        self.set_dirty(entity_kind, id, false).await
    }

    async fn reconcile(
        &self,
        entity_kind: &str,
        id: &str,
        data: &serde_json::Value,
        remote_updated_at: Option<i64>,
        updated_at: i64,
    ) -> Result<LocalEntityRecord> {
        self.conn
            .execute(
                "INSERT INTO entity_cache
                    (entity_kind, entity_id, data, updated_at, remote_updated_at, dirty)
                 VALUES (?, ?, ?, ?, ?, 0)
                 ON CONFLICT(entity_kind, entity_id) DO UPDATE SET
                     data = excluded.data,
                     updated_at = excluded.updated_at,
                     remote_updated_at = COALESCE(excluded.remote_updated_at, remote_updated_at),
                     dirty = 0",
                Params::Positional(vec![
                    Value::Text(entity_kind.to_string()),
                    Value::Text(id.to_string()),
                    Value::Text(serde_json::to_string(data)?),
                    Value::Integer(updated_at),
                    opt_integer(remote_updated_at),
                ]),
            )
            .await?;

        self.require(entity_kind, id).await
    }

    async fn purge(&self, entity_kind: Option<&str>) -> Result<u64> {
        let affected = match entity_kind {
            Some(kind) => {
                self.conn
                    .execute("DELETE FROM entity_cache WHERE entity_kind = ?", [kind])
                    .await?
            }
            None => self.conn.execute("DELETE FROM entity_cache", ()).await?,
        };
        Ok(affected)
    }
}
