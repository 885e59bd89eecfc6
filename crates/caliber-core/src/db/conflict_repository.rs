//! Open conflict and resolution log storage

use libsql::params::Params;
use libsql::{Connection, Row, Value};

use crate::error::{Error, Result};
use crate::models::{ConflictLogEntry, ConflictRecord, EntityKey, MutationId, OpenConflict};

const OPEN_COLUMNS: &str = "mutation_id, entity_kind, entity_id, local_value, remote_value, \
     local_timestamp, remote_timestamp, detected_at";

const LOG_COLUMNS: &str =
    "id, entity_kind, entity_id, local_timestamp, remote_timestamp, resolved_at, resolution";

/// Trait for conflict storage operations (async)
#[allow(async_fn_in_trait)]
pub trait ConflictRepository {
    /// Park a conflict that needs the user, replacing any earlier one for the mutation
    async fn park(
        &self,
        mutation_id: &MutationId,
        conflict: &ConflictRecord,
        detected_at: i64,
    ) -> Result<OpenConflict>;

    /// Fetch the open conflict blocking a mutation
    async fn get(&self, mutation_id: &MutationId) -> Result<Option<OpenConflict>>;

    /// All open conflicts, oldest first
    async fn list_open(&self) -> Result<Vec<OpenConflict>>;

    /// Entity keys that currently have an open conflict
    async fn blocked_entities(&self) -> Result<Vec<EntityKey>>;

    /// Drop an open conflict. Returns whether it existed.
    async fn remove(&self, mutation_id: &MutationId) -> Result<bool>;

    /// Append a resolution to the audit log
    async fn log(
        &self,
        conflict: &ConflictRecord,
        resolution: &str,
        resolved_at: i64,
    ) -> Result<ConflictLogEntry>;

    /// Most recent resolutions first
    async fn list_log(&self, limit: usize) -> Result<Vec<ConflictLogEntry>>;

    /// Remove open conflicts and the audit log
    async fn clear(&self) -> Result<()>;
}

/// libSQL implementation of `ConflictRepository`
pub struct LibSqlConflictRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_open(row: &Row) -> Result<OpenConflict> {
        let mutation_id: String = row.get(0)?;
        let local_value: String = row.get(3)?;
        let remote_value: String = row.get(4)?;

        Ok(OpenConflict {
            mutation_id: mutation_id
                .parse()
                .map_err(|_| Error::Database(format!("invalid mutation id '{mutation_id}'")))?,
            conflict: ConflictRecord {
                entity_kind: row.get(1)?,
                entity_id: row.get(2)?,
                local_value: serde_json::from_str(&local_value)?,
                remote_value: serde_json::from_str(&remote_value)?,
                local_timestamp: row.get(5)?,
                remote_timestamp: row.get(6)?,
            },
            detected_at: row.get(7)?,
        })
    }

    fn parse_log(row: &Row) -> Result<ConflictLogEntry> {
        Ok(ConflictLogEntry {
            id: row.get(0)?,
            entity_kind: row.get(1)?,
            entity_id: row.get(2)?,
            local_timestamp: row.get(3)?,
            remote_timestamp: row.get(4)?,
            resolved_at: row.get(5)?,
            resolution: row.get(6)?,
        })
    }
}

impl ConflictRepository for LibSqlConflictRepository<'_> {
    async fn park(
        &self,
        mutation_id: &MutationId,
        conflict: &ConflictRecord,
        detected_at: i64,
    ) -> Result<OpenConflict> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO open_conflicts (
                    mutation_id, entity_kind, entity_id, local_value, remote_value,
                    local_timestamp, remote_timestamp, detected_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                Params::Positional(vec![
                    Value::Text(mutation_id.as_str()),
                    Value::Text(conflict.entity_kind.clone()),
                    Value::Text(conflict.entity_id.clone()),
                    Value::Text(serde_json::to_string(&conflict.local_value)?),
                    Value::Text(serde_json::to_string(&conflict.remote_value)?),
                    Value::Integer(conflict.local_timestamp),
                    Value::Integer(conflict.remote_timestamp),
                    Value::Integer(detected_at),
                ]),
            )
            .await?;

        Ok(OpenConflict {
            mutation_id: *mutation_id,
            conflict: conflict.clone(),
            detected_at,
        })
    }

    async fn get(&self, mutation_id: &MutationId) -> Result<Option<OpenConflict>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {OPEN_COLUMNS} FROM open_conflicts WHERE mutation_id = ?"),
                [mutation_id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_open(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_open(&self) -> Result<Vec<OpenConflict>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {OPEN_COLUMNS} FROM open_conflicts ORDER BY detected_at ASC"),
                (),
            )
            .await?;

        let mut conflicts = Vec::new();
        while let Some(row) = rows.next().await? {
            conflicts.push(Self::parse_open(&row)?);
        }
        Ok(conflicts)
    }

    async fn blocked_entities(&self) -> Result<Vec<EntityKey>> {
        let mut rows = self
            .conn
            .query(
                "SELECT DISTINCT entity_kind, entity_id FROM open_conflicts",
                (),
            )
            .await?;

        let mut keys = Vec::new();
        while let Some(row) = rows.next().await? {
            keys.push(EntityKey::new(row.get::<String>(0)?, row.get::<String>(1)?));
        }
        Ok(keys)
    }

    async fn remove(&self, mutation_id: &MutationId) -> Result<bool> {
        let affected = self
            .conn
            .execute(
                "DELETE FROM open_conflicts WHERE mutation_id = ?",
                [mutation_id.as_str()],
            )
            .await?;
        Ok(affected > 0)
    }

    async fn log(
        &self,
        conflict: &ConflictRecord,
        resolution: &str,
        resolved_at: i64,
    ) -> Result<ConflictLogEntry> {
        self.conn
            .execute(
                "INSERT INTO conflict_log (
                    entity_kind, entity_id, local_timestamp, remote_timestamp,
                    resolved_at, resolution
                 ) VALUES (?, ?, ?, ?, ?, ?)",
                Params::Positional(vec![
                    Value::Text(conflict.entity_kind.clone()),
                    Value::Text(conflict.entity_id.clone()),
                    Value::Integer(conflict.local_timestamp),
                    Value::Integer(conflict.remote_timestamp),
                    Value::Integer(resolved_at),
                    Value::Text(resolution.to_string()),
                ]),
            )
            .await?;

        Ok(ConflictLogEntry {
            id: self.conn.last_insert_rowid(),
            entity_kind: conflict.entity_kind.clone(),
            entity_id: conflict.entity_id.clone(),
            local_timestamp: conflict.local_timestamp,
            remote_timestamp: conflict.remote_timestamp,
            resolved_at,
            resolution: resolution.to_string(),
        })
    }

    async fn list_log(&self, limit: usize) -> Result<Vec<ConflictLogEntry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {LOG_COLUMNS} FROM conflict_log
                     ORDER BY resolved_at DESC, id DESC
                     LIMIT ?"
                ),
                [limit],
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(Self::parse_log(&row)?);
        }
        Ok(entries)
    }

    async fn clear(&self) -> Result<()> {
        self.conn.execute("DELETE FROM open_conflicts", ()).await?;
        self.conn.execute("DELETE FROM conflict_log", ()).await?;
        Ok(())
    }
}
