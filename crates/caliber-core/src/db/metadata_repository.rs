//! Sync metadata repository implementation

use crate::error::{Error, Result};
use libsql::Connection;

/// Key under which the last successful drain time is stored
pub const LAST_SYNC_AT: &str = "last_sync_at";

/// Trait for sync metadata storage operations (async)
#[allow(async_fn_in_trait)]
pub trait MetadataRepository {
    /// Read one value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write one value
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove every key
    async fn clear(&self) -> Result<()>;

    /// Time of the last drain cycle that finished cleanly (Unix ms)
    async fn last_sync_at(&self) -> Result<Option<i64>> {
        match self.get(LAST_SYNC_AT).await? {
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|_| Error::Database(format!("invalid {LAST_SYNC_AT} value '{value}'"))),
            None => Ok(None),
        }
    }

    /// Record a clean drain cycle
    async fn set_last_sync_at(&self, at: i64) -> Result<()> {
        self.set(LAST_SYNC_AT, &at.to_string()).await
    }
}

/// libSQL implementation of `MetadataRepository`
pub struct LibSqlMetadataRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlMetadataRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl MetadataRepository for LibSqlMetadataRepository<'_> {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM sync_metadata WHERE key = ?", [key])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO sync_metadata (key, value) VALUES (?, ?)",
                [key, value],
            )
            .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.conn.execute("DELETE FROM sync_metadata", ()).await?;
        Ok(())
    }
}
