//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        migrate_v1(conn).await?;
    }
    if version < 2 {
        migrate_v2(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Run `statements` in one transaction and log the new version.
async fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    // libsql doesn't have execute_batch, so we run each statement separately
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn
        .execute("INSERT INTO schema_version (version) VALUES (?)", [i64::from(version)])
        .await
    {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {version}");
    Ok(())
}

/// Migration to version 1: mutation queue, entity cache, metadata
async fn migrate_v1(conn: &Connection) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        // seq breaks ties between mutations enqueued in the same millisecond
        "CREATE TABLE IF NOT EXISTS pending_mutations (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            kind TEXT NOT NULL,
            entity_kind TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            base_updated_at INTEGER,
            enqueued_at INTEGER NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_attempt_at INTEGER,
            status TEXT NOT NULL DEFAULT 'pending',
            retryable INTEGER NOT NULL DEFAULT 1,
            last_error TEXT
        )",
        "CREATE INDEX IF NOT EXISTS idx_pending_status_enqueued ON pending_mutations(status, enqueued_at)",
        "CREATE INDEX IF NOT EXISTS idx_pending_entity ON pending_mutations(entity_kind, entity_id)",
        "CREATE TABLE IF NOT EXISTS entity_cache (
            entity_kind TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            remote_updated_at INTEGER,
            dirty INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (entity_kind, entity_id)
        )",
        "CREATE INDEX IF NOT EXISTS idx_entity_cache_dirty ON entity_cache(dirty)",
        "CREATE TABLE IF NOT EXISTS sync_metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
    ];

    apply(conn, 1, &statements).await
}

/// Migration to version 2: open conflicts and resolution log
async fn migrate_v2(conn: &Connection) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS open_conflicts (
            mutation_id TEXT PRIMARY KEY,
            entity_kind TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            local_value TEXT NOT NULL,
            remote_value TEXT NOT NULL,
            local_timestamp INTEGER NOT NULL,
            remote_timestamp INTEGER NOT NULL,
            detected_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_open_conflicts_entity ON open_conflicts(entity_kind, entity_id)",
        "CREATE TABLE IF NOT EXISTS conflict_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_kind TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            local_timestamp INTEGER NOT NULL,
            remote_timestamp INTEGER NOT NULL,
            resolved_at INTEGER NOT NULL,
            resolution TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_conflict_log_resolved_at ON conflict_log(resolved_at DESC)",
    ];

    apply(conn, CURRENT_VERSION, &statements).await
}
