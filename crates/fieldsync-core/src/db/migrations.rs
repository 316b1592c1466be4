//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 3;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        migrate_v1(conn).await?;
    }
    if version < 2 {
        migrate_v2(conn).await?;
    }
    if version < 3 {
        migrate_v3(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    // Check if schema_version table exists
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

/// Migration to version 1: record stores and the sync queue
async fn migrate_v1(conn: &Connection) -> Result<()> {
    // libsql doesn't have execute_batch, so we run each statement separately
    // inside one transaction

    conn.execute("BEGIN TRANSACTION", ()).await?;

    let statements = [
        // Schema version tracking
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        // Assessments captured in the field
        "CREATE TABLE IF NOT EXISTS assessments (
            id TEXT PRIMARY KEY,
            server_id TEXT,
            project_id TEXT NOT NULL,
            asset_id TEXT,
            component_code TEXT,
            title TEXT NOT NULL,
            condition_rating INTEGER,
            notes TEXT,
            inspector TEXT,
            sync_status TEXT NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0,
            sync_error TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_assessments_project ON assessments(project_id)",
        "CREATE INDEX IF NOT EXISTS idx_assessments_asset ON assessments(asset_id)",
        "CREATE INDEX IF NOT EXISTS idx_assessments_status ON assessments(sync_status)",
        "CREATE INDEX IF NOT EXISTS idx_assessments_created ON assessments(created_at)",
        "CREATE INDEX IF NOT EXISTS idx_assessments_project_status
            ON assessments(project_id, sync_status)",
        "CREATE INDEX IF NOT EXISTS idx_assessments_project_created
            ON assessments(project_id, created_at)",
        // Photo evidence, binary payload inline
        "CREATE TABLE IF NOT EXISTS photos (
            id TEXT PRIMARY KEY,
            server_id TEXT,
            assessment_id TEXT NOT NULL,
            project_id TEXT NOT NULL,
            caption TEXT,
            content_type TEXT NOT NULL,
            compressed BLOB NOT NULL,
            original BLOB,
            width INTEGER NOT NULL,
            height INTEGER NOT NULL,
            latitude REAL,
            longitude REAL,
            accuracy_m REAL,
            remote_url TEXT,
            sync_status TEXT NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0,
            sync_error TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_photos_assessment ON photos(assessment_id)",
        "CREATE INDEX IF NOT EXISTS idx_photos_project ON photos(project_id)",
        "CREATE INDEX IF NOT EXISTS idx_photos_status ON photos(sync_status)",
        "CREATE INDEX IF NOT EXISTS idx_photos_created ON photos(created_at)",
        "CREATE INDEX IF NOT EXISTS idx_photos_project_status
            ON photos(project_id, sync_status)",
        "CREATE INDEX IF NOT EXISTS idx_photos_assessment_created
            ON photos(assessment_id, created_at)",
        // Deficiencies observed during inspection
        "CREATE TABLE IF NOT EXISTS deficiencies (
            id TEXT PRIMARY KEY,
            server_id TEXT,
            assessment_id TEXT NOT NULL,
            project_id TEXT NOT NULL,
            description TEXT NOT NULL,
            severity TEXT NOT NULL,
            recommendation TEXT,
            estimated_cost REAL,
            sync_status TEXT NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0,
            sync_error TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_deficiencies_project ON deficiencies(project_id)",
        "CREATE INDEX IF NOT EXISTS idx_deficiencies_assessment ON deficiencies(assessment_id)",
        "CREATE INDEX IF NOT EXISTS idx_deficiencies_status ON deficiencies(sync_status)",
        // Durable sync queue
        "CREATE TABLE IF NOT EXISTS sync_queue (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            item_id TEXT NOT NULL,
            priority INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_attempt_at INTEGER,
            next_retry_at INTEGER,
            status TEXT NOT NULL,
            error TEXT
        )",
        "CREATE INDEX IF NOT EXISTS idx_queue_kind ON sync_queue(kind)",
        "CREATE INDEX IF NOT EXISTS idx_queue_priority ON sync_queue(priority)",
        "CREATE INDEX IF NOT EXISTS idx_queue_status ON sync_queue(status)",
        "CREATE INDEX IF NOT EXISTS idx_queue_retry ON sync_queue(next_retry_at)",
        "CREATE INDEX IF NOT EXISTS idx_queue_status_priority ON sync_queue(status, priority)",
        "CREATE INDEX IF NOT EXISTS idx_queue_kind_status ON sync_queue(kind, status)",
        "CREATE INDEX IF NOT EXISTS idx_queue_item ON sync_queue(item_id)",
        // Record migration version
        "INSERT INTO schema_version (version) VALUES (1)",
    ];

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version 1");
    Ok(())
}

/// Migration to version 2: reference-data caches and the metadata store
async fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute("BEGIN TRANSACTION", ()).await?;

    let statements = [
        "CREATE TABLE IF NOT EXISTS cached_projects (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            data TEXT NOT NULL,
            cached_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_cached_projects_at ON cached_projects(cached_at)",
        "CREATE TABLE IF NOT EXISTS cached_components (
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL,
            name TEXT NOT NULL,
            level INTEGER NOT NULL,
            data TEXT NOT NULL,
            cached_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_cached_components_code ON cached_components(code)",
        "CREATE INDEX IF NOT EXISTS idx_cached_components_level ON cached_components(level)",
        "CREATE TABLE IF NOT EXISTS cached_assets (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            name TEXT NOT NULL,
            data TEXT NOT NULL,
            cached_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_cached_assets_project ON cached_assets(project_id)",
        "CREATE INDEX IF NOT EXISTS idx_cached_assets_at ON cached_assets(cached_at)",
        // Free-form counters and snapshots, never authoritative
        "CREATE TABLE IF NOT EXISTS metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        "INSERT INTO schema_version (version) VALUES (2)",
    ];

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version 2");
    Ok(())
}

/// Migration to version 3: conflict audit trail
async fn migrate_v3(conn: &Connection) -> Result<()> {
    conn.execute("BEGIN TRANSACTION", ()).await?;

    let statements = [
        "CREATE TABLE IF NOT EXISTS sync_conflicts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            item_id TEXT NOT NULL,
            item_type TEXT NOT NULL,
            local_version TEXT NOT NULL,
            server_version TEXT NOT NULL,
            resolution TEXT NOT NULL,
            merged_version TEXT,
            conflicting_fields TEXT NOT NULL DEFAULT '[]',
            resolved_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_item ON sync_conflicts(item_id)",
        "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_resolved_at
            ON sync_conflicts(resolved_at DESC)",
        "INSERT INTO schema_version (version) VALUES (3)",
    ];

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version 3");
    Ok(())
}
