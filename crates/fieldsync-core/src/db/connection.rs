//! Database connection management

use crate::error::Result;
use libsql::{Builder, Connection, Database as LibSqlDatabase};
use std::path::Path;

use super::migrations;

/// Database wrapper for libSQL connections
pub struct Database {
    db: LibSqlDatabase,
    conn: Connection,
}

impl Database {
    /// Open a local database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let db = Builder::new_local(&path_str).build().await?;
        let conn = db.connect()?;

        let database = Self { db, conn };
        database.configure().await?;
        database.migrate().await?;
        Ok(database)
    }

    /// Open an in-memory database (useful for testing)
    pub async fn open_in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        let conn = db.connect()?;

        let database = Self { db, conn };
        database.configure().await?;
        database.migrate().await?;
        Ok(database)
    }

    /// Configure `SQLite` for optimal performance
    async fn configure(&self) -> Result<()> {
        // WAL keeps collaborator reads from blocking sync-run writes
        self.conn
            .execute("PRAGMA journal_mode = WAL;", ())
            .await
            .ok();
        self.conn
            .execute("PRAGMA synchronous = NORMAL;", ())
            .await
            .ok();
        self.conn.execute("PRAGMA foreign_keys = ON;", ()).await?;
        self.conn
            .execute("PRAGMA cache_size = 10000;", ())
            .await
            .ok();
        Ok(())
    }

    /// Run database migrations
    async fn migrate(&self) -> Result<()> {
        migrations::run(&self.conn).await
    }

    /// Re-establish the connection from the underlying handle.
    ///
    /// Used after a dropped connection so the next operation sees a live
    /// handle instead of a stale one.
    pub fn reconnect(&mut self) -> Result<()> {
        self.conn = self.db.connect()?;
        Ok(())
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_in_memory() {
        let db = Database::open_in_memory().await.unwrap();
        let mut rows = db.connection().query("SELECT 1", ()).await.unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let val: i32 = row.get(0).unwrap();
        assert_eq!(val, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reconnect_preserves_data() {
        let tmp = tempdir().unwrap();
        let db_path = tmp.path().join("fieldsync.db");

        let mut db = Database::open(&db_path).await.unwrap();
        db.connection()
            .execute(
                "INSERT INTO metadata (key, value) VALUES ('probe', '1')",
                (),
            )
            .await
            .unwrap();

        db.reconnect().unwrap();

        let mut rows = db
            .connection()
            .query("SELECT value FROM metadata WHERE key = 'probe'", ())
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let value: String = row.get(0).unwrap();
        assert_eq!(value, "1");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_is_idempotent() {
        let tmp = tempdir().unwrap();
        let db_path = tmp.path().join("fieldsync.db");

        drop(Database::open(&db_path).await.unwrap());
        drop(Database::open(&db_path).await.unwrap());
    }
}
