//! Metadata repository implementation
//!
//! Free-form key/value rows: access counters, usage snapshots, engine
//! bookkeeping. Derived data only; losing this table loses nothing
//! authoritative.

use libsql::Connection;

use crate::error::Result;

/// Trait for metadata storage operations (async)
#[allow(async_fn_in_trait)]
pub trait MetadataRepository {
    /// Get a value by key
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a value, replacing any existing one
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a key if present
    async fn delete(&self, key: &str) -> Result<()>;

    /// Add one to a counter key, creating it at 1, returning the new value
    async fn increment(&self, key: &str) -> Result<i64>;

    /// Get a value parsed as an integer; unparseable values read as `None`
    async fn get_i64(&self, key: &str) -> Result<Option<i64>>;

    /// List key/value pairs under a prefix, in key order
    async fn list_prefixed(&self, prefix: &str) -> Result<Vec<(String, String)>>;
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
            .query("SELECT value FROM metadata WHERE key = ?", [key])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO metadata (key, value) VALUES (?, ?)",
                [key, value],
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM metadata WHERE key = ?", [key])
            .await?;
        Ok(())
    }

    async fn increment(&self, key: &str) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO metadata (key, value) VALUES (?, '1')
                 ON CONFLICT(key) DO UPDATE
                 SET value = CAST(CAST(value AS INTEGER) + 1 AS TEXT)",
                [key],
            )
            .await?;

        Ok(self.get_i64(key).await?.unwrap_or(0))
    }

    async fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.get(key).await?.and_then(|value| value.parse().ok()))
    }

    async fn list_prefixed(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let pattern = format!("{prefix}%");
        let mut rows = self
            .conn
            .query(
                "SELECT key, value FROM metadata WHERE key LIKE ? ORDER BY key ASC",
                [pattern.as_str()],
            )
            .await?;

        let mut pairs = Vec::new();
        while let Some(row) = rows.next().await? {
            pairs.push((row.get(0)?, row.get(1)?));
        }
        Ok(pairs)
    }
}
