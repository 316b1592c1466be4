//! Reference-data cache repository implementation

use libsql::Connection;

use crate::error::Result;
use crate::models::{CachedAsset, CachedComponent, CachedProject};

/// Trait for reference-cache storage operations (async)
///
/// Covers the three read-only caches together since they share one shape:
/// server payload plus a fetch timestamp.
#[allow(async_fn_in_trait)]
pub trait CacheRepository {
    /// Insert or replace cached projects
    async fn put_projects(&self, projects: &[CachedProject]) -> Result<()>;

    /// Get a cached project by server id
    async fn get_project(&self, id: &str) -> Result<Option<CachedProject>>;

    /// List cached projects alphabetically
    async fn get_projects(&self) -> Result<Vec<CachedProject>>;

    /// Drop cached projects fetched before the cutoff
    async fn purge_projects_older_than(&self, cutoff: i64) -> Result<u64>;

    /// Insert or replace cached taxonomy components
    async fn put_components(&self, components: &[CachedComponent]) -> Result<()>;

    /// List the whole taxonomy in code order
    async fn get_components(&self) -> Result<Vec<CachedComponent>>;

    /// List taxonomy entries at one depth, in code order
    async fn list_components_by_level(&self, level: i64) -> Result<Vec<CachedComponent>>;

    /// Insert or replace cached assets
    async fn put_assets(&self, assets: &[CachedAsset]) -> Result<()>;

    /// List cached assets for a project alphabetically
    async fn list_assets_by_project(&self, project_id: &str) -> Result<Vec<CachedAsset>>;

    /// Drop cached assets fetched before the cutoff
    async fn purge_assets_older_than(&self, cutoff: i64) -> Result<u64>;
}

/// libSQL implementation of `CacheRepository`
pub struct LibSqlCacheRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlCacheRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_project(row: &libsql::Row) -> Result<CachedProject> {
        let data: String = row.get(2)?;
        Ok(CachedProject {
            id: row.get(0)?,
            name: row.get(1)?,
            data: serde_json::from_str(&data)?,
            cached_at: row.get(3)?,
        })
    }

    fn parse_component(row: &libsql::Row) -> Result<CachedComponent> {
        let data: String = row.get(4)?;
        Ok(CachedComponent {
            id: row.get(0)?,
            code: row.get(1)?,
            name: row.get(2)?,
            level: row.get(3)?,
            data: serde_json::from_str(&data)?,
            cached_at: row.get(5)?,
        })
    }

    fn parse_asset(row: &libsql::Row) -> Result<CachedAsset> {
        let data: String = row.get(3)?;
        Ok(CachedAsset {
            id: row.get(0)?,
            project_id: row.get(1)?,
            name: row.get(2)?,
            data: serde_json::from_str(&data)?,
            cached_at: row.get(4)?,
        })
    }
}

impl CacheRepository for LibSqlCacheRepository<'_> {
    async fn put_projects(&self, projects: &[CachedProject]) -> Result<()> {
        for project in projects {
            self.conn
                .execute(
                    "INSERT OR REPLACE INTO cached_projects (id, name, data, cached_at)
                     VALUES (?, ?, ?, ?)",
                    libsql::params![
                        project.id.as_str(),
                        project.name.as_str(),
                        serde_json::to_string(&project.data)?,
                        project.cached_at,
                    ],
                )
                .await?;
        }
        Ok(())
    }

    async fn get_project(&self, id: &str) -> Result<Option<CachedProject>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, name, data, cached_at FROM cached_projects WHERE id = ?",
                [id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_project(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_projects(&self) -> Result<Vec<CachedProject>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, name, data, cached_at FROM cached_projects ORDER BY name ASC",
                (),
            )
            .await?;

        let mut projects = Vec::new();
        while let Some(row) = rows.next().await? {
            projects.push(Self::parse_project(&row)?);
        }
        Ok(projects)
    }

    async fn purge_projects_older_than(&self, cutoff: i64) -> Result<u64> {
        let rows = self
            .conn
            .execute("DELETE FROM cached_projects WHERE cached_at < ?", [cutoff])
            .await?;
        Ok(rows)
    }

    async fn put_components(&self, components: &[CachedComponent]) -> Result<()> {
        for component in components {
            self.conn
                .execute(
                    "INSERT OR REPLACE INTO cached_components
                     (id, code, name, level, data, cached_at)
                     VALUES (?, ?, ?, ?, ?, ?)",
                    libsql::params![
                        component.id.as_str(),
                        component.code.as_str(),
                        component.name.as_str(),
                        component.level,
                        serde_json::to_string(&component.data)?,
                        component.cached_at,
                    ],
                )
                .await?;
        }
        Ok(())
    }

    async fn get_components(&self) -> Result<Vec<CachedComponent>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, code, name, level, data, cached_at
                 FROM cached_components ORDER BY code ASC",
                (),
            )
            .await?;

        let mut components = Vec::new();
        while let Some(row) = rows.next().await? {
            components.push(Self::parse_component(&row)?);
        }
        Ok(components)
    }

    async fn list_components_by_level(&self, level: i64) -> Result<Vec<CachedComponent>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, code, name, level, data, cached_at
                 FROM cached_components WHERE level = ? ORDER BY code ASC",
                [level],
            )
            .await?;

        let mut components = Vec::new();
        while let Some(row) = rows.next().await? {
            components.push(Self::parse_component(&row)?);
        }
        Ok(components)
    }

    async fn put_assets(&self, assets: &[CachedAsset]) -> Result<()> {
        for asset in assets {
            self.conn
                .execute(
                    "INSERT OR REPLACE INTO cached_assets
                     (id, project_id, name, data, cached_at)
                     VALUES (?, ?, ?, ?, ?)",
                    libsql::params![
                        asset.id.as_str(),
                        asset.project_id.as_str(),
                        asset.name.as_str(),
                        serde_json::to_string(&asset.data)?,
                        asset.cached_at,
                    ],
                )
                .await?;
        }
        Ok(())
    }

    async fn list_assets_by_project(&self, project_id: &str) -> Result<Vec<CachedAsset>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, project_id, name, data, cached_at
                 FROM cached_assets WHERE project_id = ? ORDER BY name ASC",
                [project_id],
            )
            .await?;

        let mut assets = Vec::new();
        while let Some(row) = rows.next().await? {
            assets.push(Self::parse_asset(&row)?);
        }
        Ok(assets)
    }

    async fn purge_assets_older_than(&self, cutoff: i64) -> Result<u64> {
        let rows = self
            .conn
            .execute("DELETE FROM cached_assets WHERE cached_at < ?", [cutoff])
            .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_project_cache_roundtrip_and_purge() {
        let db = setup().await;
        let repo = LibSqlCacheRepository::new(db.connection());

        let mut stale = CachedProject::new(
            "p1",
            "Harbour Terminal",
            serde_json::json!({"client": "Port Authority"}),
        );
        stale.cached_at = 1_000;
        let fresh = CachedProject::new("p2", "Airport Hangar", serde_json::json!({}));

        repo.put_projects(&[stale, fresh.clone()]).await.unwrap();

        let loaded = repo.get_project("p1").await.unwrap().unwrap();
        assert_eq!(loaded.data["client"], "Port Authority");

        // Alphabetical listing
        let all = repo.get_projects().await.unwrap();
        assert_eq!(all[0].id, "p2");

        assert_eq!(repo.purge_projects_older_than(2_000).await.unwrap(), 1);
        assert!(repo.get_project("p1").await.unwrap().is_none());
        assert!(repo.get_project("p2").await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_components_by_level() {
        let db = setup().await;
        let repo = LibSqlCacheRepository::new(db.connection());

        repo.put_components(&[
            CachedComponent::new("c1", "B", "Shell", 1, serde_json::json!({})),
            CachedComponent::new("c2", "B20", "Exterior Enclosure", 2, serde_json::json!({})),
            CachedComponent::new("c3", "B2010", "Exterior Walls", 3, serde_json::json!({})),
        ])
        .await
        .unwrap();

        assert_eq!(repo.get_components().await.unwrap().len(), 3);
        let level_two = repo.list_components_by_level(2).await.unwrap();
        assert_eq!(level_two.len(), 1);
        assert_eq!(level_two[0].code, "B20");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_assets_scoped_to_project() {
        let db = setup().await;
        let repo = LibSqlCacheRepository::new(db.connection());

        repo.put_assets(&[
            CachedAsset::new("a1", "p1", "Warehouse 4", serde_json::json!({})),
            CachedAsset::new("a2", "p1", "Crane 2", serde_json::json!({})),
            CachedAsset::new("a3", "p2", "Hangar 1", serde_json::json!({})),
        ])
        .await
        .unwrap();

        let assets = repo.list_assets_by_project("p1").await.unwrap();
        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0].name, "Crane 2");
    }
}
