//! SQLite implementation of the BuildCache.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use super::parse_datetime;
use crate::domain::errors::StateError;
use crate::domain::models::{Fingerprint, ImageRef};
use crate::domain::ports::{BuildCache, TagRecord};

pub struct SqliteBuildCache {
    pool: SqlitePool,
}

impl SqliteBuildCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BuildCache for SqliteBuildCache {
    async fn tagged(&self, reference: &ImageRef) -> Result<Option<Fingerprint>, StateError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT fingerprint FROM image_tags WHERE name = ? AND tag = ?")
                .bind(&reference.name)
                .bind(&reference.tag)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(fp,)| Fingerprint::new(fp)))
    }

    async fn has_layer(&self, fingerprint: &Fingerprint) -> Result<bool, StateError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM layers WHERE fingerprint = ?")
            .bind(fingerprint.as_str())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.is_some())
    }

    async fn record(&self, reference: &ImageRef, fingerprint: &Fingerprint) -> Result<(), StateError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT OR IGNORE INTO layers (fingerprint, created_at) VALUES (?, ?)")
            .bind(fingerprint.as_str())
            .bind(&now)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"INSERT INTO image_tags (name, tag, fingerprint, built_at) VALUES (?, ?, ?, ?)
               ON CONFLICT(name, tag) DO UPDATE SET fingerprint = excluded.fingerprint, built_at = excluded.built_at"#,
        )
        .bind(&reference.name)
        .bind(&reference.tag)
        .bind(fingerprint.as_str())
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn tags(&self) -> Result<Vec<TagRecord>, StateError> {
        let rows: Vec<TagRow> =
            sqlx::query_as("SELECT name, tag, fingerprint, built_at FROM image_tags ORDER BY name, tag")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[derive(sqlx::FromRow)]
struct TagRow {
    name: String,
    tag: String,
    fingerprint: String,
    built_at: String,
}

impl TryFrom<TagRow> for TagRecord {
    type Error = StateError;

    fn try_from(row: TagRow) -> Result<Self, Self::Error> {
        Ok(TagRecord {
            reference: ImageRef::new(row.name, row.tag),
            fingerprint: Fingerprint::new(row.fingerprint),
            built_at: parse_datetime(&row.built_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;

    async fn setup_cache() -> SqliteBuildCache {
        SqliteBuildCache::new(create_migrated_test_pool().await.unwrap())
    }

    #[tokio::test]
    async fn test_record_and_lookup_tag() {
        let cache = setup_cache().await;
        let base = ImageRef::new("base", "1");
        let fp = Fingerprint::new("ab".repeat(32));

        assert!(cache.tagged(&base).await.unwrap().is_none());
        cache.record(&base, &fp).await.unwrap();

        assert_eq!(cache.tagged(&base).await.unwrap(), Some(fp.clone()));
        assert!(cache.has_layer(&fp).await.unwrap());
    }

    #[tokio::test]
    async fn test_retag_moves_tag_but_keeps_old_layer() {
        let cache = setup_cache().await;
        let base = ImageRef::new("base", "1");
        let old = Fingerprint::new("aa".repeat(32));
        let new = Fingerprint::new("bb".repeat(32));

        cache.record(&base, &old).await.unwrap();
        cache.record(&base, &new).await.unwrap();

        assert_eq!(cache.tagged(&base).await.unwrap(), Some(new));
        assert!(cache.has_layer(&old).await.unwrap());
        assert_eq!(cache.tags().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_two_names_share_a_layer() {
        let cache = setup_cache().await;
        let fp = Fingerprint::new("cc".repeat(32));

        cache.record(&ImageRef::new("a", "latest"), &fp).await.unwrap();
        cache.record(&ImageRef::new("b", "latest"), &fp).await.unwrap();

        let tags = cache.tags().await.unwrap();
        assert_eq!(tags.len(), 2);
        assert!(tags.iter().all(|t| t.fingerprint == fp));
        assert_eq!(tags[0].reference.name, "a");
    }
}
