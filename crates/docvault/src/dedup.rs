//! SQLite-backed [`DedupCache`].
//!
//! Expiry is enforced at read time; stale rows are lazily overwritten by
//! the next `put` on the same `(project, content_hash)` pair. A lost or
//! expired entry only costs a relational lookup, never correctness.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use docvault_core::store::DedupCache;

pub struct SqliteDedupCache {
    pool: SqlitePool,
}

impl SqliteDedupCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DedupCache for SqliteDedupCache {
    async fn get(&self, project_id: &str, content_hash: &str) -> Result<Option<String>> {
        let now = chrono::Utc::now().timestamp();
        let row = sqlx::query(
            r#"
            SELECT document_id FROM dedup_cache
            WHERE project_id = ? AND content_hash = ? AND expires_at > ?
            "#,
        )
        .bind(project_id)
        .bind(content_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get("document_id")))
    }

    async fn put(
        &self,
        project_id: &str,
        content_hash: &str,
        document_id: &str,
        ttl_secs: u64,
    ) -> Result<()> {
        let expires_at = chrono::Utc::now().timestamp() + ttl_secs as i64;
        sqlx::query(
            r#"
            INSERT INTO dedup_cache (project_id, content_hash, document_id, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(project_id, content_hash) DO UPDATE SET
                document_id = excluded.document_id,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(project_id)
        .bind(content_hash)
        .bind(document_id)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
