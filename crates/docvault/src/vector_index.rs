//! SQLite-backed [`VectorIndex`].
//!
//! Brute-force cosine scan over the project's `chunk_vectors` rows.
//! Fine at the corpus sizes a single node serves; the trait boundary is
//! where an ANN service would slot in.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use docvault_core::store::{VectorEntry, VectorHit, VectorIndex};
use docvault_core::vectors::{blob_to_vec, cosine_similarity, vec_to_blob};

pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> VectorEntry {
    let blob: Vec<u8> = row.get("embedding");
    VectorEntry {
        chunk_id: row.get("chunk_id"),
        document_id: row.get("document_id"),
        ordinal: row.get("chunk_index"),
        document_name: row.get("document_name"),
        vector: blob_to_vec(&blob),
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, project_id: &str, entries: &[VectorEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO chunk_vectors (chunk_id, project_id, document_id, chunk_index, document_name, embedding)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    project_id = excluded.project_id,
                    document_id = excluded.document_id,
                    chunk_index = excluded.chunk_index,
                    document_name = excluded.document_name,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&entry.chunk_id)
            .bind(project_id)
            .bind(&entry.document_id)
            .bind(entry.ordinal)
            .bind(&entry.document_name)
            .bind(vec_to_blob(&entry.vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn search(&self, project_id: &str, query: &[f32], limit: i64) -> Result<Vec<VectorHit>> {
        let rows = sqlx::query(
            r#"
            SELECT chunk_id, document_id, chunk_index, document_name, embedding
            FROM chunk_vectors WHERE project_id = ?
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<VectorHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                VectorHit {
                    chunk_id: row.get("chunk_id"),
                    document_id: row.get("document_id"),
                    ordinal: row.get("chunk_index"),
                    score: cosine_similarity(query, &vec) as f64,
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.ordinal.cmp(&b.ordinal))
                .then(a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(limit as usize);

        Ok(hits)
    }

    async fn entries_for_document(
        &self,
        project_id: &str,
        document_id: &str,
    ) -> Result<Vec<VectorEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT chunk_id, document_id, chunk_index, document_name, embedding
            FROM chunk_vectors
            WHERE project_id = ? AND document_id = ?
            ORDER BY chunk_index ASC
            "#,
        )
        .bind(project_id)
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_entry).collect())
    }

    async fn delete_document(&self, project_id: &str, document_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM chunk_vectors WHERE project_id = ? AND document_id = ?")
            .bind(project_id)
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
