//! SQLite-backed [`Store`] implementation.
//!
//! Chunk rows and their FTS5 shadow rows are written in the same
//! transaction, so keyword search can never observe a partially
//! ingested document.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use docvault_core::models::{Chunk, Document, DocumentStatus, Project, SearchRecord};
use docvault_core::store::{KeywordHit, Store};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Result<Document> {
    let status_str: String = row.get("status");
    let status = DocumentStatus::parse(&status_str)
        .ok_or_else(|| anyhow::anyhow!("Unknown document status in database: '{}'", status_str))?;

    Ok(Document {
        id: row.get("id"),
        project_id: row.get("project_id"),
        name: row.get("name"),
        content_type: row.get("content_type"),
        content_hash: row.get("content_hash"),
        blob_key: row.get("blob_key"),
        status,
        chunk_count: row.get("chunk_count"),
        deduped_from: row.get("deduped_from"),
        error: row.get("error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Result<Chunk> {
    let keywords_json: String = row.get("keywords");
    let section_path_json: String = row.get("section_path");

    Ok(Chunk {
        id: row.get("id"),
        project_id: row.get("project_id"),
        document_id: row.get("document_id"),
        chunk_index: row.get("chunk_index"),
        text: row.get("text"),
        keywords: serde_json::from_str(&keywords_json)?,
        metadata_key: row.get("metadata_key"),
        page_number: row.get("page_number"),
        section_path: serde_json::from_str(&section_path_json)?,
        created_at: row.get("created_at"),
    })
}

/// FTS5 MATCH expression for an OR over extracted keywords. Terms are
/// double-quoted so query syntax in user input cannot reach the parser.
fn fts_match_expr(keywords: &[String]) -> String {
    keywords
        .iter()
        .map(|k| format!("\"{}\"", k.replace('"', "")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

const DOCUMENT_COLUMNS: &str = "id, project_id, name, content_type, content_hash, blob_key, \
     status, chunk_count, deduped_from, error, created_at, updated_at";

#[async_trait]
impl Store for SqliteStore {
    async fn create_project(&self, project: &Project) -> Result<()> {
        sqlx::query("INSERT INTO projects (id, name, api_key, created_at) VALUES (?, ?, ?, ?)")
            .bind(&project.id)
            .bind(&project.name)
            .bind(&project.api_key)
            .bind(project.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn project_by_api_key(&self, api_key: &str) -> Result<Option<Project>> {
        let row = sqlx::query("SELECT id, name, api_key, created_at FROM projects WHERE api_key = ?")
            .bind(api_key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| Project {
            id: r.get("id"),
            name: r.get("name"),
            api_key: r.get("api_key"),
            created_at: r.get("created_at"),
        }))
    }

    async fn insert_document(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, project_id, name, content_type, content_hash,
                                   blob_key, status, chunk_count, deduped_from, error,
                                   created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.project_id)
        .bind(&doc.name)
        .bind(&doc.content_type)
        .bind(&doc.content_hash)
        .bind(&doc.blob_key)
        .bind(doc.status.as_str())
        .bind(doc.chunk_count)
        .bind(&doc.deduped_from)
        .bind(&doc.error)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_document(&self, project_id: &str, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE id = ? AND project_id = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(id)
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_document).transpose()
    }

    async fn find_by_content_hash(
        &self,
        project_id: &str,
        content_hash: &str,
    ) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM documents
            WHERE project_id = ? AND content_hash = ?
              AND status != 'deleted' AND deduped_from IS NULL
            "#,
            DOCUMENT_COLUMNS
        ))
        .bind(project_id)
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_document).transpose()
    }

    async fn set_document_status(
        &self,
        id: &str,
        status: DocumentStatus,
        error: Option<&str>,
        chunk_count: Option<i64>,
    ) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        // `deleted` is terminal: the WHERE clause refuses to move a
        // document out of it.
        let result = match chunk_count {
            Some(count) => {
                sqlx::query(
                    "UPDATE documents SET status = ?, error = ?, chunk_count = ?, updated_at = ? \
                     WHERE id = ? AND status != 'deleted'",
                )
                .bind(status.as_str())
                .bind(error)
                .bind(count)
                .bind(now)
                .bind(id)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "UPDATE documents SET status = ?, error = ?, updated_at = ? \
                     WHERE id = ? AND status != 'deleted'",
                )
                .bind(status.as_str())
                .bind(error)
                .bind(now)
                .bind(id)
                .execute(&self.pool)
                .await?
            }
        };
        Ok(result.rows_affected() > 0)
    }

    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, project_id, document_id, chunk_index, text,
                                    keywords, metadata_key, page_number, section_path, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.project_id)
            .bind(&chunk.document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(serde_json::to_string(&chunk.keywords)?)
            .bind(&chunk.metadata_key)
            .bind(chunk.page_number)
            .bind(serde_json::to_string(&chunk.section_path)?)
            .bind(chunk.created_at)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO chunks_fts (chunk_id, project_id, document_id, text, keywords) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&chunk.project_id)
            .bind(&chunk.document_id)
            .bind(&chunk.text)
            .bind(chunk.keywords.join(" "))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn chunks_for_document(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            r#"
            SELECT id, project_id, document_id, chunk_index, text, keywords,
                   metadata_key, page_number, section_path, created_at
            FROM chunks WHERE document_id = ? ORDER BY chunk_index ASC
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_chunk).collect()
    }

    async fn get_chunks(&self, chunk_ids: &[String]) -> Result<Vec<Chunk>> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; chunk_ids.len()].join(", ");
        let sql = format!(
            r#"
            SELECT id, project_id, document_id, chunk_index, text, keywords,
                   metadata_key, page_number, section_path, created_at
            FROM chunks WHERE id IN ({})
            "#,
            placeholders
        );

        let mut query = sqlx::query(&sql);
        for id in chunk_ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;

        rows.iter().map(row_to_chunk).collect()
    }

    async fn delete_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let deleted = self.chunks_for_document(document_id).await?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(deleted)
    }

    async fn keyword_search(
        &self,
        project_id: &str,
        keywords: &[String],
        limit: i64,
    ) -> Result<Vec<KeywordHit>> {
        if keywords.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT f.chunk_id, f.document_id, f.rank, c.chunk_index
            FROM chunks_fts f
            JOIN chunks c ON c.id = f.chunk_id
            WHERE chunks_fts MATCH ?
              AND f.project_id = ?
              AND f.document_id IN (SELECT id FROM documents WHERE status = 'ready')
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(fts_match_expr(keywords))
        .bind(project_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let hits = rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                KeywordHit {
                    chunk_id: row.get("chunk_id"),
                    document_id: row.get("document_id"),
                    ordinal: row.get("chunk_index"),
                    // FTS5 rank is more negative for better matches.
                    raw_score: -rank,
                }
            })
            .collect();

        Ok(hits)
    }

    async fn record_search(&self, record: &SearchRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO searches (id, project_id, query, mode, results_found, latency_ms, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&record.project_id)
        .bind(&record.query)
        .bind(&record.mode)
        .bind(record.results_found)
        .bind(record.latency_ms)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_expr_quotes_and_joins_terms() {
        let expr = fts_match_expr(&["termination".into(), "fee".into()]);
        assert_eq!(expr, "\"termination\" OR \"fee\"");
    }

    #[test]
    fn match_expr_strips_embedded_quotes() {
        let expr = fts_match_expr(&["a\"b".into()]);
        assert_eq!(expr, "\"ab\"");
    }
}
