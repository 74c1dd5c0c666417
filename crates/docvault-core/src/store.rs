//! Storage abstractions for DocVault.
//!
//! Four capabilities back the engine, each behind its own trait so the
//! application crate can plug in SQLite/filesystem implementations while
//! tests run against the in-memory ones in [`memory`]:
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`Store`] | Relational rows: projects, documents, chunks, keyword search, analytics |
//! | [`BlobStore`] | Raw document bytes and per-chunk rich-metadata blobs |
//! | [`VectorIndex`] | Project-namespaced nearest-neighbor search over chunk embeddings |
//! | [`DedupCache`] | TTL-bounded `(project, content_hash) → document id` lookup |
//!
//! The dedup cache is a performance optimization, never a source of
//! truth: a miss must always be safe to treat as "no prior ingestion".

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, Document, DocumentStatus, Project, SearchRecord};

/// A chunk candidate from keyword search, ordered best-first by the
/// store's relevance proxy. Only the rank position feeds fusion.
#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub chunk_id: String,
    pub document_id: String,
    pub ordinal: i64,
    /// Relevance proxy (FTS rank or match count); diagnostic only.
    pub raw_score: f64,
}

/// A chunk candidate from vector search, ordered by cosine similarity.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk_id: String,
    pub document_id: String,
    pub ordinal: i64,
    /// Cosine similarity to the query vector.
    pub score: f64,
}

/// One vector-index entry. Carries enough denormalized metadata to
/// support result assembly without a relational join on the hot path.
#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub chunk_id: String,
    pub document_id: String,
    pub ordinal: i64,
    pub document_name: String,
    pub vector: Vec<f32>,
}

/// Relational storage: projects, documents, chunks, keyword search, and
/// search analytics.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_project(&self, project: &Project) -> Result<()>;

    async fn project_by_api_key(&self, api_key: &str) -> Result<Option<Project>>;

    async fn insert_document(&self, doc: &Document) -> Result<()>;

    /// Fetch a document within a project scope. Cross-tenant ids resolve
    /// to `None`.
    async fn get_document(&self, project_id: &str, id: &str) -> Result<Option<Document>>;

    /// Find the canonical (non-copied) non-deleted document with this
    /// content hash, if any.
    async fn find_by_content_hash(
        &self,
        project_id: &str,
        content_hash: &str,
    ) -> Result<Option<Document>>;

    /// Update lifecycle status, and optionally the error detail and chunk
    /// count, bumping `updated_at`. Returns whether a row was updated:
    /// `deleted` is terminal, so a document deleted out from under the
    /// caller is left untouched and reported as `false`.
    async fn set_document_status(
        &self,
        id: &str,
        status: DocumentStatus,
        error: Option<&str>,
        chunk_count: Option<i64>,
    ) -> Result<bool>;

    /// Insert a batch of chunks atomically: either all rows commit or
    /// none do.
    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()>;

    async fn chunks_for_document(&self, document_id: &str) -> Result<Vec<Chunk>>;

    async fn get_chunks(&self, chunk_ids: &[String]) -> Result<Vec<Chunk>>;

    /// Delete all chunks of a document, returning the deleted rows so the
    /// caller can clean up their metadata blobs.
    async fn delete_chunks(&self, document_id: &str) -> Result<Vec<Chunk>>;

    /// Keyword search within a project, restricted to chunks of `ready`
    /// documents, best-first, at most `limit` hits.
    async fn keyword_search(
        &self,
        project_id: &str,
        keywords: &[String],
        limit: i64,
    ) -> Result<Vec<KeywordHit>>;

    /// Record one search-analytics row. Callers treat failures as
    /// non-fatal.
    async fn record_search(&self, record: &SearchRecord) -> Result<()>;
}

/// Durable object storage addressed by opaque keys.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete a blob. Deleting a missing key is a no-op.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Project-namespaced nearest-neighbor index over chunk embeddings.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, project_id: &str, entries: &[VectorEntry]) -> Result<()>;

    /// Top `limit` entries by cosine similarity within the project
    /// namespace, best-first.
    async fn search(&self, project_id: &str, query: &[f32], limit: i64) -> Result<Vec<VectorHit>>;

    /// All entries of one document, vectors included (used by the
    /// instant-copy path).
    async fn entries_for_document(
        &self,
        project_id: &str,
        document_id: &str,
    ) -> Result<Vec<VectorEntry>>;

    async fn delete_document(&self, project_id: &str, document_id: &str) -> Result<()>;
}

/// TTL-bounded dedup lookup. Expired or missing entries are always safe;
/// the relational uniqueness constraint is the correctness backstop.
#[async_trait]
pub trait DedupCache: Send + Sync {
    async fn get(&self, project_id: &str, content_hash: &str) -> Result<Option<String>>;

    async fn put(
        &self,
        project_id: &str,
        content_hash: &str,
        document_id: &str,
        ttl_secs: u64,
    ) -> Result<()>;
}
