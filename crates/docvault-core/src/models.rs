//! Core data models used throughout DocVault.
//!
//! These types represent the projects, documents, chunks, and metadata
//! blobs that flow through the ingestion and retrieval pipeline. Rows are
//! kept lean: full chunk text with context lives in [`ChunkMetadata`]
//! blobs, not in the relational store.

use serde::{Deserialize, Serialize};

/// A tenant. Every document, chunk, vector entry, dedup entry, and
/// analytics row is namespaced by project id.
#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    /// Opaque bearer credential presented on every API call.
    pub api_key: String,
    pub created_at: i64,
}

/// Lifecycle status of a document upload attempt.
///
/// `created → uploaded → processing → ready`, with `processing → failed`
/// and any non-terminal state `→ deleted`. `ready` and `failed` are
/// terminal for an upload attempt; `deleted` is terminal absolutely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Created,
    Uploaded,
    Processing,
    Ready,
    Failed,
    Deleted,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Created => "created",
            DocumentStatus::Uploaded => "uploaded",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Ready => "ready",
            DocumentStatus::Failed => "failed",
            DocumentStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(DocumentStatus::Created),
            "uploaded" => Some(DocumentStatus::Uploaded),
            "processing" => Some(DocumentStatus::Processing),
            "ready" => Some(DocumentStatus::Ready),
            "failed" => Some(DocumentStatus::Failed),
            "deleted" => Some(DocumentStatus::Deleted),
            _ => None,
        }
    }
}

/// One uploaded source file.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub project_id: String,
    /// Display name used in citations.
    pub name: String,
    pub content_type: String,
    /// SHA-256 hex of the raw bytes, declared by the caller at create time.
    pub content_hash: String,
    /// Blob-store key of the raw bytes.
    pub blob_key: String,
    pub status: DocumentStatus,
    pub chunk_count: i64,
    /// Id of the canonical document this row was instant-copied from, if
    /// any. Canonical documents (`None`) are unique per
    /// `(project, content_hash)` among non-deleted rows.
    pub deduped_from: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A retrievable unit of a document. Immutable once created; corrections
/// go through delete-and-recreate at the document level.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub project_id: String,
    pub document_id: String,
    /// Ordinal window position, unique per document.
    pub chunk_index: i64,
    pub text: String,
    /// Lowercased, stop-word-filtered, capped keyword set. Matching only,
    /// never displayed.
    pub keywords: Vec<String>,
    /// Blob-store key of the rich metadata blob.
    pub metadata_key: String,
    pub page_number: i64,
    /// Ordered heading strings of the nearest enclosing section.
    pub section_path: Vec<String>,
    pub created_at: i64,
}

/// Provenance attached to every chunk for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub page_number: i64,
    pub section_path: Vec<String>,
    pub document_name: String,
}

/// Rich per-chunk blob: the only place full chunk text and neighbor
/// context are stored outside the vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub text: String,
    /// Preceding window's text; empty at the first window.
    pub context_before: String,
    /// Following window's text; empty at the last window.
    pub context_after: String,
    /// HTML of a table detected in this window's region, if any.
    pub table_html: Option<String>,
    pub citation: Citation,
}

/// Output of the structure-extraction service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentStructure {
    pub markdown: String,
    #[serde(default)]
    pub tables_html: Vec<String>,
    #[serde(default)]
    pub sections: Vec<Section>,
}

/// A heading with its page attribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub level: u8,
    pub text: String,
    pub page: i64,
}

/// One processing-queue message. The attempt counter is explicit on the
/// message so backoff is testable without a live queue.
#[derive(Debug, Clone)]
pub struct ProcessingJob {
    pub project_id: String,
    pub document_id: String,
    pub attempt: u32,
}

/// Write-and-forget search analytics row.
#[derive(Debug, Clone)]
pub struct SearchRecord {
    pub project_id: String,
    pub query: String,
    pub mode: String,
    pub results_found: i64,
    pub latency_ms: i64,
}

/// Blob-store key for a document's raw bytes.
pub fn document_blob_key(document_id: &str) -> String {
    format!("documents/{}", document_id)
}

/// Blob-store key for a chunk's rich metadata, derived from the chunk id.
pub fn chunk_metadata_key(chunk_id: &str) -> String {
    format!("chunks/{}.json", chunk_id)
}
