//! Ingestion coordinator: document lifecycle, content-hash dedup, and
//! instant copy.
//!
//! Creation consults the dedup cache first and the relational constraint
//! second; the cache is an accelerator only, so every cache outcome
//! degrades safely to the relational lookup. An instant copy duplicates
//! an already-`ready` document's chunks, metadata blobs, and vectors
//! under fresh ids without re-extracting or re-embedding anything.

use std::sync::Arc;

use docvault_core::error::{EngineError, EngineResult};
use docvault_core::models::{
    chunk_metadata_key, document_blob_key, Chunk, ChunkMetadata, Document, DocumentStatus,
    ProcessingJob, Project,
};
use docvault_core::store::{BlobStore, DedupCache, Store, VectorEntry, VectorIndex};

use crate::queue::JobQueue;

/// Result of `create_document`: the row plus how it came to be.
#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub document: Document,
    /// Content already known for this project.
    pub deduped: bool,
    /// Chunks and vectors were copied from the canonical document and the
    /// new document is `ready` without an upload.
    pub instant: bool,
}

pub struct Ingestor {
    pub store: Arc<dyn Store>,
    pub blobs: Arc<dyn BlobStore>,
    pub vectors: Arc<dyn VectorIndex>,
    pub dedup: Arc<dyn DedupCache>,
    pub queue: Arc<JobQueue>,
    pub dedup_ttl_secs: u64,
}

fn validate_content_hash(content_hash: &str) -> EngineResult<String> {
    if content_hash.len() != 64 || !content_hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(EngineError::Validation(
            "content_hash must be 64 hex characters (SHA-256)".to_string(),
        ));
    }
    Ok(content_hash.to_ascii_lowercase())
}

impl Ingestor {
    pub async fn create_project(&self, name: &str) -> EngineResult<Project> {
        if name.trim().is_empty() {
            return Err(EngineError::Validation("Project name is required".to_string()));
        }
        let project = Project {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            api_key: uuid::Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now().timestamp(),
        };
        self.store.create_project(&project).await?;
        tracing::info!(project_id = %project.id, "project created");
        Ok(project)
    }

    pub async fn create_document(
        &self,
        project: &Project,
        name: &str,
        content_type: &str,
        content_hash: &str,
    ) -> EngineResult<CreateOutcome> {
        if name.trim().is_empty() {
            return Err(EngineError::Validation("Document name is required".to_string()));
        }
        if content_type.trim().is_empty() {
            return Err(EngineError::Validation("content_type is required".to_string()));
        }
        let content_hash = validate_content_hash(content_hash)?;

        // Fast path: cache hit on a ready canonical document.
        match self.dedup.get(&project.id, &content_hash).await {
            Ok(Some(cached_id)) => {
                if let Some(canonical) = self.store.get_document(&project.id, &cached_id).await? {
                    if canonical.status == DocumentStatus::Ready
                        && canonical.deduped_from.is_none()
                        && canonical.content_hash == content_hash
                    {
                        return self.instant_copy(project, &canonical, name).await;
                    }
                }
                // Stale or not-yet-ready entry: fall through to the
                // relational lookup.
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "dedup cache lookup failed, falling back to store");
            }
        }

        if let Some(existing) = self
            .store
            .find_by_content_hash(&project.id, &content_hash)
            .await?
        {
            self.cache_put(&project.id, &content_hash, &existing.id).await;
            return Ok(CreateOutcome {
                document: existing,
                deduped: true,
                instant: false,
            });
        }

        let now = chrono::Utc::now().timestamp();
        let id = uuid::Uuid::new_v4().to_string();
        let document = Document {
            blob_key: document_blob_key(&id),
            id,
            project_id: project.id.clone(),
            name: name.trim().to_string(),
            content_type: content_type.to_string(),
            content_hash: content_hash.clone(),
            status: DocumentStatus::Created,
            chunk_count: 0,
            deduped_from: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_document(&document).await?;
        self.cache_put(&project.id, &content_hash, &document.id).await;

        Ok(CreateOutcome {
            document,
            deduped: false,
            instant: false,
        })
    }

    pub async fn upload(
        &self,
        project: &Project,
        document_id: &str,
        bytes: &[u8],
    ) -> EngineResult<Document> {
        if bytes.is_empty() {
            return Err(EngineError::Validation("Upload body is empty".to_string()));
        }
        let doc = self.require_document(project, document_id).await?;
        if doc.status != DocumentStatus::Created {
            return Err(EngineError::InvalidState(format!(
                "Document is '{}', expected 'created'",
                doc.status.as_str()
            )));
        }

        self.blobs.put(&doc.blob_key, bytes).await?;
        self.store
            .set_document_status(&doc.id, DocumentStatus::Uploaded, None, None)
            .await?;
        self.require_document(project, document_id).await
    }

    pub async fn complete_upload(
        &self,
        project: &Project,
        document_id: &str,
    ) -> EngineResult<Document> {
        let doc = self.require_document(project, document_id).await?;
        if doc.status != DocumentStatus::Uploaded {
            return Err(EngineError::InvalidState(format!(
                "Document is '{}', expected 'uploaded'",
                doc.status.as_str()
            )));
        }

        let claimed = self
            .store
            .set_document_status(&doc.id, DocumentStatus::Processing, None, None)
            .await?;
        if claimed {
            self.queue.push(ProcessingJob {
                project_id: project.id.clone(),
                document_id: doc.id.clone(),
                attempt: 0,
            });
        }
        self.require_document(project, document_id).await
    }

    /// Fetch for status polling. Deleted documents are indistinguishable
    /// from unknown ids.
    pub async fn get_document(&self, project: &Project, document_id: &str) -> EngineResult<Document> {
        self.require_document(project, document_id).await
    }

    /// Remove a document and all derived state. Idempotent: a second
    /// delete of the same id succeeds without doing anything.
    pub async fn delete_document(&self, project: &Project, document_id: &str) -> EngineResult<()> {
        let doc = match self.store.get_document(&project.id, document_id).await? {
            Some(doc) => doc,
            None => {
                return Err(EngineError::NotFound(format!(
                    "Document {} not found",
                    document_id
                )))
            }
        };
        if doc.status == DocumentStatus::Deleted {
            return Ok(());
        }

        let deleted_chunks = self.store.delete_chunks(&doc.id).await?;
        for chunk in &deleted_chunks {
            if let Err(e) = self.blobs.delete(&chunk.metadata_key).await {
                tracing::warn!(chunk_id = %chunk.id, error = %e, "metadata blob delete failed");
            }
        }
        self.vectors.delete_document(&project.id, &doc.id).await?;
        self.blobs.delete(&doc.blob_key).await?;
        self.store
            .set_document_status(&doc.id, DocumentStatus::Deleted, None, Some(0))
            .await?;
        tracing::info!(document_id = %doc.id, chunks = deleted_chunks.len(), "document deleted");
        Ok(())
    }

    async fn require_document(&self, project: &Project, document_id: &str) -> EngineResult<Document> {
        match self.store.get_document(&project.id, document_id).await? {
            Some(doc) if doc.status != DocumentStatus::Deleted => Ok(doc),
            _ => Err(EngineError::NotFound(format!(
                "Document {} not found",
                document_id
            ))),
        }
    }

    async fn cache_put(&self, project_id: &str, content_hash: &str, document_id: &str) {
        if let Err(e) = self
            .dedup
            .put(project_id, content_hash, document_id, self.dedup_ttl_secs)
            .await
        {
            tracing::warn!(error = %e, "dedup cache write failed");
        }
    }

    /// Duplicate a ready canonical document under a new name without
    /// re-processing. All-or-nothing: any failure removes the partial
    /// copy and flips the new row to `failed`.
    async fn instant_copy(
        &self,
        project: &Project,
        canonical: &Document,
        name: &str,
    ) -> EngineResult<CreateOutcome> {
        let now = chrono::Utc::now().timestamp();
        let id = uuid::Uuid::new_v4().to_string();
        let document = Document {
            blob_key: document_blob_key(&id),
            id,
            project_id: project.id.clone(),
            name: name.trim().to_string(),
            content_type: canonical.content_type.clone(),
            content_hash: canonical.content_hash.clone(),
            status: DocumentStatus::Processing,
            chunk_count: 0,
            deduped_from: Some(canonical.id.clone()),
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_document(&document).await?;

        match self.copy_artifacts(project, canonical, &document).await {
            Ok(chunk_count) => {
                let updated = self
                    .store
                    .set_document_status(&document.id, DocumentStatus::Ready, None, Some(chunk_count))
                    .await?;
                if !updated {
                    self.rollback_copy(project, &document).await;
                    return Err(EngineError::Consistency(
                        "Instant copy target was deleted before completion".to_string(),
                    ));
                }
                let document = self.require_document(project, &document.id).await?;
                tracing::info!(
                    document_id = %document.id,
                    source_id = %canonical.id,
                    chunks = chunk_count,
                    "instant copy complete"
                );
                Ok(CreateOutcome {
                    document,
                    deduped: true,
                    instant: true,
                })
            }
            Err(e) => {
                self.rollback_copy(project, &document).await;
                self.store
                    .set_document_status(
                        &document.id,
                        DocumentStatus::Failed,
                        Some(&e.to_string()),
                        None,
                    )
                    .await?;
                Err(EngineError::Consistency(format!("Instant copy failed: {}", e)))
            }
        }
    }

    async fn copy_artifacts(
        &self,
        project: &Project,
        canonical: &Document,
        target: &Document,
    ) -> EngineResult<i64> {
        let source_chunks = self.store.chunks_for_document(&canonical.id).await?;
        let source_vectors = self
            .vectors
            .entries_for_document(&project.id, &canonical.id)
            .await?;
        if source_chunks.len() != source_vectors.len() {
            return Err(EngineError::Consistency(format!(
                "Canonical document {} has {} chunks but {} vectors",
                canonical.id,
                source_chunks.len(),
                source_vectors.len()
            )));
        }

        let raw = self
            .blobs
            .get(&canonical.blob_key)
            .await?
            .ok_or_else(|| {
                EngineError::Consistency(format!("Raw blob {} missing", canonical.blob_key))
            })?;
        self.blobs.put(&target.blob_key, &raw).await?;

        let now = chrono::Utc::now().timestamp();
        let mut new_chunks = Vec::with_capacity(source_chunks.len());
        for chunk in &source_chunks {
            let new_id = uuid::Uuid::new_v4().to_string();
            let new_key = chunk_metadata_key(&new_id);

            let blob = self.blobs.get(&chunk.metadata_key).await?.ok_or_else(|| {
                EngineError::Consistency(format!("Metadata blob {} missing", chunk.metadata_key))
            })?;
            let mut metadata: ChunkMetadata =
                serde_json::from_slice(&blob).map_err(anyhow::Error::from)?;
            metadata.citation.document_name = target.name.clone();
            let body = serde_json::to_vec(&metadata).map_err(anyhow::Error::from)?;
            self.blobs.put(&new_key, &body).await?;

            new_chunks.push(Chunk {
                id: new_id,
                project_id: project.id.clone(),
                document_id: target.id.clone(),
                chunk_index: chunk.chunk_index,
                text: chunk.text.clone(),
                keywords: chunk.keywords.clone(),
                metadata_key: new_key,
                page_number: chunk.page_number,
                section_path: chunk.section_path.clone(),
                created_at: now,
            });
        }

        self.store.insert_chunks(&new_chunks).await?;

        // Vectors map onto the new chunk ids by ordinal.
        let entries: Vec<VectorEntry> = source_vectors
            .into_iter()
            .filter_map(|entry| {
                new_chunks
                    .iter()
                    .find(|c| c.chunk_index == entry.ordinal)
                    .map(|chunk| VectorEntry {
                        chunk_id: chunk.id.clone(),
                        document_id: target.id.clone(),
                        ordinal: entry.ordinal,
                        document_name: target.name.clone(),
                        vector: entry.vector,
                    })
            })
            .collect();
        if entries.len() != new_chunks.len() {
            return Err(EngineError::Consistency(
                "Vector ordinals do not cover the copied chunks".to_string(),
            ));
        }
        self.vectors.upsert(&project.id, &entries).await?;

        Ok(new_chunks.len() as i64)
    }

    async fn rollback_copy(&self, project: &Project, target: &Document) {
        match self.store.delete_chunks(&target.id).await {
            Ok(deleted) => {
                for chunk in deleted {
                    if let Err(e) = self.blobs.delete(&chunk.metadata_key).await {
                        tracing::warn!(chunk_id = %chunk.id, error = %e, "metadata blob cleanup failed");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(document_id = %target.id, error = %e, "chunk cleanup failed");
            }
        }
        if let Err(e) = self.vectors.delete_document(&project.id, &target.id).await {
            tracing::warn!(document_id = %target.id, error = %e, "vector cleanup failed");
        }
        if let Err(e) = self.blobs.delete(&target.blob_key).await {
            tracing::warn!(document_id = %target.id, error = %e, "raw blob cleanup failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_validated_and_lowercased() {
        let hash = "A".repeat(64);
        assert_eq!(validate_content_hash(&hash).unwrap(), "a".repeat(64));
        assert!(validate_content_hash("deadbeef").is_err());
        assert!(validate_content_hash(&"g".repeat(64)).is_err());
    }
}
