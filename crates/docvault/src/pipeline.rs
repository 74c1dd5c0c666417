//! Document processing pipeline and queue workers.
//!
//! A worker takes a job, loads the raw bytes, extracts structure, builds
//! enriched windows, embeds them, and commits chunk rows, metadata
//! blobs, and vectors. Chunks become visible all-or-nothing: the chunk
//! rows land in one transaction after every metadata blob is written,
//! and any later failure rolls the partial artifacts back before the
//! document leaves `processing`.
//!
//! External-service failures are retried through the queue with
//! exponential backoff; every other failure marks the document `failed`
//! immediately.

use std::sync::Arc;

use docvault_core::chunk::{build_windows, ChunkingParams};
use docvault_core::error::{EngineError, EngineResult};
use docvault_core::models::{
    chunk_metadata_key, Chunk, ChunkMetadata, Citation, Document, DocumentStatus, ProcessingJob,
};
use docvault_core::services::{Embedder, StructureExtractor};
use docvault_core::store::{BlobStore, DedupCache, Store, VectorEntry, VectorIndex};

use crate::queue::JobQueue;

pub struct Pipeline {
    pub store: Arc<dyn Store>,
    pub blobs: Arc<dyn BlobStore>,
    pub vectors: Arc<dyn VectorIndex>,
    pub dedup: Arc<dyn DedupCache>,
    pub extractor: Arc<dyn StructureExtractor>,
    pub embedder: Arc<dyn Embedder>,
    pub chunking: ChunkingParams,
    pub dedup_ttl_secs: u64,
}

impl Pipeline {
    /// Process one job end to end. On error the document's partial
    /// chunks, vectors, and metadata blobs have already been removed;
    /// the caller decides between retry and `failed`.
    pub async fn process(&self, job: &ProcessingJob) -> EngineResult<()> {
        let doc = self
            .store
            .get_document(&job.project_id, &job.document_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Document {} not found", job.document_id)))?;

        match doc.status {
            DocumentStatus::Uploaded | DocumentStatus::Processing => {}
            // Deleted or already-terminal documents drop silently; a
            // stale retry must not resurrect them.
            _ => {
                tracing::debug!(
                    document_id = %doc.id,
                    status = doc.status.as_str(),
                    "skipping job for document no longer pending"
                );
                return Ok(());
            }
        }

        let claimed = self
            .store
            .set_document_status(&doc.id, DocumentStatus::Processing, None, None)
            .await?;
        if !claimed {
            return Ok(());
        }

        match self.run(&doc).await {
            Ok(chunk_count) => {
                let updated = self
                    .store
                    .set_document_status(&doc.id, DocumentStatus::Ready, None, Some(chunk_count))
                    .await?;
                if !updated {
                    // Deleted while the job was running: the artifacts we
                    // just committed must not outlive the document.
                    self.rollback(&doc).await;
                    tracing::info!(
                        document_id = %doc.id,
                        "document deleted during processing, artifacts discarded"
                    );
                    return Ok(());
                }
                if let Err(e) = self
                    .dedup
                    .put(&doc.project_id, &doc.content_hash, &doc.id, self.dedup_ttl_secs)
                    .await
                {
                    tracing::warn!(document_id = %doc.id, error = %e, "dedup cache write failed");
                }
                tracing::info!(document_id = %doc.id, chunks = chunk_count, "document ready");
                Ok(())
            }
            Err(e) => {
                self.rollback(&doc).await;
                Err(e)
            }
        }
    }

    async fn run(&self, doc: &Document) -> EngineResult<i64> {
        let bytes = self
            .blobs
            .get(&doc.blob_key)
            .await?
            .ok_or_else(|| EngineError::Consistency(format!("Raw blob {} missing", doc.blob_key)))?;

        let structure = self
            .extractor
            .extract(&bytes, &doc.content_type)
            .await
            .map_err(|e| EngineError::ExternalService(format!("Extraction failed: {}", e)))?;

        let windows = build_windows(&structure, &self.chunking);
        if windows.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp();
        let mut chunks = Vec::with_capacity(windows.len());
        let mut metadatas = Vec::with_capacity(windows.len());
        for window in &windows {
            let chunk_id = uuid::Uuid::new_v4().to_string();
            let metadata_key = chunk_metadata_key(&chunk_id);
            chunks.push(Chunk {
                id: chunk_id,
                project_id: doc.project_id.clone(),
                document_id: doc.id.clone(),
                chunk_index: window.index,
                text: window.text.clone(),
                keywords: window.keywords.clone(),
                metadata_key,
                page_number: window.page_number,
                section_path: window.section_path.clone(),
                created_at: now,
            });
            metadatas.push(ChunkMetadata {
                text: window.text.clone(),
                context_before: window.context_before.clone(),
                context_after: window.context_after.clone(),
                table_html: window.table_html.clone(),
                citation: Citation {
                    page_number: window.page_number,
                    section_path: window.section_path.clone(),
                    document_name: doc.name.clone(),
                },
            });
        }

        // Metadata blobs first: once chunk rows are visible, every
        // metadata_key they reference must resolve.
        for (chunk, metadata) in chunks.iter().zip(&metadatas) {
            let body = serde_json::to_vec(metadata).map_err(anyhow::Error::from)?;
            self.blobs.put(&chunk.metadata_key, &body).await?;
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self
            .embedder
            .embed(&texts)
            .await
            .map_err(|e| EngineError::ExternalService(format!("Embedding failed: {}", e)))?;
        if embeddings.len() != chunks.len() {
            return Err(EngineError::ExternalService(format!(
                "Embedder returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }

        self.store.insert_chunks(&chunks).await?;

        let entries: Vec<VectorEntry> = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, vector)| VectorEntry {
                chunk_id: chunk.id.clone(),
                document_id: doc.id.clone(),
                ordinal: chunk.chunk_index,
                document_name: doc.name.clone(),
                vector,
            })
            .collect();
        self.vectors.upsert(&doc.project_id, &entries).await?;

        Ok(chunks.len() as i64)
    }

    /// Remove whatever a failed run left behind so a retry starts clean
    /// and search never sees a partial document.
    async fn rollback(&self, doc: &Document) {
        match self.store.delete_chunks(&doc.id).await {
            Ok(deleted) => {
                for chunk in deleted {
                    if let Err(e) = self.blobs.delete(&chunk.metadata_key).await {
                        tracing::warn!(chunk_id = %chunk.id, error = %e, "metadata blob cleanup failed");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(document_id = %doc.id, error = %e, "chunk cleanup failed");
            }
        }
        if let Err(e) = self.vectors.delete_document(&doc.project_id, &doc.id).await {
            tracing::warn!(document_id = %doc.id, error = %e, "vector cleanup failed");
        }
    }

    pub async fn mark_failed(&self, job: &ProcessingJob, reason: &str) {
        if let Err(e) = self
            .store
            .set_document_status(&job.document_id, DocumentStatus::Failed, Some(reason), None)
            .await
        {
            tracing::error!(document_id = %job.document_id, error = %e, "failed to mark document failed");
        }
    }
}

/// Handle one job: process it, retry external-service failures, and mark
/// the document `failed` when retries are exhausted or the failure is
/// permanent.
pub async fn handle_job(pipeline: &Pipeline, queue: &Arc<JobQueue>, job: ProcessingJob) {
    match pipeline.process(&job).await {
        Ok(()) => {}
        Err(EngineError::ExternalService(reason)) => {
            tracing::warn!(
                document_id = %job.document_id,
                attempt = job.attempt,
                %reason,
                "processing failed, scheduling retry"
            );
            if !queue.retry(job.clone()).await {
                pipeline.mark_failed(&job, &reason).await;
            }
        }
        Err(e) => {
            tracing::error!(document_id = %job.document_id, error = %e, "processing failed permanently");
            pipeline.mark_failed(&job, &e.to_string()).await;
        }
    }
}

/// Long-running worker loop. Several of these run concurrently; the
/// queue hands each job to exactly one worker.
pub async fn run_worker(pipeline: Arc<Pipeline>, queue: Arc<JobQueue>) {
    while let Some(job) = queue.pop().await {
        handle_job(&pipeline, &queue, job).await;
    }
}

/// Synchronously process every queued job, including zero-delay retries.
/// Test-only convenience; the server uses [`run_worker`].
pub async fn drain(pipeline: &Pipeline, queue: &Arc<JobQueue>) {
    while let Some(job) = queue.try_pop().await {
        handle_job(pipeline, queue, job).await;
    }
}
