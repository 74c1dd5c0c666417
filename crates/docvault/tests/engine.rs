//! End-to-end engine tests over the in-memory stores: ingestion
//! lifecycle, dedup and instant copy, all-or-nothing visibility, hybrid
//! retrieval, and degraded query behavior.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use docvault::config::RetrievalConfig;
use docvault::extractor::LocalExtractor;
use docvault::ingest::Ingestor;
use docvault::pipeline::{drain, Pipeline};
use docvault::query::{QueryEngine, QueryParams, QueryResponse};
use docvault::queue::JobQueue;

use docvault_core::chunk::ChunkingParams;
use docvault_core::error::EngineError;
use docvault_core::models::{Document, DocumentStatus, DocumentStructure, Project, Section};
use docvault_core::services::{AnswerGenerator, Embedder, StructureExtractor};
use docvault_core::store::memory::{
    MemoryBlobStore, MemoryDedupCache, MemoryStore, MemoryVectorIndex,
};
use docvault_core::store::{BlobStore, Store, VectorIndex};

const DIMS: usize = 32;

/// Deterministic bag-of-words embedder: similar texts get similar
/// vectors, so cosine ranking behaves sensibly without a model.
struct HashEmbedder;

fn hash_embed(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let mut h = DefaultHasher::new();
        token.hash(&mut h);
        v[(h.finish() % DIMS as u64) as usize] += 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_embed(t)).collect())
    }
}

/// Fails the first `failures` embed calls, then behaves like
/// [`HashEmbedder`].
struct FlakyEmbedder {
    failures: u32,
    calls: AtomicU32,
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            anyhow::bail!("embedding service unavailable");
        }
        Ok(texts.iter().map(|t| hash_embed(t)).collect())
    }
}

struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        anyhow::bail!("embedding service unavailable")
    }
}

/// Embedder that signals when a call starts and then waits for a permit,
/// so a test can interleave other operations mid-processing.
struct GatedEmbedder {
    started: tokio::sync::mpsc::UnboundedSender<()>,
    gate: Arc<tokio::sync::Semaphore>,
}

#[async_trait]
impl Embedder for GatedEmbedder {
    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let _ = self.started.send(());
        let _permit = self.gate.acquire().await?;
        Ok(texts.iter().map(|t| hash_embed(t)).collect())
    }
}

/// Extractor stub that reports fixed sections regardless of input,
/// used to exercise page/section provenance.
struct StubExtractor {
    sections: Vec<Section>,
}

#[async_trait]
impl StructureExtractor for StubExtractor {
    async fn extract(&self, bytes: &[u8], _content_type: &str) -> Result<DocumentStructure> {
        Ok(DocumentStructure {
            markdown: String::from_utf8_lossy(bytes).into_owned(),
            tables_html: Vec::new(),
            sections: self.sections.clone(),
        })
    }
}

struct StaticAnswerer;

#[async_trait]
impl AnswerGenerator for StaticAnswerer {
    async fn generate(&self, _system: &str, context: &str, _question: &str) -> Result<String> {
        Ok(format!("answer from {} context chars", context.len()))
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    blobs: Arc<MemoryBlobStore>,
    vectors: Arc<MemoryVectorIndex>,
    dedup: Arc<MemoryDedupCache>,
    queue: Arc<JobQueue>,
    ingestor: Ingestor,
    pipeline: Pipeline,
    engine: QueryEngine,
}

fn chunking() -> ChunkingParams {
    ChunkingParams {
        window_chars: 160,
        overlap_chars: 30,
        max_keywords: 12,
    }
}

fn harness_with(
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn StructureExtractor>,
    max_attempts: u32,
) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let blobs = Arc::new(MemoryBlobStore::new());
    let vectors = Arc::new(MemoryVectorIndex::new());
    let dedup = Arc::new(MemoryDedupCache::new());
    // Zero backoff cap keeps retries synchronous under drain().
    let queue = JobQueue::new(max_attempts, 0);

    let store_dyn: Arc<dyn Store> = store.clone();
    let blobs_dyn: Arc<dyn BlobStore> = blobs.clone();
    let vectors_dyn: Arc<dyn VectorIndex> = vectors.clone();

    let pipeline = Pipeline {
        store: store_dyn.clone(),
        blobs: blobs_dyn.clone(),
        vectors: vectors_dyn.clone(),
        dedup: dedup.clone(),
        extractor,
        embedder: embedder.clone(),
        chunking: chunking(),
        dedup_ttl_secs: 3600,
    };
    let ingestor = Ingestor {
        store: store_dyn.clone(),
        blobs: blobs_dyn.clone(),
        vectors: vectors_dyn.clone(),
        dedup: dedup.clone(),
        queue: queue.clone(),
        dedup_ttl_secs: 3600,
    };
    let engine = QueryEngine {
        store: store_dyn,
        blobs: blobs_dyn,
        vectors: vectors_dyn,
        embedder,
        answerer: None,
        retrieval: RetrievalConfig::default(),
        max_keywords: 12,
    };

    Harness {
        store,
        blobs,
        vectors,
        dedup,
        queue,
        ingestor,
        pipeline,
        engine,
    }
}

fn harness() -> Harness {
    harness_with(Arc::new(HashEmbedder), Arc::new(LocalExtractor), 5)
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

async fn project(h: &Harness, name: &str) -> Project {
    h.ingestor.create_project(name).await.unwrap()
}

/// Full ingestion cycle for a markdown body: create, upload, complete,
/// drain the queue.
async fn ingest(h: &Harness, project: &Project, name: &str, content: &str) -> Document {
    let outcome = h
        .ingestor
        .create_document(project, name, "text/markdown", &sha256_hex(content.as_bytes()))
        .await
        .unwrap();
    assert!(!outcome.deduped);
    h.ingestor
        .upload(project, &outcome.document.id, content.as_bytes())
        .await
        .unwrap();
    h.ingestor
        .complete_upload(project, &outcome.document.id)
        .await
        .unwrap();
    drain(&h.pipeline, &h.queue).await;
    h.ingestor
        .get_document(project, &outcome.document.id)
        .await
        .unwrap()
}

async fn search(h: &Harness, project: &Project, query: &str) -> QueryResponse {
    h.engine
        .query(
            project,
            &QueryParams {
                query: query.to_string(),
                top_k: Some(8),
                mode: None,
            },
        )
        .await
        .unwrap()
}

const CONTRACT: &str = "# Agreement\n\
This agreement is made between the service provider and the client. \
The provider shall deliver the platform services described in the schedule \
and the client shall pay all invoices within thirty days of receipt.\n\
## Fees\n\
The termination fee is $500, payable within thirty days of notice. \
Early termination requires written notice from either party.\n\
## Liability\n\
Neither party shall be liable for indirect or consequential damages \
arising out of or in connection with this agreement under any theory.\n";

#[tokio::test]
async fn full_ingestion_makes_a_document_ready() {
    let h = harness();
    let p = project(&h, "acme").await;

    let doc = ingest(&h, &p, "contract.md", CONTRACT).await;
    assert_eq!(doc.status, DocumentStatus::Ready);
    assert!(doc.chunk_count > 1, "expected multiple windows");
    assert!(doc.error.is_none());

    let chunks = h.store.chunks_for_document(&doc.id).await.unwrap();
    assert_eq!(chunks.len() as i64, doc.chunk_count);
    let entries = h.vectors.entries_for_document(&p.id, &doc.id).await.unwrap();
    assert_eq!(entries.len(), chunks.len());
    // Every chunk's metadata blob is resolvable.
    for chunk in &chunks {
        assert!(h.blobs.get(&chunk.metadata_key).await.unwrap().is_some());
    }
}

#[tokio::test]
async fn duplicate_hash_instant_copies_without_reprocessing() {
    let h = harness();
    let p = project(&h, "acme").await;

    let original = ingest(&h, &p, "contract.md", CONTRACT).await;

    let outcome = h
        .ingestor
        .create_document(&p, "contract-copy.md", "text/markdown", &original.content_hash)
        .await
        .unwrap();
    assert!(outcome.deduped);
    assert!(outcome.instant);
    let copy = outcome.document;
    assert_eq!(copy.status, DocumentStatus::Ready);
    assert_eq!(copy.chunk_count, original.chunk_count);
    assert_eq!(copy.deduped_from.as_deref(), Some(original.id.as_str()));

    // Copied chunks are fresh rows under fresh ids with re-pointed
    // citations.
    let copied = h.store.chunks_for_document(&copy.id).await.unwrap();
    let originals = h.store.chunks_for_document(&original.id).await.unwrap();
    assert_eq!(copied.len(), originals.len());
    for (c, o) in copied.iter().zip(&originals) {
        assert_ne!(c.id, o.id);
        assert_eq!(c.text, o.text);
    }

    let results = search(&h, &p, "termination fee").await;
    let names: Vec<&str> = results
        .results
        .iter()
        .map(|r| r.citation.document_name.as_str())
        .collect();
    assert!(names.contains(&"contract.md"));
    assert!(names.contains(&"contract-copy.md"));
}

#[tokio::test]
async fn expired_dedup_cache_still_dedupes_through_the_store() {
    let h = harness();
    let p = project(&h, "acme").await;

    let original = ingest(&h, &p, "contract.md", CONTRACT).await;
    h.dedup.clear();

    let outcome = h
        .ingestor
        .create_document(&p, "again.md", "text/markdown", &original.content_hash)
        .await
        .unwrap();
    assert!(outcome.deduped);
    assert!(!outcome.instant);
    assert_eq!(outcome.document.id, original.id);
}

#[tokio::test]
async fn same_hash_in_another_project_is_not_deduped() {
    let h = harness();
    let p1 = project(&h, "acme").await;
    let p2 = project(&h, "globex").await;

    ingest(&h, &p1, "contract.md", CONTRACT).await;
    let outcome = h
        .ingestor
        .create_document(&p2, "contract.md", "text/markdown", &sha256_hex(CONTRACT.as_bytes()))
        .await
        .unwrap();
    assert!(!outcome.deduped);
    assert_eq!(outcome.document.status, DocumentStatus::Created);
}

#[tokio::test]
async fn queries_never_cross_tenants() {
    let h = harness();
    let p1 = project(&h, "acme").await;
    let p2 = project(&h, "globex").await;

    let doc = ingest(&h, &p1, "contract.md", CONTRACT).await;

    let results = search(&h, &p2, "termination fee").await;
    assert_eq!(results.results_found, 0);

    // Cross-tenant document access resolves to not-found.
    let err = h.ingestor.get_document(&p2, &doc.id).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn failed_processing_leaves_no_visible_chunks() {
    let h = harness_with(Arc::new(FailingEmbedder), Arc::new(LocalExtractor), 2);
    let p = project(&h, "acme").await;

    let doc = ingest(&h, &p, "contract.md", CONTRACT).await;
    assert_eq!(doc.status, DocumentStatus::Failed);
    assert!(doc.error.is_some());

    assert!(h.store.chunks_for_document(&doc.id).await.unwrap().is_empty());
    assert!(h
        .vectors
        .entries_for_document(&p.id, &doc.id)
        .await
        .unwrap()
        .is_empty());
    let hits = h
        .store
        .keyword_search(&p.id, &["termination".to_string()], 10)
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn transient_embedding_failure_is_retried_to_success() {
    let h = harness_with(
        Arc::new(FlakyEmbedder {
            failures: 2,
            calls: AtomicU32::new(0),
        }),
        Arc::new(LocalExtractor),
        5,
    );
    let p = project(&h, "acme").await;

    let doc = ingest(&h, &p, "contract.md", CONTRACT).await;
    assert_eq!(doc.status, DocumentStatus::Ready);
    assert!(doc.chunk_count > 0);
}

#[tokio::test]
async fn citations_round_trip_page_and_section_path() {
    let sections = vec![
        Section {
            level: 1,
            text: "Terms".to_string(),
            page: 4,
        },
        Section {
            level: 2,
            text: "Fees".to_string(),
            page: 4,
        },
    ];
    let h = harness_with(Arc::new(HashEmbedder), Arc::new(StubExtractor { sections }), 5);
    let p = project(&h, "acme").await;

    let md = "# Terms\nGeneral conditions apply.\n## Fees\nThe termination fee is $500.\n";
    ingest(&h, &p, "contract.md", md).await;

    let results = search(&h, &p, "termination fee").await;
    assert!(results.results_found > 0);
    let top = &results.results[0];
    assert_eq!(top.citation.page_number, 4);
    assert_eq!(top.citation.section_path, vec!["Terms", "Fees"]);
    assert_eq!(top.citation.document_name, "contract.md");
}

#[tokio::test]
async fn termination_fee_query_returns_the_fee_with_context() {
    let h = harness();
    let p = project(&h, "acme").await;
    ingest(&h, &p, "contract.md", CONTRACT).await;

    let results = search(&h, &p, "what is the termination fee").await;
    assert!(results.results_found > 0);
    assert!(results.error.is_none());

    let fee = results
        .results
        .iter()
        .find(|r| r.text.contains("$500"))
        .expect("fee chunk retrieved");
    // The fee sits mid-document, so both neighbors are present.
    assert!(!fee.context.before.is_empty());
    assert!(!fee.context.after.is_empty());
    assert!(fee.scores.fused > 0.0);
}

#[tokio::test]
async fn repeated_queries_rank_identically() {
    let h = harness();
    let p = project(&h, "acme").await;
    ingest(&h, &p, "contract.md", CONTRACT).await;

    let first = search(&h, &p, "liability for damages").await;
    let second = search(&h, &p, "liability for damages").await;
    let ids = |r: &QueryResponse| {
        r.results
            .iter()
            .map(|x| x.chunk_id.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(ids(&first), ids(&second));
}

#[tokio::test]
async fn empty_tenant_query_is_empty_not_an_error() {
    let h = harness();
    let p = project(&h, "acme").await;

    let results = search(&h, &p, "anything at all").await;
    assert_eq!(results.results_found, 0);
    assert!(results.results.is_empty());
    assert!(results.error.is_none());
}

#[tokio::test]
async fn deleted_documents_disappear_from_results() {
    let h = harness();
    let p = project(&h, "acme").await;
    let doc = ingest(&h, &p, "contract.md", CONTRACT).await;

    assert!(search(&h, &p, "termination fee").await.results_found > 0);

    h.ingestor.delete_document(&p, &doc.id).await.unwrap();
    assert_eq!(search(&h, &p, "termination fee").await.results_found, 0);

    let err = h.ingestor.get_document(&p, &doc.id).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
    // Idempotent: the second delete is a no-op success.
    h.ingestor.delete_document(&p, &doc.id).await.unwrap();

    assert!(h
        .vectors
        .entries_for_document(&p.id, &doc.id)
        .await
        .unwrap()
        .is_empty());
    assert!(h.blobs.get(&doc.blob_key).await.unwrap().is_none());
}

#[tokio::test]
async fn delete_during_processing_stays_deleted() {
    let (started_tx, mut started_rx) = tokio::sync::mpsc::unbounded_channel();
    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let h = harness_with(
        Arc::new(GatedEmbedder {
            started: started_tx,
            gate: gate.clone(),
        }),
        Arc::new(LocalExtractor),
        5,
    );
    let p = project(&h, "acme").await;

    let outcome = h
        .ingestor
        .create_document(&p, "contract.md", "text/markdown", &sha256_hex(CONTRACT.as_bytes()))
        .await
        .unwrap();
    let id = outcome.document.id.clone();
    h.ingestor.upload(&p, &id, CONTRACT.as_bytes()).await.unwrap();
    h.ingestor.complete_upload(&p, &id).await.unwrap();
    let job = h.queue.try_pop().await.unwrap();

    // Delete lands while the worker is blocked inside the embed call.
    let (processed, ()) = tokio::join!(h.pipeline.process(&job), async {
        started_rx.recv().await;
        h.ingestor.delete_document(&p, &id).await.unwrap();
        gate.add_permits(1);
    });
    processed.unwrap();

    let doc = h.store.get_document(&p.id, &id).await.unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::Deleted);
    assert!(h.store.chunks_for_document(&id).await.unwrap().is_empty());
    assert!(h
        .vectors
        .entries_for_document(&p.id, &id)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(search(&h, &p, "termination fee").await.results_found, 0);
}

#[tokio::test]
async fn lifecycle_transitions_are_enforced() {
    let h = harness();
    let p = project(&h, "acme").await;

    let outcome = h
        .ingestor
        .create_document(&p, "a.md", "text/markdown", &sha256_hex(b"body"))
        .await
        .unwrap();
    let id = outcome.document.id.clone();

    // Complete before upload.
    let err = h.ingestor.complete_upload(&p, &id).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));

    // Empty upload body.
    let err = h.ingestor.upload(&p, &id, b"").await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    h.ingestor.upload(&p, &id, b"body").await.unwrap();
    // Second upload after the first.
    let err = h.ingestor.upload(&p, &id, b"body").await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));

    // Malformed hash at create.
    let err = h
        .ingestor
        .create_document(&p, "b.md", "text/markdown", "nothex")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn embedding_outage_degrades_the_query() {
    let h = harness();
    let p = project(&h, "acme").await;
    ingest(&h, &p, "contract.md", CONTRACT).await;

    // Same stores, broken embedder.
    let broken = QueryEngine {
        store: h.store.clone(),
        blobs: h.blobs.clone(),
        vectors: h.vectors.clone(),
        embedder: Arc::new(FailingEmbedder),
        answerer: None,
        retrieval: RetrievalConfig::default(),
        max_keywords: 12,
    };
    let response = broken
        .query(
            &p,
            &QueryParams {
                query: "termination fee".to_string(),
                top_k: None,
                mode: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(response.results_found, 0);
    assert!(response.error.is_some());
}

#[tokio::test]
async fn answer_mode_returns_an_answer_or_degrades() {
    let h = harness();
    let p = project(&h, "acme").await;
    ingest(&h, &p, "contract.md", CONTRACT).await;

    // No provider configured: results still come back, with an error note.
    let response = h
        .engine
        .query(
            &p,
            &QueryParams {
                query: "termination fee".to_string(),
                top_k: None,
                mode: Some("answer".to_string()),
            },
        )
        .await
        .unwrap();
    assert!(response.results_found > 0);
    assert!(response.answer.is_none());
    assert!(response.error.is_some());

    let answering = QueryEngine {
        store: h.store.clone(),
        blobs: h.blobs.clone(),
        vectors: h.vectors.clone(),
        embedder: Arc::new(HashEmbedder),
        answerer: Some(Arc::new(StaticAnswerer)),
        retrieval: RetrievalConfig::default(),
        max_keywords: 12,
    };
    let response = answering
        .query(
            &p,
            &QueryParams {
                query: "termination fee".to_string(),
                top_k: None,
                mode: Some("answer".to_string()),
            },
        )
        .await
        .unwrap();
    assert!(response.answer.is_some());
    assert!(response.error.is_none());

    // Unknown mode is a validation error.
    let err = h
        .engine
        .query(
            &p,
            &QueryParams {
                query: "x".to_string(),
                top_k: None,
                mode: Some("summarize".to_string()),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn partial_instant_copy_rolls_back() {
    let h = harness();
    let p = project(&h, "acme").await;
    let original = ingest(&h, &p, "contract.md", CONTRACT).await;

    // Sabotage the canonical document: remove one metadata blob so the
    // copy cannot complete.
    let chunks = h.store.chunks_for_document(&original.id).await.unwrap();
    h.blobs.delete(&chunks[1].metadata_key).await.unwrap();

    let err = h
        .ingestor
        .create_document(&p, "copy.md", "text/markdown", &original.content_hash)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Consistency(_)));

    // The failed copy left nothing queryable behind.
    let results = search(&h, &p, "termination fee").await;
    assert!(results
        .results
        .iter()
        .all(|r| r.citation.document_name == "contract.md"));
}

#[tokio::test]
async fn analytics_rows_are_recorded_per_query() {
    let h = harness();
    let p = project(&h, "acme").await;
    ingest(&h, &p, "contract.md", CONTRACT).await;

    search(&h, &p, "termination fee").await;
    search(&h, &p, "liability").await;

    let records = h.store.search_records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].query, "termination fee");
    assert_eq!(records[0].mode, "search");
    assert!(records[0].results_found > 0);
}
