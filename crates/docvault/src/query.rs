//! Hybrid query engine.
//!
//! Runs vector and keyword retrieval side by side, fuses the two
//! rankings with RRF, and assembles cited results from the chunk
//! metadata blobs. Provider failures degrade the response instead of
//! failing it: an embedding failure yields empty results plus an
//! `error` field, an answer failure yields results without an answer.

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use docvault_core::error::{EngineError, EngineResult};
use docvault_core::fusion::{fuse, RankedChunk};
use docvault_core::keywords;
use docvault_core::models::{chunk_metadata_key, ChunkMetadata, Citation, Project, SearchRecord};
use docvault_core::services::{AnswerGenerator, Embedder};
use docvault_core::store::{BlobStore, Store, VectorIndex};

use crate::config::RetrievalConfig;

const ANSWER_INSTRUCTION: &str = "Answer using only the provided context. \
     If the context does not contain the answer, say so. Do not use outside knowledge.";

#[derive(Debug, Clone)]
pub struct QueryParams {
    pub query: String,
    pub top_k: Option<i64>,
    pub mode: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub results: Vec<QueryResult>,
    pub results_found: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QueryResult {
    pub chunk_id: String,
    pub document_id: String,
    pub text: String,
    pub context: NeighborContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_html: Option<String>,
    pub citation: Citation,
    pub scores: Scores,
}

#[derive(Debug, Serialize)]
pub struct NeighborContext {
    pub before: String,
    pub after: String,
}

#[derive(Debug, Serialize)]
pub struct Scores {
    /// RRF fused score; the ranking key.
    pub fused: f64,
    /// Cosine similarity, when the chunk appeared in the vector ranking.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<f64>,
    /// Keyword relevance proxy, when the chunk appeared in that ranking.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword: Option<f64>,
}

pub struct QueryEngine {
    pub store: Arc<dyn Store>,
    pub blobs: Arc<dyn BlobStore>,
    pub vectors: Arc<dyn VectorIndex>,
    pub embedder: Arc<dyn Embedder>,
    pub answerer: Option<Arc<dyn AnswerGenerator>>,
    pub retrieval: RetrievalConfig,
    pub max_keywords: usize,
}

impl QueryEngine {
    pub async fn query(&self, project: &Project, params: &QueryParams) -> EngineResult<QueryResponse> {
        let started = Instant::now();

        let query_text = params.query.trim();
        if query_text.is_empty() {
            return Err(EngineError::Validation("Query text is required".to_string()));
        }
        let mode = params.mode.as_deref().unwrap_or("search");
        if mode != "search" && mode != "answer" {
            return Err(EngineError::Validation(format!(
                "Unknown mode '{}': must be 'search' or 'answer'",
                mode
            )));
        }
        let top_k = params
            .top_k
            .unwrap_or(self.retrieval.default_top_k)
            .clamp(1, self.retrieval.max_top_k);

        let query_vec = match self.embedder.embed(&[query_text.to_string()]).await {
            Ok(mut vecs) if !vecs.is_empty() => vecs.remove(0),
            Ok(_) => {
                return Ok(self
                    .degraded(project, query_text, mode, started, "Empty embedding response")
                    .await)
            }
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed, degrading");
                return Ok(self
                    .degraded(project, query_text, mode, started, &format!("Embedding failed: {}", e))
                    .await);
            }
        };

        let candidate_limit = top_k.saturating_mul(2);
        let query_keywords = keywords::extract(query_text, self.max_keywords);
        let (vector_hits, keyword_hits) = tokio::join!(
            self.vectors.search(&project.id, &query_vec, candidate_limit),
            self.store
                .keyword_search(&project.id, &query_keywords, candidate_limit),
        );
        let (vector_hits, keyword_hits) = (vector_hits?, keyword_hits?);

        let vector_ranked: Vec<RankedChunk> = vector_hits
            .iter()
            .map(|h| RankedChunk {
                chunk_id: h.chunk_id.clone(),
                document_id: h.document_id.clone(),
                ordinal: h.ordinal,
            })
            .collect();
        let keyword_ranked: Vec<RankedChunk> = keyword_hits
            .iter()
            .map(|h| RankedChunk {
                chunk_id: h.chunk_id.clone(),
                document_id: h.document_id.clone(),
                ordinal: h.ordinal,
            })
            .collect();

        let mut fused = fuse(&vector_ranked, &keyword_ranked);
        fused.truncate(top_k as usize);

        let mut results = Vec::with_capacity(fused.len());
        for candidate in &fused {
            let key = chunk_metadata_key(&candidate.chunk_id);
            let blob = match self.blobs.get(&key).await? {
                Some(blob) => blob,
                None => {
                    tracing::warn!(chunk_id = %candidate.chunk_id, "metadata blob missing, dropping result");
                    continue;
                }
            };
            let metadata: ChunkMetadata =
                serde_json::from_slice(&blob).map_err(anyhow::Error::from)?;

            let vector_score = vector_hits
                .iter()
                .find(|h| h.chunk_id == candidate.chunk_id)
                .map(|h| h.score);
            let keyword_score = keyword_hits
                .iter()
                .find(|h| h.chunk_id == candidate.chunk_id)
                .map(|h| h.raw_score);

            results.push(QueryResult {
                chunk_id: candidate.chunk_id.clone(),
                document_id: candidate.document_id.clone(),
                text: metadata.text,
                context: NeighborContext {
                    before: metadata.context_before,
                    after: metadata.context_after,
                },
                table_html: metadata.table_html,
                citation: metadata.citation,
                scores: Scores {
                    fused: candidate.score,
                    vector: vector_score,
                    keyword: keyword_score,
                },
            });
        }

        let (answer, mut error) = if mode == "answer" && !results.is_empty() {
            self.generate_answer(query_text, &results).await
        } else {
            (None, None)
        };
        if mode == "answer" && results.is_empty() && error.is_none() {
            error = Some("No relevant context found".to_string());
        }

        let results_found = results.len() as i64;
        self.record(project, query_text, mode, results_found, started).await;

        Ok(QueryResponse {
            results,
            results_found,
            answer,
            error,
        })
    }

    async fn generate_answer(
        &self,
        query_text: &str,
        results: &[QueryResult],
    ) -> (Option<String>, Option<String>) {
        let answerer = match &self.answerer {
            Some(a) => a,
            None => return (None, Some("Answer provider is disabled".to_string())),
        };

        let mut context = String::new();
        for result in results {
            if context.len() >= self.retrieval.max_context_chars {
                break;
            }
            let remaining = self.retrieval.max_context_chars - context.len();
            let mut cut = result.text.len().min(remaining);
            while cut > 0 && !result.text.is_char_boundary(cut) {
                cut -= 1;
            }
            context.push_str(&result.text[..cut]);
            context.push_str("\n\n");
        }

        match answerer.generate(ANSWER_INSTRUCTION, &context, query_text).await {
            Ok(answer) => (Some(answer), None),
            Err(e) => {
                tracing::warn!(error = %e, "answer generation failed, degrading");
                (None, Some(format!("Answer generation failed: {}", e)))
            }
        }
    }

    async fn degraded(
        &self,
        project: &Project,
        query_text: &str,
        mode: &str,
        started: Instant,
        reason: &str,
    ) -> QueryResponse {
        self.record(project, query_text, mode, 0, started).await;
        QueryResponse {
            results: Vec::new(),
            results_found: 0,
            answer: None,
            error: Some(reason.to_string()),
        }
    }

    async fn record(
        &self,
        project: &Project,
        query_text: &str,
        mode: &str,
        results_found: i64,
        started: Instant,
    ) {
        let record = SearchRecord {
            project_id: project.id.clone(),
            query: query_text.to_string(),
            mode: mode.to_string(),
            results_found,
            latency_ms: started.elapsed().as_millis() as i64,
        };
        if let Err(e) = self.store.record_search(&record).await {
            tracing::warn!(error = %e, "search analytics write failed");
        }
    }
}
