//! In-memory implementations of the storage traits for tests.
//!
//! `HashMap`/`Vec` behind `std::sync::RwLock`. Vector search is
//! brute-force cosine similarity; keyword search counts matching terms in
//! the keyword set or text, which is the same relevance-proxy role the
//! SQLite store fills with FTS rank.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, Document, DocumentStatus, Project, SearchRecord};
use crate::vectors::cosine_similarity;

use super::{BlobStore, DedupCache, KeywordHit, Store, VectorEntry, VectorHit, VectorIndex};

/// In-memory [`Store`].
#[derive(Default)]
pub struct MemoryStore {
    projects: RwLock<Vec<Project>>,
    documents: RwLock<HashMap<String, Document>>,
    chunks: RwLock<Vec<Chunk>>,
    searches: RwLock<Vec<SearchRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded analytics rows (test inspection).
    pub fn search_records(&self) -> Vec<SearchRecord> {
        self.searches.read().unwrap().clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_project(&self, project: &Project) -> Result<()> {
        self.projects.write().unwrap().push(project.clone());
        Ok(())
    }

    async fn project_by_api_key(&self, api_key: &str) -> Result<Option<Project>> {
        Ok(self
            .projects
            .read()
            .unwrap()
            .iter()
            .find(|p| p.api_key == api_key)
            .cloned())
    }

    async fn insert_document(&self, doc: &Document) -> Result<()> {
        let mut docs = self.documents.write().unwrap();
        if doc.deduped_from.is_none() {
            let duplicate = docs.values().any(|d| {
                d.project_id == doc.project_id
                    && d.content_hash == doc.content_hash
                    && d.deduped_from.is_none()
                    && d.status != DocumentStatus::Deleted
            });
            if duplicate {
                anyhow::bail!(
                    "duplicate content hash {} in project {}",
                    doc.content_hash,
                    doc.project_id
                );
            }
        }
        docs.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get_document(&self, project_id: &str, id: &str) -> Result<Option<Document>> {
        Ok(self
            .documents
            .read()
            .unwrap()
            .get(id)
            .filter(|d| d.project_id == project_id)
            .cloned())
    }

    async fn find_by_content_hash(
        &self,
        project_id: &str,
        content_hash: &str,
    ) -> Result<Option<Document>> {
        Ok(self
            .documents
            .read()
            .unwrap()
            .values()
            .find(|d| {
                d.project_id == project_id
                    && d.content_hash == content_hash
                    && d.deduped_from.is_none()
                    && d.status != DocumentStatus::Deleted
            })
            .cloned())
    }

    async fn set_document_status(
        &self,
        id: &str,
        status: DocumentStatus,
        error: Option<&str>,
        chunk_count: Option<i64>,
    ) -> Result<bool> {
        let mut docs = self.documents.write().unwrap();
        let doc = match docs.get_mut(id) {
            Some(doc) if doc.status != DocumentStatus::Deleted => doc,
            _ => return Ok(false),
        };
        doc.status = status;
        if let Some(e) = error {
            doc.error = Some(e.to_string());
        }
        if let Some(n) = chunk_count {
            doc.chunk_count = n;
        }
        doc.updated_at = chrono::Utc::now().timestamp();
        Ok(true)
    }

    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        self.chunks.write().unwrap().extend_from_slice(chunks);
        Ok(())
    }

    async fn chunks_for_document(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let mut chunks: Vec<Chunk> = self
            .chunks
            .read()
            .unwrap()
            .iter()
            .filter(|c| c.document_id == document_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    async fn get_chunks(&self, chunk_ids: &[String]) -> Result<Vec<Chunk>> {
        Ok(self
            .chunks
            .read()
            .unwrap()
            .iter()
            .filter(|c| chunk_ids.iter().any(|id| id == &c.id))
            .cloned()
            .collect())
    }

    async fn delete_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let mut chunks = self.chunks.write().unwrap();
        let (deleted, kept): (Vec<Chunk>, Vec<Chunk>) = chunks
            .drain(..)
            .partition(|c| c.document_id == document_id);
        *chunks = kept;
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
        let docs = self.documents.read().unwrap();
        let chunks = self.chunks.read().unwrap();

        let mut hits: Vec<KeywordHit> = chunks
            .iter()
            .filter(|c| c.project_id == project_id)
            .filter(|c| {
                docs.get(&c.document_id)
                    .is_some_and(|d| d.status == DocumentStatus::Ready)
            })
            .filter_map(|c| {
                let text_lower = c.text.to_lowercase();
                let matches = keywords
                    .iter()
                    .filter(|k| c.keywords.contains(k) || text_lower.contains(k.as_str()))
                    .count();
                if matches > 0 {
                    Some(KeywordHit {
                        chunk_id: c.id.clone(),
                        document_id: c.document_id.clone(),
                        ordinal: c.chunk_index,
                        raw_score: matches as f64,
                    })
                } else {
                    None
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.ordinal.cmp(&b.ordinal))
                .then(a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(limit as usize);
        Ok(hits)
    }

    async fn record_search(&self, record: &SearchRecord) -> Result<()> {
        self.searches.write().unwrap().push(record.clone());
        Ok(())
    }
}

/// In-memory [`BlobStore`].
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.blobs
            .write()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.read().unwrap().get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.blobs.write().unwrap().remove(key);
        Ok(())
    }
}

/// In-memory [`VectorIndex`] with brute-force cosine scan.
#[derive(Default)]
pub struct MemoryVectorIndex {
    entries: RwLock<Vec<(String, VectorEntry)>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, project_id: &str, entries: &[VectorEntry]) -> Result<()> {
        let mut stored = self.entries.write().unwrap();
        for entry in entries {
            stored.retain(|(p, e)| !(p == project_id && e.chunk_id == entry.chunk_id));
            stored.push((project_id.to_string(), entry.clone()));
        }
        Ok(())
    }

    async fn search(&self, project_id: &str, query: &[f32], limit: i64) -> Result<Vec<VectorHit>> {
        let stored = self.entries.read().unwrap();
        let mut hits: Vec<VectorHit> = stored
            .iter()
            .filter(|(p, _)| p == project_id)
            .map(|(_, e)| VectorHit {
                chunk_id: e.chunk_id.clone(),
                document_id: e.document_id.clone(),
                ordinal: e.ordinal,
                score: cosine_similarity(query, &e.vector) as f64,
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
        let mut entries: Vec<VectorEntry> = self
            .entries
            .read()
            .unwrap()
            .iter()
            .filter(|(p, e)| p == project_id && e.document_id == document_id)
            .map(|(_, e)| e.clone())
            .collect();
        entries.sort_by_key(|e| e.ordinal);
        Ok(entries)
    }

    async fn delete_document(&self, project_id: &str, document_id: &str) -> Result<()> {
        self.entries
            .write()
            .unwrap()
            .retain(|(p, e)| !(p == project_id && e.document_id == document_id));
        Ok(())
    }
}

/// In-memory [`DedupCache`] with epoch-second expiry.
#[derive(Default)]
pub struct MemoryDedupCache {
    entries: RwLock<HashMap<(String, String), (String, i64)>>,
}

impl MemoryDedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all entries (simulates TTL expiry in tests).
    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }
}

#[async_trait]
impl DedupCache for MemoryDedupCache {
    async fn get(&self, project_id: &str, content_hash: &str) -> Result<Option<String>> {
        let key = (project_id.to_string(), content_hash.to_string());
        let now = chrono::Utc::now().timestamp();
        let mut entries = self.entries.write().unwrap();
        match entries.get(&key) {
            Some((_, expires_at)) if *expires_at <= now => {
                entries.remove(&key);
                Ok(None)
            }
            Some((doc_id, _)) => Ok(Some(doc_id.clone())),
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        project_id: &str,
        content_hash: &str,
        document_id: &str,
        ttl_secs: u64,
    ) -> Result<()> {
        let expires_at = chrono::Utc::now().timestamp() + ttl_secs as i64;
        self.entries.write().unwrap().insert(
            (project_id.to_string(), content_hash.to_string()),
            (document_id.to_string(), expires_at),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chunk_metadata_key;

    fn doc(id: &str, project: &str, hash: &str, status: DocumentStatus) -> Document {
        Document {
            id: id.to_string(),
            project_id: project.to_string(),
            name: format!("{}.md", id),
            content_type: "text/markdown".to_string(),
            content_hash: hash.to_string(),
            blob_key: format!("documents/{}", id),
            status,
            chunk_count: 0,
            deduped_from: None,
            error: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn chunk(id: &str, project: &str, doc_id: &str, index: i64, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            project_id: project.to_string(),
            document_id: doc_id.to_string(),
            chunk_index: index,
            text: text.to_string(),
            keywords: crate::keywords::extract(text, 12),
            metadata_key: chunk_metadata_key(id),
            page_number: 1,
            section_path: Vec::new(),
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn duplicate_canonical_hash_is_rejected() {
        let store = MemoryStore::new();
        store
            .insert_document(&doc("d1", "p1", "aaa", DocumentStatus::Ready))
            .await
            .unwrap();
        assert!(store
            .insert_document(&doc("d2", "p1", "aaa", DocumentStatus::Created))
            .await
            .is_err());
        // Same hash in another project is fine.
        store
            .insert_document(&doc("d3", "p2", "aaa", DocumentStatus::Created))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn keyword_search_skips_non_ready_documents() {
        let store = MemoryStore::new();
        store
            .insert_document(&doc("ready", "p1", "aaa", DocumentStatus::Ready))
            .await
            .unwrap();
        store
            .insert_document(&doc("failed", "p1", "bbb", DocumentStatus::Failed))
            .await
            .unwrap();
        store
            .insert_chunks(&[
                chunk("c1", "p1", "ready", 0, "termination fee details"),
                chunk("c2", "p1", "failed", 0, "termination fee details"),
            ])
            .await
            .unwrap();

        let hits = store
            .keyword_search("p1", &["termination".to_string()], 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, "ready");
    }

    #[tokio::test]
    async fn dedup_cache_honors_ttl() {
        let cache = MemoryDedupCache::new();
        cache.put("p1", "aaa", "doc1", 3600).await.unwrap();
        assert_eq!(
            cache.get("p1", "aaa").await.unwrap(),
            Some("doc1".to_string())
        );
        // Zero TTL expires immediately.
        cache.put("p1", "bbb", "doc2", 0).await.unwrap();
        assert_eq!(cache.get("p1", "bbb").await.unwrap(), None);
        // Never crosses projects.
        assert_eq!(cache.get("p2", "aaa").await.unwrap(), None);
    }

    #[tokio::test]
    async fn vector_index_is_project_namespaced() {
        let index = MemoryVectorIndex::new();
        let entry = |chunk_id: &str, doc: &str, v: Vec<f32>| VectorEntry {
            chunk_id: chunk_id.to_string(),
            document_id: doc.to_string(),
            ordinal: 0,
            document_name: "a.md".to_string(),
            vector: v,
        };
        index
            .upsert("p1", &[entry("c1", "d1", vec![1.0, 0.0])])
            .await
            .unwrap();
        index
            .upsert("p2", &[entry("c2", "d2", vec![1.0, 0.0])])
            .await
            .unwrap();

        let hits = index.search("p1", &[1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "c1");
    }
}
