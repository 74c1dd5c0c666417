//! External collaborator seams: structure extraction, embedding
//! generation, and answer generation.
//!
//! These services are correct black boxes from the engine's point of view.
//! Implementations live in the application crate (HTTP providers, local
//! PDF/DOCX extraction); tests supply deterministic fakes.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::DocumentStructure;

/// Turns raw document bytes into markdown, table HTML fragments, and a
/// section hierarchy with page attributions. Must tolerate empty tables
/// and sections.
#[async_trait]
pub trait StructureExtractor: Send + Sync {
    async fn extract(&self, bytes: &[u8], content_type: &str) -> Result<DocumentStructure>;
}

/// Produces fixed-length embedding vectors. The dimension is a deployment
/// constant; all chunks and queries in a project must use the same one.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Vector dimensionality for this deployment.
    fn dims(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Generates an answer from retrieved context.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(
        &self,
        system_instruction: &str,
        context: &str,
        question: &str,
    ) -> Result<String>;
}
