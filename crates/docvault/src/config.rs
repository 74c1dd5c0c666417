//! TOML configuration with serde defaults and startup validation.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub blobs: BlobsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub answer: AnswerConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BlobsConfig {
    /// Root directory for raw documents and chunk metadata blobs.
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_window_chars")]
    pub window_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
    #[serde(default = "default_max_keywords")]
    pub max_keywords: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            window_chars: default_window_chars(),
            overlap_chars: default_overlap_chars(),
            max_keywords: default_max_keywords(),
        }
    }
}

fn default_window_chars() -> usize {
    1600
}
fn default_overlap_chars() -> usize {
    200
}
fn default_max_keywords() -> usize {
    12
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub default_top_k: i64,
    #[serde(default = "default_max_top_k")]
    pub max_top_k: i64,
    /// Character budget for answer-mode context (tail-truncated).
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
            max_top_k: default_max_top_k(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

fn default_top_k() -> i64 {
    8
}
fn default_max_top_k() -> i64 {
    50
}
fn default_max_context_chars() -> usize {
    12_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"openai"` or `"disabled"`.
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// `"local"` (built-in PDF/DOCX/Markdown) or `"http"` (remote service).
    #[serde(default = "default_local")]
    pub provider: String,
    /// Endpoint for the `"http"` provider.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_extraction_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_extraction_retries")]
    pub max_retries: u32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            provider: default_local(),
            endpoint: None,
            timeout_secs: default_extraction_timeout_secs(),
            max_retries: default_extraction_retries(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnswerConfig {
    /// `"openai"` or `"disabled"`.
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_answer_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_answer_retries")]
    pub max_retries: u32,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            timeout_secs: default_answer_timeout_secs(),
            max_retries: default_answer_retries(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DedupConfig {
    #[serde(default = "default_dedup_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_dedup_ttl_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Dead-letter threshold: a job is dropped once `attempt` reaches this.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_attempts: default_max_attempts(),
            backoff_cap_secs: default_backoff_cap_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_local() -> String {
    "local".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    5
}
fn default_extraction_timeout_secs() -> u64 {
    60
}
fn default_extraction_retries() -> u32 {
    3
}
fn default_answer_timeout_secs() -> u64 {
    60
}
fn default_answer_retries() -> u32 {
    2
}
fn default_dedup_ttl_secs() -> u64 {
    86_400
}
fn default_workers() -> usize {
    2
}
fn default_max_attempts() -> u32 {
    5
}
fn default_backoff_cap_secs() -> u64 {
    60
}
fn default_max_upload_bytes() -> usize {
    25 * 1024 * 1024
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.window_chars == 0 {
        anyhow::bail!("chunking.window_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.window_chars {
        anyhow::bail!("chunking.overlap_chars must be smaller than chunking.window_chars");
    }
    if config.retrieval.default_top_k < 1 || config.retrieval.max_top_k < 1 {
        anyhow::bail!("retrieval top_k values must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.extraction.provider.as_str() {
        "local" => {}
        "http" => {
            if config.extraction.endpoint.is_none() {
                anyhow::bail!("extraction.endpoint is required when extraction.provider = 'http'");
            }
        }
        other => anyhow::bail!(
            "Unknown extraction provider: '{}'. Must be local or http.",
            other
        ),
    }

    match config.answer.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown answer provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.answer.provider == "openai" && config.answer.model.is_none() {
        anyhow::bail!("answer.model must be specified when answer.provider is 'openai'");
    }

    if config.queue.max_attempts == 0 {
        anyhow::bail!("queue.max_attempts must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    const MINIMAL: &str = r#"
[db]
path = "/tmp/docvault.sqlite"

[blobs]
root = "/tmp/docvault-blobs"

[server]
bind = "127.0.0.1:8743"
"#;

    #[test]
    fn minimal_config_loads_with_defaults() {
        let f = write_config(MINIMAL);
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.chunking.window_chars, 1600);
        assert_eq!(cfg.chunking.overlap_chars, 200);
        assert_eq!(cfg.retrieval.default_top_k, 8);
        assert_eq!(cfg.embedding.provider, "disabled");
        assert_eq!(cfg.extraction.provider, "local");
        assert_eq!(cfg.queue.max_attempts, 5);
        assert_eq!(cfg.dedup.ttl_secs, 86_400);
    }

    #[test]
    fn overlap_must_be_smaller_than_window() {
        let f = write_config(&format!(
            "{}\n[chunking]\nwindow_chars = 100\noverlap_chars = 100\n",
            MINIMAL
        ));
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn openai_embedding_requires_model_and_dims() {
        let f = write_config(&format!(
            "{}\n[embedding]\nprovider = \"openai\"\n",
            MINIMAL
        ));
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn http_extraction_requires_endpoint() {
        let f = write_config(&format!(
            "{}\n[extraction]\nprovider = \"http\"\n",
            MINIMAL
        ));
        assert!(load_config(f.path()).is_err());
    }
}
