//! Structure-extraction providers.
//!
//! Two implementations of [`StructureExtractor`]:
//!
//! - [`LocalExtractor`] — built-in extraction for Markdown/plain text,
//!   PDF (via `pdf-extract`), and DOCX (via `zip` + `quick-xml`).
//!   Markdown and DOCX yield a heading hierarchy; PDF yields text only,
//!   so its citations fall back to page 1 with an empty section path.
//! - [`HttpExtractor`] — posts the raw bytes to a remote extraction
//!   service that returns the full [`DocumentStructure`] JSON, including
//!   per-heading page attributions and table HTML. Transient failures
//!   (5xx, 429, network) are retried with exponential backoff.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::io::Read;
use std::time::Duration;

use docvault_core::models::{DocumentStructure, Section};
use docvault_core::services::StructureExtractor;

use crate::config::ExtractionConfig;

pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_PLAIN: &str = "text/plain";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Decompressed-size cap for a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Create the configured extractor.
pub fn create_extractor(config: &ExtractionConfig) -> Result<Box<dyn StructureExtractor>> {
    match config.provider.as_str() {
        "local" => Ok(Box::new(LocalExtractor)),
        "http" => Ok(Box::new(HttpExtractor::new(config)?)),
        other => bail!("Unknown extraction provider: {}", other),
    }
}

// ============ Local extraction ============

pub struct LocalExtractor;

#[async_trait]
impl StructureExtractor for LocalExtractor {
    async fn extract(&self, bytes: &[u8], content_type: &str) -> Result<DocumentStructure> {
        match content_type {
            MIME_MARKDOWN | MIME_PLAIN => {
                let text = String::from_utf8_lossy(bytes).into_owned();
                Ok(markdown_structure(text))
            }
            MIME_PDF => {
                let text = pdf_extract::extract_text_from_mem(bytes)
                    .map_err(|e| anyhow::anyhow!("PDF extraction failed: {}", e))?;
                Ok(DocumentStructure {
                    markdown: text,
                    tables_html: Vec::new(),
                    sections: Vec::new(),
                })
            }
            MIME_DOCX => extract_docx(bytes),
            other => bail!("Unsupported content type: {}", other),
        }
    }
}

/// Parse ATX headings and pipe tables out of markdown text.
fn markdown_structure(markdown: String) -> DocumentStructure {
    let mut sections = Vec::new();
    for line in markdown.lines() {
        let trimmed = line.trim_start();
        let level = trimmed.bytes().take_while(|&b| b == b'#').count();
        if level == 0 || level > 6 {
            continue;
        }
        let text = trimmed[level..].trim();
        if text.is_empty() {
            continue;
        }
        sections.push(Section {
            level: level as u8,
            text: text.to_string(),
            page: 1,
        });
    }

    let tables_html = pipe_tables_as_html(&markdown);

    DocumentStructure {
        markdown,
        tables_html,
        sections,
    }
}

/// Render each pipe-table block (two or more consecutive `|`-prefixed
/// lines) as an HTML fragment, in document order. Separator rows like
/// `| --- | --- |` are skipped.
fn pipe_tables_as_html(markdown: &str) -> Vec<String> {
    let mut tables = Vec::new();
    let mut block: Vec<&str> = Vec::new();

    let mut flush = |block: &mut Vec<&str>, tables: &mut Vec<String>| {
        if block.len() >= 2 {
            tables.push(table_block_to_html(block));
        }
        block.clear();
    };

    for line in markdown.lines() {
        if line.trim_start().starts_with('|') {
            block.push(line);
        } else {
            flush(&mut block, &mut tables);
        }
    }
    flush(&mut block, &mut tables);

    tables
}

fn table_block_to_html(lines: &[&str]) -> String {
    let mut html = String::from("<table>");
    for line in lines {
        let cells: Vec<&str> = line
            .trim()
            .trim_matches('|')
            .split('|')
            .map(str::trim)
            .collect();
        let is_separator = cells
            .iter()
            .all(|c| !c.is_empty() && c.chars().all(|ch| ch == '-' || ch == ':'));
        if is_separator {
            continue;
        }
        html.push_str("<tr>");
        for cell in cells {
            html.push_str("<td>");
            html.push_str(cell);
            html.push_str("</td>");
        }
        html.push_str("</tr>");
    }
    html.push_str("</table>");
    html
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>> {
    let entry = archive
        .by_name(name)
        .with_context(|| format!("ZIP entry {} not found", name))?;
    let mut out = Vec::new();
    entry.take(MAX_XML_ENTRY_BYTES).read_to_end(&mut out)?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        bail!("ZIP entry {} exceeds size limit", name);
    }
    Ok(out)
}

/// DOCX extraction: walk `word/document.xml` paragraph by paragraph.
/// Paragraphs styled `Heading1`..`Heading6` become markdown headings and
/// section entries; everything else becomes body text.
fn extract_docx(bytes: &[u8]) -> Result<DocumentStructure> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .context("Invalid DOCX archive")?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml")?;

    let mut markdown = String::new();
    let mut sections = Vec::new();

    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut para_text = String::new();
    let mut para_level: Option<u8> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"p" {
                    para_text.clear();
                    para_level = None;
                } else if name.as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        para_text.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::Empty(e)) => {
                if e.local_name().as_ref() == b"pStyle" {
                    para_level = e.attributes().flatten().find_map(|a| {
                        if a.key.local_name().as_ref() != b"val" {
                            return None;
                        }
                        let val = String::from_utf8_lossy(&a.value).into_owned();
                        val.strip_prefix("Heading")
                            .and_then(|n| n.parse::<u8>().ok())
                            .filter(|n| (1..=6).contains(n))
                    });
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"p" {
                    let text = para_text.trim();
                    if !text.is_empty() {
                        if let Some(level) = para_level {
                            sections.push(Section {
                                level,
                                text: text.to_string(),
                                page: 1,
                            });
                            markdown.push_str(&"#".repeat(level as usize));
                            markdown.push(' ');
                        }
                        markdown.push_str(text);
                        markdown.push_str("\n\n");
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => bail!("DOCX parse error: {}", e),
            _ => {}
        }
        buf.clear();
    }

    Ok(DocumentStructure {
        markdown,
        tables_html: Vec::new(),
        sections,
    })
}

// ============ Remote extraction ============

/// Extraction via a remote service that understands layout (page
/// boundaries, table HTML, heading pages). The service takes the raw
/// bytes and responds with [`DocumentStructure`] JSON.
pub struct HttpExtractor {
    client: reqwest::Client,
    endpoint: String,
    max_retries: u32,
}

impl HttpExtractor {
    pub fn new(config: &ExtractionConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| anyhow::anyhow!("extraction.endpoint required for http provider"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl StructureExtractor for HttpExtractor {
    async fn extract(&self, bytes: &[u8], content_type: &str) -> Result<DocumentStructure> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.endpoint)
                .header("Content-Type", content_type)
                .body(bytes.to_vec())
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let structure: DocumentStructure = response
                            .json()
                            .await
                            .context("Invalid extraction service response")?;
                        return Ok(structure);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "Extraction service error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Extraction service error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Extraction failed after retries")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn markdown_headings_become_sections() {
        let md = "# Terms\nbody\n## Fees\nthe fee is $500\n";
        let s = LocalExtractor
            .extract(md.as_bytes(), MIME_MARKDOWN)
            .await
            .unwrap();
        assert_eq!(s.sections.len(), 2);
        assert_eq!(s.sections[0].level, 1);
        assert_eq!(s.sections[0].text, "Terms");
        assert_eq!(s.sections[1].level, 2);
        assert_eq!(s.sections[1].text, "Fees");
        assert_eq!(s.markdown, md);
    }

    #[tokio::test]
    async fn pipe_tables_render_as_html_fragments() {
        let md = "| a | b |\n| - | - |\n| 1 | 2 |\n";
        let s = LocalExtractor
            .extract(md.as_bytes(), MIME_MARKDOWN)
            .await
            .unwrap();
        assert_eq!(s.tables_html.len(), 1);
        assert_eq!(
            s.tables_html[0],
            "<table><tr><td>a</td><td>b</td></tr><tr><td>1</td><td>2</td></tr></table>"
        );
    }

    #[tokio::test]
    async fn single_pipe_line_is_not_a_table() {
        let s = LocalExtractor
            .extract(b"| lonely |\ntext\n", MIME_MARKDOWN)
            .await
            .unwrap();
        assert!(s.tables_html.is_empty());
    }

    #[tokio::test]
    async fn unsupported_content_type_is_an_error() {
        let err = LocalExtractor
            .extract(b"foo", "application/octet-stream")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unsupported content type"));
    }

    #[tokio::test]
    async fn invalid_docx_is_an_error() {
        assert!(LocalExtractor.extract(b"not a zip", MIME_DOCX).await.is_err());
    }
}
