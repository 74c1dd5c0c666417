//! Overlapping-window chunker with context and provenance enrichment.
//!
//! Splits extracted markdown into fixed-size windows with fixed overlap
//! (both configuration constants, never derived from the input). Each
//! window receives:
//!
//! - an ordinal index (its position in the window sequence),
//! - a keyword set via [`crate::keywords::extract`],
//! - neighbor context (the preceding and following window's text, empty at
//!   the two boundary positions),
//! - a best-effort citation: the page and hierarchy path of the nearest
//!   preceding extracted heading (page 1 and an empty path before the
//!   first heading),
//! - best-effort table HTML: pipe-table regions found in the markdown are
//!   paired positionally with the extractor's `tables_html` fragments, and
//!   a window overlapping region *i* carries fragment *i*.
//!
//! Page and section attribution is approximate by design; windows do not
//! align with page boundaries and the mapping must not be presented as
//! exact.

use crate::keywords;
use crate::models::{DocumentStructure, Section};

/// Chunking configuration constants.
#[derive(Debug, Clone)]
pub struct ChunkingParams {
    /// Target window size in bytes (snapped to char boundaries).
    pub window_chars: usize,
    /// Overlap between consecutive windows in bytes.
    pub overlap_chars: usize,
    /// Keyword-set cap per window.
    pub max_keywords: usize,
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            window_chars: 1600,
            overlap_chars: 200,
            max_keywords: 12,
        }
    }
}

/// One enriched window, ready to be persisted as a chunk.
#[derive(Debug, Clone)]
pub struct Window {
    pub index: i64,
    pub text: String,
    pub context_before: String,
    pub context_after: String,
    pub page_number: i64,
    pub section_path: Vec<String>,
    pub table_html: Option<String>,
    pub keywords: Vec<String>,
}

/// A heading located in the markdown, with the section path in effect
/// from that offset onward.
struct SectionAnchor {
    offset: usize,
    page: i64,
    path: Vec<String>,
}

/// Split a document structure into enriched, ordered windows.
///
/// Guarantees: ordinals are contiguous from 0; windows cover the whole
/// markdown body; empty (or whitespace-only) markdown yields no windows.
pub fn build_windows(structure: &DocumentStructure, params: &ChunkingParams) -> Vec<Window> {
    let md = structure.markdown.as_str();
    if md.trim().is_empty() {
        return Vec::new();
    }

    let spans = window_spans(md, params.window_chars, params.overlap_chars);
    let anchors = locate_sections(md, &structure.sections);
    let tables = locate_tables(md, &structure.tables_html);

    let texts: Vec<String> = spans
        .iter()
        .map(|&(start, end)| md[start..end].to_string())
        .collect();

    let mut windows = Vec::with_capacity(spans.len());
    for (i, &(start, end)) in spans.iter().enumerate() {
        let (page_number, section_path) = attribution_at(&anchors, end);
        let table_html = tables
            .iter()
            .find(|(t_start, t_end, _)| *t_start < end && start < *t_end)
            .map(|(_, _, html)| html.clone());

        windows.push(Window {
            index: i as i64,
            text: texts[i].clone(),
            context_before: if i > 0 { texts[i - 1].clone() } else { String::new() },
            context_after: texts.get(i + 1).cloned().unwrap_or_default(),
            page_number,
            section_path,
            table_html,
            keywords: keywords::extract(&texts[i], params.max_keywords),
        });
    }

    windows
}

/// Byte spans of the overlapping windows, snapped to char boundaries.
fn window_spans(text: &str, window: usize, overlap: usize) -> Vec<(usize, usize)> {
    let len = text.len();
    let window = window.max(1);
    let step = window.saturating_sub(overlap).max(1);

    let mut spans = Vec::new();
    let mut start = 0usize;
    loop {
        let end = snap_to_char_boundary(text, (start + window).min(len));
        spans.push((start, end));
        if end >= len {
            break;
        }
        let mut next = snap_to_char_boundary(text, start + step);
        if next <= start {
            // Pathological boundary: force progress by one char.
            next = text[start..]
                .char_indices()
                .nth(1)
                .map(|(i, _)| start + i)
                .unwrap_or(len);
        }
        start = next;
    }
    spans
}

/// Largest char boundary at or below `pos`.
fn snap_to_char_boundary(text: &str, pos: usize) -> usize {
    let mut p = pos.min(text.len());
    while p > 0 && !text.is_char_boundary(p) {
        p -= 1;
    }
    p
}

/// Find each section heading in the markdown and record the hierarchy
/// path in effect from its offset. Headings that cannot be located are
/// skipped; the search cursor only moves forward so repeated heading text
/// resolves to successive occurrences.
fn locate_sections(md: &str, sections: &[Section]) -> Vec<SectionAnchor> {
    let mut anchors = Vec::new();
    let mut stack: Vec<(u8, String)> = Vec::new();
    let mut cursor = 0usize;

    for section in sections {
        if section.text.trim().is_empty() {
            continue;
        }
        let offset = match md[cursor..].find(section.text.as_str()) {
            Some(rel) => cursor + rel,
            None => continue,
        };

        while stack.last().is_some_and(|(level, _)| *level >= section.level) {
            stack.pop();
        }
        stack.push((section.level, section.text.clone()));

        anchors.push(SectionAnchor {
            offset,
            page: section.page.max(1),
            path: stack.iter().map(|(_, t)| t.clone()).collect(),
        });
        cursor = offset + section.text.len();
    }

    anchors
}

/// Page and section path of the nearest anchor before `end`.
fn attribution_at(anchors: &[SectionAnchor], end: usize) -> (i64, Vec<String>) {
    anchors
        .iter()
        .rev()
        .find(|a| a.offset < end)
        .map(|a| (a.page, a.path.clone()))
        .unwrap_or((1, Vec::new()))
}

/// Byte ranges of pipe-table blocks, paired positionally with the
/// extractor's HTML fragments. A block needs at least two consecutive
/// `|`-prefixed lines to count.
fn locate_tables(md: &str, tables_html: &[String]) -> Vec<(usize, usize, String)> {
    let mut regions: Vec<(usize, usize)> = Vec::new();
    let mut block_start: Option<usize> = None;
    let mut block_lines = 0usize;
    let mut offset = 0usize;

    for line in md.split_inclusive('\n') {
        if line.trim_start().starts_with('|') {
            if block_start.is_none() {
                block_start = Some(offset);
            }
            block_lines += 1;
        } else if let Some(start) = block_start.take() {
            if block_lines >= 2 {
                regions.push((start, offset));
            }
            block_lines = 0;
        }
        offset += line.len();
    }
    if let Some(start) = block_start {
        if block_lines >= 2 {
            regions.push((start, md.len()));
        }
    }

    regions
        .into_iter()
        .zip(tables_html.iter())
        .map(|((start, end), html)| (start, end, html.clone()))
        .collect()
}
