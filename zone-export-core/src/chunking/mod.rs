//! Retrieval chunk generation
//!
//! Zone content is split into bounded chunks that overlap by a fixed number
//! of characters. When semantic boundaries are respected the cut is pulled
//! back to the nearest paragraph, sentence, line or word end; tables and code
//! are only cut between rows or balanced blocks. Content with no acceptable
//! cut falls back to a hard split at the size limit.
//!
//! Each chunk shares exactly `overlap` characters with its successor, so the
//! source is recovered by concatenating the first chunk with every following
//! chunk minus its leading overlap (see [`reconstruct`]).
//!
//! # Example
//!
//! ```rust
//! use zone_export::chunking::{reconstruct_text, ChunkGenerator, ChunkOptions, ContentKind};
//!
//! let generator = ChunkGenerator::new(ChunkOptions::default().with_chunk_size(40));
//! let text = "One sentence here. Another sentence there. A third one to finish.";
//! let spans = generator.split(text, ContentKind::Text).unwrap();
//!
//! assert!(spans.len() > 1);
//! assert_eq!(reconstruct_text(&spans), text);
//! ```

mod batch;
mod boundary;

pub use batch::{BatchChunkReport, ChunkSink, ZoneFailure};

use crate::config::ExportConfig;
use crate::error::{ExportError, Result};
use crate::zone::{Zone, ZoneStatus, ZoneType};
use boundary::BoundaryFinder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Structural hint selecting the splitting strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Text,
    Table,
    Code,
}

impl ContentKind {
    /// Table zones split by row; a `contentType: "code"` metadata hint selects code
    pub fn for_zone(zone: &Zone) -> Self {
        match zone.metadata.get("contentType").and_then(|v| v.as_str()) {
            Some("code") => ContentKind::Code,
            Some("table") => ContentKind::Table,
            _ if zone.zone_type == ZoneType::Table => ContentKind::Table,
            _ => ContentKind::Text,
        }
    }
}

/// Characters shared with the neighbouring chunks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkOverlap {
    pub previous_len: usize,
    pub next_len: usize,
}

/// Provenance attached to every chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    pub document_id: String,
    pub page: u32,
    pub zone_id: String,
    pub content_type: ZoneType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// One retrieval chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportChunk {
    pub id: String,
    pub content: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub overlap: ChunkOverlap,
    pub metadata: ChunkMetadata,
}

/// A split segment before metadata is attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    pub content: String,
    /// Character offset of the first character in the source
    pub start: usize,
    /// Character offset one past the last character
    pub end: usize,
    pub overlap: ChunkOverlap,
}

#[derive(Debug, Clone)]
pub struct ChunkOptions {
    /// Maximum characters per chunk
    pub chunk_size: usize,
    pub overlap_percentage: f64,
    pub respect_semantic_boundaries: bool,
    /// Collapse runs of spaces and blank lines before splitting
    pub normalize_whitespace: bool,
    /// When false, prose is flattened to single-spaced running text
    pub preserve_formatting: bool,
    pub include_confidence: bool,
    pub include_timestamps: bool,
    pub include_processing_info: bool,
    /// Upper bound on zone content held in memory per batch window
    pub memory_limit_bytes: usize,
    pub continue_on_error: bool,
    pub max_zone_failures: Option<usize>,
    pub worker_count: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self::from_config(&ExportConfig::default())
    }
}

impl ChunkOptions {
    pub fn from_config(config: &ExportConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            overlap_percentage: config.overlap_percentage,
            respect_semantic_boundaries: config.respect_semantic_boundaries,
            normalize_whitespace: config.normalize_whitespace,
            preserve_formatting: config.preserve_formatting,
            include_confidence: config.include_confidence,
            include_timestamps: config.include_timestamps,
            include_processing_info: config.include_processing_info,
            memory_limit_bytes: config.memory_limit_bytes,
            continue_on_error: config.continue_on_error,
            max_zone_failures: config.max_zone_failures,
            worker_count: config.worker_count,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_overlap_percentage(mut self, percentage: f64) -> Self {
        self.overlap_percentage = percentage;
        self
    }

    pub fn with_semantic_boundaries(mut self, respect: bool) -> Self {
        self.respect_semantic_boundaries = respect;
        self
    }

    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit_bytes = bytes;
        self
    }

    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    pub fn with_max_zone_failures(mut self, limit: usize) -> Self {
        self.max_zone_failures = Some(limit);
        self
    }

    pub fn with_normalized_whitespace(mut self, normalize: bool) -> Self {
        self.normalize_whitespace = normalize;
        self
    }

    pub fn with_preserved_formatting(mut self, preserve: bool) -> Self {
        self.preserve_formatting = preserve;
        self
    }

    /// Overlap in characters, rounded to the nearest character
    pub fn overlap_chars(&self) -> usize {
        ((self.chunk_size as f64) * self.overlap_percentage / 100.0).round() as usize
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(ExportError::InvalidConfiguration(
                "chunk_size cannot be 0".to_string(),
            ));
        }
        if self.overlap_chars() >= self.chunk_size || self.overlap_percentage < 0.0 {
            return Err(ExportError::InvalidConfiguration(format!(
                "overlap of {}% must be smaller than the chunk",
                self.overlap_percentage
            )));
        }
        if self.memory_limit_bytes == 0 {
            return Err(ExportError::InvalidConfiguration(
                "memory_limit_bytes cannot be 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Splits zone content into overlapping retrieval chunks
#[derive(Clone)]
pub struct ChunkGenerator {
    options: ChunkOptions,
    progress_callback: Option<std::sync::Arc<dyn crate::batch::ProgressCallback>>,
}

impl ChunkGenerator {
    pub fn new(options: ChunkOptions) -> Self {
        Self {
            options,
            progress_callback: None,
        }
    }

    /// Report batch progress after each window
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&crate::batch::ProgressInfo) + Send + Sync + 'static,
    {
        self.progress_callback = Some(std::sync::Arc::new(callback));
        self
    }

    pub fn options(&self) -> &ChunkOptions {
        &self.options
    }

    /// Split raw content into spans
    pub fn split(&self, content: &str, kind: ContentKind) -> Result<Vec<ChunkSpan>> {
        self.options.validate()?;
        if content.trim().is_empty() {
            return Err(ExportError::ContentEmpty);
        }

        let chars: Vec<char> = content.chars().collect();
        let chunk_size = self.options.chunk_size;
        let overlap = self.options.overlap_chars();
        let finder = BoundaryFinder::new(&chars, kind);

        let mut spans: Vec<ChunkSpan> = Vec::new();
        let mut start = 0;
        loop {
            let end = finder.find_cut(
                start,
                chunk_size,
                overlap,
                self.options.respect_semantic_boundaries,
            );
            let previous_len = if spans.is_empty() { 0 } else { overlap };
            if let Some(last) = spans.last_mut() {
                last.overlap.next_len = overlap;
            }
            spans.push(ChunkSpan {
                content: chars[start..end].iter().collect(),
                start,
                end,
                overlap: ChunkOverlap {
                    previous_len,
                    next_len: 0,
                },
            });

            if end >= chars.len() {
                break;
            }
            start = end - overlap;
        }

        Ok(spans)
    }

    /// Chunks for one zone, with provenance metadata
    pub fn generate(&self, document_id: &str, zone: &Zone) -> Result<Vec<ExportChunk>> {
        if zone.status == ZoneStatus::Failed {
            return Err(ExportError::ToolFailure {
                zone_id: zone.id.clone(),
                tool: zone.tool().to_string(),
                message: zone
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "processing failed upstream".to_string()),
            });
        }

        // Tables and code keep their layout regardless of formatting options
        let kind = ContentKind::for_zone(zone);
        let content = if !self.options.preserve_formatting && kind == ContentKind::Text {
            flatten_formatting(&zone.content)
        } else if self.options.normalize_whitespace {
            normalize_whitespace(&zone.content)
        } else {
            zone.content.clone()
        };

        let spans = self.split(&content, kind)?;
        let total_chunks = spans.len();
        let generated_at = Utc::now();

        tracing::trace!(zone_id = %zone.id, total_chunks, "zone chunked");

        Ok(spans
            .into_iter()
            .enumerate()
            .map(|(chunk_index, span)| ExportChunk {
                id: format!("{}_{chunk_index:04}", zone.id),
                content: span.content,
                chunk_index,
                total_chunks,
                overlap: span.overlap,
                metadata: ChunkMetadata {
                    document_id: document_id.to_string(),
                    page: zone.page,
                    zone_id: zone.id.clone(),
                    content_type: zone.zone_type,
                    confidence: self.options.include_confidence.then_some(zone.confidence),
                    tool: self
                        .options
                        .include_processing_info
                        .then(|| zone.tool().to_string()),
                    timestamp: self.options.include_timestamps.then_some(generated_at),
                },
            })
            .collect())
    }
}

/// Rebuild the source text from one zone's chunks
pub fn reconstruct(chunks: &[ExportChunk]) -> String {
    let mut ordered: Vec<&ExportChunk> = chunks.iter().collect();
    ordered.sort_by_key(|c| c.chunk_index);
    join_without_overlap(ordered.iter().map(|c| (c.content.as_str(), c.overlap.previous_len)))
}

/// Rebuild the source text from spans
pub fn reconstruct_text(spans: &[ChunkSpan]) -> String {
    join_without_overlap(spans.iter().map(|s| (s.content.as_str(), s.overlap.previous_len)))
}

fn join_without_overlap<'a>(parts: impl Iterator<Item = (&'a str, usize)>) -> String {
    let mut out = String::new();
    for (content, skip) in parts {
        out.extend(content.chars().skip(skip));
    }
    out
}

/// Collapse horizontal whitespace runs and limit blank lines to one
pub fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(&collapsed);
        out.push('\n');
    }
    out.trim().to_string()
}

/// Running text with every whitespace run, line breaks included, as one space
pub fn flatten_formatting(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::ZoneCoordinates;
    use pretty_assertions::assert_eq;

    fn generator(size: usize, pct: f64) -> ChunkGenerator {
        ChunkGenerator::new(
            ChunkOptions::default()
                .with_chunk_size(size)
                .with_overlap_percentage(pct),
        )
    }

    fn prose(chars: usize) -> String {
        let sentence = "The quick brown fox jumps over the lazy dog. ";
        sentence.repeat(chars / sentence.len() + 1)[..chars].to_string()
    }

    fn zone(content: &str) -> Zone {
        Zone::new("z1", 3, ZoneCoordinates::new(0.0, 0.0, 100.0, 50.0), ZoneType::Text)
            .with_content(content)
            .with_confidence(0.92)
            .with_status(ZoneStatus::Completed)
            .with_processing("tesseract", Some(40))
    }

    #[test]
    fn test_empty_content_rejected() {
        let g = generator(100, 10.0);
        assert!(matches!(g.split("", ContentKind::Text), Err(ExportError::ContentEmpty)));
        assert!(matches!(g.split(" \n\t", ContentKind::Text), Err(ExportError::ContentEmpty)));
    }

    #[test]
    fn test_short_content_single_chunk() {
        let content = prose(500);
        let chunks = generator(800, 10.0).generate("doc", &zone(&content)).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, content);
        assert_eq!(chunks[0].overlap, ChunkOverlap::default());
        assert_eq!(chunks[0].total_chunks, 1);
    }

    #[test]
    fn test_two_chunks_with_exact_overlap() {
        let content = prose(1000);
        let chunks = generator(800, 10.0).generate("doc", &zone(&content)).unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].overlap.next_len, 80);
        assert_eq!(chunks[1].overlap.previous_len, 80);

        let tail: String = {
            let c: Vec<char> = chunks[0].content.chars().collect();
            c[c.len() - 80..].iter().collect()
        };
        let head: String = chunks[1].content.chars().take(80).collect();
        assert_eq!(tail, head);
        assert_eq!(reconstruct(&chunks), content);

        // Boundary respecting: the first chunk ends after a sentence
        assert!(chunks[0].content.ends_with(". "));
    }

    #[test]
    fn test_chunk_metadata() {
        let chunks = generator(50, 10.0).generate("doc-7", &zone(&prose(120))).unwrap();
        let first = &chunks[0];
        assert_eq!(first.id, "z1_0000");
        assert_eq!(first.metadata.document_id, "doc-7");
        assert_eq!(first.metadata.page, 3);
        assert_eq!(first.metadata.confidence, Some(0.92));
        assert_eq!(first.metadata.tool.as_deref(), Some("tesseract"));
        assert!(first.metadata.timestamp.is_some());
        assert!(chunks.iter().all(|c| c.total_chunks == chunks.len()));
    }

    #[test]
    fn test_metadata_options_respected() {
        let mut options = ChunkOptions::default().with_chunk_size(50);
        options.include_confidence = false;
        options.include_timestamps = false;
        let chunks = ChunkGenerator::new(options).generate("doc", &zone(&prose(60))).unwrap();
        assert!(chunks[0].metadata.confidence.is_none());
        assert!(chunks[0].metadata.timestamp.is_none());

        let json = serde_json::to_value(&chunks[0]).unwrap();
        assert!(json["metadata"].get("confidence").is_none());
        assert_eq!(json["chunkIndex"], 0);
    }

    #[test]
    fn test_failed_zone_is_tool_failure() {
        let z = zone("text").with_status(ZoneStatus::Failed).with_error("OCR crashed");
        match generator(100, 10.0).generate("doc", &z) {
            Err(ExportError::ToolFailure { zone_id, tool, message }) => {
                assert_eq!(zone_id, "z1");
                assert_eq!(tool, "tesseract");
                assert_eq!(message, "OCR crashed");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_hard_split_without_boundaries() {
        let g = ChunkGenerator::new(
            ChunkOptions::default()
                .with_chunk_size(10)
                .with_overlap_percentage(20.0)
                .with_semantic_boundaries(false),
        );
        let spans = g.split("abcdefghijklmnopqrstuvwxyz", ContentKind::Text).unwrap();
        let contents: Vec<_> = spans.iter().map(|s| s.content.as_str()).collect();
        assert_eq!(contents, vec!["abcdefghij", "ijklmnopqr", "qrstuvwxyz"]);
    }

    #[test]
    fn test_multibyte_content() {
        let text = "Größe und Übermaß. ".repeat(20);
        let spans = generator(64, 10.0).split(&text, ContentKind::Text).unwrap();
        assert!(spans.iter().all(|s| s.content.chars().count() <= 64));
        assert_eq!(reconstruct_text(&spans), text);
    }

    #[test]
    fn test_invalid_options() {
        let g = generator(0, 10.0);
        assert!(matches!(g.split("abc", ContentKind::Text), Err(ExportError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_content_kind_for_zone() {
        let table = Zone::new("t", 1, ZoneCoordinates::new(0.0, 0.0, 1.0, 1.0), ZoneType::Table);
        assert_eq!(ContentKind::for_zone(&table), ContentKind::Table);
        let code = zone("x").with_metadata("contentType", serde_json::json!("code"));
        assert_eq!(ContentKind::for_zone(&code), ContentKind::Code);
        assert_eq!(ContentKind::for_zone(&zone("x")), ContentKind::Text);
    }

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(
            normalize_whitespace("  a   b\t c \n\n\n\nd  "),
            "a b c\n\nd"
        );
        let g = ChunkGenerator::new(ChunkOptions::default().with_normalized_whitespace(true));
        let chunks = g.generate("doc", &zone("x    y")).unwrap();
        assert_eq!(chunks[0].content, "x y");
    }

    #[test]
    fn test_formatting_flattened_for_prose_only() {
        let g = ChunkGenerator::new(ChunkOptions::default().with_preserved_formatting(false));
        let prose = zone("Line one\n    indented line\n\nNext paragraph");
        let chunks = g.generate("doc", &prose).unwrap();
        assert_eq!(chunks[0].content, "Line one indented line Next paragraph");

        let table = Zone::new("t1", 1, ZoneCoordinates::new(0.0, 0.0, 10.0, 10.0), ZoneType::Table)
            .with_content("a | b\n1 | 2")
            .with_status(ZoneStatus::Completed);
        assert_eq!(g.generate("doc", &table).unwrap()[0].content, "a | b\n1 | 2");

        let kept = generator(1000, 10.0).generate("doc", &prose).unwrap();
        assert_eq!(kept[0].content, prose.content);
    }

    #[test]
    fn test_overlap_rounds_to_nearest_character() {
        assert_eq!(ChunkOptions::default().with_chunk_size(15).overlap_chars(), 2);
        assert_eq!(ChunkOptions::default().with_chunk_size(14).overlap_chars(), 1);
    }
}
