//! Zone manifest generation
//!
//! A manifest summarizes every zone of a document: totals, distributions by
//! type, page, status and tool, and per-zone provenance at the requested
//! detail level. An optional character grid shows zone placement per page.

use crate::config::ExportConfig;
use crate::zone::{Zone, ZoneCoordinates, ZoneStatus, ZoneType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    /// Aggregates only
    Summary,
    /// Aggregates plus per-zone provenance
    #[default]
    Detailed,
    /// Adds content previews, metadata and related zones
    Verbose,
}

impl fmt::Display for DetailLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetailLevel::Summary => write!(f, "summary"),
            DetailLevel::Detailed => write!(f, "detailed"),
            DetailLevel::Verbose => write!(f, "verbose"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneManifestEntry {
    pub zone_id: String,
    pub zone_index: usize,
    pub page: u32,
    #[serde(rename = "type")]
    pub zone_type: ZoneType,
    pub status: ZoneStatus,
    pub bounds: ZoneCoordinates,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    pub word_count: usize,
    pub char_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_zone_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestSummary {
    pub total_zones: usize,
    pub processed_zones: usize,
    pub failed_zones: usize,
    pub total_pages: usize,
    pub average_confidence: f64,
    pub total_words: usize,
    pub total_characters: usize,
    pub total_processing_ms: u64,
    pub by_type: BTreeMap<ZoneType, usize>,
    pub by_page: BTreeMap<u32, usize>,
    pub by_status: BTreeMap<ZoneStatus, usize>,
    pub tool_usage: BTreeMap<String, usize>,
}

/// Character grid of zone placement on one page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageGrid {
    pub page: u32,
    pub rows: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionalMap {
    pub pages: Vec<PageGrid>,
    pub legend: BTreeMap<char, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub document_id: String,
    pub generated_at: DateTime<Utc>,
    pub detail_level: DetailLevel,
    pub summary: ManifestSummary,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<ZoneManifestEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub positional_map: Option<PositionalMap>,
}

pub struct ManifestGenerator {
    include_confidence: bool,
    include_timestamps: bool,
    include_processing_info: bool,
    positional_map: bool,
    grid_columns: usize,
    grid_rows: usize,
}

impl Default for ManifestGenerator {
    fn default() -> Self {
        Self {
            include_confidence: true,
            include_timestamps: true,
            include_processing_info: true,
            positional_map: false,
            grid_columns: 40,
            grid_rows: 20,
        }
    }
}

impl ManifestGenerator {
    pub fn from_config(config: &ExportConfig) -> Self {
        Self {
            include_confidence: config.include_confidence,
            include_timestamps: config.include_timestamps,
            include_processing_info: config.include_processing_info,
            positional_map: config.positional_map,
            ..Self::default()
        }
    }

    pub fn with_positional_map(mut self, columns: usize, rows: usize) -> Self {
        self.positional_map = true;
        self.grid_columns = columns.max(1);
        self.grid_rows = rows.max(1);
        self
    }

    pub fn generate(&self, document_id: &str, zones: &[Zone], level: DetailLevel) -> Manifest {
        let summary = summarize(zones);

        let entries = if level == DetailLevel::Summary {
            Vec::new()
        } else {
            let mut ordered: Vec<&Zone> = zones.iter().collect();
            ordered.sort_by(|a, b| a.document_order(b));
            ordered.into_iter().map(|z| self.entry(z, level)).collect()
        };

        Manifest {
            document_id: document_id.to_string(),
            generated_at: Utc::now(),
            detail_level: level,
            summary,
            zones: entries,
            positional_map: self
                .positional_map
                .then(|| positional_map(zones, self.grid_columns, self.grid_rows)),
        }
    }

    fn entry(&self, zone: &Zone, level: DetailLevel) -> ZoneManifestEntry {
        let verbose = level == DetailLevel::Verbose;
        let processing = zone.processing.as_ref().filter(|_| self.include_processing_info);

        ZoneManifestEntry {
            zone_id: zone.id.clone(),
            zone_index: zone.zone_index,
            page: zone.page,
            zone_type: zone.zone_type,
            status: zone.status,
            bounds: zone.coordinates.clone(),
            confidence: self.include_confidence.then_some(zone.confidence),
            tool: processing.map(|p| p.tool.clone()),
            processing_duration_ms: processing.and_then(|p| p.duration_ms),
            processed_at: processing
                .and_then(|p| p.timestamp)
                .filter(|_| self.include_timestamps),
            word_count: zone.word_count(),
            char_count: zone.char_count(),
            error_message: zone.error_message.clone(),
            content_preview: verbose.then(|| zone.content_preview()),
            related_zone_ids: if verbose {
                zone.related_zone_ids.clone()
            } else {
                Vec::new()
            },
            metadata: if verbose {
                zone.metadata.clone()
            } else {
                BTreeMap::new()
            },
        }
    }
}

fn summarize(zones: &[Zone]) -> ManifestSummary {
    let mut summary = ManifestSummary {
        total_zones: zones.len(),
        ..Default::default()
    };

    for zone in zones {
        *summary.by_type.entry(zone.zone_type).or_default() += 1;
        *summary.by_page.entry(zone.page).or_default() += 1;
        *summary.by_status.entry(zone.status).or_default() += 1;
        *summary.tool_usage.entry(zone.tool().to_string()).or_default() += 1;

        if zone.is_processed() {
            summary.processed_zones += 1;
        }
        if zone.status == ZoneStatus::Failed {
            summary.failed_zones += 1;
        }
        summary.total_words += zone.word_count();
        summary.total_characters += zone.char_count();
        summary.total_processing_ms += zone
            .processing
            .as_ref()
            .and_then(|p| p.duration_ms)
            .unwrap_or(0);
    }

    summary.total_pages = summary.by_page.len();
    if !zones.is_empty() {
        summary.average_confidence =
            zones.iter().map(|z| z.confidence).sum::<f64>() / zones.len() as f64;
    }
    summary
}

/// Grid letter for a zone type
pub fn legend_symbol(zone_type: ZoneType) -> char {
    match zone_type {
        ZoneType::Text => 'T',
        ZoneType::Table => 'B',
        ZoneType::Diagram => 'D',
        ZoneType::Image => 'I',
        ZoneType::Mixed => 'M',
        ZoneType::Header => 'H',
        ZoneType::Footer => 'F',
    }
}

const EMPTY_CELL: char = '.';
const OVERLAP_CELL: char = '#';

fn positional_map(zones: &[Zone], columns: usize, rows: usize) -> PositionalMap {
    let mut by_page: BTreeMap<u32, Vec<&Zone>> = BTreeMap::new();
    for zone in zones {
        by_page.entry(zone.page).or_default().push(zone);
    }

    let pages = by_page
        .into_iter()
        .map(|(page, page_zones)| {
            let (width, height) = page_extent(&page_zones);
            let mut grid = vec![vec![EMPTY_CELL; columns]; rows];

            for zone in &page_zones {
                let b = zone.coordinates.bounds();
                let (c0, c1) = cell_span(b.lower_left.x, b.upper_right.x, width, columns);
                let (r0, r1) = cell_span(b.lower_left.y, b.upper_right.y, height, rows);
                let symbol = legend_symbol(zone.zone_type);

                for row in grid.iter_mut().take(r1).skip(r0) {
                    for cell in row.iter_mut().take(c1).skip(c0) {
                        *cell = if *cell == EMPTY_CELL {
                            symbol
                        } else {
                            OVERLAP_CELL
                        };
                    }
                }
            }

            PageGrid {
                page,
                rows: grid.into_iter().map(|r| r.into_iter().collect()).collect(),
            }
        })
        .collect();

    let mut legend: BTreeMap<char, String> = ZoneType::ALL
        .iter()
        .map(|t| (legend_symbol(*t), t.to_string()))
        .collect();
    legend.insert(EMPTY_CELL, "empty".to_string());
    legend.insert(OVERLAP_CELL, "overlap".to_string());

    PositionalMap { pages, legend }
}

/// Declared page size, else the furthest zone extent
fn page_extent(zones: &[&Zone]) -> (f64, f64) {
    let declared = zones.iter().find_map(|z| {
        z.coordinates
            .page_width
            .zip(z.coordinates.page_height)
    });
    let (width, height) = declared.unwrap_or_else(|| {
        zones.iter().fold((0.0f64, 0.0f64), |(w, h), z| {
            let b = z.coordinates.bounds();
            (w.max(b.upper_right.x), h.max(b.upper_right.y))
        })
    });
    (width.max(1.0), height.max(1.0))
}

/// Half-open cell range covered by `[start, end]`, at least one cell wide
fn cell_span(start: f64, end: f64, extent: f64, cells: usize) -> (usize, usize) {
    let scale = cells as f64 / extent;
    let first = ((start * scale).floor().max(0.0) as usize).min(cells - 1);
    let last = ((end * scale).ceil().max(0.0) as usize).clamp(first + 1, cells);
    (first, last)
}
