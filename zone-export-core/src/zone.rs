//! Zone model and the read-only zone query interface
//!
//! Zones are produced upstream by layout/OCR processing. This crate only
//! reads them: every type here is plain data plus derived helpers.

use crate::error::{ExportError, Result};
use crate::geometry::Rectangle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

/// Content classification of a zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneType {
    Text,
    Table,
    Diagram,
    Image,
    Mixed,
    Header,
    Footer,
}

impl ZoneType {
    pub const ALL: [ZoneType; 7] = [
        ZoneType::Text,
        ZoneType::Table,
        ZoneType::Diagram,
        ZoneType::Image,
        ZoneType::Mixed,
        ZoneType::Header,
        ZoneType::Footer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneType::Text => "text",
            ZoneType::Table => "table",
            ZoneType::Diagram => "diagram",
            ZoneType::Image => "image",
            ZoneType::Mixed => "mixed",
            ZoneType::Header => "header",
            ZoneType::Footer => "footer",
        }
    }

    /// Whether zones of this type carry extractable text
    pub fn is_textual(&self) -> bool {
        !matches!(self, ZoneType::Image | ZoneType::Diagram)
    }
}

impl fmt::Display for ZoneType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing status of a zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneStatus {
    Pending,
    Detected,
    Confirmed,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl ZoneStatus {
    /// Only completed zones count as processed
    pub fn is_processed(&self) -> bool {
        matches!(self, ZoneStatus::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneStatus::Pending => "pending",
            ZoneStatus::Detected => "detected",
            ZoneStatus::Confirmed => "confirmed",
            ZoneStatus::Processing => "processing",
            ZoneStatus::Completed => "completed",
            ZoneStatus::Failed => "failed",
            ZoneStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ZoneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position and size of a zone on its page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneCoordinates {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// Clockwise rotation in degrees
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_height: Option<f64>,
}

impl ZoneCoordinates {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
            rotation: None,
            page_width: None,
            page_height: None,
        }
    }

    pub fn with_rotation(mut self, degrees: f64) -> Self {
        self.rotation = Some(degrees);
        self
    }

    pub fn with_page_size(mut self, width: f64, height: f64) -> Self {
        self.page_width = Some(width);
        self.page_height = Some(height);
        self
    }

    /// Unrotated rectangle
    pub fn rect(&self) -> Rectangle {
        Rectangle::from_position_and_size(self.x, self.y, self.width, self.height)
    }

    /// Axis-aligned bounds after applying rotation
    pub fn bounds(&self) -> Rectangle {
        match self.rotation {
            Some(degrees) => self.rect().rotated_bounds(degrees),
            None => self.rect(),
        }
    }

    pub fn area(&self) -> f64 {
        self.rect().area()
    }
}

/// Provenance of the upstream processing that produced a zone's content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingInfo {
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A geometrically bounded page region with extracted content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Zone {
    pub id: String,
    #[serde(default)]
    pub zone_index: usize,
    /// 1-based page number
    pub page: u32,
    pub coordinates: ZoneCoordinates,
    #[serde(rename = "type")]
    pub zone_type: ZoneType,
    pub confidence: f64,
    pub status: ZoneStatus,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing: Option<ProcessingInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_zone_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Zone {
    pub fn new(
        id: impl Into<String>,
        page: u32,
        coordinates: ZoneCoordinates,
        zone_type: ZoneType,
    ) -> Self {
        Self {
            id: id.into(),
            zone_index: 0,
            page,
            coordinates,
            zone_type,
            confidence: 0.0,
            status: ZoneStatus::Detected,
            content: String::new(),
            processing: None,
            related_zone_ids: Vec::new(),
            error_message: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.zone_index = index;
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_status(mut self, status: ZoneStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_processing(mut self, tool: impl Into<String>, duration_ms: Option<u64>) -> Self {
        self.processing = Some(ProcessingInfo {
            tool: tool.into(),
            duration_ms,
            timestamp: Some(Utc::now()),
        });
        self
    }

    pub fn with_related(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.related_zone_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Name of the processing tool, `"unknown"` when absent
    pub fn tool(&self) -> &str {
        self.processing
            .as_ref()
            .map(|p| p.tool.as_str())
            .unwrap_or("unknown")
    }

    pub fn is_processed(&self) -> bool {
        self.status.is_processed()
    }

    /// First 100 characters of content, with an ellipsis when truncated
    pub fn content_preview(&self) -> String {
        if self.content.is_empty() {
            return "No content extracted".to_string();
        }
        let mut preview: String = self.content.chars().take(100).collect();
        if self.content.chars().count() > 100 {
            preview.push_str("...");
        }
        preview
    }

    pub fn word_count(&self) -> usize {
        self.content.split_whitespace().count()
    }

    pub fn char_count(&self) -> usize {
        self.content.chars().count()
    }

    /// Reading order: page, then top-to-bottom, then left-to-right
    pub fn document_order(&self, other: &Zone) -> Ordering {
        self.page
            .cmp(&other.page)
            .then_with(|| self.coordinates.y.total_cmp(&other.coordinates.y))
            .then_with(|| self.coordinates.x.total_cmp(&other.coordinates.x))
            .then_with(|| self.zone_index.cmp(&other.zone_index))
    }
}

/// Sort zones into reading order in place
pub fn sort_document_order(zones: &mut [Zone]) {
    zones.sort_by(|a, b| a.document_order(b));
}

/// Metadata key listing the source zones of a merged zone
pub const MERGED_ZONE_IDS_KEY: &str = "mergedZoneIds";

/// Join each run of consecutive completed text zones on a page into one.
///
/// Zones are taken in reading order. A merged zone keeps the id, processing
/// info and page of the first zone of its run; content is joined with a
/// blank line, coordinates cover the whole run and confidence is the lowest
/// of the run. Other zones pass through unchanged.
pub fn merge_text_zones(zones: &[Zone]) -> Vec<Zone> {
    let mut ordered = zones.to_vec();
    sort_document_order(&mut ordered);

    let mergeable = |z: &Zone| z.zone_type == ZoneType::Text && z.status == ZoneStatus::Completed;
    let mut merged: Vec<Zone> = Vec::with_capacity(ordered.len());
    let mut run_ids: Vec<String> = Vec::new();

    for zone in ordered {
        let extends_run = match merged.last() {
            Some(last) => !run_ids.is_empty() && mergeable(&zone) && last.page == zone.page,
            None => false,
        };
        if extends_run {
            if let Some(last) = merged.last_mut() {
                let bounds = last.coordinates.rect().union(&zone.coordinates.rect());
                last.coordinates.x = bounds.lower_left.x;
                last.coordinates.y = bounds.lower_left.y;
                last.coordinates.width = bounds.width();
                last.coordinates.height = bounds.height();
                last.coordinates.rotation = None;
                last.content = format!("{}\n\n{}", last.content, zone.content);
                last.confidence = last.confidence.min(zone.confidence);
                for related in zone.related_zone_ids {
                    if !last.related_zone_ids.contains(&related) {
                        last.related_zone_ids.push(related);
                    }
                }
                run_ids.push(zone.id);
            }
            continue;
        }

        close_run(&mut merged, &mut run_ids);
        if mergeable(&zone) {
            run_ids.push(zone.id.clone());
        }
        merged.push(zone);
    }
    close_run(&mut merged, &mut run_ids);
    merged
}

/// Record the members of a finished run on its merged zone
fn close_run(merged: &mut [Zone], run_ids: &mut Vec<String>) {
    if run_ids.len() > 1 {
        if let Some(last) = merged.last_mut() {
            last.related_zone_ids.retain(|id| !run_ids.contains(id));
            last.metadata.insert(
                MERGED_ZONE_IDS_KEY.to_string(),
                serde_json::Value::from(run_ids.clone()),
            );
        }
    }
    run_ids.clear();
}

/// Read-only query interface owned by the upstream processing system
pub trait ZoneSource: Send + Sync {
    /// All zones belonging to a document
    fn zones_for_document(&self, document_id: &str) -> Result<Vec<Zone>>;
}

/// Zones of a single document, as exchanged in JSON files
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentZones {
    pub document_id: String,
    pub zones: Vec<Zone>,
}

impl DocumentZones {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}

/// In-memory zone source, used by the CLI and tests
#[derive(Debug, Default, Clone)]
pub struct InMemoryZoneSource {
    documents: HashMap<String, Vec<Zone>>,
}

impl InMemoryZoneSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, document_id: impl Into<String>, zones: Vec<Zone>) {
        self.documents.insert(document_id.into(), zones);
    }

    pub fn with_document(mut self, document: DocumentZones) -> Self {
        self.insert(document.document_id, document.zones);
        self
    }
}

impl ZoneSource for InMemoryZoneSource {
    fn zones_for_document(&self, document_id: &str) -> Result<Vec<Zone>> {
        self.documents
            .get(document_id)
            .cloned()
            .ok_or_else(|| ExportError::ReferenceIntegrity {
                dangling_id: document_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(id: &str, page: u32, y: f64) -> Zone {
        Zone::new(id, page, ZoneCoordinates::new(10.0, y, 100.0, 20.0), ZoneType::Text)
    }

    #[test]
    fn test_zone_json_shape() {
        let json = r#"{
            "id": "z1",
            "page": 1,
            "coordinates": {"x": 0, "y": 0, "width": 10, "height": 5, "pageWidth": 612, "pageHeight": 792},
            "type": "table",
            "confidence": 0.9,
            "status": "completed",
            "content": "a | b",
            "processing": {"tool": "tesseract", "durationMs": 120}
        }"#;
        let zone: Zone = serde_json::from_str(json).unwrap();
        assert_eq!(zone.zone_type, ZoneType::Table);
        assert_eq!(zone.tool(), "tesseract");
        assert_eq!(zone.coordinates.page_width, Some(612.0));
        assert!(zone.related_zone_ids.is_empty());
        assert!(zone.is_processed());
    }

    #[test]
    fn test_merge_text_zones_joins_runs_per_page() {
        let done = |id: &str, page: u32, y: f64, zone_type: ZoneType| {
            Zone::new(id, page, ZoneCoordinates::new(10.0, y, 100.0, 20.0), zone_type)
                .with_content(id.to_uppercase())
                .with_confidence(if id == "b" { 0.6 } else { 0.9 })
                .with_status(ZoneStatus::Completed)
        };
        let zones = vec![
            done("c", 1, 80.0, ZoneType::Table),
            done("b", 1, 40.0, ZoneType::Text),
            done("a", 1, 0.0, ZoneType::Text),
            done("d", 1, 120.0, ZoneType::Text),
            done("e", 2, 0.0, ZoneType::Text),
            done("f", 2, 30.0, ZoneType::Text).with_status(ZoneStatus::Pending),
        ];

        let merged = merge_text_zones(&zones);
        let ids: Vec<&str> = merged.iter().map(|z| z.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "d", "e", "f"]);

        let first = &merged[0];
        assert_eq!(first.content, "A\n\nB");
        assert_eq!(first.confidence, 0.6);
        assert_eq!(first.coordinates.height, 60.0);
        assert_eq!(first.metadata[MERGED_ZONE_IDS_KEY], serde_json::json!(["a", "b"]));
        assert!(!merged[2].metadata.contains_key(MERGED_ZONE_IDS_KEY));
        assert_eq!(merged[4].content, "F");
    }

    #[test]
    fn test_content_helpers() {
        let long = "word ".repeat(40);
        let z = zone("z", 1, 0.0).with_content(long.clone());
        assert_eq!(z.word_count(), 40);
        assert_eq!(z.char_count(), 200);
        assert!(z.content_preview().ends_with("..."));
        assert_eq!(z.content_preview().chars().count(), 103);

        let empty = zone("e", 1, 0.0);
        assert_eq!(empty.content_preview(), "No content extracted");
        assert_eq!(empty.tool(), "unknown");
    }

    #[test]
    fn test_document_order() {
        let mut zones = vec![zone("c", 2, 0.0), zone("b", 1, 50.0), zone("a", 1, 10.0)];
        sort_document_order(&mut zones);
        let ids: Vec<_> = zones.iter().map(|z| z.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_in_memory_source() {
        let mut source = InMemoryZoneSource::new();
        source.insert("doc-1", vec![zone("a", 1, 0.0)]);

        assert_eq!(source.zones_for_document("doc-1").unwrap().len(), 1);
        match source.zones_for_document("missing") {
            Err(ExportError::ReferenceIntegrity { dangling_id }) => assert_eq!(dangling_id, "missing"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
