//! Export requests, runs and bundles
//!
//! An [`ExportRun`] is created when a request starts and finalized once it
//! reaches a terminal status. After finalization every mutation fails with
//! [`ExportError::RunFinalized`].

pub mod bulk;
pub mod orchestrator;
pub mod stats;
pub mod writer;

pub use bulk::{BulkExportFailure, BulkExportRequest, BulkExportResult, MAX_BULK_DOCUMENTS};
pub use orchestrator::ExportOrchestrator;
pub use stats::ExportStats;
pub use writer::{BundleWriter, ExportFile};

use crate::chunking::ExportChunk;
use crate::error::{ExportError, Result};
use crate::manifest::Manifest;
use crate::report::LogFormat;
use crate::selection::{PartialExport, SelectionCriteria, SelectionEngine};
use crate::telemetry::PhaseTiming;
use crate::training::ExampleSet;
use crate::validation::{ValidationIssue, ValidationLevel, ValidationReport};
use crate::zone::Zone;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Artifact kinds an export can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// Retrieval chunks
    Chunks,
    /// Fine-tuning examples
    Training,
    Manifest,
    Log,
    /// Validation report
    Validation,
}

impl Default for ExportFormat {
    fn default() -> Self {
        Self::Chunks
    }
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 5] = [
        ExportFormat::Chunks,
        ExportFormat::Training,
        ExportFormat::Manifest,
        ExportFormat::Log,
        ExportFormat::Validation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Chunks => "chunks",
            ExportFormat::Training => "training",
            ExportFormat::Manifest => "manifest",
            ExportFormat::Log => "log",
            ExportFormat::Validation => "validation",
        }
    }

    /// Whether the format carries zone content
    pub fn carries_content(&self) -> bool {
        matches!(self, ExportFormat::Chunks | ExportFormat::Training)
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self> {
        ExportFormat::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| ExportError::InvalidConfiguration(format!("unknown export format '{s}'")))
    }
}

/// Scope of an export
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportType {
    #[default]
    Full,
    /// Only the selected zones, with placeholders for excluded references
    Partial,
    /// Zone records plus metadata artifacts, no generated content
    ZonesOnly,
    /// Textual zones only
    TextOnly,
    /// Metadata artifacts only
    MetadataOnly,
}

impl ExportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportType::Full => "full",
            ExportType::Partial => "partial",
            ExportType::ZonesOnly => "zones_only",
            ExportType::TextOnly => "text_only",
            ExportType::MetadataOnly => "metadata_only",
        }
    }

    pub fn allows(&self, format: ExportFormat) -> bool {
        match self {
            ExportType::ZonesOnly | ExportType::MetadataOnly => !format.carries_content(),
            _ => true,
        }
    }
}

impl fmt::Display for ExportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportType {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self> {
        [
            ExportType::Full,
            ExportType::Partial,
            ExportType::ZonesOnly,
            ExportType::TextOnly,
            ExportType::MetadataOnly,
        ]
        .into_iter()
        .find(|t| t.as_str() == s)
        .ok_or_else(|| ExportError::InvalidConfiguration(format!("unknown export type '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl ExportStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExportStatus::Completed | ExportStatus::Failed | ExportStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportStatus::Pending => "pending",
            ExportStatus::Processing => "processing",
            ExportStatus::Completed => "completed",
            ExportStatus::Failed => "failed",
            ExportStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ExportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to export and for whom
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    pub document_id: String,
    #[serde(default)]
    pub export_type: ExportType,
    #[serde(default = "default_formats")]
    pub formats: Vec<ExportFormat>,
    #[serde(default)]
    pub criteria: SelectionCriteria,
    /// Explicit selection for partial exports; overrides `criteria`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_zone_ids: Option<Vec<String>>,
    /// Overrides `validationLevel` of the configuration for this run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_level: Option<ValidationLevel>,
    #[serde(default = "default_actor")]
    pub actor: String,
}

fn default_formats() -> Vec<ExportFormat> {
    ExportFormat::ALL.to_vec()
}

fn default_actor() -> String {
    "system".to_string()
}

impl ExportRequest {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            export_type: ExportType::Full,
            formats: default_formats(),
            criteria: SelectionCriteria::default(),
            selected_zone_ids: None,
            validation_level: None,
            actor: default_actor(),
        }
    }

    pub fn with_type(mut self, export_type: ExportType) -> Self {
        self.export_type = export_type;
        self
    }

    /// Formats are kept as given; duplicates are rejected by [`validate`](Self::validate)
    pub fn with_formats(mut self, formats: impl IntoIterator<Item = ExportFormat>) -> Self {
        self.formats = formats.into_iter().collect();
        self
    }

    pub fn with_validation_level(mut self, level: ValidationLevel) -> Self {
        self.validation_level = Some(level);
        self
    }

    pub fn with_criteria(mut self, criteria: SelectionCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    /// Partial export of whatever the engine currently covers
    pub fn with_selection(mut self, selection: &SelectionEngine) -> Self {
        self.export_type = ExportType::Partial;
        self.selected_zone_ids = Some(selection.selected_zone_ids());
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn wants(&self, format: ExportFormat) -> bool {
        self.formats.contains(&format)
    }

    pub fn validate(&self) -> Result<()> {
        if self.document_id.trim().is_empty() {
            return Err(ExportError::InvalidConfiguration(
                "document id must not be empty".to_string(),
            ));
        }
        if self.formats.is_empty() {
            return Err(ExportError::InvalidConfiguration(
                "at least one export format is required".to_string(),
            ));
        }
        let mut seen = Vec::with_capacity(self.formats.len());
        for format in &self.formats {
            if seen.contains(format) {
                return Err(ExportError::InvalidConfiguration(format!(
                    "duplicate export format '{format}'"
                )));
            }
            seen.push(*format);
        }
        Ok(())
    }
}

/// Record of one export run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRun {
    pub run_id: String,
    pub document_id: String,
    pub export_type: ExportType,
    pub formats: Vec<ExportFormat>,
    pub status: ExportStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Records produced per artifact
    pub artifacts: BTreeMap<ExportFormat, usize>,
    pub validation_valid: Option<bool>,
    pub audit_entry_ids: Vec<String>,
    pub error: Option<String>,
    finalized: bool,
}

impl ExportRun {
    pub fn new(request: &ExportRequest) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            document_id: request.document_id.clone(),
            export_type: request.export_type,
            formats: request.formats.clone(),
            status: ExportStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            artifacts: BTreeMap::new(),
            validation_valid: None,
            audit_entry_ids: Vec::new(),
            error: None,
            finalized: false,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn ensure_open(&self) -> Result<()> {
        if self.finalized {
            return Err(ExportError::RunFinalized(self.run_id.clone()));
        }
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.status = ExportStatus::Processing;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn record_artifact(&mut self, format: ExportFormat, records: usize) -> Result<()> {
        self.ensure_open()?;
        self.artifacts.insert(format, records);
        Ok(())
    }

    pub fn record_validation(&mut self, valid: bool) -> Result<()> {
        self.ensure_open()?;
        self.validation_valid = Some(valid);
        Ok(())
    }

    pub fn record_audit_entry(&mut self, entry_id: impl Into<String>) -> Result<()> {
        self.ensure_open()?;
        self.audit_entry_ids.push(entry_id.into());
        Ok(())
    }

    /// Move to a terminal status; the run is immutable afterwards
    pub fn finalize(&mut self, status: ExportStatus, error: Option<String>) -> Result<()> {
        self.ensure_open()?;
        if !status.is_terminal() {
            return Err(ExportError::InvalidConfiguration(format!(
                "cannot finalize run {} as {status}",
                self.run_id
            )));
        }
        self.status = status;
        self.error = error;
        self.completed_at = Some(Utc::now());
        self.finalized = true;
        Ok(())
    }

    pub fn duration_ms(&self) -> Option<i64> {
        Some((self.completed_at? - self.started_at?).num_milliseconds())
    }
}

/// Rendered run log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedLog {
    pub format: LogFormat,
    pub content: String,
}

/// Everything a run produced
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub run: ExportRun,
    pub chunks: Vec<ExportChunk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub examples: Option<ExampleSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<Manifest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<RenderedLog>,
    pub validation: ValidationReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial: Option<PartialExport>,
    /// Zone records of a zones-only export
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zones: Option<Vec<Zone>>,
    /// Issues raised after validation, such as generation failures
    pub issues: Vec<ValidationIssue>,
    pub timings: Vec<PhaseTiming>,
    /// Explicit notes for everything left out of the bundle
    pub omissions: Vec<String>,
    pub audit_entry_id: Option<String>,
}

impl ExportBundle {
    pub fn status(&self) -> ExportStatus {
        self.run.status
    }
}
