use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Kind of geometric violation found in a zone set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryViolationKind {
    Overlap,
    OutOfBounds,
    Isolated,
}

impl fmt::Display for BoundaryViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundaryViolationKind::Overlap => write!(f, "overlap"),
            BoundaryViolationKind::OutOfBounds => write!(f, "out-of-bounds"),
            BoundaryViolationKind::Isolated => write!(f, "isolated"),
        }
    }
}

/// Threshold enforced by the error validator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdKind {
    MaxCriticalErrors,
    MaxTotalErrors,
    ErrorRate,
    MinimumProcessed,
    MaxZoneFailures,
}

impl fmt::Display for ThresholdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdKind::MaxCriticalErrors => write!(f, "max critical errors"),
            ThresholdKind::MaxTotalErrors => write!(f, "max total errors"),
            ThresholdKind::ErrorRate => write!(f, "error rate"),
            ThresholdKind::MinimumProcessed => write!(f, "minimum processed percentage"),
            ThresholdKind::MaxZoneFailures => write!(f, "max zone failures"),
        }
    }
}

/// Stable classification code for every error and validation issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ContentEmpty,
    SchemaViolation,
    ZoneOverlap,
    ZoneOutOfBounds,
    ZoneIsolated,
    ZoneIncomplete,
    MissingZoneType,
    ReferenceIntegrity,
    ThresholdExceeded,
    ToolFailure,
    AuditIntegrity,
    ContentEncoding,
    ForbiddenControl,
    TableInconsistent,
    PatternMismatch,
    MetadataMissing,
    MetadataFormat,
    PhaseTimeout,
    GenerationFailure,
    IncompleteSelection,
    Configuration,
    Cancelled,
    Internal,
}

impl ErrorCode {
    /// Snake-case name used in reports
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ContentEmpty => "content_empty",
            ErrorCode::SchemaViolation => "schema_violation",
            ErrorCode::ZoneOverlap => "zone_overlap",
            ErrorCode::ZoneOutOfBounds => "zone_out_of_bounds",
            ErrorCode::ZoneIsolated => "zone_isolated",
            ErrorCode::ZoneIncomplete => "zone_incomplete",
            ErrorCode::MissingZoneType => "missing_zone_type",
            ErrorCode::ReferenceIntegrity => "reference_integrity",
            ErrorCode::ThresholdExceeded => "threshold_exceeded",
            ErrorCode::ToolFailure => "tool_failure",
            ErrorCode::AuditIntegrity => "audit_integrity",
            ErrorCode::ContentEncoding => "content_encoding",
            ErrorCode::ForbiddenControl => "forbidden_control",
            ErrorCode::TableInconsistent => "table_inconsistent",
            ErrorCode::PatternMismatch => "pattern_mismatch",
            ErrorCode::MetadataMissing => "metadata_missing",
            ErrorCode::MetadataFormat => "metadata_format",
            ErrorCode::PhaseTimeout => "phase_timeout",
            ErrorCode::GenerationFailure => "generation_failure",
            ErrorCode::IncompleteSelection => "incomplete_selection",
            ErrorCode::Configuration => "configuration",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Content is empty")]
    ContentEmpty,

    #[error("Schema violation at '{field}': {reason}")]
    SchemaViolation { field: String, reason: String },

    #[error("Zone boundary violation ({kind}) for zone {zone_id}")]
    ZoneBoundaryViolation {
        zone_id: String,
        kind: BoundaryViolationKind,
    },

    #[error("Reference integrity error: dangling reference to {dangling_id}")]
    ReferenceIntegrity { dangling_id: String },

    #[error("Threshold exceeded: {0}")]
    ThresholdExceeded(ThresholdKind),

    #[error("Tool failure in zone {zone_id} ({tool}): {message}")]
    ToolFailure {
        zone_id: String,
        tool: String,
        message: String,
    },

    #[error("Audit integrity violation at entry {entry_id}")]
    AuditIntegrityViolation { entry_id: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Phase {phase} timed out after {elapsed_ms} ms (limit {limit_ms} ms)")]
    PhaseTimeout {
        phase: String,
        elapsed_ms: u64,
        limit_ms: u64,
    },

    #[error("Export run {0} is already finalized")]
    RunFinalized(String),

    #[error("Operation cancelled")]
    OperationCancelled,

    #[error("Job {job_name} panicked: {message}")]
    JobPanicked { job_name: String, message: String },

    #[error("Signature error: {0}")]
    Signature(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ExportError {
    /// Classification code consumed by the error validator
    pub fn code(&self) -> ErrorCode {
        match self {
            ExportError::ContentEmpty => ErrorCode::ContentEmpty,
            ExportError::SchemaViolation { .. } => ErrorCode::SchemaViolation,
            ExportError::ZoneBoundaryViolation { kind, .. } => match kind {
                BoundaryViolationKind::Overlap => ErrorCode::ZoneOverlap,
                BoundaryViolationKind::OutOfBounds => ErrorCode::ZoneOutOfBounds,
                BoundaryViolationKind::Isolated => ErrorCode::ZoneIsolated,
            },
            ExportError::ReferenceIntegrity { .. } => ErrorCode::ReferenceIntegrity,
            ExportError::ThresholdExceeded(_) => ErrorCode::ThresholdExceeded,
            ExportError::ToolFailure { .. } => ErrorCode::ToolFailure,
            ExportError::AuditIntegrityViolation { .. } => ErrorCode::AuditIntegrity,
            ExportError::InvalidConfiguration(_) => ErrorCode::Configuration,
            ExportError::PhaseTimeout { .. } => ErrorCode::PhaseTimeout,
            ExportError::OperationCancelled => ErrorCode::Cancelled,
            ExportError::RunFinalized(_)
            | ExportError::JobPanicked { .. }
            | ExportError::Signature(_)
            | ExportError::Io(_)
            | ExportError::Serialization(_) => ErrorCode::Internal,
        }
    }

    /// Whether retrying the failed operation can succeed
    pub fn is_retriable(&self) -> bool {
        !matches!(
            self,
            ExportError::AuditIntegrityViolation { .. }
                | ExportError::RunFinalized(_)
                | ExportError::InvalidConfiguration(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ExportError>;
