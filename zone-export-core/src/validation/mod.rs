//! Validation pipeline
//!
//! Five validators run in a fixed order: schema, content, metadata, zone
//! geometry and error thresholds. Every stage always runs and issues
//! accumulate, so a caller sees every problem of a document at once. Only
//! the error validator decides whether the export is blocked.
//!
//! ```rust
//! use zone_export::config::ExportConfig;
//! use zone_export::validation::{ValidationContext, ValidationPipeline};
//! use zone_export::zone::{Zone, ZoneCoordinates, ZoneStatus, ZoneType};
//!
//! let zones = vec![Zone::new("z1", 1, ZoneCoordinates::new(0.0, 0.0, 50.0, 20.0), ZoneType::Text)
//!     .with_content("Hello")
//!     .with_confidence(0.9)
//!     .with_status(ZoneStatus::Completed)
//!     .with_processing("tesseract", Some(12))];
//! let config = ExportConfig::default().with_worker_count(1);
//!
//! let pipeline = ValidationPipeline::from_config(&config).unwrap();
//! let report = pipeline.run(ValidationContext::new("doc-1", &zones, &config));
//! assert!(report.completeness.is_complete);
//! assert!(!report.blocking);
//! ```

mod content;
mod errors;
mod metadata;
mod schema;
mod zone;

pub use content::{ContentChecks, ContentValidator};
pub use errors::{recovery_suggestion, ErrorSummary, ErrorValidator, RecoveryStats};
pub use metadata::{MetadataRequirements, MetadataValidator};
pub use schema::{
    chunk_schema, training_example_schema, zone_schema, FieldSchema, FieldType, FormatPredicate,
    SchemaValidator,
};
pub use zone::{BoundaryReport, CompletenessReport, OverlapPair, ZoneAssessment, ZoneValidator};

use crate::config::ExportConfig;
use crate::error::{ErrorCode, ExportError, Result, ThresholdKind};
use crate::export::ExportFormat;
use crate::zone::Zone;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Severity of a validation issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// Default severity of an error code
    pub fn for_code(code: ErrorCode) -> Self {
        match code {
            ErrorCode::AuditIntegrity
            | ErrorCode::SchemaViolation
            | ErrorCode::ForbiddenControl
            | ErrorCode::ThresholdExceeded
            | ErrorCode::Internal => Severity::Critical,
            ErrorCode::ZoneIsolated | ErrorCode::IncompleteSelection | ErrorCode::Cancelled => {
                Severity::Warning
            }
            _ => Severity::Error,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How hard the inspecting validators are enforced
///
/// Every level runs the full chain. The level only decides what severity
/// the schema, content, metadata and zone findings carry into the error
/// validator; issues recorded during generation are never adjusted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationLevel {
    /// Findings are advisory and reported as warnings
    None,
    #[default]
    Basic,
    /// Warnings count as errors
    Strict,
    /// Strict, and content must also be plain ASCII
    Comprehensive,
}

impl ValidationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationLevel::None => "none",
            ValidationLevel::Basic => "basic",
            ValidationLevel::Strict => "strict",
            ValidationLevel::Comprehensive => "comprehensive",
        }
    }

    pub fn requires_ascii(&self) -> bool {
        *self == ValidationLevel::Comprehensive
    }

    /// Re-grade one stage's findings for this level
    pub fn apply(&self, result: ValidationResult) -> ValidationResult {
        if *self == ValidationLevel::Basic {
            return result;
        }
        let regraded: Vec<ValidationIssue> = result
            .errors
            .into_iter()
            .chain(result.warnings)
            .map(|mut issue| {
                match self {
                    ValidationLevel::None if issue.is_error() => issue.severity = Severity::Warning,
                    ValidationLevel::Strict | ValidationLevel::Comprehensive
                        if issue.severity == Severity::Warning =>
                    {
                        issue.severity = Severity::Error
                    }
                    _ => {}
                }
                issue
            })
            .collect();
        ValidationResult::from_issues(regraded)
    }
}

impl fmt::Display for ValidationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ValidationLevel {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self> {
        [
            ValidationLevel::None,
            ValidationLevel::Basic,
            ValidationLevel::Strict,
            ValidationLevel::Comprehensive,
        ]
        .into_iter()
        .find(|level| level.as_str().eq_ignore_ascii_case(s))
        .ok_or_else(|| {
            ExportError::InvalidConfiguration(format!(
                "unknown validation level '{s}' (none, basic, strict, comprehensive)"
            ))
        })
    }
}

/// One problem found by a validator or recorded during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
    pub code: ErrorCode,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<ThresholdKind>,
    #[serde(default)]
    pub recovery_attempts: u32,
    #[serde(default)]
    pub recovered: bool,
}

impl ValidationIssue {
    pub fn new(code: ErrorCode, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code,
            severity: Severity::for_code(code),
            zone_id: None,
            phase: None,
            threshold: None,
            recovery_attempts: 0,
            recovered: false,
        }
    }

    /// Convert a runtime error into an issue for the error validator
    pub fn from_error(error: &ExportError) -> Self {
        let field = match error {
            ExportError::SchemaViolation { field, .. } => field.clone(),
            ExportError::ZoneBoundaryViolation { .. } => "coordinates".to_string(),
            ExportError::ReferenceIntegrity { .. } => "relatedZoneIds".to_string(),
            ExportError::ToolFailure { .. } => "processing.tool".to_string(),
            ExportError::ContentEmpty => "content".to_string(),
            ExportError::ThresholdExceeded(_) => "thresholds".to_string(),
            _ => String::new(),
        };

        let mut issue = Self::new(error.code(), field, error.to_string());
        match error {
            ExportError::ZoneBoundaryViolation { zone_id, .. }
            | ExportError::ToolFailure { zone_id, .. } => issue.zone_id = Some(zone_id.clone()),
            ExportError::PhaseTimeout { phase, .. } => issue.phase = Some(phase.clone()),
            ExportError::ThresholdExceeded(kind) => issue.threshold = Some(*kind),
            _ => {}
        }
        issue
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_zone(mut self, zone_id: impl Into<String>) -> Self {
        self.zone_id = Some(zone_id.into());
        self
    }

    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    pub fn with_recovery(mut self, attempts: u32, recovered: bool) -> Self {
        self.recovery_attempts = attempts;
        self.recovered = recovered;
        self
    }

    /// Error or critical severity
    pub fn is_error(&self) -> bool {
        self.severity >= Severity::Error
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity, self.code)?;
        if !self.field.is_empty() {
            write!(f, " {}", self.field)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Outcome of one validator: valid iff there are no errors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Build a complete result, splitting issues by severity
    pub fn from_issues(issues: impl IntoIterator<Item = ValidationIssue>) -> Self {
        let (errors, warnings): (Vec<_>, Vec<_>) =
            issues.into_iter().partition(ValidationIssue::is_error);
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    pub fn passed() -> Self {
        Self::from_issues(Vec::new())
    }

    /// Errors followed by warnings
    pub fn issues(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.errors.iter().chain(self.warnings.iter())
    }

    pub fn merge<'r>(results: impl IntoIterator<Item = &'r ValidationResult>) -> Self {
        Self::from_issues(
            results
                .into_iter()
                .flat_map(|r| r.issues().cloned())
                .collect::<Vec<_>>(),
        )
    }
}

/// Inputs shared by every validator of a run
#[derive(Debug, Clone)]
pub struct ValidationContext<'a> {
    pub document_id: &'a str,
    pub zones: &'a [Zone],
    pub config: &'a ExportConfig,
    pub formats: &'a [ExportFormat],
    pub level: ValidationLevel,
    /// Errors recorded outside validation, such as generation failures
    pub recorded: Vec<ValidationIssue>,
    accumulated: Vec<ValidationIssue>,
}

impl<'a> ValidationContext<'a> {
    pub fn new(document_id: &'a str, zones: &'a [Zone], config: &'a ExportConfig) -> Self {
        Self {
            document_id,
            zones,
            config,
            formats: &[],
            level: config.validation_level,
            recorded: Vec::new(),
            accumulated: Vec::new(),
        }
    }

    pub fn with_formats(mut self, formats: &'a [ExportFormat]) -> Self {
        self.formats = formats;
        self
    }

    pub fn with_level(mut self, level: ValidationLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_recorded(mut self, issues: Vec<ValidationIssue>) -> Self {
        self.recorded = issues;
        self
    }

    /// Issues reported by the stages that already ran
    pub fn accumulated(&self) -> &[ValidationIssue] {
        &self.accumulated
    }
}

/// A single validation stage
pub trait Validator: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationResult;
}

/// Result of one stage of the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub validator: String,
    pub result: ValidationResult,
}

/// Everything the pipeline learned about a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub document_id: String,
    /// No stage reported an error
    pub valid: bool,
    /// The error validator blocked the export
    pub blocking: bool,
    /// Quality score in `[0, 100]`
    pub score: f64,
    pub stages: Vec<StageResult>,
    pub completeness: CompletenessReport,
    pub boundaries: BoundaryReport,
    pub metadata_quality: f64,
    pub error_summary: ErrorSummary,
    pub suggestions: Vec<String>,
    /// Issues raised outside the validator chain, such as generation failures
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recorded: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.validator == name)
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.stages
            .iter()
            .flat_map(|s| s.result.errors.iter())
            .chain(self.recorded.iter().filter(|i| i.is_error()))
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.stages
            .iter()
            .flat_map(|s| s.result.warnings.iter())
            .chain(self.recorded.iter().filter(|i| !i.is_error()))
    }

    /// Replace the issues recorded outside the chain
    pub fn record_issues(&mut self, issues: Vec<ValidationIssue>) {
        self.recorded = issues;
    }

    /// All stages flattened into one result
    pub fn result(&self) -> ValidationResult {
        ValidationResult::from_issues(self.errors().chain(self.warnings()).cloned())
    }

    /// Replace the error stage after more errors were recorded
    pub fn apply_error_evaluation(&mut self, result: ValidationResult, summary: ErrorSummary) {
        match self.stages.iter_mut().find(|s| s.validator == ErrorValidator::NAME) {
            Some(stage) => stage.result = result,
            None => self.stages.push(StageResult {
                validator: ErrorValidator::NAME.to_string(),
                result,
            }),
        }
        self.blocking = summary.blocking;
        self.error_summary = summary;
        let valid = self.errors().next().is_none();
        self.valid = valid;
        let score = quality_score(self.errors().chain(self.warnings()));
        self.score = score;
        let suggestions = suggestions(self.errors().chain(self.warnings()));
        self.suggestions = suggestions;
    }
}

/// The fixed validator chain
pub struct ValidationPipeline {
    schema: SchemaValidator,
    content: ContentValidator,
    metadata: MetadataValidator,
    zone: ZoneValidator,
    errors: ErrorValidator,
}

impl ValidationPipeline {
    pub fn from_config(config: &ExportConfig) -> Result<Self> {
        Ok(Self {
            schema: SchemaValidator::new(zone_schema()).with_worker_count(config.worker_count),
            content: ContentValidator::from_config(config)?,
            metadata: MetadataValidator::default(),
            zone: ZoneValidator::from_config(config),
            errors: ErrorValidator::from_config(config),
        })
    }

    pub fn with_schema(mut self, schema: SchemaValidator) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_metadata_requirements(mut self, requirements: MetadataRequirements) -> Self {
        self.metadata = MetadataValidator::new(requirements);
        self
    }

    pub fn error_validator(&self) -> &ErrorValidator {
        &self.errors
    }

    /// Run every stage in order, without short-circuiting
    pub fn run(&self, mut ctx: ValidationContext<'_>) -> ValidationReport {
        let mut stages = Vec::with_capacity(5);

        let leading: [&dyn Validator; 3] = [&self.schema, &self.content, &self.metadata];
        for validator in leading {
            let result = ctx.level.apply(validator.validate(&ctx));
            record_stage(&mut ctx, &mut stages, validator.name(), result);
        }

        let assessment = self.zone.assess(&ctx);
        let zone_result = ctx.level.apply(assessment.result);
        record_stage(&mut ctx, &mut stages, self.zone.name(), zone_result);

        let (error_result, error_summary) = self.errors.evaluate(&ctx);
        stages.push(StageResult {
            validator: ErrorValidator::NAME.to_string(),
            result: error_result,
        });

        let mut report = ValidationReport {
            document_id: ctx.document_id.to_string(),
            valid: stages.iter().all(|s| s.result.valid)
                && !ctx.recorded.iter().any(|i| i.is_error()),
            blocking: error_summary.blocking,
            score: 0.0,
            stages,
            completeness: assessment.completeness,
            boundaries: assessment.boundaries,
            metadata_quality: self.metadata.quality_score(ctx.zones),
            error_summary,
            suggestions: Vec::new(),
            recorded: ctx.recorded.clone(),
        };
        report.score = quality_score(report.errors().chain(report.warnings()));
        report.suggestions = suggestions(report.errors().chain(report.warnings()));

        tracing::info!(
            document_id = ctx.document_id,
            level = ctx.level.as_str(),
            valid = report.valid,
            blocking = report.blocking,
            errors = report.errors().count(),
            warnings = report.warnings().count(),
            score = report.score,
            "validation finished"
        );
        report
    }
}

fn record_stage(
    ctx: &mut ValidationContext<'_>,
    stages: &mut Vec<StageResult>,
    name: &str,
    result: ValidationResult,
) {
    tracing::debug!(
        validator = name,
        errors = result.errors.len(),
        warnings = result.warnings.len(),
        "validator finished"
    );
    ctx.accumulated.extend(result.issues().cloned());
    stages.push(StageResult {
        validator: name.to_string(),
        result,
    });
}

/// 100 minus a per-issue penalty, floored at zero
fn quality_score<'i>(issues: impl Iterator<Item = &'i ValidationIssue>) -> f64 {
    let penalty: f64 = issues
        .filter(|i| !i.recovered)
        .map(|i| match i.severity {
            Severity::Critical => 25.0,
            Severity::Error => 10.0,
            Severity::Warning => 2.0,
            Severity::Info => 0.0,
        })
        .sum();
    (100.0 - penalty).clamp(0.0, 100.0)
}

/// One suggestion per distinct code, most severe first
fn suggestions<'i>(issues: impl Iterator<Item = &'i ValidationIssue>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut ranked: Vec<(Severity, ErrorCode)> = Vec::new();
    for issue in issues {
        if seen.insert(issue.code) {
            ranked.push((issue.severity, issue.code));
        }
    }
    ranked.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    ranked
        .into_iter()
        .map(|(_, code)| recovery_suggestion(code).to_string())
        .collect()
}
