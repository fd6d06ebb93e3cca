//! Error classification, recovery tracking and blocking thresholds

use super::{Severity, ValidationContext, ValidationIssue, ValidationReport, ValidationResult, Validator};
use crate::config::ExportConfig;
use crate::error::{ErrorCode, ExportError, ThresholdKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryStats {
    pub attempted: usize,
    pub recovered: usize,
    pub unrecovered: usize,
    /// `recovered / attempted`, zero when nothing was attempted
    pub recovery_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorSummary {
    /// Unrecovered issues of error severity or worse
    pub total_errors: usize,
    pub critical_errors: usize,
    pub warnings: usize,
    pub by_code: BTreeMap<ErrorCode, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
    pub affected_zones: usize,
    pub total_zones: usize,
    /// Affected zones over total zones
    pub error_rate: f64,
    /// 0.7 from critical errors relative to the limit plus 0.3 from the
    /// affected-zone share, in `[0, 1]`
    pub blocking_score: f64,
    pub recovery: RecoveryStats,
    pub exceeded: Vec<ThresholdKind>,
    pub blocking: bool,
}

/// Decides whether accumulated errors block the export
#[derive(Debug, Clone)]
pub struct ErrorValidator {
    pub max_critical_errors: usize,
    pub max_total_errors: usize,
    pub error_rate_threshold: f64,
}

impl Default for ErrorValidator {
    fn default() -> Self {
        Self::from_config(&ExportConfig::default())
    }
}

impl ErrorValidator {
    pub const NAME: &'static str = "error";

    pub fn new(max_critical_errors: usize, max_total_errors: usize, error_rate_threshold: f64) -> Self {
        Self {
            max_critical_errors,
            max_total_errors,
            error_rate_threshold,
        }
    }

    pub fn from_config(config: &ExportConfig) -> Self {
        Self::new(
            config.max_critical_errors,
            config.max_total_errors,
            config.error_rate_threshold,
        )
    }

    /// Evaluate the issues of earlier stages plus recorded runtime errors
    pub fn evaluate(&self, ctx: &ValidationContext<'_>) -> (ValidationResult, ErrorSummary) {
        self.summarize(
            ctx.accumulated().iter().chain(ctx.recorded.iter()),
            ctx.zones.len(),
        )
    }

    /// Re-evaluate a finished report after more errors were recorded
    pub fn reevaluate(
        &self,
        report: &ValidationReport,
        recorded: &[ValidationIssue],
        total_zones: usize,
    ) -> (ValidationResult, ErrorSummary) {
        let earlier = report
            .stages
            .iter()
            .filter(|s| s.validator != Self::NAME)
            .flat_map(|s| s.result.issues());
        self.summarize(earlier.chain(recorded.iter()), total_zones)
    }

    pub fn summarize<'i>(
        &self,
        issues: impl IntoIterator<Item = &'i ValidationIssue>,
        total_zones: usize,
    ) -> (ValidationResult, ErrorSummary) {
        let mut summary = ErrorSummary {
            total_zones,
            ..Default::default()
        };
        let mut affected = BTreeSet::new();
        let mut exceeded = BTreeSet::new();

        for issue in issues {
            *summary.by_code.entry(issue.code).or_insert(0) += 1;
            *summary.by_severity.entry(issue.severity).or_insert(0) += 1;

            if issue.recovery_attempts > 0 {
                summary.recovery.attempted += 1;
                if issue.recovered {
                    summary.recovery.recovered += 1;
                } else {
                    summary.recovery.unrecovered += 1;
                }
            }
            if issue.recovered {
                continue;
            }

            match issue.severity {
                Severity::Critical => {
                    summary.critical_errors += 1;
                    summary.total_errors += 1;
                }
                Severity::Error => summary.total_errors += 1,
                Severity::Warning => summary.warnings += 1,
                Severity::Info => {}
            }
            if issue.is_error() {
                if let Some(zone_id) = &issue.zone_id {
                    affected.insert(zone_id.clone());
                }
            }

            match (issue.code, issue.threshold) {
                (ErrorCode::ZoneIncomplete, _) => {
                    exceeded.insert(ThresholdKind::MinimumProcessed);
                }
                (ErrorCode::ThresholdExceeded, Some(kind)) => {
                    exceeded.insert(kind);
                }
                _ => {}
            }
        }

        if summary.recovery.attempted > 0 {
            summary.recovery.recovery_rate =
                summary.recovery.recovered as f64 / summary.recovery.attempted as f64;
        }

        summary.affected_zones = affected.len();
        summary.error_rate = if total_zones == 0 {
            0.0
        } else {
            summary.affected_zones as f64 / total_zones as f64
        };

        if summary.critical_errors > self.max_critical_errors {
            exceeded.insert(ThresholdKind::MaxCriticalErrors);
        }
        if summary.total_errors > self.max_total_errors {
            exceeded.insert(ThresholdKind::MaxTotalErrors);
        }
        if summary.error_rate > self.error_rate_threshold {
            exceeded.insert(ThresholdKind::ErrorRate);
        }

        let critical_share = (summary.critical_errors as f64
            / (self.max_critical_errors as f64 + 1.0))
            .min(1.0);
        summary.blocking_score = (0.7 * critical_share + 0.3 * summary.error_rate).min(1.0);

        summary.exceeded = exceeded.into_iter().collect();
        summary.blocking = !summary.exceeded.is_empty();

        if summary.blocking {
            tracing::warn!(
                exceeded = ?summary.exceeded,
                critical = summary.critical_errors,
                total = summary.total_errors,
                "export blocked by error thresholds"
            );
        }

        let result = ValidationResult::from_issues(
            summary
                .exceeded
                .iter()
                .map(|kind| {
                    let mut issue = ValidationIssue::from_error(&ExportError::ThresholdExceeded(*kind));
                    issue.message = threshold_message(*kind, &summary, self);
                    issue
                })
                .collect::<Vec<_>>(),
        );
        (result, summary)
    }
}

fn threshold_message(kind: ThresholdKind, summary: &ErrorSummary, limits: &ErrorValidator) -> String {
    match kind {
        ThresholdKind::MaxCriticalErrors => format!(
            "{} critical errors, at most {} allowed",
            summary.critical_errors, limits.max_critical_errors
        ),
        ThresholdKind::MaxTotalErrors => format!(
            "{} errors, at most {} allowed",
            summary.total_errors, limits.max_total_errors
        ),
        ThresholdKind::ErrorRate => format!(
            "{:.1}% of zones have errors, at most {:.1}% allowed",
            summary.error_rate * 100.0,
            limits.error_rate_threshold * 100.0
        ),
        ThresholdKind::MinimumProcessed => {
            "processed zones are below the required percentage".to_string()
        }
        ThresholdKind::MaxZoneFailures => {
            "zone failures exceeded the hard-stop limit".to_string()
        }
    }
}

impl Validator for ErrorValidator {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationResult {
        self.evaluate(ctx).0
    }
}

/// What to do about an error of the given code
pub fn recovery_suggestion(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::ContentEmpty => "Re-run extraction for zones without content or exclude them",
        ErrorCode::SchemaViolation => "Correct the offending fields so records match their schema",
        ErrorCode::ZoneOverlap => "Merge or resize overlapping zones",
        ErrorCode::ZoneOutOfBounds => "Clamp zone coordinates to the page dimensions",
        ErrorCode::ZoneIsolated => "Check whether isolated zones are detection noise",
        ErrorCode::ZoneIncomplete => "Process pending and failed zones before exporting",
        ErrorCode::MissingZoneType => "Process at least one zone of every required type",
        ErrorCode::ReferenceIntegrity => "Restore the referenced zones or remove the references",
        ErrorCode::ThresholdExceeded => "Resolve the blocking errors or relax the error thresholds",
        ErrorCode::ToolFailure => "Reprocess failed zones, possibly with a different tool",
        ErrorCode::AuditIntegrity => "Restore the audit trail from a trusted copy",
        ErrorCode::ContentEncoding => "Normalize content to NFC and remove binary payloads",
        ErrorCode::ForbiddenControl => "Strip control characters from zone content",
        ErrorCode::TableInconsistent => "Give every table row the same number of columns",
        ErrorCode::PatternMismatch => "Check the zone type or the declared content pattern",
        ErrorCode::MetadataMissing => "Populate the missing metadata fields",
        ErrorCode::MetadataFormat => "Correct the format of the flagged metadata values",
        ErrorCode::PhaseTimeout => "Raise phaseTimeoutMs or export fewer zones per run",
        ErrorCode::GenerationFailure => "Inspect the zones that failed generation",
        ErrorCode::IncompleteSelection => "Add the missing parts of the structure to the selection",
        ErrorCode::Configuration => "Fix the configuration value and re-run",
        ErrorCode::Cancelled => "Re-run the export to produce the missing artifacts",
        ErrorCode::Internal => "Check the run log for details",
    }
}
