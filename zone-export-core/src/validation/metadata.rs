//! Metadata completeness, field formats and cross-references

use super::schema::{is_identifier, is_timestamp};
use super::{Severity, ValidationContext, ValidationIssue, ValidationResult, Validator};
use crate::error::{ErrorCode, ExportError};
use crate::export::ExportFormat;
use crate::zone::Zone;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// Optional fields that make a zone record richer
const RICHNESS_FIELDS: [&str; 5] = [
    "content",
    "processing.durationMs",
    "processing.timestamp",
    "coordinates.pageWidth",
    "metadata",
];

/// Dotted field paths that must be present on zone records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetadataRequirements {
    /// Required on every zone
    pub global: Vec<String>,
    /// Required on processed zones only
    pub processed: Vec<String>,
    /// Extras for a requested format, reported as warnings
    pub per_format: BTreeMap<ExportFormat, Vec<String>>,
}

impl Default for MetadataRequirements {
    fn default() -> Self {
        let paths = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let mut per_format = BTreeMap::new();
        per_format.insert(ExportFormat::Chunks, paths(&["processing.timestamp"]));
        per_format.insert(ExportFormat::Manifest, paths(&["processing.durationMs"]));
        Self {
            global: paths(&["id", "page", "type", "coordinates", "status"]),
            processed: paths(&["processing.tool"]),
            per_format,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetadataValidator {
    requirements: MetadataRequirements,
}

impl MetadataValidator {
    pub fn new(requirements: MetadataRequirements) -> Self {
        Self { requirements }
    }

    pub fn requirements(&self) -> &MetadataRequirements {
        &self.requirements
    }

    /// Mean per-zone score: 0.7 of required-field completeness plus 0.3
    /// of optional-field richness. Zero for an empty zone set.
    pub fn quality_score(&self, zones: &[Zone]) -> f64 {
        if zones.is_empty() {
            return 0.0;
        }
        let total: f64 = zones
            .iter()
            .map(|zone| {
                let record = zone_record(zone);
                let required = self.required_paths(zone);
                let completeness = if required.is_empty() {
                    1.0
                } else {
                    required.iter().filter(|p| is_present(&record, p)).count() as f64
                        / required.len() as f64
                };
                let richness = RICHNESS_FIELDS
                    .iter()
                    .filter(|p| is_present(&record, p))
                    .count() as f64
                    / RICHNESS_FIELDS.len() as f64;
                0.7 * completeness + 0.3 * richness
            })
            .sum();
        total / zones.len() as f64
    }

    fn required_paths(&self, zone: &Zone) -> Vec<&str> {
        let mut paths: Vec<&str> = self.requirements.global.iter().map(String::as_str).collect();
        if zone.is_processed() {
            paths.extend(self.requirements.processed.iter().map(String::as_str));
        }
        paths
    }

    fn check_zone(
        &self,
        zone: &Zone,
        formats: &[ExportFormat],
        known_ids: &HashSet<&str>,
        issues: &mut Vec<ValidationIssue>,
    ) {
        let record = zone_record(zone);

        for path in self.required_paths(zone) {
            if !is_present(&record, path) {
                issues.push(
                    ValidationIssue::new(ErrorCode::MetadataMissing, path, "required field is missing")
                        .with_zone(&zone.id),
                );
            }
        }

        for format in formats {
            for path in self.requirements.per_format.get(format).into_iter().flatten() {
                if zone.is_processed() && !is_present(&record, path) {
                    issues.push(
                        ValidationIssue::new(
                            ErrorCode::MetadataMissing,
                            path.as_str(),
                            format!("field expected by the {format} export is missing"),
                        )
                        .with_zone(&zone.id)
                        .with_severity(Severity::Warning),
                    );
                }
            }
        }

        for (key, value) in &zone.metadata {
            if let Some(message) = format_problem(key, value) {
                issues.push(
                    ValidationIssue::new(ErrorCode::MetadataFormat, format!("metadata.{key}"), message)
                        .with_zone(&zone.id),
                );
            }
        }

        for related in &zone.related_zone_ids {
            if !is_identifier(related) {
                issues.push(
                    ValidationIssue::new(
                        ErrorCode::MetadataFormat,
                        "relatedZoneIds",
                        format!("'{related}' is not a valid identifier"),
                    )
                    .with_zone(&zone.id),
                );
            } else if !known_ids.contains(related.as_str()) {
                let mut issue = ValidationIssue::from_error(&ExportError::ReferenceIntegrity {
                    dangling_id: related.clone(),
                });
                issue.zone_id = Some(zone.id.clone());
                issues.push(issue);
            }
        }
    }
}

impl Validator for MetadataValidator {
    fn name(&self) -> &'static str {
        "metadata"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationResult {
        let known_ids: HashSet<&str> = ctx.zones.iter().map(|z| z.id.as_str()).collect();
        let mut issues = Vec::new();
        for zone in ctx.zones {
            self.check_zone(zone, ctx.formats, &known_ids, &mut issues);
        }
        ValidationResult::from_issues(issues)
    }
}

fn zone_record(zone: &Zone) -> Value {
    serde_json::to_value(zone).unwrap_or(Value::Null)
}

/// Present means found, not null, and not an empty string, array or object
fn is_present(record: &Value, path: &str) -> bool {
    let mut current = record;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return false,
        }
    }
    match current {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

/// Format rules keyed by naming convention of free-form metadata keys
fn format_problem(key: &str, value: &Value) -> Option<String> {
    let lower = key.to_ascii_lowercase();

    if key.ends_with("At") || lower.ends_with("_at") || lower == "timestamp" {
        return match value.as_str() {
            Some(s) if is_timestamp(s) => None,
            _ => Some(format!("{value} is not an RFC 3339 timestamp")),
        };
    }
    if lower.ends_with("confidence") || lower.ends_with("score") {
        return match value.as_f64() {
            Some(n) if (0.0..=1.0).contains(&n) => None,
            _ => Some(format!("{value} is outside [0, 1]")),
        };
    }
    if lower.ends_with("percentage") {
        return match value.as_f64() {
            Some(n) if (0.0..=100.0).contains(&n) => None,
            _ => Some(format!("{value} is outside [0, 100]")),
        };
    }
    if key.ends_with("Id") || lower.ends_with("_id") {
        return match value.as_str() {
            Some(s) if is_identifier(s) => None,
            _ => Some(format!("{value} is not a valid identifier")),
        };
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExportConfig;
    use crate::zone::{ZoneCoordinates, ZoneStatus, ZoneType};
    use serde_json::json;

    fn zone(id: &str) -> Zone {
        Zone::new(id, 1, ZoneCoordinates::new(0.0, 0.0, 10.0, 10.0), ZoneType::Text)
            .with_confidence(0.9)
            .with_status(ZoneStatus::Completed)
            .with_processing("tesseract", Some(10))
            .with_content("text")
    }

    fn run(zones: &[Zone], formats: &[ExportFormat]) -> ValidationResult {
        let config = ExportConfig::default();
        let ctx = ValidationContext::new("doc", zones, &config).with_formats(formats);
        MetadataValidator::default().validate(&ctx)
    }

    #[test]
    fn test_complete_zones_pass() {
        let result = run(&[zone("a"), zone("b").with_related(["a"])], &[ExportFormat::Chunks]);
        assert!(result.valid);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_missing_processing_on_processed_zone() {
        let mut bare = zone("a");
        bare.processing = None;
        let mut pending = zone("b").with_status(ZoneStatus::Pending);
        pending.processing = None;

        let result = run(&[bare, pending], &[ExportFormat::Chunks]);
        let missing: Vec<(&str, Option<&str>)> = result
            .errors
            .iter()
            .map(|e| (e.field.as_str(), e.zone_id.as_deref()))
            .collect();
        assert_eq!(missing, vec![("processing.tool", Some("a"))]);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].field, "processing.timestamp");
    }

    #[test]
    fn test_dangling_reference_is_reported() {
        let result = run(&[zone("a").with_related(["ghost", "a"])], &[]);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].code, ErrorCode::ReferenceIntegrity);
        assert!(result.errors[0].message.contains("ghost"));
        assert_eq!(result.errors[0].zone_id.as_deref(), Some("a"));
    }

    #[test]
    fn test_metadata_formats() {
        let z = zone("a")
            .with_metadata("reviewedAt", json!("not a date"))
            .with_metadata("ocrConfidence", json!(1.4))
            .with_metadata("coveragePercentage", json!(50))
            .with_metadata("sourceId", json!("has space"))
            .with_metadata("note", json!("anything"));
        let result = run(&[z], &[]);
        let fields: Vec<&str> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["metadata.ocrConfidence", "metadata.reviewedAt", "metadata.sourceId"]
        );
    }

    #[test]
    fn test_quality_score() {
        let validator = MetadataValidator::default();
        assert_eq!(validator.quality_score(&[]), 0.0);

        let mut rich = zone("a").with_metadata("language", json!("en"));
        rich.coordinates = rich.coordinates.clone().with_page_size(612.0, 792.0);
        assert!((validator.quality_score(&[rich]) - 1.0).abs() < 1e-9);

        let mut poor = zone("b").with_content("");
        poor.processing = None;
        // 5 of 6 required fields, none of the optional ones
        let expected = 0.7 * 5.0 / 6.0;
        assert!((validator.quality_score(&[poor]) - expected).abs() < 1e-9);
    }
}
