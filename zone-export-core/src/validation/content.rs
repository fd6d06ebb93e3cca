//! Payload checks: control bytes, encoding, table shape and patterns

use super::{Severity, ValidationContext, ValidationIssue, ValidationResult, Validator};
use crate::config::ExportConfig;
use crate::error::{ErrorCode, ExportError, Result};
use crate::zone::{Zone, ZoneType};
use regex::Regex;
use std::collections::BTreeMap;
use unicode_normalization::is_nfc;

bitflags::bitflags! {
    /// Checks run by the content validator
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ContentChecks: u8 {
        const CONTROL = 1;
        const ENCODING = 1 << 1;
        const NORMALIZATION = 1 << 2;
        const TABLE = 1 << 3;
        const PATTERN = 1 << 4;
    }
}

impl Default for ContentChecks {
    fn default() -> Self {
        ContentChecks::all()
    }
}

/// Metadata key holding a zone's own content pattern
pub const PATTERN_KEY: &str = "pattern";

#[derive(Debug, Clone, Default)]
pub struct ContentValidator {
    checks: ContentChecks,
    strict_ascii: bool,
    patterns: BTreeMap<ZoneType, Regex>,
}

impl ContentValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ExportConfig) -> Result<Self> {
        let mut validator = Self::new().with_strict_ascii(config.strict_ascii);
        for (zone_type, pattern) in &config.content_patterns {
            validator = validator.with_pattern(*zone_type, pattern)?;
        }
        Ok(validator)
    }

    pub fn with_checks(mut self, checks: ContentChecks) -> Self {
        self.checks = checks;
        self
    }

    pub fn with_strict_ascii(mut self, strict: bool) -> Self {
        self.strict_ascii = strict;
        self
    }

    /// Require zones of `zone_type` to match `pattern`
    pub fn with_pattern(mut self, zone_type: ZoneType, pattern: &str) -> Result<Self> {
        let re = Regex::new(pattern).map_err(|e| {
            ExportError::InvalidConfiguration(format!("content pattern for {zone_type}: {e}"))
        })?;
        self.patterns.insert(zone_type, re);
        Ok(self)
    }

    /// Issues for one zone's content
    pub fn check_zone(&self, zone: &Zone) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let content = zone.content.as_str();
        if content.is_empty() {
            return issues;
        }

        let issue = |code: ErrorCode, message: String| {
            ValidationIssue::new(code, "content", message).with_zone(&zone.id)
        };

        if self.checks.contains(ContentChecks::CONTROL) {
            if content.contains('\0') {
                issues.push(issue(
                    ErrorCode::ContentEncoding,
                    "content contains NUL bytes and looks like a binary payload".to_string(),
                ));
            }
            let forbidden: Vec<String> = content
                .char_indices()
                .filter(|(_, c)| is_forbidden_control(*c))
                .take(5)
                .map(|(idx, c)| format!("U+{:04X} at {idx}", c as u32))
                .collect();
            if !forbidden.is_empty() {
                issues.push(issue(
                    ErrorCode::ForbiddenControl,
                    format!("forbidden control characters: {}", forbidden.join(", ")),
                ));
            }
        }

        if self.checks.contains(ContentChecks::ENCODING) && self.strict_ascii {
            if let Some((idx, c)) = content.char_indices().find(|(_, c)| !c.is_ascii()) {
                issues.push(issue(
                    ErrorCode::ContentEncoding,
                    format!("non-ASCII character U+{:04X} at {idx}", c as u32),
                ));
            }
        }

        if self.checks.contains(ContentChecks::NORMALIZATION) && !is_nfc(content) {
            issues.push(
                issue(
                    ErrorCode::ContentEncoding,
                    "content is not in Unicode normalization form C".to_string(),
                )
                .with_severity(Severity::Warning),
            );
        }

        if self.checks.contains(ContentChecks::TABLE) && zone.zone_type == ZoneType::Table {
            if let Some(message) = table_inconsistency(content) {
                issues.push(issue(ErrorCode::TableInconsistent, message));
            }
        }

        if self.checks.contains(ContentChecks::PATTERN) {
            if let Some(re) = self.patterns.get(&zone.zone_type) {
                if !re.is_match(content) {
                    issues.push(issue(
                        ErrorCode::PatternMismatch,
                        format!(
                            "content does not match the {} pattern '{}'",
                            zone.zone_type,
                            re.as_str()
                        ),
                    ));
                }
            }
            if let Some(declared) = zone.metadata.get(PATTERN_KEY).and_then(|v| v.as_str()) {
                match Regex::new(declared) {
                    Ok(re) if !re.is_match(content) => issues.push(issue(
                        ErrorCode::PatternMismatch,
                        format!("content does not match its declared pattern '{declared}'"),
                    )),
                    Ok(_) => {}
                    Err(e) => issues.push(
                        ValidationIssue::new(
                            ErrorCode::MetadataFormat,
                            format!("metadata.{PATTERN_KEY}"),
                            format!("declared pattern is not a valid regex: {e}"),
                        )
                        .with_zone(&zone.id),
                    ),
                }
            }
        }

        issues
    }
}

/// C0 controls other than tab, LF and CR, plus DEL
fn is_forbidden_control(c: char) -> bool {
    c.is_control() && (c as u32) < 0x80 && !matches!(c, '\t' | '\n' | '\r' | '\0')
}

/// Column counts must agree across rows. Pipe tables count cells between
/// `|`; otherwise tab-separated cells are counted.
fn table_inconsistency(content: &str) -> Option<String> {
    let rows: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
    if rows.len() < 2 {
        return None;
    }

    let piped = rows.iter().any(|r| r.contains('|'));
    let columns: Vec<usize> = rows
        .iter()
        .map(|row| {
            if piped {
                row.trim().trim_start_matches('|').trim_end_matches('|').split('|').count()
            } else {
                row.split('\t').count()
            }
        })
        .collect();

    let expected = columns[0];
    let mismatched: Vec<String> = columns
        .iter()
        .enumerate()
        .filter(|(_, count)| **count != expected)
        .map(|(idx, count)| format!("row {} has {count}", idx + 1))
        .collect();

    if mismatched.is_empty() {
        None
    } else {
        Some(format!(
            "expected {expected} columns per row; {}",
            mismatched.join(", ")
        ))
    }
}

impl Validator for ContentValidator {
    fn name(&self) -> &'static str {
        "content"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationResult {
        let escalated;
        let validator = if ctx.level.requires_ascii() && !self.strict_ascii {
            escalated = self.clone().with_strict_ascii(true);
            &escalated
        } else {
            self
        };
        ValidationResult::from_issues(
            ctx.zones
                .iter()
                .flat_map(|z| validator.check_zone(z))
                .collect::<Vec<_>>(),
        )
    }
}
