//! Run log documents
//!
//! A run log is built once as a neutral [`LogDocument`] tree and rendered
//! into Markdown, plain text or JSON by visitors in [`render`]. Builders
//! never format for a particular encoding.

pub mod render;

pub use render::{render, JsonRenderer, LogVisitor, MarkdownRenderer, PlainTextRenderer};

use crate::telemetry::PhaseTiming;
use crate::validation::{recovery_suggestion, Severity, ValidationIssue, ValidationReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Target encoding of a rendered log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Structured markup
    #[default]
    Markdown,
    /// Plain text
    #[serde(alias = "plain")]
    Text,
    /// Machine-readable
    Json,
}

impl LogFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            LogFormat::Markdown => "md",
            LogFormat::Text => "txt",
            LogFormat::Json => "json",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Markdown => write!(f, "markdown"),
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Content node of a log document
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogNode {
    Paragraph { text: String },
    Fields { entries: Vec<(String, String)> },
    Table { headers: Vec<String>, rows: Vec<Vec<String>> },
    List { items: Vec<String> },
    Section(LogSection),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogSection {
    pub title: String,
    pub nodes: Vec<LogNode>,
}

impl LogSection {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            nodes: Vec::new(),
        }
    }

    pub fn paragraph(mut self, text: impl Into<String>) -> Self {
        self.nodes.push(LogNode::Paragraph { text: text.into() });
        self
    }

    pub fn fields<K: Into<String>, V: Into<String>>(
        mut self,
        entries: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        self.nodes.push(LogNode::Fields {
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        });
        self
    }

    pub fn table(mut self, headers: &[&str], rows: Vec<Vec<String>>) -> Self {
        self.nodes.push(LogNode::Table {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows,
        });
        self
    }

    pub fn list(mut self, items: Vec<String>) -> Self {
        self.nodes.push(LogNode::List { items });
        self
    }

    pub fn subsection(mut self, section: LogSection) -> Self {
        self.nodes.push(LogNode::Section(section));
        self
    }
}

/// Neutral document tree of one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogDocument {
    pub title: String,
    pub sections: Vec<LogSection>,
}

impl LogDocument {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            sections: Vec::new(),
        }
    }

    pub fn with_section(mut self, section: LogSection) -> Self {
        self.sections.push(section);
        self
    }

    pub fn section(&self, title: &str) -> Option<&LogSection> {
        self.sections.iter().find(|s| s.title == title)
    }

    /// Walk the tree depth first
    pub fn accept(&self, visitor: &mut dyn LogVisitor) {
        visitor.begin_document(&self.title);
        for section in &self.sections {
            visit_section(section, 0, visitor);
        }
        visitor.end_document();
    }
}

fn visit_section(section: &LogSection, depth: usize, visitor: &mut dyn LogVisitor) {
    visitor.begin_section(&section.title, depth);
    for node in &section.nodes {
        match node {
            LogNode::Paragraph { text } => visitor.paragraph(text),
            LogNode::Fields { entries } => visitor.fields(entries),
            LogNode::Table { headers, rows } => visitor.table(headers, rows),
            LogNode::List { items } => visitor.list(items),
            LogNode::Section(child) => visit_section(child, depth + 1, visitor),
        }
    }
    visitor.end_section(depth);
}

/// A statistic with a fixed unit
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Quantity {
    Count(usize),
    Bytes(u64),
    Millis(u64),
    Percent(f64),
    Score(f64),
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantity::Count(n) => write!(f, "{n}"),
            Quantity::Bytes(b) => f.write_str(&human_size(*b)),
            Quantity::Millis(ms) => write!(f, "{ms} ms"),
            Quantity::Percent(p) => write!(f, "{p:.1}%"),
            Quantity::Score(s) => write!(f, "{s:.2}"),
        }
    }
}

/// Size with one decimal in B, KB, MB, GB or TB
pub fn human_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} TB")
}

/// Assembles the log document of an export run
#[derive(Debug, Clone)]
pub struct RunLogBuilder {
    run_id: String,
    document_id: String,
    status: String,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    summary: Vec<(String, String)>,
    timings: Vec<PhaseTiming>,
    issues: Vec<ValidationIssue>,
    statistics: Vec<(String, Quantity)>,
    notes: Vec<String>,
}

impl RunLogBuilder {
    pub fn new(run_id: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            document_id: document_id.into(),
            status: "unknown".to_string(),
            started_at: None,
            finished_at: None,
            summary: Vec::new(),
            timings: Vec::new(),
            issues: Vec::new(),
            statistics: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn status(mut self, status: impl fmt::Display) -> Self {
        self.status = status.to_string();
        self
    }

    pub fn window(mut self, started_at: DateTime<Utc>, finished_at: Option<DateTime<Utc>>) -> Self {
        self.started_at = Some(started_at);
        self.finished_at = finished_at;
        self
    }

    /// Extra summary line
    pub fn summary_field(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.summary.push((key.into(), value.to_string()));
        self
    }

    pub fn phase_timings(mut self, timings: &[PhaseTiming]) -> Self {
        self.timings.extend_from_slice(timings);
        self
    }

    /// Validation issues plus the headline validation statistics
    pub fn validation(mut self, report: &ValidationReport) -> Self {
        self.issues.extend(report.errors().cloned());
        self.issues.extend(report.warnings().cloned());
        self.statistics.extend([
            ("Validation score".to_string(), Quantity::Score(report.score)),
            (
                "Completeness".to_string(),
                Quantity::Percent(report.completeness.completeness_percentage),
            ),
            (
                "Metadata quality".to_string(),
                Quantity::Score(report.metadata_quality),
            ),
            (
                "Blocking score".to_string(),
                Quantity::Score(report.error_summary.blocking_score),
            ),
        ]);
        self
    }

    /// Issues recorded outside validation
    pub fn issues(mut self, issues: impl IntoIterator<Item = ValidationIssue>) -> Self {
        self.issues.extend(issues);
        self
    }

    pub fn statistic(mut self, name: impl Into<String>, value: Quantity) -> Self {
        self.statistics.push((name.into(), value));
        self
    }

    /// Free-form line, such as an omission notice
    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn build(self) -> LogDocument {
        let mut summary = vec![
            ("Run".to_string(), self.run_id.clone()),
            ("Document".to_string(), self.document_id.clone()),
            ("Status".to_string(), self.status.clone()),
        ];
        if let Some(started) = self.started_at {
            summary.push(("Started".to_string(), started.to_rfc3339()));
        }
        if let Some(finished) = self.finished_at {
            summary.push(("Finished".to_string(), finished.to_rfc3339()));
        }
        summary.extend(self.summary);

        let mut summary_section = LogSection::new("Summary").fields(summary);
        if !self.notes.is_empty() {
            summary_section = summary_section.list(self.notes);
        }

        let total_ms: u64 = self.timings.iter().map(|t| t.duration_ms).sum();
        let timing_rows = self
            .timings
            .iter()
            .map(|t| {
                vec![
                    t.phase.clone(),
                    Quantity::Millis(t.duration_ms).to_string(),
                    Quantity::Count(t.items).to_string(),
                    t.category.to_string(),
                ]
            })
            .collect();
        let timings = LogSection::new("Phase timings")
            .table(&["Phase", "Duration", "Items", "Category"], timing_rows)
            .fields([("Total", Quantity::Millis(total_ms).to_string())]);

        let errors = errors_section(&self.issues);

        let statistics = LogSection::new("Statistics").table(
            &["Statistic", "Value"],
            self.statistics
                .iter()
                .map(|(name, value)| vec![name.clone(), value.to_string()])
                .collect(),
        );

        LogDocument::new(format!("Export run {}", self.run_id))
            .with_section(summary_section)
            .with_section(timings)
            .with_section(errors)
            .with_section(statistics)
    }
}

/// One subsection per severity, most severe first, each with its suggestions
fn errors_section(issues: &[ValidationIssue]) -> LogSection {
    let mut section = LogSection::new("Errors");
    if issues.is_empty() {
        return section.paragraph("No errors or warnings were recorded.");
    }

    for severity in [
        Severity::Critical,
        Severity::Error,
        Severity::Warning,
        Severity::Info,
    ] {
        let group: Vec<&ValidationIssue> = issues.iter().filter(|i| i.severity == severity).collect();
        if group.is_empty() {
            continue;
        }

        let rows = group
            .iter()
            .map(|i| {
                vec![
                    i.code.to_string(),
                    i.field.clone(),
                    i.zone_id.clone().unwrap_or_default(),
                    i.message.clone(),
                    if i.recovered { "recovered" } else { "" }.to_string(),
                ]
            })
            .collect();

        let mut suggestions: Vec<String> = Vec::new();
        for issue in &group {
            let suggestion = recovery_suggestion(issue.code).to_string();
            if !suggestions.contains(&suggestion) {
                suggestions.push(suggestion);
            }
        }

        let title = match severity {
            Severity::Critical => "Critical",
            Severity::Error => "Error",
            Severity::Warning => "Warning",
            Severity::Info => "Info",
        };
        section = section.subsection(
            LogSection::new(format!("{title} ({})", group.len()))
                .table(&["Code", "Field", "Zone", "Message", "Recovery"], rows)
                .subsection(LogSection::new("Suggestions").list(suggestions)),
        );
    }
    section
}
