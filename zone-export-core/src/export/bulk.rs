//! Exports of several documents under one request
//!
//! Each document runs as its own [`ExportRequest`] against the same audit
//! trail. A document that fails does not stop the others; its error is kept
//! in [`BulkExportResult::failures`].

use super::{ExportBundle, ExportFormat, ExportRequest, ExportStats, ExportType};
use crate::error::{ErrorCode, ExportError, Result};
use crate::selection::SelectionCriteria;
use crate::validation::ValidationLevel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Most documents one bulk request may name
pub const MAX_BULK_DOCUMENTS: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkExportRequest {
    pub document_ids: Vec<String>,
    #[serde(default)]
    pub export_type: ExportType,
    #[serde(default = "super::default_formats")]
    pub formats: Vec<ExportFormat>,
    #[serde(default)]
    pub criteria: SelectionCriteria,
    /// Write every document's files into one directory, prefixed by document id
    #[serde(default)]
    pub combine_files: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_level: Option<ValidationLevel>,
    #[serde(default = "super::default_actor")]
    pub actor: String,
}

impl BulkExportRequest {
    pub fn new<I, S>(document_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            document_ids: document_ids.into_iter().map(Into::into).collect(),
            export_type: ExportType::Full,
            formats: super::default_formats(),
            criteria: SelectionCriteria::default(),
            combine_files: false,
            validation_level: None,
            actor: super::default_actor(),
        }
    }

    pub fn with_type(mut self, export_type: ExportType) -> Self {
        self.export_type = export_type;
        self
    }

    pub fn with_formats(mut self, formats: impl IntoIterator<Item = ExportFormat>) -> Self {
        self.formats = formats.into_iter().collect();
        self
    }

    pub fn with_criteria(mut self, criteria: SelectionCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    pub fn with_combined_files(mut self, combine: bool) -> Self {
        self.combine_files = combine;
        self
    }

    pub fn with_validation_level(mut self, level: ValidationLevel) -> Self {
        self.validation_level = Some(level);
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.document_ids.is_empty() {
            return Err(ExportError::InvalidConfiguration(
                "bulk export needs at least one document".to_string(),
            ));
        }
        if self.document_ids.len() > MAX_BULK_DOCUMENTS {
            return Err(ExportError::InvalidConfiguration(format!(
                "bulk export is limited to {MAX_BULK_DOCUMENTS} documents, got {}",
                self.document_ids.len()
            )));
        }
        let mut seen = BTreeSet::new();
        for id in &self.document_ids {
            if !seen.insert(id.as_str()) {
                return Err(ExportError::InvalidConfiguration(format!(
                    "document '{id}' appears more than once"
                )));
            }
        }
        self.requests().iter().try_for_each(ExportRequest::validate)
    }

    /// One request per document, in the order given
    pub fn requests(&self) -> Vec<ExportRequest> {
        self.document_ids
            .iter()
            .map(|id| {
                let mut request = ExportRequest::new(id.clone())
                    .with_type(self.export_type)
                    .with_formats(self.formats.iter().copied())
                    .with_criteria(self.criteria.clone())
                    .with_actor(self.actor.clone());
                request.validation_level = self.validation_level;
                request
            })
            .collect()
    }
}

/// A document whose run returned an error instead of a bundle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkExportFailure {
    pub document_id: String,
    pub code: ErrorCode,
    pub message: String,
}

impl BulkExportFailure {
    pub fn new(document_id: impl Into<String>, error: &ExportError) -> Self {
        Self {
            document_id: document_id.into(),
            code: error.code(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BulkExportResult {
    pub bundles: Vec<ExportBundle>,
    pub failures: Vec<BulkExportFailure>,
    pub stats: ExportStats,
    pub combine_files: bool,
}

impl BulkExportResult {
    pub fn is_complete_success(&self) -> bool {
        self.failures.is_empty() && self.stats.completed == self.bundles.len()
    }
}
