//! Aggregate statistics over export runs and the files they wrote

use super::{ExportFile, ExportFormat, ExportRun, ExportStatus, ExportType};
use crate::report::human_size;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportStats {
    pub total_exports: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Runs not yet in a terminal status
    pub active: usize,
    pub exports_by_type: BTreeMap<ExportType, usize>,
    pub exports_by_status: BTreeMap<ExportStatus, usize>,
    /// Requested formats, counted once per run
    pub exports_by_format: BTreeMap<ExportFormat, usize>,
    /// Mean wall time of finished runs
    pub average_export_ms: Option<f64>,
    pub total_file_size: u64,
    pub total_file_size_human: String,
}

impl Default for ExportStats {
    fn default() -> Self {
        Self {
            total_exports: 0,
            completed: 0,
            failed: 0,
            cancelled: 0,
            active: 0,
            exports_by_type: BTreeMap::new(),
            exports_by_status: BTreeMap::new(),
            exports_by_format: BTreeMap::new(),
            average_export_ms: None,
            total_file_size: 0,
            total_file_size_human: human_size(0),
        }
    }
}

impl ExportStats {
    pub fn from_runs<'a>(runs: impl IntoIterator<Item = &'a ExportRun>) -> Self {
        let mut stats = Self::default();
        let mut durations = Vec::new();
        for run in runs {
            stats.count(run.export_type, run.status);
            for format in &run.formats {
                *stats.exports_by_format.entry(*format).or_default() += 1;
            }
            if let Some(ms) = run.duration_ms() {
                durations.push(ms.max(0) as f64);
            }
        }
        if !durations.is_empty() {
            stats.average_export_ms = Some(durations.iter().sum::<f64>() / durations.len() as f64);
        }
        stats
    }

    /// Count a run that failed before it could hand back its record
    pub fn record_failed_run(&mut self, export_type: ExportType) {
        self.count(export_type, ExportStatus::Failed);
    }

    pub fn with_files(mut self, files: &[ExportFile]) -> Self {
        self.total_file_size = files.iter().map(|f| f.size_bytes).sum();
        self.total_file_size_human = human_size(self.total_file_size);
        self
    }

    /// Completed runs as a percentage of the finished ones
    pub fn success_rate(&self) -> f64 {
        let finished = self.completed + self.failed + self.cancelled;
        if finished == 0 {
            return 0.0;
        }
        self.completed as f64 / finished as f64 * 100.0
    }

    fn count(&mut self, export_type: ExportType, status: ExportStatus) {
        self.total_exports += 1;
        match status {
            ExportStatus::Completed => self.completed += 1,
            ExportStatus::Failed => self.failed += 1,
            ExportStatus::Cancelled => self.cancelled += 1,
            ExportStatus::Pending | ExportStatus::Processing => self.active += 1,
        }
        *self.exports_by_type.entry(export_type).or_default() += 1;
        *self.exports_by_status.entry(status).or_default() += 1;
    }
}
