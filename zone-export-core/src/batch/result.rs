//! Results and summaries for batch operations

use crate::error::ExportError;
use std::fmt;
use std::time::Duration;

/// Result of a single job in the batch
#[derive(Debug)]
pub enum JobResult<T> {
    Success {
        job_name: String,
        duration: Duration,
        output: T,
    },

    Failed {
        job_name: String,
        duration: Duration,
        error: ExportError,
    },

    Cancelled { job_name: String },
}

impl<T> JobResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, JobResult::Success { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, JobResult::Failed { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobResult::Cancelled { .. })
    }

    pub fn job_name(&self) -> &str {
        match self {
            JobResult::Success { job_name, .. }
            | JobResult::Failed { job_name, .. }
            | JobResult::Cancelled { job_name } => job_name,
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        match self {
            JobResult::Success { duration, .. } | JobResult::Failed { duration, .. } => {
                Some(*duration)
            }
            JobResult::Cancelled { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&ExportError> {
        match self {
            JobResult::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn output(&self) -> Option<&T> {
        match self {
            JobResult::Success { output, .. } => Some(output),
            _ => None,
        }
    }
}

impl<T> fmt::Display for JobResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobResult::Success {
                job_name, duration, ..
            } => write!(
                f,
                "✓ {job_name} - completed in {:.2}s",
                duration.as_secs_f64()
            ),
            JobResult::Failed {
                job_name,
                duration,
                error,
            } => write!(
                f,
                "✗ {job_name} - failed after {:.2}s: {error}",
                duration.as_secs_f64()
            ),
            JobResult::Cancelled { job_name } => write!(f, "⚠ {job_name} - cancelled"),
        }
    }
}

/// Summary of a batch operation, results in submission order
#[derive(Debug)]
pub struct BatchSummary<T> {
    pub total_jobs: usize,
    pub successful: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub duration: Duration,
    pub results: Vec<JobResult<T>>,
}

impl<T> BatchSummary<T> {
    pub fn empty() -> Self {
        Self {
            total_jobs: 0,
            successful: 0,
            failed: 0,
            cancelled: false,
            duration: Duration::from_secs(0),
            results: Vec::new(),
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_jobs == 0 {
            100.0
        } else {
            (self.successful as f64 / self.total_jobs as f64) * 100.0
        }
    }

    pub fn average_duration(&self) -> Option<Duration> {
        let durations: Vec<_> = self.results.iter().filter_map(|r| r.duration()).collect();

        if durations.is_empty() {
            None
        } else {
            let total: Duration = durations.iter().sum();
            Some(total / durations.len() as u32)
        }
    }

    /// Failed jobs as `(name, error)` pairs
    pub fn errors(&self) -> Vec<(&str, &ExportError)> {
        self.results
            .iter()
            .filter_map(|r| match r {
                JobResult::Failed {
                    job_name, error, ..
                } => Some((job_name.as_str(), error)),
                _ => None,
            })
            .collect()
    }

    pub fn format_report(&self) -> String {
        let mut report = format!(
            "Batch Summary\n\
             =============\n\
             Total Jobs: {}\n\
             Successful: {} ({:.1}%)\n\
             Failed: {}\n\
             Duration: {:.2}s\n",
            self.total_jobs,
            self.successful,
            self.success_rate(),
            self.failed,
            self.duration.as_secs_f64()
        );

        if self.cancelled {
            report.push_str("\nBatch was cancelled\n");
        }

        let failed: Vec<_> = self.results.iter().filter(|r| r.is_failed()).collect();
        if !failed.is_empty() {
            report.push_str("\nFailed Jobs:\n");
            for job in failed {
                report.push_str(&format!("  - {job}\n"));
            }
        }

        report
    }
}

impl<T> fmt::Display for BatchSummary<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_report())
    }
}
