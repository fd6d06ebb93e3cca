//! Bounded parallel execution for per-zone and per-record work
//!
//! Chunk generation and batch schema validation fan out through a fixed-size
//! worker pool fed from a task queue. Results are collected by a single
//! collector thread and returned in submission order.
//!
//! # Features
//!
//! - **Bounded parallelism**: worker count defaults to available cores, capped at 8
//! - **Progress tracking**: atomic counters plus an optional callback per finished job
//! - **Error collection**: failures, panics included, are recorded per job without stopping the batch
//! - **Cancellation**: a shared flag checked before each job starts
//!
//! # Example
//!
//! ```rust
//! use zone_export::batch::{BatchJob, BatchOptions, BatchProcessor};
//!
//! let mut processor = BatchProcessor::new(BatchOptions::default().with_parallelism(2));
//! for i in 0..4usize {
//!     processor.add_job(BatchJob::new(format!("job {i}"), move || Ok(i * i)));
//! }
//!
//! let summary = processor.execute();
//! assert_eq!(summary.successful, 4);
//! ```

use crate::error::Result;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

pub mod job;
pub mod progress;
pub mod result;
pub mod worker;

pub use job::BatchJob;
pub use progress::{BatchProgress, ProgressCallback, ProgressInfo};
pub use result::{BatchSummary, JobResult};
pub use worker::{WorkerOptions, WorkerPool};

/// Default worker count: available parallelism, capped at 8
pub fn default_parallelism() -> usize {
    num_cpus::get().clamp(1, 8)
}

/// Options for batch processing
#[derive(Clone)]
pub struct BatchOptions {
    pub parallelism: usize,
    pub stop_on_error: bool,
    pub progress_callback: Option<Arc<dyn ProgressCallback>>,
    pub job_timeout: Option<Duration>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            stop_on_error: false,
            progress_callback: None,
            job_timeout: None,
        }
    }
}

impl BatchOptions {
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ProgressInfo) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(callback));
        self
    }

    pub fn stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }
}

/// Collects jobs and runs them on a fresh worker pool
pub struct BatchProcessor<T> {
    options: BatchOptions,
    jobs: Vec<BatchJob<T>>,
    cancelled: Arc<AtomicBool>,
    progress: Arc<BatchProgress>,
}

impl<T: Send + 'static> BatchProcessor<T> {
    pub fn new(options: BatchOptions) -> Self {
        Self {
            options,
            jobs: Vec::new(),
            cancelled: Arc::new(AtomicBool::new(false)),
            progress: Arc::new(BatchProgress::new()),
        }
    }

    /// Share a cancellation flag owned by the caller
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = flag;
        self
    }

    pub fn add_job(&mut self, job: BatchJob<T>) {
        self.jobs.push(job);
        self.progress.register(1);
    }

    pub fn add_jobs(&mut self, jobs: impl IntoIterator<Item = BatchJob<T>>) {
        for job in jobs {
            self.add_job(job);
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn get_progress(&self) -> ProgressInfo {
        self.progress.snapshot()
    }

    pub fn execute(self) -> BatchSummary<T> {
        let start_time = Instant::now();
        let total_jobs = self.jobs.len();

        if total_jobs == 0 {
            return BatchSummary::empty();
        }

        let pool = WorkerPool::new(WorkerOptions {
            num_workers: self.options.parallelism.min(total_jobs),
            job_timeout: self.options.job_timeout,
        });

        let results = pool.process_jobs(
            self.jobs,
            Arc::clone(&self.progress),
            Arc::clone(&self.cancelled),
            self.options.stop_on_error,
            self.options.progress_callback.clone(),
        );

        let successful = results.iter().filter(|r| r.is_success()).count();
        let failed = results.iter().filter(|r| r.is_failed()).count();

        tracing::debug!(
            total_jobs,
            successful,
            failed,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "batch finished"
        );

        BatchSummary {
            total_jobs,
            successful,
            failed,
            cancelled: self.cancelled.load(Ordering::SeqCst),
            duration: start_time.elapsed(),
            results,
        }
    }
}

/// Apply `operation` to every item on a bounded pool
pub fn batch_map<I, T, F>(
    items: Vec<I>,
    name: impl Fn(usize, &I) -> String,
    operation: F,
    options: BatchOptions,
) -> BatchSummary<T>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> Result<T> + Clone + Send + 'static,
{
    let mut processor = BatchProcessor::new(options);

    for (idx, item) in items.into_iter().enumerate() {
        let op = operation.clone();
        processor.add_job(BatchJob::new(name(idx, &item), move || op(item)));
    }

    processor.execute()
}
