//! Progress tracking for batch operations

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Point-in-time view of a batch, handed to progress callbacks
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressInfo {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub running: usize,
    pub elapsed: Duration,
    /// Item whose completion produced this snapshot
    pub current_item: Option<String>,
}

impl ProgressInfo {
    pub fn processed(&self) -> usize {
        self.succeeded + self.failed
    }

    /// Processed items (successful or failed) as a percentage of the total
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.processed() as f64 / self.total as f64 * 100.0
    }

    pub fn is_complete(&self) -> bool {
        self.processed() >= self.total
    }

    /// Items per second
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.processed() as f64 / secs
        } else {
            0.0
        }
    }

    pub fn estimated_remaining(&self) -> Option<Duration> {
        let throughput = self.throughput();
        if self.processed() == 0 || throughput <= 0.0 {
            return None;
        }
        let left = self.total.saturating_sub(self.processed());
        Some(Duration::from_secs_f64(left as f64 / throughput))
    }
}

impl fmt::Display for ProgressInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} ({:.1}%), {} in flight, {} failed",
            self.processed(),
            self.total,
            self.percentage(),
            self.running,
            self.failed
        )
    }
}

/// Counters shared between the submitting thread and the workers
pub struct BatchProgress {
    total: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    running: AtomicUsize,
    started: Instant,
}

impl Default for BatchProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchProgress {
    pub fn new() -> Self {
        Self {
            total: AtomicUsize::new(0),
            succeeded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            started: Instant::now(),
        }
    }

    pub fn register(&self, count: usize) {
        self.total.fetch_add(count, Ordering::SeqCst);
    }

    pub fn begin(&self) {
        self.running.fetch_add(1, Ordering::SeqCst);
    }

    pub fn succeed(&self) {
        self.finish(&self.succeeded);
    }

    pub fn fail(&self) {
        self.finish(&self.failed);
    }

    fn finish(&self, bucket: &AtomicUsize) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        bucket.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> ProgressInfo {
        ProgressInfo {
            total: self.total.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            running: self.running.load(Ordering::SeqCst),
            elapsed: self.started.elapsed(),
            current_item: None,
        }
    }
}

/// Receives a snapshot each time an item finishes
pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, info: &ProgressInfo);
}

impl<F> ProgressCallback for F
where
    F: Fn(&ProgressInfo) + Send + Sync,
{
    fn on_progress(&self, info: &ProgressInfo) {
        self(info)
    }
}
