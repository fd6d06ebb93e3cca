//! Worker pool for parallel batch processing

use crate::batch::{BatchJob, BatchProgress, JobResult, ProgressCallback};
use crate::error::ExportError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Options for worker pool
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Number of worker threads
    pub num_workers: usize,
    /// Jobs running longer than this are reported as timed out
    pub job_timeout: Option<Duration>,
}

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of threads pulling tasks from a shared queue.
///
/// Workers exit once the queue is closed, which happens when
/// [`WorkerPool::process_jobs`] has submitted every job.
pub struct WorkerPool {
    workers: Vec<Worker>,
    sender: mpsc::Sender<Task>,
    job_timeout: Option<Duration>,
}

impl WorkerPool {
    pub fn new(options: WorkerOptions) -> Self {
        let (sender, receiver) = mpsc::channel();
        let receiver = Arc::new(Mutex::new(receiver));

        let num_workers = options.num_workers.max(1);
        let workers = (0..num_workers)
            .map(|id| Worker::new(id, Arc::clone(&receiver)))
            .collect();

        Self {
            workers,
            sender,
            job_timeout: options.job_timeout,
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Run every job and return one result per job, in submission order
    pub fn process_jobs<T: Send + 'static>(
        self,
        jobs: Vec<BatchJob<T>>,
        progress: Arc<BatchProgress>,
        cancelled: Arc<AtomicBool>,
        stop_on_error: bool,
        callback: Option<Arc<dyn ProgressCallback>>,
    ) -> Vec<JobResult<T>> {
        let num_jobs = jobs.len();
        let names: Vec<String> = jobs.iter().map(|job| job.name.clone()).collect();
        let (result_sender, result_receiver) = mpsc::channel::<(usize, JobResult<T>)>();

        // Results arrive out of order; the collector slots them by index
        let results_handle = thread::spawn(move || {
            let mut results: Vec<Option<JobResult<T>>> = (0..num_jobs).map(|_| None).collect();
            for (idx, result) in result_receiver {
                results[idx] = Some(result);
            }
            results
        });

        for (idx, job) in jobs.into_iter().enumerate() {
            let job_name = job.name.clone();

            if cancelled.load(Ordering::SeqCst) {
                let _ = result_sender.send((idx, JobResult::Cancelled { job_name }));
                continue;
            }

            let progress = Arc::clone(&progress);
            let cancelled = Arc::clone(&cancelled);
            let result_sender = result_sender.clone();
            let callback = callback.clone();
            let timeout = self.job_timeout;

            let task: Task = Box::new(move || {
                if cancelled.load(Ordering::SeqCst) {
                    let _ = result_sender.send((idx, JobResult::Cancelled { job_name }));
                    return;
                }

                progress.begin();
                let start = Instant::now();
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| job.run()))
                    .unwrap_or_else(|payload| {
                        Err(ExportError::JobPanicked {
                            job_name: job_name.clone(),
                            message: panic_message(payload.as_ref()),
                        })
                    });
                let duration = start.elapsed();

                let outcome = match (outcome, timeout) {
                    (Ok(_), Some(limit)) if duration > limit => Err(ExportError::PhaseTimeout {
                        phase: job_name.clone(),
                        elapsed_ms: duration.as_millis() as u64,
                        limit_ms: limit.as_millis() as u64,
                    }),
                    (outcome, _) => outcome,
                };

                let result = match outcome {
                    Ok(output) => {
                        progress.succeed();
                        JobResult::Success {
                            job_name: job_name.clone(),
                            duration,
                            output,
                        }
                    }
                    Err(error) => {
                        progress.fail();
                        if stop_on_error {
                            cancelled.store(true, Ordering::SeqCst);
                        }
                        JobResult::Failed {
                            job_name: job_name.clone(),
                            duration,
                            error,
                        }
                    }
                };

                if let Some(callback) = &callback {
                    let mut info = progress.snapshot();
                    info.current_item = Some(job_name);
                    callback.on_progress(&info);
                }

                let _ = result_sender.send((idx, result));
            });

            if self.sender.send(task).is_err() {
                break;
            }
        }

        // Closing both channels lets workers and the collector drain and exit
        drop(result_sender);
        drop(self.sender);

        for worker in self.workers {
            worker.join();
        }

        // A job that never reported back still gets a result under its name
        let slots = results_handle
            .join()
            .unwrap_or_else(|_| (0..num_jobs).map(|_| None).collect());
        slots
            .into_iter()
            .zip(names)
            .map(|(slot, job_name)| {
                slot.unwrap_or_else(|| {
                    tracing::warn!(job = %job_name, "job produced no result");
                    JobResult::Failed {
                        error: ExportError::JobPanicked {
                            job_name: job_name.clone(),
                            message: "worker exited before reporting a result".to_string(),
                        },
                        job_name,
                        duration: Duration::ZERO,
                    }
                })
            })
            .collect()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

struct Worker {
    thread: Option<thread::JoinHandle<()>>,
}

impl Worker {
    fn new(id: usize, receiver: Arc<Mutex<mpsc::Receiver<Task>>>) -> Self {
        let thread = thread::Builder::new()
            .name(format!("zone-export-worker-{id}"))
            .spawn(move || loop {
                let message = match receiver.lock() {
                    Ok(receiver) => receiver.recv(),
                    Err(_) => break,
                };

                match message {
                    Ok(task) => task(),
                    Err(_) => break,
                }
            });

        match thread {
            Ok(handle) => Self {
                thread: Some(handle),
            },
            Err(e) => {
                tracing::warn!("failed to spawn worker {id}: {e}");
                Self { thread: None }
            }
        }
    }

    fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn pool(workers: usize) -> WorkerPool {
        WorkerPool::new(WorkerOptions {
            num_workers: workers,
            job_timeout: None,
        })
    }

    fn tracked(progress: &BatchProgress, count: usize) {
        progress.register(count);
    }

    #[test]
    fn test_worker_pool_creation() {
        assert_eq!(pool(2).size(), 2);
        assert_eq!(pool(0).size(), 1);
    }

    #[test]
    fn test_panicking_job_reported_as_failure() {
        let progress = Arc::new(BatchProgress::new());
        let cancelled = Arc::new(AtomicBool::new(false));

        let jobs: Vec<BatchJob<usize>> = vec![
            BatchJob::new("first", || Ok(1)),
            BatchJob::new("explodes", || panic!("boom")),
            BatchJob::new("last", || Ok(3)),
        ];
        tracked(&progress, 3);

        let results = pool(1).process_jobs(jobs, Arc::clone(&progress), cancelled, false, None);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].output(), Some(&1));
        assert_eq!(results[1].job_name(), "explodes");
        match results[1].error() {
            Some(ExportError::JobPanicked { job_name, message }) => {
                assert_eq!(job_name, "explodes");
                assert_eq!(message, "boom");
            }
            other => panic!("expected a panic failure, got {other:?}"),
        }
        assert_eq!(results[2].output(), Some(&3));

        let info = progress.snapshot();
        assert_eq!(info.failed, 1);
        assert_eq!(info.running, 0);
    }

    #[test]
    fn test_worker_pool_empty_jobs() {
        let progress = Arc::new(BatchProgress::new());
        let cancelled = Arc::new(AtomicBool::new(false));

        let results = pool(2).process_jobs::<()>(vec![], progress, cancelled, false, None);
        assert!(results.is_empty());
    }

    #[test]
    fn test_results_keep_submission_order() {
        let progress = Arc::new(BatchProgress::new());
        let cancelled = Arc::new(AtomicBool::new(false));

        let jobs: Vec<_> = (0..20usize)
            .map(|i| BatchJob::new(format!("job {i}"), move || Ok(i * 2)))
            .collect();
        tracked(&progress, jobs.len());

        let results = pool(4).process_jobs(jobs, progress, cancelled, false, None);
        let outputs: Vec<usize> = results.iter().filter_map(|r| r.output().copied()).collect();
        assert_eq!(outputs, (0..20).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_worker_pool_with_failures() {
        let progress = Arc::new(BatchProgress::new());
        let cancelled = Arc::new(AtomicBool::new(false));

        let jobs = vec![
            BatchJob::new("ok", || Ok(())),
            BatchJob::new("empty", || Err(ExportError::ContentEmpty)),
        ];
        tracked(&progress, 2);

        let results = pool(1).process_jobs(jobs, Arc::clone(&progress), cancelled, false, None);

        assert_eq!(results.len(), 2);
        assert!(results[0].is_success());
        assert!(results[1].is_failed());

        let info = progress.snapshot();
        assert_eq!(info.succeeded, 1);
        assert_eq!(info.failed, 1);
    }

    #[test]
    fn test_worker_pool_cancellation() {
        let progress = Arc::new(BatchProgress::new());
        let cancelled = Arc::new(AtomicBool::new(true));

        let jobs = vec![BatchJob::new("never runs", || Ok(()))];
        tracked(&progress, 1);

        let results = pool(1).process_jobs(jobs, progress, cancelled, false, None);
        assert_eq!(results.len(), 1);
        assert!(results[0].is_cancelled());
    }

    #[test]
    fn test_stop_on_error_cancels_remaining() {
        let progress = Arc::new(BatchProgress::new());
        let cancelled = Arc::new(AtomicBool::new(false));

        let jobs = vec![
            BatchJob::new("fails", || Err(ExportError::ContentEmpty)),
            BatchJob::new("after", || {
                thread::sleep(Duration::from_millis(5));
                Ok(())
            }),
        ];
        tracked(&progress, 2);

        // A single worker runs jobs sequentially, so the second sees the flag
        let results = pool(1).process_jobs(jobs, progress, Arc::clone(&cancelled), true, None);
        assert!(results[0].is_failed());
        assert!(results[1].is_cancelled());
        assert!(cancelled.load(Ordering::SeqCst));
    }

    #[test]
    fn test_job_timeout_reported() {
        let pool = WorkerPool::new(WorkerOptions {
            num_workers: 1,
            job_timeout: Some(Duration::from_millis(1)),
        });
        let progress = Arc::new(BatchProgress::new());
        let cancelled = Arc::new(AtomicBool::new(false));

        let jobs = vec![BatchJob::new("slow", || {
            thread::sleep(Duration::from_millis(20));
            Ok(())
        })];
        tracked(&progress, 1);

        let results = pool.process_jobs(jobs, progress, cancelled, false, None);
        assert!(matches!(
            results[0].error(),
            Some(ExportError::PhaseTimeout { .. })
        ));
    }

    #[test]
    fn test_callback_sees_every_job() {
        let progress = Arc::new(BatchProgress::new());
        let cancelled = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let callback: Arc<dyn ProgressCallback> =
            Arc::new(move |info: &crate::batch::ProgressInfo| {
                assert!(info.current_item.is_some());
                calls_clone.fetch_add(1, Ordering::SeqCst);
            });

        let jobs: Vec<_> = (0..5).map(|i| BatchJob::new(format!("{i}"), || Ok(()))).collect();
        tracked(&progress, 5);

        pool(2).process_jobs(jobs, progress, cancelled, false, Some(callback));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }
}
