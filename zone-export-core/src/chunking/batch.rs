//! Windowed batch chunking across many zones

use super::{ChunkGenerator, ExportChunk};
use crate::batch::{BatchJob, BatchOptions, BatchProcessor, JobResult, ProgressInfo};
use crate::error::{ExportError, Result};
use crate::events::CancellationToken;
use crate::zone::Zone;
use std::time::Instant;

/// Destination for chunks as each window completes
pub trait ChunkSink {
    fn accept(&mut self, chunks: Vec<ExportChunk>) -> Result<()>;
}

impl ChunkSink for Vec<ExportChunk> {
    fn accept(&mut self, chunks: Vec<ExportChunk>) -> Result<()> {
        self.extend(chunks);
        Ok(())
    }
}

/// A zone that produced no chunks
#[derive(Debug)]
pub struct ZoneFailure {
    pub zone_id: String,
    pub error: ExportError,
}

/// Outcome of a batch chunking pass
#[derive(Debug, Default)]
pub struct BatchChunkReport {
    pub zones_total: usize,
    pub zones_chunked: usize,
    pub chunks_emitted: usize,
    pub windows: usize,
    pub failures: Vec<ZoneFailure>,
    /// Zones never attempted because of cancellation or a hard stop
    pub skipped_zone_ids: Vec<String>,
    pub cancelled: bool,
    /// The failure limit was exceeded and remaining windows were skipped
    pub hard_stopped: bool,
}

impl ChunkGenerator {
    /// Chunk many zones in memory-bounded windows.
    ///
    /// Zones within a window run on the worker pool; chunks reach `sink` in
    /// zone order. Cancellation is checked between windows. Failed zones are
    /// recorded and the batch continues unless the failure limit is exceeded
    /// (`continue_on_error == false` means a limit of zero).
    pub fn generate_batch(
        &self,
        document_id: &str,
        zones: &[Zone],
        sink: &mut dyn ChunkSink,
        cancel: &CancellationToken,
    ) -> Result<BatchChunkReport> {
        self.options.validate()?;

        let failure_limit = if self.options.continue_on_error {
            self.options.max_zone_failures
        } else {
            Some(0)
        };

        let windows = plan_windows(zones, self.options.memory_limit_bytes);
        let mut report = BatchChunkReport {
            zones_total: zones.len(),
            ..Default::default()
        };
        let started = Instant::now();

        for (window_idx, window) in windows.iter().enumerate() {
            if cancel.is_cancelled() || report.hard_stopped {
                report.cancelled |= cancel.is_cancelled();
                report
                    .skipped_zone_ids
                    .extend(windows[window_idx..].iter().flatten().map(|z| z.id.clone()));
                break;
            }

            let mut processor = BatchProcessor::new(
                BatchOptions::default().with_parallelism(self.options.worker_count),
            );
            for zone in window.iter() {
                let generator = self.clone();
                let document_id = document_id.to_string();
                let zone = (*zone).clone();
                processor.add_job(BatchJob::new(zone.id.clone(), move || {
                    generator.generate(&document_id, &zone)
                }));
            }

            let summary = processor.execute();
            report.windows += 1;

            for result in summary.results {
                match result {
                    JobResult::Success { output, .. } => {
                        report.zones_chunked += 1;
                        report.chunks_emitted += output.len();
                        sink.accept(output)?;
                    }
                    JobResult::Failed {
                        job_name, error, ..
                    } => {
                        tracing::warn!(zone_id = %job_name, error = %error, "zone chunking failed");
                        report.failures.push(ZoneFailure {
                            zone_id: job_name,
                            error,
                        });
                    }
                    JobResult::Cancelled { job_name } => report.skipped_zone_ids.push(job_name),
                }
            }

            if let Some(limit) = failure_limit {
                if report.failures.len() > limit {
                    tracing::warn!(
                        failures = report.failures.len(),
                        limit,
                        "zone failure limit exceeded, stopping batch"
                    );
                    report.hard_stopped = true;
                }
            }

            if let Some(callback) = &self.progress_callback {
                callback.on_progress(&ProgressInfo {
                    total: zones.len(),
                    succeeded: report.zones_chunked,
                    failed: report.failures.len(),
                    running: 0,
                    elapsed: started.elapsed(),
                    current_item: window.last().map(|z| z.id.clone()),
                });
            }
        }

        tracing::debug!(
            windows = report.windows,
            chunks = report.chunks_emitted,
            failures = report.failures.len(),
            "batch chunking finished"
        );

        Ok(report)
    }
}

/// Group zones so each window's content stays under `limit` bytes.
/// A single oversized zone gets a window of its own.
fn plan_windows(zones: &[Zone], limit: usize) -> Vec<Vec<&Zone>> {
    let mut windows = Vec::new();
    let mut current: Vec<&Zone> = Vec::new();
    let mut current_bytes = 0usize;

    for zone in zones {
        let size = zone.content.len();
        if !current.is_empty() && current_bytes + size > limit {
            windows.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current.push(zone);
        current_bytes += size;
    }
    if !current.is_empty() {
        windows.push(current);
    }
    windows
}
