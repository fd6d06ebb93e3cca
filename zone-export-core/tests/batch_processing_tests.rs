//! Integration tests for batch processing and memory-bounded chunking

use pretty_assertions::assert_eq;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use zone_export::batch::{batch_map, BatchJob, BatchOptions, BatchProcessor, JobResult};
use zone_export::chunking::ExportChunk;
use zone_export::events::CancellationToken;
use zone_export::{
    ChunkGenerator, ChunkOptions, ExportError, Zone, ZoneCoordinates, ZoneStatus, ZoneType,
};

fn text_zone(i: usize, words: usize) -> Zone {
    let content = (0..words)
        .map(|w| format!("word{w}"))
        .collect::<Vec<_>>()
        .join(" ");
    Zone::new(
        format!("z{i:03}"),
        (i / 10) as u32 + 1,
        ZoneCoordinates::new(0.0, (i % 10) as f64 * 50.0, 300.0, 40.0),
        ZoneType::Text,
    )
    .with_content(content)
    .with_confidence(0.9)
    .with_status(ZoneStatus::Completed)
    .with_processing("tesseract", Some(1))
}

#[test]
fn test_batch_processor_basic() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mut processor = BatchProcessor::new(BatchOptions::default().with_parallelism(3));

    for i in 0..10usize {
        let counter = Arc::clone(&counter);
        processor.add_job(BatchJob::new(format!("job {i}"), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(i * 2)
        }));
    }

    let summary = processor.execute();
    assert_eq!(summary.total_jobs, 10);
    assert_eq!(summary.successful, 10);
    assert_eq!(counter.load(Ordering::SeqCst), 10);

    let outputs: Vec<usize> = summary
        .results
        .iter()
        .filter_map(|r| r.output().copied())
        .collect();
    assert_eq!(outputs, (0..10).map(|i| i * 2).collect::<Vec<_>>());
}

#[test]
fn test_batch_collects_failures() {
    let summary = batch_map(
        (0..6usize).collect(),
        |i, _| format!("item {i}"),
        |i| {
            if i % 3 == 0 {
                Err(ExportError::ContentEmpty)
            } else {
                Ok(i)
            }
        },
        BatchOptions::default().with_parallelism(2),
    );

    assert_eq!(summary.successful, 4);
    assert_eq!(summary.failed, 2);
    let failed: Vec<&str> = summary.errors().iter().map(|(name, _)| *name).collect();
    assert_eq!(failed, vec!["item 0", "item 3"]);
    assert!(summary.format_report().contains("Failed Jobs"));
}

#[test]
fn test_progress_callback_reaches_completion() {
    let last = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&last);
    let options = BatchOptions::default()
        .with_parallelism(2)
        .with_progress_callback(move |info| {
            seen.fetch_max(info.succeeded, Ordering::SeqCst);
        });

    let summary = batch_map((0..8usize).collect(), |i, _| format!("{i}"), Ok, options);
    assert_eq!(summary.successful, 8);
    assert_eq!(last.load(Ordering::SeqCst), 8);
}

#[test]
fn test_cancelled_before_start() {
    let flag = Arc::new(AtomicBool::new(true));
    let mut processor =
        BatchProcessor::new(BatchOptions::default().with_parallelism(2)).with_cancel_flag(flag);
    for i in 0..4usize {
        processor.add_job(BatchJob::new(format!("job {i}"), move || Ok(i)));
    }

    let summary = processor.execute();
    assert!(summary.cancelled);
    assert_eq!(summary.successful, 0);
    assert!(summary
        .results
        .iter()
        .all(|r| matches!(r, JobResult::Cancelled { .. })));
}

#[test]
fn test_chunking_in_memory_windows_keeps_order() {
    let zones: Vec<Zone> = (0..25).map(|i| text_zone(i, 40)).collect();
    let generator = ChunkGenerator::new(
        ChunkOptions::default()
            .with_chunk_size(120)
            .with_memory_limit(1_000),
    );

    let mut chunks: Vec<ExportChunk> = Vec::new();
    let report = generator
        .generate_batch("doc", &zones, &mut chunks, &CancellationToken::new())
        .unwrap();

    assert!(report.windows > 1);
    assert_eq!(report.zones_chunked, 25);
    assert_eq!(report.chunks_emitted, chunks.len());

    let mut zone_order: Vec<&str> = chunks.iter().map(|c| c.metadata.zone_id.as_str()).collect();
    zone_order.dedup();
    let expected: Vec<String> = zones.iter().map(|z| z.id.clone()).collect();
    assert_eq!(zone_order, expected);
}

#[test]
fn test_chunking_cancelled_skips_everything() {
    let zones: Vec<Zone> = (0..5).map(|i| text_zone(i, 10)).collect();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut chunks: Vec<ExportChunk> = Vec::new();
    let report = ChunkGenerator::new(ChunkOptions::default())
        .generate_batch("doc", &zones, &mut chunks, &cancel)
        .unwrap();

    assert!(report.cancelled);
    assert!(chunks.is_empty());
    assert_eq!(report.skipped_zone_ids.len(), 5);
}
