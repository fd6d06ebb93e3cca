//! End-to-end tests for export runs, from zone source to files on disk

use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use zone_export::events::CollectingSink;
use zone_export::export::{BundleWriter, ExportStatus};
use zone_export::selection::SelectionEngine;
use zone_export::{
    AuditTrail, ErrorCode, ExportConfig, ExportFormat, ExportOrchestrator, ExportRequest,
    ExportType, InMemoryZoneSource, LogFormat, ProgressEvent, Zone, ZoneCoordinates, ZoneStatus,
    ZoneType,
};

fn processed(id: &str, page: u32, y: f64, zone_type: ZoneType, content: &str) -> Zone {
    Zone::new(id, page, ZoneCoordinates::new(50.0, y, 400.0, 30.0), zone_type)
        .with_content(content)
        .with_confidence(0.92)
        .with_status(ZoneStatus::Completed)
        .with_processing("tesseract", Some(40))
}

fn annual_report() -> Vec<Zone> {
    vec![
        processed("z-title", 1, 40.0, ZoneType::Header, "Annual Report"),
        processed(
            "z-intro",
            1,
            80.0,
            ZoneType::Text,
            "This report covers the fiscal year. Revenue and margins improved in every region.",
        ),
        processed(
            "z-table",
            2,
            40.0,
            ZoneType::Table,
            "Region | Revenue\nNorth | 120\nSouth | 95\nEast | 143",
        ),
        processed(
            "z-summary",
            2,
            100.0,
            ZoneType::Text,
            "The board proposes a dividend increase for the coming year.",
        ),
        Zone::new(
            "z-figure",
            3,
            ZoneCoordinates::new(50.0, 40.0, 300.0, 200.0),
            ZoneType::Image,
        )
        .with_confidence(0.8)
        .with_status(ZoneStatus::Completed)
        .with_processing("layout", Some(3)),
    ]
}

fn source() -> InMemoryZoneSource {
    let mut source = InMemoryZoneSource::new();
    source.insert("annual-2024", annual_report());
    source
}

fn config() -> ExportConfig {
    ExportConfig::default().with_worker_count(2).with_chunk_size(60)
}

#[test]
fn test_full_run_writes_every_artifact() {
    let temp_dir = TempDir::new().unwrap();
    let mut orchestrator = ExportOrchestrator::new(config()).unwrap();
    let bundle = orchestrator
        .run(&source(), &ExportRequest::new("annual-2024").with_actor("analyst"))
        .unwrap();

    assert_eq!(bundle.status(), ExportStatus::Completed);
    assert!(bundle.run.completed_at.is_some());

    let files = BundleWriter::new().write(&bundle, temp_dir.path()).unwrap();
    assert_eq!(files.len(), 5);
    for file in &files {
        assert!(file.path.exists());
        assert!(file.size_bytes > 0 || file.format == Some(ExportFormat::Training));
    }

    let validation: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(temp_dir.path().join("validation.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(validation["documentId"], json!("annual-2024"));
}

#[test]
fn test_chunks_keep_provenance_and_skip_images() {
    let bundle = ExportOrchestrator::new(config())
        .unwrap()
        .run(&source(), &ExportRequest::new("annual-2024"))
        .unwrap();

    assert!(bundle.chunks.iter().all(|c| c.metadata.document_id == "annual-2024"));
    assert!(bundle.chunks.iter().all(|c| c.metadata.zone_id != "z-figure"));
    assert!(bundle.chunks.iter().all(|c| c.content.chars().count() <= 60));

    let intro: Vec<_> = bundle
        .chunks
        .iter()
        .filter(|c| c.metadata.zone_id == "z-intro")
        .collect();
    assert!(intro.len() > 1);
    assert!(intro.iter().all(|c| c.total_chunks == intro.len()));
    assert!(bundle.omissions.iter().any(|n| n.contains("not chunked")));
}

#[test]
fn test_progress_events_bracket_each_phase() {
    let sink = Arc::new(CollectingSink::new());
    let bundle = ExportOrchestrator::new(config())
        .unwrap()
        .with_event_sink(sink.clone())
        .run(&source(), &ExportRequest::new("annual-2024"))
        .unwrap();

    let events = sink.events();
    let starts: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::PhaseStart { phase, .. } => Some(phase.clone()),
            _ => None,
        })
        .collect();
    let ends = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::PhaseEnd { .. }))
        .count();
    assert_eq!(starts.len(), ends);
    assert_eq!(starts.len(), bundle.timings.len());

    let progress: Vec<f64> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::PhaseProgress { percentage, .. } => Some(*percentage),
            _ => None,
        })
        .collect();
    assert!(!progress.is_empty());
    assert!(progress.iter().all(|p| (0.0..=100.0).contains(p)));
    assert!(matches!(events.last(), Some(ProgressEvent::RunCompleted { .. })));
}

#[test]
fn test_partial_export_from_selection() {
    let zones = annual_report();
    let mut selection = SelectionEngine::new(&zones);
    selection.add_item("z-title");
    selection.add_item("z-table");

    let request = ExportRequest::new("annual-2024").with_selection(&selection);
    assert_eq!(request.export_type, ExportType::Partial);

    let bundle = ExportOrchestrator::new(config().with_context(1))
        .unwrap()
        .run(&source(), &request)
        .unwrap();

    let partial = bundle.partial.as_ref().unwrap();
    assert_eq!(partial.included_ids(), vec!["z-title", "z-table"]);
    assert!(!partial.context.is_empty());
    assert!(bundle
        .issues
        .iter()
        .any(|i| i.code == ErrorCode::IncompleteSelection && i.zone_id.as_deref() == Some("z-title")));
    assert!(bundle
        .chunks
        .iter()
        .all(|c| c.metadata.zone_id == "z-title" || c.metadata.zone_id == "z-table"));
}

#[test]
fn test_failed_zone_recorded_not_fatal() {
    let mut zones = annual_report();
    zones.push(
        Zone::new("z-broken", 3, ZoneCoordinates::new(50.0, 300.0, 300.0, 30.0), ZoneType::Text)
            .with_status(ZoneStatus::Failed)
            .with_processing("tesseract", Some(9))
            .with_error("engine crashed"),
    );
    let mut source = InMemoryZoneSource::new();
    source.insert("annual-2024", zones);

    let config = config()
        .with_error_thresholds(5, 50, 0.9)
        .with_minimum_processed_percentage(50.0);
    let bundle = ExportOrchestrator::new(config)
        .unwrap()
        .run(&source, &ExportRequest::new("annual-2024"))
        .unwrap();

    assert!(bundle
        .issues
        .iter()
        .any(|i| i.zone_id.as_deref() == Some("z-broken") && i.phase.as_deref() == Some("chunks")));
    assert!(!bundle.chunks.is_empty());
    assert!(!bundle.validation.valid);
}

#[test]
fn test_plain_text_log_written_with_extension() {
    let temp_dir = TempDir::new().unwrap();
    let bundle = ExportOrchestrator::new(config().with_log_format(LogFormat::Text))
        .unwrap()
        .run(
            &source(),
            &ExportRequest::new("annual-2024").with_formats([ExportFormat::Log, ExportFormat::Manifest]),
        )
        .unwrap();

    let files = BundleWriter::new().write(&bundle, temp_dir.path()).unwrap();
    let names: Vec<String> = files
        .iter()
        .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["manifest.json", "log.txt"]);

    let log = std::fs::read_to_string(temp_dir.path().join("log.txt")).unwrap();
    assert!(log.contains("Phase timings"));
    assert!(!log.contains("| Phase"));
}

#[test]
fn test_audit_trail_across_runs_and_persistence() {
    let key = AuditTrail::generate_signing_key();
    let public = key.verifying_key();
    let trail = AuditTrail::new().with_signing_key(key);
    let mut orchestrator = ExportOrchestrator::new(config().with_anonymized_actors(true))
        .unwrap()
        .with_audit_trail(trail);

    orchestrator
        .run(&source(), &ExportRequest::new("annual-2024").with_actor("carol"))
        .unwrap();
    let _ = orchestrator.run(&source(), &ExportRequest::new("unknown-doc").with_actor("carol"));

    let audit = orchestrator.audit();
    assert_eq!(audit.len(), 2);
    assert_eq!(audit.entries()[1].action, "export_failed");
    assert!(audit.entries().iter().all(|e| e.actor != "carol"));
    assert!(audit.entries().iter().all(|e| e.signature.is_some()));

    let reloaded = AuditTrail::from_json(&audit.to_json().unwrap()).unwrap();
    assert!(!reloaded.verify_integrity().valid);
    let report = reloaded.with_trusted_key(public).verify_integrity();
    assert!(report.valid);
    assert_eq!(report.checked, 2);
}
