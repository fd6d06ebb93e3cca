//! # zone-export
//!
//! Export pipeline for zones extracted from documents. Zones are regions of
//! a page (text blocks, headers, tables, figures) with OCR content,
//! confidence, and processing metadata. This crate turns them into
//! downstream artifacts and checks them before anything leaves the run.
//!
//! ## Features
//!
//! - **Chunking**: RAG-ready chunks with overlap, semantic boundaries, and
//!   memory-bounded batch processing
//! - **Training Examples**: Conversation-style examples with a quality,
//!   diversity, and balance filter
//! - **Manifests**: Zone inventories at summary, standard, or detailed level
//!   with an optional positional map
//! - **Validation**: Schema, content, metadata, zone, and error validators
//!   with a weighted quality score
//! - **Selection**: Zone and page selection with undo/redo and partial
//!   exports that never drop references silently
//! - **Audit Trail**: Hash-chained, optionally signed entries with tamper
//!   detection
//! - **Run Logs**: Markdown, plain text, or JSON logs of every run
//!
//! ## Quick Start
//!
//! ```rust
//! use zone_export::export::{ExportOrchestrator, ExportRequest, ExportStatus};
//! use zone_export::{ExportConfig, InMemoryZoneSource, Zone, ZoneCoordinates, ZoneStatus, ZoneType};
//!
//! # fn main() -> zone_export::Result<()> {
//! let mut source = InMemoryZoneSource::new();
//! source.insert(
//!     "report-2024",
//!     vec![Zone::new("z1", 1, ZoneCoordinates::new(72.0, 90.0, 450.0, 40.0), ZoneType::Text)
//!         .with_content("Revenue grew by twelve percent over the quarter.")
//!         .with_confidence(0.94)
//!         .with_status(ZoneStatus::Completed)
//!         .with_processing("tesseract", Some(120))],
//! );
//!
//! let mut orchestrator = ExportOrchestrator::new(ExportConfig::default())?;
//! let bundle = orchestrator.run(&source, &ExportRequest::new("report-2024"))?;
//!
//! assert_eq!(bundle.status(), ExportStatus::Completed);
//! assert!(!bundle.chunks.is_empty());
//! assert!(orchestrator.audit().verify_integrity().valid);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! ### Generation
//! - [`chunking`] - Chunk generation and batch chunking
//! - [`training`] - Training example extraction and filtering
//! - [`manifest`] - Manifest generation
//! - [`report`] - Run log model and renderers
//!
//! ### Validation and Selection
//! - [`validation`] - Validator chain and quality scoring
//! - [`selection`] - Selection engine and partial exports
//!
//! ### Run Infrastructure
//! - [`export`] - Orchestrator, export requests and runs, bundle writer
//! - [`audit`] - Hash-chained audit trail
//! - [`telemetry`] - Phase timings and log redaction
//! - [`events`] - Progress events and cancellation
//! - [`batch`] - Worker pool and progress tracking

pub mod audit;
pub mod batch;
pub mod chunking;
pub mod config;
pub mod error;
pub mod events;
pub mod export;
pub mod geometry;
pub mod manifest;
pub mod report;
pub mod selection;
pub mod telemetry;
pub mod training;
pub mod validation;
pub mod zone;

// Re-export core types
pub use config::ExportConfig;
pub use error::{ErrorCode, ExportError, Result, ThresholdKind};
pub use zone::{
    DocumentZones, InMemoryZoneSource, Zone, ZoneCoordinates, ZoneSource, ZoneStatus, ZoneType,
};

// Re-export pipeline types
pub use audit::{AuditEntry, AuditTrail, IntegrityReport};
pub use chunking::{ChunkGenerator, ChunkOptions, ExportChunk};
pub use events::{CancellationToken, EventSink, ProgressEvent};
pub use export::{
    BulkExportRequest, ExportBundle, ExportFormat, ExportOrchestrator, ExportRequest, ExportStats,
    ExportType,
};
pub use manifest::{DetailLevel, Manifest, ManifestGenerator};
pub use report::LogFormat;
pub use selection::{SelectionCriteria, SelectionEngine};
pub use training::{ConversationStyle, ExampleGenerator, TrainingExample};
pub use validation::{
    ValidationIssue, ValidationLevel, ValidationPipeline, ValidationReport, ValidationResult,
};

/// Current version of zone-export
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
