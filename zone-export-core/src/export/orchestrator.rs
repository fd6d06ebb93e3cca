//! Export orchestration
//!
//! A run moves through fixed phases:
//!
//! 1. `load` zones from the upstream source
//! 2. `select` the zones in scope (criteria, partial selection, text only)
//! 3. `validate` with the full validator chain
//! 4. `chunks`, `training` and `manifest` generation, skipped when
//!    validation blocks the export
//! 5. final error evaluation, audit entry, and the run `log`
//!
//! Cancellation is honored between phases and between chunking windows.
//! Generation failures never abort the run; they are recorded as issues and
//! fed back into the error validator before the run is finalized.

use super::{
    BulkExportFailure, BulkExportRequest, BulkExportResult, ExportBundle, ExportFormat,
    ExportRequest, ExportRun, ExportStats, ExportStatus, ExportType, RenderedLog,
};
use crate::audit::AuditTrail;
use crate::batch::ProgressInfo;
use crate::chunking::{ChunkGenerator, ChunkOptions, ExportChunk};
use crate::config::ExportConfig;
use crate::error::{ExportError, Result, ThresholdKind};
use crate::events::{CancellationToken, EventSink, NullSink, ProgressEvent};
use crate::manifest::ManifestGenerator;
use crate::report::{render, Quantity, RunLogBuilder};
use crate::manifest::Manifest;
use crate::selection::{
    ConflictType, PartialExport, PartialExportEngine, SelectionEngine, SelectionOutcome,
};
use crate::telemetry::PerformanceLogger;
use crate::training::{ExampleGenerator, ExampleSet};
use crate::validation::{
    chunk_schema, training_example_schema, SchemaValidator, ValidationContext,
    ValidationIssue, ValidationLevel, ValidationPipeline, ValidationReport,
};
use crate::zone::{merge_text_zones, sort_document_order, Zone, ZoneSource, ZoneStatus};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

/// Per-run bookkeeping shared by every phase
struct RunState {
    run_id: String,
    events: Arc<dyn EventSink>,
    logger: PerformanceLogger,
    timeout_ms: Option<u64>,
    recorded: Vec<ValidationIssue>,
    omissions: Vec<String>,
}

impl RunState {
    fn emit_phase_start(&self, phase: &str) {
        self.events.emit(ProgressEvent::PhaseStart {
            run_id: self.run_id.clone(),
            phase: phase.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Run one phase with timing, events and the timeout policy.
    ///
    /// A phase that overruns `phase_timeout_ms` is retried once; the timeout
    /// is recorded as recovered when the retry finishes within the limit.
    fn phase<T>(
        &mut self,
        name: &str,
        mut work: impl FnMut() -> T,
        items: impl Fn(&T) -> usize,
    ) -> T {
        let span = tracing::info_span!("export_phase", phase = name, run_id = %self.run_id);
        let _entered = span.enter();

        self.emit_phase_start(name);
        let timer = self.logger.start(name);
        let mut output = work();
        let mut elapsed_ms = timer.elapsed().as_millis() as u64;

        if let Some(limit_ms) = self.timeout_ms {
            if elapsed_ms > limit_ms {
                let error = ExportError::PhaseTimeout {
                    phase: name.to_string(),
                    elapsed_ms,
                    limit_ms,
                };
                tracing::warn!(%error, "phase overran its limit, retrying once");
                let retry = Instant::now();
                output = work();
                let retry_ms = retry.elapsed().as_millis() as u64;
                let recovered = retry_ms <= limit_ms;
                self.recorded.push(
                    ValidationIssue::from_error(&error)
                        .with_phase(name)
                        .with_recovery(1, recovered),
                );
                elapsed_ms += retry_ms;
            }
        }

        let timing = self.logger.record(name, elapsed_ms, items(&output));
        self.events.emit(ProgressEvent::PhaseEnd {
            run_id: self.run_id.clone(),
            phase: name.to_string(),
            duration_ms: timing.duration_ms,
            timestamp: Utc::now(),
        });
        output
    }

    fn record(&mut self, issue: ValidationIssue) {
        self.recorded.push(issue);
    }

    fn omit(&mut self, note: impl Into<String>) {
        let note = note.into();
        tracing::info!(run_id = %self.run_id, note = %note, "artifact content omitted");
        self.omissions.push(note);
    }
}

/// Zones in scope after the selection phase
struct Scope {
    zones: Vec<Zone>,
    partial: Option<PartialExport>,
    issues: Vec<ValidationIssue>,
    notes: Vec<String>,
}

/// Artifacts of a run that reached a terminal status
struct Outcome {
    status: ExportStatus,
    error: Option<String>,
    chunks: Vec<ExportChunk>,
    examples: Option<ExampleSet>,
    manifest: Option<Manifest>,
    log: Option<RenderedLog>,
    validation: ValidationReport,
    partial: Option<PartialExport>,
    zones: Option<Vec<Zone>>,
    audit_entry_id: String,
}

/// Coordinates validators, generators, the audit trail and the run log
pub struct ExportOrchestrator {
    config: ExportConfig,
    pipeline: ValidationPipeline,
    audit: AuditTrail,
    events: Arc<dyn EventSink>,
    cancel: CancellationToken,
}

impl ExportOrchestrator {
    pub fn new(config: ExportConfig) -> Result<Self> {
        config.validate()?;
        let pipeline = ValidationPipeline::from_config(&config)?;
        let audit = AuditTrail::new().with_anonymized_actors(config.anonymize_actors);
        Ok(Self {
            config,
            pipeline,
            audit,
            events: Arc::new(NullSink),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Append to an existing trail instead of a fresh one
    pub fn with_audit_trail(mut self, audit: AuditTrail) -> Self {
        self.audit = audit.with_anonymized_actors(self.config.anonymize_actors);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    pub fn into_audit(self) -> AuditTrail {
        self.audit
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute one export request end to end
    ///
    /// Returns an error only when the run cannot proceed at all: a tampered
    /// audit trail, an invalid request, or zones that cannot be loaded.
    /// Blocked and cancelled runs still return a finalized bundle. Once the
    /// run has started, every failure finalizes it as failed and appends an
    /// `export_failed` audit entry.
    pub fn run(&mut self, source: &dyn ZoneSource, request: &ExportRequest) -> Result<ExportBundle> {
        self.audit.require_intact()?;

        let mut run = ExportRun::new(request);
        run.start()?;
        let mut state = RunState {
            run_id: run.run_id.clone(),
            events: Arc::clone(&self.events),
            logger: PerformanceLogger::new(run.run_id.clone()),
            timeout_ms: self.config.phase_timeout_ms,
            recorded: Vec::new(),
            omissions: Vec::new(),
        };
        tracing::info!(
            run_id = %run.run_id,
            document_id = %request.document_id,
            export_type = %request.export_type,
            formats = ?request.formats,
            "export run started"
        );

        let finished = self
            .execute(&mut run, &mut state, source, request)
            .and_then(|outcome| {
                run.finalize(outcome.status, outcome.error.clone())?;
                Ok(outcome)
            });
        let outcome = match finished {
            Ok(outcome) => outcome,
            Err(error) => return Err(self.abort(run, &state, request, error)),
        };
        self.emit_terminal(&run, outcome.error);

        tracing::info!(
            run_id = %run.run_id,
            status = %run.status,
            chunks = outcome.chunks.len(),
            issues = state.recorded.len(),
            total_ms = state.logger.total_ms(),
            "export run finished"
        );

        Ok(ExportBundle {
            run,
            chunks: outcome.chunks,
            examples: outcome.examples,
            manifest: outcome.manifest,
            log: outcome.log,
            validation: outcome.validation,
            partial: outcome.partial,
            zones: outcome.zones,
            issues: state.recorded,
            timings: state.logger.into_timings(),
            omissions: state.omissions,
            audit_entry_id: Some(outcome.audit_entry_id),
        })
    }

    /// Export each document of a bulk request in turn
    ///
    /// Documents that fail are collected as failures; only a tampered
    /// audit trail stops the batch.
    pub fn run_bulk(
        &mut self,
        source: &dyn ZoneSource,
        bulk: &BulkExportRequest,
    ) -> Result<BulkExportResult> {
        bulk.validate()?;
        let mut bundles = Vec::with_capacity(bulk.document_ids.len());
        let mut failures = Vec::new();
        for request in bulk.requests() {
            match self.run(source, &request) {
                Ok(bundle) => bundles.push(bundle),
                Err(error @ ExportError::AuditIntegrityViolation { .. }) => return Err(error),
                Err(error) => {
                    tracing::warn!(document_id = %request.document_id, %error, "document export failed");
                    failures.push(BulkExportFailure::new(&request.document_id, &error));
                }
            }
        }

        let mut stats = ExportStats::from_runs(bundles.iter().map(|b| &b.run));
        for _ in &failures {
            stats.record_failed_run(bulk.export_type);
        }
        tracing::info!(
            documents = bulk.document_ids.len(),
            completed = stats.completed,
            failed = stats.failed,
            "bulk export finished"
        );
        Ok(BulkExportResult {
            bundles,
            failures,
            stats,
            combine_files: bulk.combine_files,
        })
    }

    /// Every phase after the run started; the caller finalizes the run
    fn execute(
        &mut self,
        run: &mut ExportRun,
        state: &mut RunState,
        source: &dyn ZoneSource,
        request: &ExportRequest,
    ) -> Result<Outcome> {
        request.validate()?;

        let zones = state.phase(
            "load",
            || source.zones_for_document(&request.document_id),
            |zones| zones.as_ref().map_or(0, Vec::len),
        )?;

        let scope = state.phase("select", || self.select(&zones, request), |s| s.zones.len());
        let Scope {
            zones,
            partial,
            issues,
            notes,
        } = scope;
        state.recorded.extend(issues);
        for note in notes {
            state.omit(note);
        }

        let formats: Vec<ExportFormat> = request
            .formats
            .iter()
            .copied()
            .filter(|f| request.export_type.allows(*f))
            .collect();
        for format in request.formats.iter().filter(|f| !formats.contains(f)) {
            state.omit(format!(
                "{format} is not produced by {} exports",
                request.export_type
            ));
        }

        let level = request
            .validation_level
            .unwrap_or(self.config.validation_level);
        let recorded_before = state.recorded.clone();
        let mut report = state.phase(
            "validate",
            || {
                let ctx = ValidationContext::new(&request.document_id, &zones, &self.config)
                    .with_formats(&formats)
                    .with_level(level)
                    .with_recorded(recorded_before.clone());
                self.pipeline.run(ctx)
            },
            |_| zones.len(),
        );
        run.record_validation(report.valid)?;

        let blocked = report.blocking;
        if blocked {
            for format in formats.iter().filter(|f| f.carries_content()) {
                state.omit(format!("{format} not generated: validation blocked the export"));
            }
        }

        let mut cancelled = false;
        let mut chunks = Vec::new();
        if formats.contains(&ExportFormat::Chunks) && !blocked {
            cancelled |= self.cancel.is_cancelled();
            if cancelled {
                state.omit("chunks not generated: run cancelled");
            } else {
                let (generated, stopped) = self.generate_chunks(state, request, &zones)?;
                cancelled |= stopped;
                run.record_artifact(ExportFormat::Chunks, generated.len())?;
                chunks = generated;
            }
        }

        let mut examples: Option<ExampleSet> = None;
        if formats.contains(&ExportFormat::Training) && !blocked {
            cancelled |= self.cancel.is_cancelled();
            if cancelled {
                state.omit("training examples not generated: run cancelled");
            } else {
                let set = self.generate_examples(state, &zones)?;
                run.record_artifact(ExportFormat::Training, set.examples.len())?;
                examples = Some(set);
            }
        }

        let mut manifest = None;
        if formats.contains(&ExportFormat::Manifest) {
            cancelled |= self.cancel.is_cancelled();
            if cancelled {
                state.omit("manifest not generated: run cancelled");
            } else {
                let generator = ManifestGenerator::from_config(&self.config);
                let generated = state.phase(
                    "manifest",
                    || generator.generate(&request.document_id, &zones, self.config.detail_level),
                    |m| m.summary.total_zones,
                );
                run.record_artifact(ExportFormat::Manifest, generated.summary.total_zones)?;
                manifest = Some(generated);
            }
        }

        report.record_issues(state.recorded.clone());
        let (result, summary) =
            self.pipeline
                .error_validator()
                .reevaluate(&report, &state.recorded, zones.len());
        report.apply_error_evaluation(result, summary);

        let status = if cancelled {
            ExportStatus::Cancelled
        } else if report.blocking {
            ExportStatus::Failed
        } else {
            ExportStatus::Completed
        };
        if formats.contains(&ExportFormat::Validation) {
            run.record_artifact(
                ExportFormat::Validation,
                report.errors().count() + report.warnings().count(),
            )?;
        }

        let entry_id = self.append_audit(run, request, status, &report, zones.len())?;
        run.record_audit_entry(entry_id.clone())?;

        let log = if formats.contains(&ExportFormat::Log) {
            let rendered = self.render_log(state, run, status, level, &report, &entry_id)?;
            run.record_artifact(ExportFormat::Log, 1)?;
            Some(rendered)
        } else {
            None
        };

        let error = match status {
            ExportStatus::Failed => Some(format!(
                "export blocked: {}",
                report
                    .error_summary
                    .exceeded
                    .iter()
                    .map(|k| k.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
            _ => None,
        };

        let zone_records = (request.export_type == ExportType::ZonesOnly).then(|| zones.clone());
        Ok(Outcome {
            status,
            error,
            chunks,
            examples,
            manifest,
            log,
            validation: report,
            partial,
            zones: zone_records,
            audit_entry_id: entry_id,
        })
    }

    fn select(&self, zones: &[Zone], request: &ExportRequest) -> Scope {
        let mut ordered = zones.to_vec();
        sort_document_order(&mut ordered);

        let mut issues: Vec<ValidationIssue> = request
            .criteria
            .unknown_ids(&ordered)
            .into_iter()
            .chain(
                request
                    .selected_zone_ids
                    .iter()
                    .flatten()
                    .filter(|id| !ordered.iter().any(|z| &z.id == *id))
                    .cloned(),
            )
            .map(|id| {
                ValidationIssue::from_error(&ExportError::ReferenceIntegrity { dangling_id: id })
                    .with_phase("select")
            })
            .collect();
        let mut notes = Vec::new();

        if request.export_type == ExportType::Partial {
            let requested: Vec<&str> = match &request.selected_zone_ids {
                Some(ids) => ids.iter().map(String::as_str).collect(),
                None => ordered
                    .iter()
                    .filter(|z| !request.criteria.is_empty() && request.criteria.matches(z))
                    .map(|z| z.id.as_str())
                    .collect(),
            };
            let mut selection = SelectionEngine::from_config(&ordered, &self.config);
            for id in requested {
                if let SelectionOutcome::Conflict(conflict) = selection.add_item(id) {
                    if conflict.conflict_type != ConflictType::UnknownZone {
                        notes.push(conflict.message);
                    }
                }
            }
            let partial = PartialExportEngine::from_config(&self.config).export(&ordered, &selection);
            if !partial.excluded_ids.is_empty() {
                notes.push(format!(
                    "{} zones excluded by the selection: {}",
                    partial.excluded_ids.len(),
                    partial.excluded_ids.join(", ")
                ));
            }
            for placeholder in &partial.placeholders {
                notes.push(placeholder.note.clone());
            }
            issues.extend(partial.issues.iter().cloned().map(|i| i.with_phase("select")));
            return Scope {
                zones: partial.included.clone(),
                partial: Some(partial),
                issues,
                notes,
            };
        }

        let text_only = request.export_type == ExportType::TextOnly;
        let (kept, dropped): (Vec<Zone>, Vec<Zone>) = ordered.into_iter().partition(|z| {
            request.criteria.matches(z) && (!text_only || z.zone_type.is_textual())
        });
        if !dropped.is_empty() {
            notes.push(format!(
                "{} zones outside the export scope: {}",
                dropped.len(),
                dropped.iter().map(|z| z.id.as_str()).collect::<Vec<_>>().join(", ")
            ));
        }
        Scope {
            zones: kept,
            partial: None,
            issues,
            notes,
        }
    }

    /// Returns the chunks and whether the batch stopped on cancellation
    fn generate_chunks(
        &self,
        state: &mut RunState,
        request: &ExportRequest,
        zones: &[Zone],
    ) -> Result<(Vec<ExportChunk>, bool)> {
        let (input, ineligible): (Vec<&Zone>, Vec<&Zone>) = zones.iter().partition(|z| {
            z.zone_type.is_textual() && matches!(z.status, ZoneStatus::Completed | ZoneStatus::Failed)
        });
        if !ineligible.is_empty() {
            state.omit(format!(
                "{} zones not chunked (non-textual or unprocessed)",
                ineligible.len()
            ));
        }
        let mut input: Vec<Zone> = input.into_iter().cloned().collect();
        if self.config.merge_text_zones {
            let before = input.len();
            input = merge_text_zones(&input);
            if input.len() < before {
                state.omit(format!(
                    "{before} chunked zones merged into {} before chunking",
                    input.len()
                ));
            }
        }

        let events = Arc::clone(&self.events);
        let run_id = state.run_id.clone();
        let generator = ChunkGenerator::new(ChunkOptions::from_config(&self.config))
            .with_progress_callback(move |info: &ProgressInfo| {
                events.emit(ProgressEvent::PhaseProgress {
                    run_id: run_id.clone(),
                    phase: "chunks".to_string(),
                    percentage: info.percentage(),
                    current_item: info.current_item.clone(),
                    timestamp: Utc::now(),
                })
            });

        let outcome = state.phase(
            "chunks",
            || {
                let mut chunks: Vec<ExportChunk> = Vec::new();
                generator
                    .generate_batch(&request.document_id, &input, &mut chunks, &self.cancel)
                    .map(|report| (chunks, report))
            },
            |outcome| outcome.as_ref().map_or(0, |(chunks, _)| chunks.len()),
        );

        let (chunks, batch) = match outcome {
            Ok(done) => done,
            Err(error) => {
                state.record(ValidationIssue::from_error(&error).with_phase("chunks"));
                state.omit(format!("chunks not generated: {error}"));
                return Ok((Vec::new(), false));
            }
        };

        for failure in &batch.failures {
            state.record(
                ValidationIssue::from_error(&failure.error)
                    .with_zone(failure.zone_id.clone())
                    .with_phase("chunks"),
            );
        }
        if batch.hard_stopped {
            state.record(
                ValidationIssue::from_error(&ExportError::ThresholdExceeded(
                    ThresholdKind::MaxZoneFailures,
                ))
                .with_phase("chunks"),
            );
        }
        if !batch.skipped_zone_ids.is_empty() {
            state.omit(format!(
                "{} zones not chunked after the batch stopped: {}",
                batch.skipped_zone_ids.len(),
                batch.skipped_zone_ids.join(", ")
            ));
        }

        let validator = SchemaValidator::new(chunk_schema()).with_worker_count(self.config.worker_count);
        for issue in schema_issues(&validator, &chunks, |c| c.id.as_str(), "chunks")? {
            state.record(issue);
        }
        Ok((chunks, batch.cancelled))
    }

    fn generate_examples(&self, state: &mut RunState, zones: &[Zone]) -> Result<ExampleSet> {
        let generator = ExampleGenerator::from_config(&self.config);
        let set = state.phase(
            "training",
            || generator.generate(zones, self.config.conversation_style),
            |set| set.examples.len(),
        );

        if !set.rejected.is_empty() {
            state.omit(format!(
                "{} training examples rejected by the quality filter",
                set.rejected.len()
            ));
        }
        for skipped in &set.skipped {
            state.omit(format!(
                "zones {} produced no example: {}",
                skipped.zone_ids.join(", "),
                skipped.reason
            ));
        }

        let validator =
            SchemaValidator::new(training_example_schema()).with_worker_count(self.config.worker_count);
        for issue in schema_issues(&validator, &set.examples, |e| e.id.as_str(), "training")? {
            state.record(issue);
        }
        Ok(set)
    }

    fn append_audit(
        &mut self,
        run: &ExportRun,
        request: &ExportRequest,
        status: ExportStatus,
        report: &ValidationReport,
        zone_count: usize,
    ) -> Result<String> {
        let content = json!({
            "runId": run.run_id,
            "documentId": run.document_id,
            "exportType": run.export_type,
            "formats": run.formats,
            "status": status,
            "artifacts": run.artifacts,
            "zones": zone_count,
            "valid": report.valid,
            "blocking": report.blocking,
            "score": report.score,
        });
        let entry = self
            .audit
            .add_entry(format!("export_{status}"), content, &request.actor)?;
        Ok(entry.entry_id.clone())
    }

    fn render_log(
        &self,
        state: &mut RunState,
        run: &ExportRun,
        status: ExportStatus,
        level: ValidationLevel,
        report: &ValidationReport,
        entry_id: &str,
    ) -> Result<RenderedLog> {
        let format = self.config.log_format;
        let mut builder = RunLogBuilder::new(&run.run_id, &run.document_id)
            .status(status)
            .window(run.started_at.unwrap_or(run.created_at), Some(Utc::now()))
            .summary_field("Export type", run.export_type)
            .summary_field(
                "Formats",
                run.formats
                    .iter()
                    .map(|f| f.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            )
            .summary_field("Validation level", level)
            .summary_field("Audit entry", entry_id)
            .phase_timings(state.logger.timings())
            .validation(report);
        for (format, records) in &run.artifacts {
            builder = builder.statistic(format!("{format} records"), Quantity::Count(*records));
        }
        for note in &state.omissions {
            builder = builder.note(note.clone());
        }
        let document = builder.build();

        let content = state.phase("log", || render(&document, format), |r| {
            r.as_ref().map_or(0, |s| s.len())
        })?;
        Ok(RenderedLog { format, content })
    }

    fn emit_terminal(&self, run: &ExportRun, error: Option<String>) {
        let run_id = run.run_id.clone();
        let timestamp = Utc::now();
        let event = match run.status {
            ExportStatus::Cancelled => ProgressEvent::RunCancelled { run_id, timestamp },
            ExportStatus::Failed => ProgressEvent::RunFailed {
                run_id,
                reason: error.unwrap_or_else(|| "export failed".to_string()),
                timestamp,
            },
            _ => ProgressEvent::RunCompleted { run_id, timestamp },
        };
        self.events.emit(event);
    }

    /// Finalize a run that failed before producing a bundle
    fn abort(
        &mut self,
        mut run: ExportRun,
        state: &RunState,
        request: &ExportRequest,
        error: ExportError,
    ) -> ExportError {
        tracing::error!(run_id = %state.run_id, %error, "export run failed");
        let content = json!({
            "runId": run.run_id,
            "documentId": run.document_id,
            "status": ExportStatus::Failed,
            "error": error.to_string(),
        });
        match self.audit.add_entry("export_failed", content, &request.actor) {
            Ok(entry) => {
                let entry_id = entry.entry_id.clone();
                if let Err(e) = run.record_audit_entry(entry_id) {
                    tracing::warn!(error = %e, "could not attach audit entry");
                }
            }
            Err(e) => tracing::warn!(error = %e, "could not append audit entry"),
        }
        if let Err(e) = run.finalize(ExportStatus::Failed, Some(error.to_string())) {
            tracing::warn!(error = %e, "could not finalize run");
        }
        self.emit_terminal(&run, Some(error.to_string()));
        error
    }
}

/// Schema-check generated records, tagging issues with the record id
fn schema_issues<T: Serialize>(
    validator: &SchemaValidator,
    records: &[T],
    id: impl Fn(&T) -> &str,
    phase: &str,
) -> Result<Vec<ValidationIssue>> {
    let values = records
        .iter()
        .map(serde_json::to_value)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let results = validator.validate_batch(values);
    Ok(records
        .iter()
        .zip(results)
        .flat_map(|(record, result)| {
            let prefix = format!("{phase}[{}]", id(record));
            result
                .issues()
                .cloned()
                .map(|mut issue| {
                    issue.field = if issue.field.is_empty() {
                        prefix.clone()
                    } else {
                        format!("{prefix}.{}", issue.field)
                    };
                    issue.with_phase(phase)
                })
                .collect::<Vec<_>>()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingSink;
    use crate::report::LogFormat;
    use crate::selection::SelectionCriteria;
    use crate::zone::{InMemoryZoneSource, ZoneCoordinates, ZoneType};
    use pretty_assertions::assert_eq;

    fn zone(id: &str, page: u32, y: f64, zone_type: ZoneType, content: &str) -> Zone {
        Zone::new(id, page, ZoneCoordinates::new(0.0, y, 200.0, 20.0), zone_type)
            .with_content(content)
            .with_confidence(0.9)
            .with_status(ZoneStatus::Completed)
            .with_processing("tesseract", Some(12))
    }

    fn source() -> InMemoryZoneSource {
        let mut source = InMemoryZoneSource::new();
        source.insert(
            "doc-1",
            vec![
                zone("h1", 1, 0.0, ZoneType::Header, "Quarterly results"),
                zone("p1", 1, 30.0, ZoneType::Text, "Revenue grew by twelve percent over the quarter."),
                zone("p2", 2, 0.0, ZoneType::Text, "Costs were flat compared to last year."),
            ],
        );
        source
    }

    fn orchestrator() -> ExportOrchestrator {
        ExportOrchestrator::new(ExportConfig::default().with_worker_count(1)).unwrap()
    }

    #[test]
    fn test_full_export_completes() {
        let sink = Arc::new(CollectingSink::new());
        let mut orchestrator = orchestrator().with_event_sink(sink.clone());
        let bundle = orchestrator.run(&source(), &ExportRequest::new("doc-1")).unwrap();

        assert_eq!(bundle.status(), ExportStatus::Completed);
        assert!(bundle.run.is_finalized());
        assert!(!bundle.chunks.is_empty());
        assert!(bundle.manifest.is_some());
        assert_eq!(bundle.manifest.as_ref().unwrap().summary.total_zones, 3);
        assert!(bundle.log.as_ref().unwrap().content.contains("# Export run"));
        assert_eq!(orchestrator.audit().len(), 1);
        assert_eq!(
            bundle.audit_entry_id.as_deref(),
            Some(orchestrator.audit().entries()[0].entry_id.as_str())
        );

        let events = sink.events();
        assert!(matches!(events.first(), Some(ProgressEvent::PhaseStart { phase, .. }) if phase == "load"));
        assert!(matches!(events.last(), Some(ProgressEvent::RunCompleted { .. })));
        assert!(events.iter().all(|e| e.run_id() == bundle.run.run_id));
    }

    #[test]
    fn test_phase_timings_recorded_in_order() {
        let bundle = orchestrator()
            .run(&source(), &ExportRequest::new("doc-1"))
            .unwrap();
        let phases: Vec<&str> = bundle.timings.iter().map(|t| t.phase.as_str()).collect();
        assert_eq!(
            phases,
            vec!["load", "select", "validate", "chunks", "training", "manifest", "log"]
        );
    }

    #[test]
    fn test_unknown_document_fails_run() {
        let sink = Arc::new(CollectingSink::new());
        let mut orchestrator = orchestrator().with_event_sink(sink.clone());
        let error = orchestrator
            .run(&source(), &ExportRequest::new("missing"))
            .unwrap_err();

        assert!(matches!(error, ExportError::ReferenceIntegrity { .. }));
        assert_eq!(orchestrator.audit().entries()[0].action, "export_failed");
        assert!(matches!(sink.events().last(), Some(ProgressEvent::RunFailed { .. })));
    }

    #[test]
    fn test_invalid_request_finalizes_failed_run() {
        let sink = Arc::new(CollectingSink::new());
        let mut orchestrator = orchestrator().with_event_sink(sink.clone());
        let request = ExportRequest::new("doc-1")
            .with_formats([ExportFormat::Chunks, ExportFormat::Log, ExportFormat::Chunks]);
        let error = orchestrator.run(&source(), &request).unwrap_err();

        assert!(matches!(error, ExportError::InvalidConfiguration(_)));
        let entries = orchestrator.audit().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "export_failed");
        assert!(entries[0].content["error"]
            .as_str()
            .unwrap()
            .contains("duplicate export format 'chunks'"));
        assert!(matches!(sink.events().last(), Some(ProgressEvent::RunFailed { .. })));
    }

    #[test]
    fn test_request_validation_level_overrides_config() {
        let mut source = source();
        source.insert("cafe", vec![zone("p1", 1, 0.0, ZoneType::Text, "Café au lait")]);

        let basic = orchestrator().run(&source, &ExportRequest::new("cafe")).unwrap();
        assert!(basic.validation.valid);

        let request = ExportRequest::new("cafe").with_validation_level(ValidationLevel::Comprehensive);
        let bundle = orchestrator().run(&source, &request).unwrap();
        assert!(!bundle.validation.valid);
        assert!(bundle
            .validation
            .errors()
            .any(|i| i.code == crate::error::ErrorCode::ContentEncoding));
        assert!(bundle.log.unwrap().content.contains("comprehensive"));
    }

    #[test]
    fn test_merged_text_zones_chunked_as_one() {
        let mut source = source();
        source.insert(
            "doc-3",
            vec![
                zone("a", 1, 0.0, ZoneType::Text, "First paragraph of the page."),
                zone("b", 1, 30.0, ZoneType::Text, "Second paragraph of the page."),
            ],
        );
        let config = ExportConfig::default()
            .with_worker_count(1)
            .with_merged_text_zones(true);
        let bundle = ExportOrchestrator::new(config)
            .unwrap()
            .run(&source, &ExportRequest::new("doc-3"))
            .unwrap();

        assert!(!bundle.chunks.is_empty());
        assert!(bundle.chunks.iter().all(|c| c.metadata.zone_id == "a"));
        assert!(bundle.chunks[0].content.contains("Second paragraph"));
        assert!(bundle.omissions.iter().any(|n| n.contains("2 chunked zones merged into 1")));
    }

    #[test]
    fn test_partial_selection_reports_duplicate_ids() {
        let mut request = ExportRequest::new("doc-1").with_type(ExportType::Partial);
        request.selected_zone_ids = Some(vec!["p1".to_string(), "p1".to_string()]);
        let bundle = orchestrator().run(&source(), &request).unwrap();

        assert_eq!(bundle.partial.as_ref().unwrap().included_ids(), vec!["p1"]);
        assert!(bundle.omissions.iter().any(|n| n.contains("already covered")));
    }

    #[test]
    fn test_blocked_export_skips_content() {
        let mut source = source();
        source.insert(
            "doc-2",
            vec![
                zone("p1", 1, 0.0, ZoneType::Text, "Processed text."),
                zone("p2", 1, 40.0, ZoneType::Text, "Waiting on OCR.").with_status(ZoneStatus::Pending),
            ],
        );
        let bundle = orchestrator().run(&source, &ExportRequest::new("doc-2")).unwrap();

        assert_eq!(bundle.status(), ExportStatus::Failed);
        assert!(bundle.validation.blocking);
        assert!(bundle.chunks.is_empty());
        assert!(bundle.examples.is_none());
        assert!(bundle.manifest.is_some());
        assert!(bundle.omissions.iter().any(|n| n.contains("validation blocked")));
        assert!(bundle.run.error.as_deref().unwrap().starts_with("export blocked"));
    }

    #[test]
    fn test_cancelled_before_generation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut orchestrator = orchestrator().with_cancellation(cancel);
        let bundle = orchestrator.run(&source(), &ExportRequest::new("doc-1")).unwrap();

        assert_eq!(bundle.status(), ExportStatus::Cancelled);
        assert!(bundle.chunks.is_empty());
        assert_eq!(orchestrator.audit().entries()[0].action, "export_cancelled");
    }

    #[test]
    fn test_partial_export_by_criteria() {
        let request = ExportRequest::new("doc-1")
            .with_type(ExportType::Partial)
            .with_criteria(SelectionCriteria::default().with_zone_ids(["p1", "p2"]));
        let bundle = orchestrator().run(&source(), &request).unwrap();

        let partial = bundle.partial.as_ref().unwrap();
        assert_eq!(partial.included_ids(), vec!["p1", "p2"]);
        assert_eq!(partial.excluded_ids, vec!["h1"]);
        assert!(bundle.chunks.iter().all(|c| c.metadata.zone_id != "h1"));
        assert!(bundle.omissions.iter().any(|n| n.contains("excluded by the selection")));
    }

    #[test]
    fn test_metadata_only_omits_content_formats() {
        let request = ExportRequest::new("doc-1").with_type(ExportType::MetadataOnly);
        let bundle = orchestrator().run(&source(), &request).unwrap();

        assert!(bundle.chunks.is_empty());
        assert!(bundle.examples.is_none());
        assert!(bundle.manifest.is_some());
        assert!(bundle
            .omissions
            .iter()
            .any(|n| n == "chunks is not produced by metadata_only exports"));
    }

    #[test]
    fn test_zones_only_attaches_zone_records() {
        let request = ExportRequest::new("doc-1").with_type(ExportType::ZonesOnly);
        let bundle = orchestrator().run(&source(), &request).unwrap();
        assert_eq!(bundle.zones.as_ref().map(Vec::len), Some(3));
    }

    #[test]
    fn test_unknown_criteria_ids_recorded() {
        let request = ExportRequest::new("doc-1")
            .with_criteria(SelectionCriteria::default().with_zone_ids(["p1", "nope"]));
        let bundle = orchestrator().run(&source(), &request).unwrap();
        assert!(bundle
            .issues
            .iter()
            .any(|i| i.code == crate::error::ErrorCode::ReferenceIntegrity && i.message.contains("nope")));
    }

    #[test]
    fn test_json_log_format() {
        let config = ExportConfig::default()
            .with_worker_count(1)
            .with_log_format(LogFormat::Json);
        let bundle = ExportOrchestrator::new(config)
            .unwrap()
            .run(&source(), &ExportRequest::new("doc-1").with_formats([ExportFormat::Log]))
            .unwrap();

        let log = bundle.log.unwrap();
        assert_eq!(log.format, LogFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&log.content).unwrap();
        assert!(value["title"].as_str().unwrap().starts_with("Export run"));
        assert!(bundle.chunks.is_empty());
    }

    #[test]
    fn test_tampered_trail_refuses_to_run() {
        let mut trail = AuditTrail::new();
        trail.add_entry("export_completed", json!({"runId": "r0"}), "alice").unwrap();
        let tampered = trail.to_json().unwrap().replace("\"r0\"", "\"r1\"");
        let trail = AuditTrail::from_json(&tampered).unwrap();

        let mut orchestrator = orchestrator().with_audit_trail(trail);
        let error = orchestrator
            .run(&source(), &ExportRequest::new("doc-1"))
            .unwrap_err();
        assert!(matches!(error, ExportError::AuditIntegrityViolation { .. }));
        assert_eq!(orchestrator.audit().len(), 1);
    }

    #[test]
    fn test_bulk_export_collects_failures() {
        let mut orchestrator = orchestrator();
        let bulk = BulkExportRequest::new(["doc-1", "missing"]).with_actor("alice");
        let result = orchestrator.run_bulk(&source(), &bulk).unwrap();

        assert_eq!(result.bundles.len(), 1);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].document_id, "missing");
        assert_eq!(result.failures[0].code, crate::error::ErrorCode::ReferenceIntegrity);
        assert_eq!(result.stats.total_exports, 2);
        assert_eq!(result.stats.completed, 1);
        assert_eq!(result.stats.failed, 1);
        assert!(!result.is_complete_success());

        let actions: Vec<&str> = orchestrator.audit().entries().iter().map(|e| e.action.as_str()).collect();
        assert_eq!(actions, vec!["export_completed", "export_failed"]);
        assert!(orchestrator.audit().verify_integrity().valid);
    }

    #[test]
    fn test_bulk_export_rejects_duplicate_documents() {
        let mut orchestrator = orchestrator();
        let error = orchestrator
            .run_bulk(&source(), &BulkExportRequest::new(["doc-1", "doc-1"]))
            .unwrap_err();
        assert!(matches!(error, ExportError::InvalidConfiguration(_)));
        assert!(orchestrator.audit().is_empty());
    }

    #[test]
    fn test_runs_chain_in_one_trail() {
        let mut orchestrator = orchestrator();
        orchestrator.run(&source(), &ExportRequest::new("doc-1")).unwrap();
        orchestrator
            .run(&source(), &ExportRequest::new("doc-1").with_actor("bob"))
            .unwrap();

        let entries = orchestrator.audit().entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].previous_hash, entries[0].hash);
        assert!(orchestrator.audit().verify_integrity().valid);
    }
}
