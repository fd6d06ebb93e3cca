use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ed25519_dalek::VerifyingKey;
use std::path::{Path, PathBuf};
use zone_export::audit::decode_public_key;
use zone_export::chunking::ExportChunk;
use zone_export::events::CancellationToken;
use zone_export::export::{BulkExportRequest, BundleWriter, ExportStatus};
use zone_export::selection::{PageRange, SelectionCriteria};
use zone_export::validation::{ValidationContext, ValidationLevel, ValidationPipeline};
use zone_export::{
    AuditTrail, ChunkGenerator, ChunkOptions, DetailLevel, DocumentZones, ExportConfig,
    ExportFormat, ExportOrchestrator, ExportRequest, ExportType, InMemoryZoneSource, LogFormat,
    ManifestGenerator,
};

#[derive(Parser)]
#[command(
    name = "zonex",
    about = "Export, validate and audit extracted document zones",
    version,
    author
)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    /// Export configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full export and write every artifact to a directory
    Export {
        /// Zones file (`{"documentId": ..., "zones": [...]}`)
        input: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "export")]
        output: PathBuf,

        /// Export type: full, partial, zones_only, text_only, metadata_only
        #[arg(short = 't', long = "type", default_value = "full")]
        export_type: ExportType,

        /// Formats to produce (repeatable); defaults to all
        #[arg(short, long = "format")]
        formats: Vec<ExportFormat>,

        /// Restrict to these zone ids (comma separated)
        #[arg(long, value_delimiter = ',')]
        zones: Vec<String>,

        /// Restrict to a page range such as `2-5`
        #[arg(long)]
        pages: Option<PageRange>,

        /// Minimum zone confidence
        #[arg(long)]
        min_confidence: Option<f64>,

        /// Audit ledger to verify and append to
        #[arg(long)]
        audit: Option<PathBuf>,

        /// Actor recorded in the audit trail
        #[arg(long, default_value = "cli")]
        actor: String,

        /// Run log format: markdown, text, json
        #[arg(long, value_parser = parse_log_format)]
        log_format: Option<LogFormat>,

        /// Validation level: none, basic, strict, comprehensive
        #[arg(long)]
        validation_level: Option<ValidationLevel>,
    },

    /// Export several documents in one run
    Bulk {
        /// Zones files, one per document
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output directory
        #[arg(short, long, default_value = "export")]
        output: PathBuf,

        #[arg(short = 't', long = "type", default_value = "full")]
        export_type: ExportType,

        /// Formats to produce (repeatable); defaults to all
        #[arg(short, long = "format")]
        formats: Vec<ExportFormat>,

        /// Write every document into the output directory, prefixed by document id
        #[arg(long)]
        combine: bool,

        /// Audit ledger to verify and append to
        #[arg(long)]
        audit: Option<PathBuf>,

        #[arg(long, default_value = "cli")]
        actor: String,

        #[arg(long)]
        validation_level: Option<ValidationLevel>,
    },

    /// Run the validator chain and print the report
    Validate {
        input: PathBuf,

        #[arg(long)]
        validation_level: Option<ValidationLevel>,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Chunk every textual zone into JSON Lines
    Chunk {
        input: PathBuf,

        /// Output file; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long)]
        chunk_size: Option<usize>,

        /// Overlap between chunks, in percent of the chunk size
        #[arg(long)]
        overlap: Option<f64>,
    },

    /// Print the zone manifest as JSON
    Manifest {
        input: PathBuf,

        /// Detail level: summary, detailed, verbose
        #[arg(short, long, value_parser = parse_detail_level)]
        detail: Option<DetailLevel>,

        /// Include the positional map
        #[arg(long)]
        map: bool,
    },

    /// Verify the hash chain of an audit ledger
    VerifyAudit {
        ledger: PathBuf,

        /// Hex-encoded Ed25519 public key the signatures must verify against
        #[arg(long, value_parser = parse_public_key)]
        public_key: Option<VerifyingKey>,
    },
}

fn parse_public_key(value: &str) -> Result<VerifyingKey, String> {
    decode_public_key(value.trim()).map_err(|e| e.to_string())
}

fn parse_log_format(value: &str) -> Result<LogFormat, String> {
    serde_json::from_value(serde_json::Value::String(value.to_lowercase()))
        .map_err(|_| format!("unknown log format '{value}' (markdown, text, json)"))
}

fn parse_detail_level(value: &str) -> Result<DetailLevel, String> {
    serde_json::from_value(serde_json::Value::String(value.to_lowercase()))
        .map_err(|_| format!("unknown detail level '{value}' (summary, detailed, verbose)"))
}

fn init_tracing(verbose: u8, json: bool) -> Result<()> {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))
}

fn load_config(path: Option<&Path>) -> Result<ExportConfig> {
    match path {
        Some(path) => ExportConfig::from_json_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(ExportConfig::default()),
    }
}

fn load_zones(path: &Path) -> Result<DocumentZones> {
    DocumentZones::from_json_file(path)
        .with_context(|| format!("failed to read zones from {}", path.display()))
}

fn load_audit(path: &Path) -> Result<AuditTrail> {
    if !path.exists() {
        return Ok(AuditTrail::new());
    }
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read audit ledger {}", path.display()))?;
    AuditTrail::from_json(&json)
        .with_context(|| format!("failed to parse audit ledger {}", path.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json)?;
    let config = load_config(cli.config.as_deref())?;
    tracing::debug!(config = ?cli.config, workers = config.worker_count, "configuration loaded");

    match cli.command {
        Commands::Export {
            input,
            output,
            export_type,
            formats,
            zones,
            pages,
            min_confidence,
            audit,
            actor,
            log_format,
            validation_level,
        } => {
            let document = load_zones(&input)?;
            let document_id = document.document_id.clone();
            let source = InMemoryZoneSource::new().with_document(document);

            let mut config = config;
            if let Some(format) = log_format {
                config = config.with_log_format(format);
            }

            let mut criteria = SelectionCriteria::new().with_zone_ids(zones);
            if let Some(range) = pages {
                criteria = criteria.with_page_range(range);
            }
            if let Some(min) = min_confidence {
                criteria = criteria.with_min_confidence(min);
            }

            let mut request = ExportRequest::new(document_id)
                .with_type(export_type)
                .with_criteria(criteria)
                .with_actor(actor);
            if !formats.is_empty() {
                request = request.with_formats(formats);
            }
            if let Some(level) = validation_level {
                request = request.with_validation_level(level);
            }

            let trail = match &audit {
                Some(path) => load_audit(path)?,
                None => AuditTrail::new(),
            };
            let mut orchestrator = ExportOrchestrator::new(config)
                .context("invalid export configuration")?
                .with_audit_trail(trail);

            let outcome = orchestrator.run(&source, &request);
            if let Some(path) = &audit {
                std::fs::write(path, orchestrator.audit().to_json()?)
                    .with_context(|| format!("failed to write audit ledger {}", path.display()))?;
            }
            let bundle = outcome.context("export run failed")?;

            let files = BundleWriter::new()
                .write(&bundle, &output)
                .with_context(|| format!("failed to write export to {}", output.display()))?;

            println!("Export {} ({})", bundle.run.run_id, bundle.status());
            println!("==========================================");
            for file in &files {
                println!("{:<40} {:>10}  {}", file.path.display(), file.human_size, &file.checksum[..12]);
            }
            for note in &bundle.omissions {
                println!("note: {note}");
            }
            println!("Validation score: {:.1}", bundle.validation.score);

            if bundle.status() != ExportStatus::Completed {
                bail!(
                    "export {}: {}",
                    bundle.status(),
                    bundle.run.error.as_deref().unwrap_or("see the run log")
                );
            }
        }

        Commands::Bulk {
            inputs,
            output,
            export_type,
            formats,
            combine,
            audit,
            actor,
            validation_level,
        } => {
            let mut source = InMemoryZoneSource::new();
            let mut document_ids = Vec::with_capacity(inputs.len());
            for input in &inputs {
                let document = load_zones(input)?;
                document_ids.push(document.document_id.clone());
                source = source.with_document(document);
            }

            let mut request = BulkExportRequest::new(document_ids)
                .with_type(export_type)
                .with_combined_files(combine)
                .with_actor(actor);
            if !formats.is_empty() {
                request = request.with_formats(formats);
            }
            if let Some(level) = validation_level {
                request = request.with_validation_level(level);
            }

            let trail = match &audit {
                Some(path) => load_audit(path)?,
                None => AuditTrail::new(),
            };
            let mut orchestrator = ExportOrchestrator::new(config)
                .context("invalid export configuration")?
                .with_audit_trail(trail);

            let outcome = orchestrator.run_bulk(&source, &request);
            if let Some(path) = &audit {
                std::fs::write(path, orchestrator.audit().to_json()?)
                    .with_context(|| format!("failed to write audit ledger {}", path.display()))?;
            }
            let result = outcome.context("bulk export failed")?;

            let files = BundleWriter::new()
                .write_bulk(&result, &output)
                .with_context(|| format!("failed to write export to {}", output.display()))?;

            println!("Bulk export of {} documents", request.document_ids.len());
            println!("==========================================");
            for bundle in &result.bundles {
                println!("{:<30} {}", bundle.run.document_id, bundle.status());
            }
            for failure in &result.failures {
                println!("{:<30} error: {}", failure.document_id, failure.message);
            }
            println!("Files written: {}", files.len());
            println!("Success rate: {:.1}%", result.stats.success_rate());

            if !result.is_complete_success() {
                bail!(
                    "{} of {} documents did not complete",
                    result.stats.total_exports - result.stats.completed,
                    result.stats.total_exports
                );
            }
        }

        Commands::Validate {
            input,
            validation_level,
            json,
        } => {
            let document = load_zones(&input)?;
            let pipeline = ValidationPipeline::from_config(&config)?;
            let formats = ExportFormat::ALL.to_vec();
            let level = validation_level.unwrap_or(config.validation_level);
            let report = pipeline.run(
                ValidationContext::new(&document.document_id, &document.zones, &config)
                    .with_formats(&formats)
                    .with_level(level),
            );

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Validation report for: {}", document.document_id);
                println!("==========================================");
                println!("Valid: {}", if report.valid { "yes" } else { "no" });
                println!("Blocking: {}", if report.blocking { "yes" } else { "no" });
                println!("Score: {:.1}", report.score);
                println!(
                    "Completeness: {:.1}%",
                    report.completeness.completeness_percentage
                );
                for issue in report.errors() {
                    println!("error   [{}] {}: {}", issue.code, issue.field, issue.message);
                }
                for issue in report.warnings() {
                    println!("warning [{}] {}: {}", issue.code, issue.field, issue.message);
                }
                for suggestion in &report.suggestions {
                    println!("suggestion: {suggestion}");
                }
            }

            if report.blocking {
                bail!("validation blocked the export");
            }
        }

        Commands::Chunk {
            input,
            output,
            chunk_size,
            overlap,
        } => {
            let document = load_zones(&input)?;
            let mut options = ChunkOptions::from_config(&config);
            if let Some(size) = chunk_size {
                options = options.with_chunk_size(size);
            }
            if let Some(percentage) = overlap {
                options = options.with_overlap_percentage(percentage);
            }

            let zones: Vec<_> = document
                .zones
                .into_iter()
                .filter(|z| z.zone_type.is_textual())
                .collect();
            let mut chunks: Vec<ExportChunk> = Vec::new();
            let report = ChunkGenerator::new(options)
                .generate_batch(
                    &document.document_id,
                    &zones,
                    &mut chunks,
                    &CancellationToken::new(),
                )
                .context("chunking failed")?;

            let mut lines = String::new();
            for chunk in &chunks {
                lines.push_str(&serde_json::to_string(chunk)?);
                lines.push('\n');
            }
            match output {
                Some(path) => {
                    std::fs::write(&path, lines)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    eprintln!("{} chunks written to {}", chunks.len(), path.display());
                }
                None => print!("{lines}"),
            }

            for failure in &report.failures {
                eprintln!("Warning: zone {} failed: {}", failure.zone_id, failure.error);
            }
        }

        Commands::Manifest { input, detail, map } => {
            let document = load_zones(&input)?;
            let positional_map = map || config.positional_map;
            let config = config.with_positional_map(positional_map);
            let level = detail.unwrap_or(config.detail_level);
            let manifest = ManifestGenerator::from_config(&config).generate(
                &document.document_id,
                &document.zones,
                level,
            );
            println!("{}", serde_json::to_string_pretty(&manifest)?);
        }

        Commands::VerifyAudit { ledger, public_key } => {
            let mut trail = load_audit(&ledger)?;
            if let Some(key) = public_key {
                trail = trail.with_trusted_key(key);
            }
            let report = trail.verify_integrity();

            println!("Audit ledger: {}", ledger.display());
            println!("==========================================");
            println!("Entries checked: {}", report.checked);
            println!("Signed: {}", if trail.is_signed() { "yes" } else { "no" });
            if let Some(declared) = trail.declared_key() {
                let trusted = trail.verifying_key() == Some(declared);
                println!(
                    "Declared key: {}{}",
                    hex::encode(declared.to_bytes()),
                    if trusted { " (matches --public-key)" } else { "" }
                );
            }
            for id in &report.tampered_entries {
                println!("tampered: {id}");
            }
            for id in &report.broken_links {
                println!("broken link: {id}");
            }
            for id in &report.invalid_signatures {
                println!("invalid signature: {id}");
            }
            for id in &report.unverified_signatures {
                println!("unverified signature: {id}");
            }
            if report.is_unverifiable() {
                bail!("ledger is signed; pass --public-key to verify its signatures");
            }

            match report.first_violation {
                Some(entry_id) => bail!("audit chain broken at entry {entry_id}"),
                None => println!("Chain intact"),
            }
        }
    }

    Ok(())
}
