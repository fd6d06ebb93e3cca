//! Writes an export bundle to disk
//!
//! Each artifact lands in its own file inside the target directory. Record
//! streams (chunks, training examples) are JSON Lines; everything else is
//! pretty-printed JSON except the run log, which keeps its rendered format.
//!
//! Bulk results go either into one subdirectory per document or, with
//! `combineFiles`, into a single directory with document-prefixed names.
//! Both layouts add a `summary.json` with statistics and failures.

use super::{BulkExportFailure, BulkExportResult, ExportBundle, ExportFormat, ExportStats};
use crate::error::Result;
use crate::report::human_size;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// A file written for one artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportFile {
    pub path: PathBuf,
    /// `None` for auxiliary files such as zone records
    pub format: Option<ExportFormat>,
    pub size_bytes: u64,
    pub human_size: String,
    /// SHA-256 of the file contents, hex encoded
    pub checksum: String,
}

#[derive(Debug, Clone, Default)]
pub struct BundleWriter {
    prefix: Option<String>,
}

impl BundleWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix every file name, e.g. with the document id
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    fn file_name(&self, name: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}-{name}"),
            None => name.to_string(),
        }
    }

    pub fn write(&self, bundle: &ExportBundle, dir: impl AsRef<Path>) -> Result<Vec<ExportFile>> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let mut files = Vec::new();

        if bundle.run.artifacts.contains_key(&ExportFormat::Chunks) {
            let path = dir.join(self.file_name("chunks.jsonl"));
            write_lines(&path, &bundle.chunks)?;
            files.push(describe(path, Some(ExportFormat::Chunks))?);
        }
        if let Some(examples) = &bundle.examples {
            let path = dir.join(self.file_name("training.jsonl"));
            write_lines(&path, &examples.examples)?;
            files.push(describe(path, Some(ExportFormat::Training))?);
        }
        if let Some(manifest) = &bundle.manifest {
            let path = dir.join(self.file_name("manifest.json"));
            write_json(&path, manifest)?;
            files.push(describe(path, Some(ExportFormat::Manifest))?);
        }
        if let Some(log) = &bundle.log {
            let path = dir.join(self.file_name(&format!("log.{}", log.format.extension())));
            fs::write(&path, &log.content)?;
            files.push(describe(path, Some(ExportFormat::Log))?);
        }
        if bundle.run.formats.contains(&ExportFormat::Validation) {
            let path = dir.join(self.file_name("validation.json"));
            write_json(&path, &bundle.validation)?;
            files.push(describe(path, Some(ExportFormat::Validation))?);
        }
        if let Some(zones) = &bundle.zones {
            let path = dir.join(self.file_name("zones.json"));
            write_json(&path, zones)?;
            files.push(describe(path, None)?);
        }
        if let Some(partial) = &bundle.partial {
            let path = dir.join(self.file_name("partial.json"));
            write_json(&path, partial)?;
            files.push(describe(path, None)?);
        }

        tracing::info!(
            run_id = %bundle.run.run_id,
            dir = %dir.display(),
            files = files.len(),
            bytes = files.iter().map(|f| f.size_bytes).sum::<u64>(),
            "export bundle written"
        );
        Ok(files)
    }

    pub fn write_bulk(&self, result: &BulkExportResult, dir: impl AsRef<Path>) -> Result<Vec<ExportFile>> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let mut files = Vec::new();
        for bundle in &result.bundles {
            let name = safe_name(&bundle.run.document_id);
            let written = if result.combine_files {
                let prefix = match &self.prefix {
                    Some(prefix) => format!("{prefix}-{name}"),
                    None => name,
                };
                self.clone().with_prefix(prefix).write(bundle, dir)?
            } else {
                self.write(bundle, dir.join(name))?
            };
            files.extend(written);
        }

        let summary = BulkSummary {
            combine_files: result.combine_files,
            documents: result
                .bundles
                .iter()
                .map(|b| BulkDocument {
                    document_id: &b.run.document_id,
                    run_id: &b.run.run_id,
                    status: b.run.status.as_str(),
                })
                .collect(),
            failures: &result.failures,
            stats: result.stats.clone().with_files(&files),
        };
        let path = dir.join(self.file_name("summary.json"));
        write_json(&path, &summary)?;
        files.push(describe(path, None)?);
        Ok(files)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BulkSummary<'a> {
    combine_files: bool,
    documents: Vec<BulkDocument<'a>>,
    failures: &'a [BulkExportFailure],
    stats: ExportStats,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BulkDocument<'a> {
    document_id: &'a str,
    run_id: &'a str,
    status: &'static str,
}

/// Document ids as file and directory names
fn safe_name(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect()
}

fn write_lines<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let mut out = BufWriter::new(fs::File::create(path)?);
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

fn describe(path: PathBuf, format: Option<ExportFormat>) -> Result<ExportFile> {
    let data = fs::read(&path)?;
    let size_bytes = data.len() as u64;
    Ok(ExportFile {
        checksum: hex::encode(Sha256::digest(&data)),
        human_size: human_size(size_bytes),
        size_bytes,
        format,
        path,
    })
}
