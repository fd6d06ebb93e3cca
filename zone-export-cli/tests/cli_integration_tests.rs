//! Integration tests for the zonex CLI
//!
//! Tests command-line interface functionality including:
//! - Export runs writing artifacts to disk
//! - Bulk exports of several documents
//! - Validation, chunking and manifest subcommands
//! - Audit ledger persistence and tamper detection
//! - Error handling for bad input

use anyhow::Result;
use pretty_assertions::assert_eq;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::{tempdir, TempDir};

/// Test helper to get the CLI binary path
fn get_cli_path() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // Remove test binary name
    if path.ends_with("deps") {
        path.pop(); // Remove "deps" directory
    }
    path.push("zonex");
    #[cfg(windows)]
    path.set_extension("exe");
    path
}

fn setup_temp_dir() -> TempDir {
    tempdir().expect("Failed to create temp directory")
}

fn run_cli_command(args: &[&str]) -> Result<std::process::Output> {
    let output = Command::new(get_cli_path()).args(args).output()?;
    Ok(output)
}

/// Writes a small processed document and returns its path
fn write_zones(dir: &Path) -> PathBuf {
    let path = dir.join("zones.json");
    let zones = serde_json::json!({
        "documentId": "invoice-17",
        "zones": [
            {
                "id": "z1", "page": 1, "type": "header", "confidence": 0.95, "status": "completed",
                "coordinates": {"x": 40, "y": 30, "width": 400, "height": 30},
                "content": "Invoice 17",
                "processing": {"tool": "tesseract", "durationMs": 12}
            },
            {
                "id": "z2", "page": 1, "type": "text", "confidence": 0.9, "status": "completed",
                "coordinates": {"x": 40, "y": 80, "width": 400, "height": 60},
                "content": "Payment is due within thirty days of the invoice date. Late payments accrue interest.",
                "processing": {"tool": "tesseract", "durationMs": 20}
            },
            {
                "id": "z3", "page": 2, "type": "table", "confidence": 0.85, "status": "completed",
                "coordinates": {"x": 40, "y": 30, "width": 400, "height": 120},
                "content": "Item | Amount\nWidget | 40\nGadget | 60",
                "processing": {"tool": "tabula", "durationMs": 31}
            }
        ]
    });
    fs::write(&path, serde_json::to_string_pretty(&zones).unwrap()).unwrap();
    path
}

#[test]
fn test_cli_help_lists_subcommands() {
    let output = run_cli_command(&["--help"]).unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["export", "bulk", "validate", "chunk", "manifest", "verify-audit"] {
        assert!(stdout.contains(command), "help should list {command}");
    }
}

#[test]
fn test_cli_export_writes_artifacts_and_ledger() {
    let temp_dir = setup_temp_dir();
    let zones = write_zones(temp_dir.path());
    let out_dir = temp_dir.path().join("out");
    let ledger = temp_dir.path().join("audit.json");

    let output = run_cli_command(&[
        "export",
        zones.to_str().unwrap(),
        "--output",
        out_dir.to_str().unwrap(),
        "--audit",
        ledger.to_str().unwrap(),
        "--actor",
        "tester",
    ])
    .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    for name in ["chunks.jsonl", "manifest.json", "log.md", "validation.json"] {
        assert!(out_dir.join(name).exists(), "{name} should be written");
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("(completed)"));

    let verify = run_cli_command(&["verify-audit", ledger.to_str().unwrap()]).unwrap();
    assert!(verify.status.success());
    assert!(String::from_utf8_lossy(&verify.stdout).contains("Chain intact"));
}

#[test]
fn test_cli_export_selected_formats() {
    let temp_dir = setup_temp_dir();
    let zones = write_zones(temp_dir.path());
    let out_dir = temp_dir.path().join("out");

    let output = run_cli_command(&[
        "export",
        zones.to_str().unwrap(),
        "-o",
        out_dir.to_str().unwrap(),
        "--format",
        "manifest",
        "--format",
        "log",
        "--log-format",
        "json",
    ])
    .unwrap();
    assert!(output.status.success());

    let mut names: Vec<String> = fs::read_dir(&out_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["log.json", "manifest.json"]);
}

#[test]
fn test_cli_detects_tampered_ledger() {
    let temp_dir = setup_temp_dir();
    let zones = write_zones(temp_dir.path());
    let ledger = temp_dir.path().join("audit.json");
    let out_dir = temp_dir.path().join("out");

    let first = run_cli_command(&[
        "export",
        zones.to_str().unwrap(),
        "-o",
        out_dir.to_str().unwrap(),
        "--audit",
        ledger.to_str().unwrap(),
    ])
    .unwrap();
    assert!(first.status.success());

    let mut value: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&ledger).unwrap()).unwrap();
    value["entries"][0]["actor"] = serde_json::json!("mallory");
    fs::write(&ledger, serde_json::to_string_pretty(&value).unwrap()).unwrap();

    let verify = run_cli_command(&["verify-audit", ledger.to_str().unwrap()]).unwrap();
    assert!(!verify.status.success());
    assert!(String::from_utf8_lossy(&verify.stdout).contains("tampered"));

    let again = run_cli_command(&[
        "export",
        zones.to_str().unwrap(),
        "-o",
        out_dir.to_str().unwrap(),
        "--audit",
        ledger.to_str().unwrap(),
    ])
    .unwrap();
    assert!(!again.status.success());
    assert!(String::from_utf8_lossy(&again.stderr).contains("Audit integrity violation"));
}

#[test]
fn test_cli_validate_json_report() {
    let temp_dir = setup_temp_dir();
    let zones = write_zones(temp_dir.path());

    let output = run_cli_command(&["validate", zones.to_str().unwrap(), "--json"]).unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["documentId"], "invoice-17");
    assert_eq!(report["blocking"], false);
}

#[test]
fn test_cli_chunk_to_stdout() {
    let temp_dir = setup_temp_dir();
    let zones = write_zones(temp_dir.path());

    let output =
        run_cli_command(&["chunk", zones.to_str().unwrap(), "--chunk-size", "40"]).unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let chunks: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert!(chunks.len() > 3);
    assert!(chunks
        .iter()
        .all(|c| c["content"].as_str().unwrap().chars().count() <= 40));
}

#[test]
fn test_cli_manifest_summary() {
    let temp_dir = setup_temp_dir();
    let zones = write_zones(temp_dir.path());

    let output = run_cli_command(&[
        "manifest",
        zones.to_str().unwrap(),
        "--detail",
        "summary",
    ])
    .unwrap();
    assert!(output.status.success());
    let manifest: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(manifest["summary"]["totalZones"], 3);
}

#[test]
fn test_cli_missing_input_fails() {
    let output = run_cli_command(&["validate", "/nonexistent/zones.json"]).unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to read zones"));
}

#[test]
fn test_cli_rejects_bad_page_range() {
    let temp_dir = setup_temp_dir();
    let zones = write_zones(temp_dir.path());
    let output = run_cli_command(&["export", zones.to_str().unwrap(), "--pages", "5-2"]).unwrap();
    assert!(!output.status.success());
}

#[test]
fn test_cli_signed_ledger_needs_trusted_key() {
    let temp_dir = setup_temp_dir();
    let ledger = temp_dir.path().join("audit.json");

    let key = zone_export::AuditTrail::generate_signing_key();
    let public = hex::encode(key.verifying_key().to_bytes());
    let mut trail = zone_export::AuditTrail::new().with_signing_key(key);
    trail
        .add_entry("export_completed", serde_json::json!({"runId": "r1"}), "tester")
        .unwrap();
    let mut value: serde_json::Value = serde_json::from_str(&trail.to_json().unwrap()).unwrap();
    value.as_object_mut().unwrap().remove("publicKey");
    fs::write(&ledger, serde_json::to_string_pretty(&value).unwrap()).unwrap();

    let unkeyed = run_cli_command(&["verify-audit", ledger.to_str().unwrap()]).unwrap();
    assert!(!unkeyed.status.success());
    assert!(String::from_utf8_lossy(&unkeyed.stdout).contains("unverified signature"));
    assert!(String::from_utf8_lossy(&unkeyed.stderr).contains("--public-key"));

    let keyed = run_cli_command(&[
        "verify-audit",
        ledger.to_str().unwrap(),
        "--public-key",
        &public,
    ])
    .unwrap();
    assert!(
        keyed.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&keyed.stderr)
    );
    assert!(String::from_utf8_lossy(&keyed.stdout).contains("Chain intact"));

    let wrong = hex::encode(zone_export::AuditTrail::generate_signing_key().verifying_key().to_bytes());
    let mismatched =
        run_cli_command(&["verify-audit", ledger.to_str().unwrap(), "--public-key", &wrong]).unwrap();
    assert!(!mismatched.status.success());
    assert!(String::from_utf8_lossy(&mismatched.stdout).contains("invalid signature"));
}

#[test]
fn test_cli_export_rejects_repeated_format() {
    let temp_dir = setup_temp_dir();
    let zones = write_zones(temp_dir.path());
    let out_dir = temp_dir.path().join("out");

    let output = run_cli_command(&[
        "export",
        zones.to_str().unwrap(),
        "-o",
        out_dir.to_str().unwrap(),
        "-f",
        "log",
        "-f",
        "log",
    ])
    .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("duplicate export format 'log'"), "stderr: {stderr}");
}

#[test]
fn test_cli_bulk_combined_output() {
    let temp_dir = setup_temp_dir();
    let first = write_zones(temp_dir.path());
    let second = temp_dir.path().join("second.json");
    let renamed = fs::read_to_string(&first)
        .unwrap()
        .replace("invoice-17", "invoice-18");
    fs::write(&second, renamed).unwrap();
    let out_dir = temp_dir.path().join("out");

    let output = run_cli_command(&[
        "bulk",
        first.to_str().unwrap(),
        second.to_str().unwrap(),
        "-o",
        out_dir.to_str().unwrap(),
        "-f",
        "manifest",
        "--combine",
    ])
    .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let mut names: Vec<String> = fs::read_dir(&out_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec!["invoice-17-manifest.json", "invoice-18-manifest.json", "summary.json"]
    );
    let summary: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out_dir.join("summary.json")).unwrap()).unwrap();
    assert_eq!(summary["stats"]["completed"], 2);
}

#[test]
fn test_cli_bulk_rejects_same_document_twice() {
    let temp_dir = setup_temp_dir();
    let zones = write_zones(temp_dir.path());

    let output = run_cli_command(&["bulk", zones.to_str().unwrap(), zones.to_str().unwrap()]).unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("appears more than once"));
}

#[test]
fn test_cli_validate_accepts_level() {
    let temp_dir = setup_temp_dir();
    let zones = write_zones(temp_dir.path());

    let output = run_cli_command(&[
        "validate",
        zones.to_str().unwrap(),
        "--validation-level",
        "none",
        "--json",
    ])
    .unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["valid"], true);

    let output = run_cli_command(&["validate", zones.to_str().unwrap(), "--validation-level", "paranoid"]).unwrap();
    assert!(!output.status.success());
}
