//! Integration tests for the hash-chained audit trail

use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;
use zone_export::audit::{verify_chain, AuditQuery, AuditTrail, GENESIS_HASH};
use zone_export::telemetry::{Redactor, REDACTED};
use zone_export::ExportError;

fn trail_with(actions: &[&str]) -> AuditTrail {
    let mut trail = AuditTrail::new();
    for (i, action) in actions.iter().enumerate() {
        trail
            .add_entry(*action, json!({ "step": i }), if i % 2 == 0 { "alice" } else { "bob" })
            .unwrap();
    }
    trail
}

#[test]
fn test_chain_links_every_entry() {
    let trail = trail_with(&["export_started", "export_completed", "export_started"]);
    let entries = trail.entries();

    assert_eq!(entries[0].previous_hash, GENESIS_HASH);
    assert_eq!(entries[0].previous_index, None);
    for pair in entries.windows(2) {
        assert_eq!(pair[1].previous_hash, pair[0].hash);
        assert_eq!(pair[1].previous_index, Some(pair[0].index));
    }
    assert_eq!(trail.last_hash(), entries[2].hash);
    assert!(trail.verify_integrity().valid);
}

#[test]
fn test_edit_detected_in_persisted_ledger() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("audit.json");
    let trail = trail_with(&["a", "b", "c"]);
    std::fs::write(&path, trail.to_json().unwrap()).unwrap();

    let mut ledger: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    ledger["entries"][1]["content"]["step"] = json!(42);
    std::fs::write(&path, serde_json::to_string_pretty(&ledger).unwrap()).unwrap();

    let reloaded = AuditTrail::from_json(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let report = reloaded.verify_integrity();
    assert!(!report.valid);
    assert_eq!(report.tampered_entries, vec![trail.entries()[1].entry_id.clone()]);
    assert_eq!(report.first_violation.as_deref(), Some(trail.entries()[1].entry_id.as_str()));

    match reloaded.require_intact() {
        Err(ExportError::AuditIntegrityViolation { entry_id }) => {
            assert_eq!(entry_id, trail.entries()[1].entry_id)
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_removed_entry_breaks_links() {
    let trail = trail_with(&["a", "b", "c", "d"]);
    let mut entries = trail.snapshot();
    entries.remove(1);

    let report = verify_chain(&entries, None);
    assert!(!report.valid);
    assert!(report.broken_links.contains(&entries[1].entry_id));
    assert!(report.tampered_entries.is_empty());
}

#[test]
fn test_signatures_survive_persistence() {
    let key = AuditTrail::generate_signing_key();
    let public = key.verifying_key();
    let mut trail = AuditTrail::new().with_signing_key(key);
    trail.add_entry("export_completed", json!({"runId": "r1"}), "alice").unwrap();
    trail.add_entry("export_failed", json!({"runId": "r2"}), "alice").unwrap();

    let json = trail.to_json().unwrap();
    let reloaded = AuditTrail::from_json(&json).unwrap().with_trusted_key(public);
    assert!(reloaded.verify_integrity().valid);

    let other_key = AuditTrail::generate_signing_key().verifying_key();
    let report = verify_chain(reloaded.entries(), Some(&other_key));
    assert_eq!(report.invalid_signatures.len(), 2);
}

#[test]
fn test_stripped_public_key_does_not_skip_signature_checks() {
    let mut trail = AuditTrail::new().with_signing_key(AuditTrail::generate_signing_key());
    trail.add_entry("export_completed", json!({"runId": "r1"}), "alice").unwrap();

    let mut ledger: serde_json::Value = serde_json::from_str(&trail.to_json().unwrap()).unwrap();
    ledger.as_object_mut().unwrap().remove("publicKey");
    let reloaded = AuditTrail::from_json(&ledger.to_string()).unwrap();
    assert!(reloaded.is_signed());
    assert!(reloaded.declared_key().is_none());

    let report = reloaded.verify_integrity();
    assert!(!report.valid);
    assert_eq!(report.unverified_signatures, vec![trail.entries()[0].entry_id.clone()]);
    assert!(matches!(
        reloaded.require_intact(),
        Err(ExportError::AuditIntegrityViolation { .. })
    ));
}

#[test]
fn test_rewritten_entry_id_detected() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("audit.json");
    let trail = trail_with(&["a", "b"]);
    std::fs::write(&path, trail.to_json().unwrap()).unwrap();

    let mut ledger: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    ledger["entries"][0]["entryId"] = json!("replacement-id");
    let reloaded = AuditTrail::from_json(&ledger.to_string()).unwrap();

    let report = reloaded.verify_integrity();
    assert!(!report.valid);
    assert_eq!(report.tampered_entries, vec!["replacement-id".to_string()]);
}

#[test]
fn test_sensitive_content_redacted_before_hashing() {
    let mut trail = AuditTrail::new().with_redactor(Redactor::new().with_key("ssn"));
    let entry = trail
        .add_entry(
            "config_changed",
            json!({"apiToken": "abc123", "settings": {"customer_ssn": "000-00-0000", "chunkSize": 800}}),
            "ops",
        )
        .unwrap()
        .clone();

    assert_eq!(entry.content["apiToken"], json!(REDACTED));
    assert_eq!(entry.content["settings"]["customer_ssn"], json!(REDACTED));
    assert_eq!(entry.content["settings"]["chunkSize"], json!(800));
    assert!(trail.verify_integrity().valid);
}

#[test]
fn test_queries_filter_by_actor_and_action() {
    let mut trail = AuditTrail::new().with_anonymized_actors(true);
    trail.add_entry("export_completed", json!({}), "alice").unwrap();
    trail.add_entry("export_failed", json!({}), "bob").unwrap();
    trail.add_entry("export_completed", json!({}), "bob").unwrap();

    assert!(trail.entries().iter().all(|e| e.actor.starts_with("actor-")));
    assert_eq!(trail.query(&AuditQuery::new().actor("bob")).len(), 2);
    assert_eq!(
        trail
            .query(&AuditQuery::new().actor("bob").action("export_completed"))
            .len(),
        1
    );
    assert_eq!(trail.query(&AuditQuery::new()).len(), 3);
}
