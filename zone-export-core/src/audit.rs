//! Hash-chained audit trail
//!
//! Entries live in an index-addressed arena. Each entry stores a copy of its
//! predecessor's hash and index, so the chain can be re-verified from the
//! entries alone:
//!
//! ```text
//! hash[i] = sha256(json{entryId, index, previousIndex, action, content, actor, timestamp} || hash[i-1])
//! hash[-1] = "000...0" (64 zeros)
//! ```
//!
//! When a signing key is attached every hash is also signed with Ed25519.
//! Signatures are only checked against a key supplied by the caller; the
//! public key a serialized ledger declares about itself is informational.

use crate::error::{ExportError, Result};
use crate::telemetry::{anonymize_actor, Redactor};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Previous hash of the first entry
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// One appended action; never modified after append
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub entry_id: String,
    pub index: usize,
    pub action: String,
    pub content: Value,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub hash: String,
    pub previous_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Every stored field except the hash, signature and previous hash
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HashInput<'a> {
    entry_id: &'a str,
    index: usize,
    previous_index: Option<usize>,
    action: &'a str,
    content: &'a Value,
    actor: &'a str,
    timestamp: &'a DateTime<Utc>,
}

impl AuditEntry {
    /// Hash this entry should carry given its stored fields
    pub fn recompute_hash(&self) -> Result<String> {
        let serialized = serde_json::to_vec(&HashInput {
            entry_id: &self.entry_id,
            index: self.index,
            previous_index: self.previous_index,
            action: &self.action,
            content: &self.content,
            actor: &self.actor,
            timestamp: &self.timestamp,
        })?;
        let mut hasher = Sha256::new();
        hasher.update(&serialized);
        hasher.update(self.previous_hash.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }
}

/// Outcome of walking the chain
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub valid: bool,
    pub checked: usize,
    /// Entries whose stored hash differs from the recomputed one
    pub tampered_entries: Vec<String>,
    /// Entries whose previous hash does not match their predecessor
    pub broken_links: Vec<String>,
    pub invalid_signatures: Vec<String>,
    /// Signed entries checked without a trusted key
    #[serde(default)]
    pub unverified_signatures: Vec<String>,
    /// Earliest entry with any violation
    pub first_violation: Option<String>,
}

impl IntegrityReport {
    /// Signatures are present but nothing could check them
    pub fn is_unverifiable(&self) -> bool {
        !self.unverified_signatures.is_empty()
    }
}

/// Verify a sequence of entries as one chain.
///
/// With a trusted `key` every entry must carry a valid signature. Without
/// one, a signed entry cannot be verified and counts as a violation.
pub fn verify_chain(entries: &[AuditEntry], key: Option<&VerifyingKey>) -> IntegrityReport {
    let mut report = IntegrityReport {
        checked: entries.len(),
        ..Default::default()
    };
    let mut first: Option<usize> = None;
    let mut flag = |i: usize| {
        first = Some(first.map_or(i, |f| f.min(i)));
    };

    for (i, entry) in entries.iter().enumerate() {
        let expected_previous = match i {
            0 => GENESIS_HASH,
            _ => entries[i - 1].hash.as_str(),
        };
        let expected_index = i.checked_sub(1);
        if entry.previous_hash != expected_previous
            || entry.previous_index != expected_index
            || entry.index != i
        {
            report.broken_links.push(entry.entry_id.clone());
            flag(i);
        }

        match entry.recompute_hash() {
            Ok(hash) if hash == entry.hash => {}
            _ => {
                report.tampered_entries.push(entry.entry_id.clone());
                flag(i);
            }
        }

        match key {
            Some(key) if !signature_matches(entry, key) => {
                report.invalid_signatures.push(entry.entry_id.clone());
                flag(i);
            }
            None if entry.signature.is_some() => {
                report.unverified_signatures.push(entry.entry_id.clone());
                flag(i);
            }
            _ => {}
        }
    }

    report.first_violation = first.map(|i| entries[i].entry_id.clone());
    report.valid = report.first_violation.is_none();
    report
}

fn signature_matches(entry: &AuditEntry, key: &VerifyingKey) -> bool {
    let Some(encoded) = &entry.signature else {
        return false;
    };
    let Ok(bytes) = hex::decode(encoded) else {
        return false;
    };
    let Ok(bytes) = <[u8; 64]>::try_from(bytes.as_slice()) else {
        return false;
    };
    key.verify(entry.hash.as_bytes(), &Signature::from_bytes(&bytes))
        .is_ok()
}

/// Read-only filter over the trail
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub actor: Option<String>,
    pub action: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl AuditQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Inclusive time range; either end may be open
    pub fn between(mut self, from: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        self.from = from;
        self.until = until;
        self
    }
}

/// Serialized form of a trail
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ledger {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    public_key: Option<String>,
    entries: Vec<AuditEntry>,
}

/// Append-only ledger with a single writer
#[derive(Debug, Default)]
pub struct AuditTrail {
    entries: Vec<AuditEntry>,
    signing_key: Option<SigningKey>,
    verifying_key: Option<VerifyingKey>,
    /// Key a loaded ledger claims; never used for verification
    declared_key: Option<VerifyingKey>,
    anonymize_actors: bool,
    redactor: Redactor,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh random Ed25519 key
    pub fn generate_signing_key() -> SigningKey {
        SigningKey::generate(&mut rand::rngs::OsRng)
    }

    pub fn with_signing_key(mut self, key: SigningKey) -> Self {
        self.verifying_key = Some(key.verifying_key());
        self.signing_key = Some(key);
        self
    }

    /// Check signatures against `key` instead of treating them as unverifiable
    pub fn with_trusted_key(mut self, key: VerifyingKey) -> Self {
        self.verifying_key = Some(key);
        self
    }

    pub fn with_anonymized_actors(mut self, anonymize: bool) -> Self {
        self.anonymize_actors = anonymize;
        self
    }

    pub fn with_redactor(mut self, redactor: Redactor) -> Self {
        self.redactor = redactor;
        self
    }

    /// Key signatures are verified against
    pub fn verifying_key(&self) -> Option<&VerifyingKey> {
        self.verifying_key.as_ref()
    }

    /// Public key recorded in the loaded ledger, if any
    pub fn declared_key(&self) -> Option<&VerifyingKey> {
        self.declared_key.as_ref()
    }

    /// Whether any entry carries a signature
    pub fn is_signed(&self) -> bool {
        self.entries.iter().any(|e| e.signature.is_some())
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, entry_id: &str) -> Option<&AuditEntry> {
        self.entries.iter().find(|e| e.entry_id == entry_id)
    }

    pub fn last_hash(&self) -> &str {
        self.entries
            .last()
            .map_or(GENESIS_HASH, |e| e.hash.as_str())
    }

    fn actor_name(&self, actor: &str) -> String {
        if self.anonymize_actors {
            anonymize_actor(actor)
        } else {
            actor.to_string()
        }
    }

    /// Append an action; content is redacted before hashing
    pub fn add_entry(
        &mut self,
        action: impl Into<String>,
        content: Value,
        actor: &str,
    ) -> Result<&AuditEntry> {
        let action = action.into();
        let content = self.redactor.redact(&content);
        let actor = self.actor_name(actor);
        let index = self.entries.len();
        let mut entry = AuditEntry {
            entry_id: uuid::Uuid::new_v4().to_string(),
            index,
            action,
            content,
            timestamp: Utc::now(),
            actor,
            hash: String::new(),
            previous_hash: self.last_hash().to_string(),
            previous_index: index.checked_sub(1),
            signature: None,
        };
        entry.hash = entry.recompute_hash()?;
        entry.signature = self
            .signing_key
            .as_ref()
            .map(|key| hex::encode(key.sign(entry.hash.as_bytes()).to_bytes()));
        tracing::info!(
            entry_id = %entry.entry_id,
            index,
            action = %entry.action,
            actor = %entry.actor,
            "audit entry appended"
        );
        self.entries.push(entry);
        Ok(&self.entries[index])
    }

    pub fn verify_integrity(&self) -> IntegrityReport {
        let report = verify_chain(&self.entries, self.verifying_key.as_ref());
        if !report.valid {
            tracing::error!(
                first_violation = ?report.first_violation,
                tampered = report.tampered_entries.len(),
                broken_links = report.broken_links.len(),
                unverified = report.unverified_signatures.len(),
                "audit chain failed verification"
            );
        }
        report
    }

    /// Error on the first violation
    pub fn require_intact(&self) -> Result<()> {
        match self.verify_integrity().first_violation {
            Some(entry_id) => Err(ExportError::AuditIntegrityViolation { entry_id }),
            None => Ok(()),
        }
    }

    pub fn query(&self, query: &AuditQuery) -> Vec<&AuditEntry> {
        let actor = query.actor.as_deref().map(|a| (a, anonymize_actor(a)));
        self.entries
            .iter()
            .filter(|e| match &actor {
                Some((raw, pseudonym)) => e.actor == *raw || e.actor == *pseudonym,
                None => true,
            })
            .filter(|e| query.action.as_ref().map_or(true, |a| &e.action == a))
            .filter(|e| query.from.map_or(true, |from| e.timestamp >= from))
            .filter(|e| query.until.map_or(true, |until| e.timestamp <= until))
            .collect()
    }

    /// Copy of the entries, verifiable without the trail
    pub fn snapshot(&self) -> Vec<AuditEntry> {
        self.entries.clone()
    }

    pub fn to_json(&self) -> Result<String> {
        let ledger = Ledger {
            public_key: self
                .verifying_key
                .or(self.declared_key)
                .map(|k| hex::encode(k.to_bytes())),
            entries: self.entries.clone(),
        };
        Ok(serde_json::to_string_pretty(&ledger)?)
    }

    /// Load a trail for verification.
    ///
    /// No key is trusted: attach one with [`AuditTrail::with_trusted_key`],
    /// otherwise signed entries verify as unverifiable.
    pub fn from_json(json: &str) -> Result<Self> {
        let ledger: Ledger = serde_json::from_str(json)?;
        let declared_key = match ledger.public_key {
            Some(encoded) => Some(decode_public_key(&encoded)?),
            None => None,
        };
        Ok(Self {
            entries: ledger.entries,
            declared_key,
            ..Default::default()
        })
    }
}

/// Parse a hex-encoded Ed25519 public key
pub fn decode_public_key(encoded: &str) -> Result<VerifyingKey> {
    let bytes = hex::decode(encoded).map_err(|e| ExportError::Signature(e.to_string()))?;
    let bytes = <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| ExportError::Signature("public key must be 32 bytes".to_string()))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| ExportError::Signature(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chain(n: usize) -> AuditTrail {
        let mut trail = AuditTrail::new();
        for i in 0..n {
            trail
                .add_entry("export", json!({"run": i}), "alice")
                .unwrap();
        }
        trail
    }

    #[test]
    fn test_genesis_and_links() {
        let trail = chain(3);
        let entries = trail.entries();
        assert_eq!(entries[0].previous_hash, GENESIS_HASH);
        assert_eq!(entries[0].previous_index, None);
        assert_eq!(entries[1].previous_hash, entries[0].hash);
        assert_eq!(entries[2].previous_index, Some(1));
        assert_eq!(trail.last_hash(), entries[2].hash);
        assert!(trail.verify_integrity().valid);
    }

    #[test]
    fn test_tampered_content_detected() {
        let trail = chain(3);
        let mut entries = trail.snapshot();
        entries[1].content = json!({"run": 99});
        let report = verify_chain(&entries, None);
        assert!(!report.valid);
        assert_eq!(report.tampered_entries, vec![entries[1].entry_id.clone()]);
        assert!(report.broken_links.is_empty());
        assert_eq!(report.first_violation, Some(entries[1].entry_id.clone()));
    }

    #[test]
    fn test_rehashed_entry_breaks_link() {
        let trail = chain(3);
        let mut entries = trail.snapshot();
        entries[0].content = json!({"run": 42});
        entries[0].hash = entries[0].recompute_hash().unwrap();
        let report = verify_chain(&entries, None);
        assert!(report.tampered_entries.is_empty());
        assert_eq!(report.broken_links, vec![entries[1].entry_id.clone()]);
    }

    #[test]
    fn test_signatures() {
        let mut trail = AuditTrail::new().with_signing_key(AuditTrail::generate_signing_key());
        trail.add_entry("export", json!({}), "alice").unwrap();
        trail.add_entry("export", json!({}), "bob").unwrap();
        assert!(trail.verify_integrity().valid);

        let other = AuditTrail::generate_signing_key().verifying_key();
        let report = verify_chain(trail.entries(), Some(&other));
        assert_eq!(report.invalid_signatures.len(), 2);
    }

    #[test]
    fn test_json_round_trip_verifies_with_trusted_key() {
        let key = AuditTrail::generate_signing_key();
        let public = key.verifying_key();
        let mut trail = AuditTrail::new().with_signing_key(key);
        trail.add_entry("export", json!({"formats": ["chunks"]}), "alice").unwrap();

        let restored = AuditTrail::from_json(&trail.to_json().unwrap()).unwrap();
        assert_eq!(restored.entries(), trail.entries());
        assert_eq!(restored.declared_key(), Some(&public));
        assert!(restored.verifying_key().is_none());

        let trusted = restored.with_trusted_key(public);
        assert!(trusted.verify_integrity().valid);
    }

    #[test]
    fn test_signed_ledger_without_trusted_key_is_unverifiable() {
        let mut trail = AuditTrail::new().with_signing_key(AuditTrail::generate_signing_key());
        trail.add_entry("export", json!({}), "alice").unwrap();

        let mut ledger: Value = serde_json::from_str(&trail.to_json().unwrap()).unwrap();
        ledger.as_object_mut().unwrap().remove("publicKey");
        let stripped = AuditTrail::from_json(&ledger.to_string()).unwrap();

        let report = stripped.verify_integrity();
        assert!(!report.valid);
        assert!(report.is_unverifiable());
        assert!(report.tampered_entries.is_empty());
        assert!(stripped.require_intact().is_err());
    }

    #[test]
    fn test_declared_key_is_not_trusted() {
        let mut trail = AuditTrail::new().with_signing_key(AuditTrail::generate_signing_key());
        trail.add_entry("export", json!({"run": 1}), "alice").unwrap();

        // Re-sign a forged entry with another key and declare that key
        let forger = AuditTrail::generate_signing_key();
        let mut ledger: Value = serde_json::from_str(&trail.to_json().unwrap()).unwrap();
        let mut entry: AuditEntry = serde_json::from_value(ledger["entries"][0].clone()).unwrap();
        entry.content = json!({"run": 2});
        entry.hash = entry.recompute_hash().unwrap();
        entry.signature = Some(hex::encode(forger.sign(entry.hash.as_bytes()).to_bytes()));
        ledger["entries"][0] = serde_json::to_value(&entry).unwrap();
        ledger["publicKey"] = json!(hex::encode(forger.verifying_key().to_bytes()));
        let forged = AuditTrail::from_json(&ledger.to_string()).unwrap();

        assert!(!forged.verify_integrity().valid);
        let genuine = *trail.verifying_key().unwrap();
        let report = forged.with_trusted_key(genuine).verify_integrity();
        assert_eq!(report.invalid_signatures, vec![entry.entry_id.clone()]);
    }

    #[test]
    fn test_unsigned_entries_fail_against_trusted_key() {
        let trail = chain(1);
        let key = AuditTrail::generate_signing_key().verifying_key();
        let report = verify_chain(trail.entries(), Some(&key));
        assert_eq!(report.invalid_signatures.len(), 1);
    }

    #[test]
    fn test_rewritten_entry_id_detected() {
        let trail = chain(2);
        let mut entries = trail.snapshot();
        entries[1].entry_id = "forged".to_string();
        let report = verify_chain(&entries, None);
        assert_eq!(report.tampered_entries, vec!["forged".to_string()]);

        let mut entries = trail.snapshot();
        entries[0].index = 7;
        let report = verify_chain(&entries, None);
        assert!(report.tampered_entries.contains(&entries[0].entry_id));
    }

    #[test]
    fn test_redaction_and_anonymization() {
        let mut trail = AuditTrail::new().with_anonymized_actors(true);
        let entry = trail
            .add_entry("export", json!({"apiKey": "k", "page": 1}), "alice")
            .unwrap()
            .clone();
        assert_eq!(entry.content["apiKey"], "<redacted>");
        assert_eq!(entry.actor, anonymize_actor("alice"));
        assert_eq!(trail.query(&AuditQuery::new().actor("alice")).len(), 1);
    }

    #[test]
    fn test_query_filters() {
        let mut trail = AuditTrail::new();
        for (action, actor) in [("export", "alice"), ("selection", "bob"), ("export", "bob")] {
            trail.add_entry(action, json!({}), actor).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(2));
        }

        assert_eq!(trail.query(&AuditQuery::new().action("export")).len(), 2);
        assert_eq!(
            trail
                .query(&AuditQuery::new().action("export").actor("bob"))
                .len(),
            1
        );
        let start = trail.entries()[1].timestamp;
        assert_eq!(
            trail
                .query(&AuditQuery::new().between(Some(start), None))
                .len(),
            2
        );
    }

    #[test]
    fn test_require_intact() {
        let trail = chain(2);
        assert!(trail.require_intact().is_ok());

        let mut entries = trail.snapshot();
        entries[1].actor = "mallory".to_string();
        let json = serde_json::to_string(&json!({ "entries": entries })).unwrap();
        let forged = AuditTrail::from_json(&json).unwrap();
        match forged.require_intact() {
            Err(ExportError::AuditIntegrityViolation { entry_id }) => {
                assert_eq!(entry_id, entries[1].entry_id)
            }
            other => panic!("expected violation, got {other:?}"),
        }
    }
}
