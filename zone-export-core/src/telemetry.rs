//! Phase timing, redaction and actor pseudonyms

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{Duration, Instant};

/// Bucket of a phase duration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationCategory {
    Fast,
    Normal,
    Slow,
    VerySlow,
}

impl DurationCategory {
    pub fn from_millis(ms: u64) -> Self {
        match ms {
            0..=99 => DurationCategory::Fast,
            100..=999 => DurationCategory::Normal,
            1000..=4999 => DurationCategory::Slow,
            _ => DurationCategory::VerySlow,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DurationCategory::Fast => "fast",
            DurationCategory::Normal => "normal",
            DurationCategory::Slow => "slow",
            DurationCategory::VerySlow => "very_slow",
        }
    }
}

impl fmt::Display for DurationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wall-clock measurement of one finished phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseTiming {
    pub phase: String,
    pub duration_ms: u64,
    pub items: usize,
    pub category: DurationCategory,
}

/// A phase that has started but not yet been recorded
#[derive(Debug)]
pub struct PhaseTimer {
    phase: String,
    started: Instant,
}

impl PhaseTimer {
    pub fn phase(&self) -> &str {
        &self.phase
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Collects phase timings of one run
#[derive(Debug, Default)]
pub struct PerformanceLogger {
    run_id: String,
    timings: Vec<PhaseTiming>,
}

impl PerformanceLogger {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            timings: Vec::new(),
        }
    }

    pub fn start(&self, phase: impl Into<String>) -> PhaseTimer {
        let phase = phase.into();
        tracing::debug!(run_id = %self.run_id, phase = %phase, "phase started");
        PhaseTimer {
            phase,
            started: Instant::now(),
        }
    }

    /// Record a finished phase with the number of items it handled
    pub fn finish(&mut self, timer: PhaseTimer, items: usize) -> PhaseTiming {
        let duration_ms = timer.elapsed().as_millis() as u64;
        self.record(timer.phase, duration_ms, items)
    }

    pub fn record(&mut self, phase: impl Into<String>, duration_ms: u64, items: usize) -> PhaseTiming {
        let timing = PhaseTiming {
            phase: phase.into(),
            duration_ms,
            items,
            category: DurationCategory::from_millis(duration_ms),
        };
        match timing.category {
            DurationCategory::Slow | DurationCategory::VerySlow => tracing::warn!(
                run_id = %self.run_id,
                phase = %timing.phase,
                duration_ms,
                items,
                category = %timing.category,
                "slow phase"
            ),
            _ => tracing::info!(
                run_id = %self.run_id,
                phase = %timing.phase,
                duration_ms,
                items,
                category = %timing.category,
                "phase finished"
            ),
        }
        self.timings.push(timing.clone());
        timing
    }

    pub fn timings(&self) -> &[PhaseTiming] {
        &self.timings
    }

    pub fn total_ms(&self) -> u64 {
        self.timings.iter().map(|t| t.duration_ms).sum()
    }

    pub fn into_timings(self) -> Vec<PhaseTiming> {
        self.timings
    }
}

pub const REDACTED: &str = "<redacted>";

const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "token",
    "secret",
    "apikey",
    "authorization",
    "cookie",
];

/// Masks values of sensitive keys in JSON metadata
#[derive(Debug, Clone)]
pub struct Redactor {
    keys: Vec<String>,
}

impl Default for Redactor {
    fn default() -> Self {
        Self {
            keys: SENSITIVE_KEYS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

impl Redactor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key: &str) -> Self {
        self.keys.push(normalize_key(key));
        self
    }

    /// `accessToken`, `API-Key` and `db_password` all count as sensitive
    pub fn is_sensitive(&self, key: &str) -> bool {
        let key = normalize_key(key);
        self.keys.iter().any(|k| key.contains(k.as_str()))
    }

    pub fn redact(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| {
                        let v = if self.is_sensitive(k) {
                            Value::String(REDACTED.to_string())
                        } else {
                            self.redact(v)
                        };
                        (k.clone(), v)
                    })
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact(v)).collect()),
            other => other.clone(),
        }
    }
}

/// Stable pseudonym for an actor name
pub fn anonymize_actor(actor: &str) -> String {
    let digest = Sha256::digest(actor.as_bytes());
    let hex = hex::encode(digest);
    format!("actor-{}", &hex[..12])
}
