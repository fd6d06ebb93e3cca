//! Progress events and run cancellation
//!
//! The orchestrator reports its lifecycle to an [`EventSink`]. The transport
//! that forwards events to clients lives outside this crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Lifecycle event of an export run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    PhaseStart {
        run_id: String,
        phase: String,
        timestamp: DateTime<Utc>,
    },
    PhaseProgress {
        run_id: String,
        phase: String,
        percentage: f64,
        current_item: Option<String>,
        timestamp: DateTime<Utc>,
    },
    PhaseEnd {
        run_id: String,
        phase: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    RunCompleted {
        run_id: String,
        timestamp: DateTime<Utc>,
    },
    RunFailed {
        run_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    RunCancelled {
        run_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl ProgressEvent {
    pub fn run_id(&self) -> &str {
        match self {
            ProgressEvent::PhaseStart { run_id, .. }
            | ProgressEvent::PhaseProgress { run_id, .. }
            | ProgressEvent::PhaseEnd { run_id, .. }
            | ProgressEvent::RunCompleted { run_id, .. }
            | ProgressEvent::RunFailed { run_id, .. }
            | ProgressEvent::RunCancelled { run_id, .. } => run_id,
        }
    }

    /// Whether this event ends the run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::RunCompleted { .. }
                | ProgressEvent::RunFailed { .. }
                | ProgressEvent::RunCancelled { .. }
        )
    }
}

/// Receiver of progress events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

impl<F> EventSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn emit(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Sink that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Sink that keeps events in memory
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Shared cancellation flag, honored between batch windows and phases
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// The underlying flag, for sharing with a batch processor
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}
