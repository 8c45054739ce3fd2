//! Session telemetry.
//!
//! # SAFETY INVARIANT
//! Telemetry is a write-only side channel. Nothing in the session pipeline
//! reads it back to make a decision.
//!
//! # PRIVACY INVARIANT
//! Events carry counts, durations and states only. Never transcript text,
//! never audio.

pub mod event;
pub mod metrics;
pub mod recorder;

use std::sync::{Arc, Mutex};

use event::TelemetryEvent;
use metrics::TelemetrySnapshot;
use recorder::TelemetryRecorder;

/// Shared handle over one recorder; cheap to clone into spawned tasks.
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    recorder: Arc<Mutex<TelemetryRecorder>>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: TelemetryEvent) {
        self.recorder.lock().unwrap_or_else(|e| e.into_inner()).record(event);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.recorder.lock().unwrap_or_else(|e| e.into_inner()).snapshot()
    }

    pub fn recent(&self, n: usize) -> Vec<TelemetryEvent> {
        self.recorder.lock().unwrap_or_else(|e| e.into_inner()).recent(n)
    }
}
