use std::collections::VecDeque;

use super::event::TelemetryEvent;
use super::metrics::TelemetrySnapshot;

const MAX_EVENTS: usize = 10_000;

/// Running totals plus a bounded tail of raw events.
///
/// Totals are folded in as events arrive, so they stay exact after the
/// tail starts evicting.
#[derive(Debug, Default)]
pub struct TelemetryRecorder {
    buffer: VecDeque<TelemetryEvent>,
    totals: TelemetrySnapshot,
}

impl TelemetryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: TelemetryEvent) {
        self.totals.apply(&event);
        if self.buffer.len() >= MAX_EVENTS {
            self.buffer.pop_front();
        }
        self.buffer.push_back(event);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.totals.clone()
    }

    /// Up to `n` most recent events, oldest first.
    pub fn recent(&self, n: usize) -> Vec<TelemetryEvent> {
        let skip = self.buffer.len().saturating_sub(n);
        self.buffer.iter().skip(skip).cloned().collect()
    }
}
