use std::collections::HashMap;

use super::event::{EndReason, TelemetryEvent};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetrySnapshot {
    pub sessions_opened: u64,
    pub avg_connect_latency_ms: f64,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub chunks_scheduled: u64,
    pub chunks_discarded: u64,
    pub decode_failures: u64,
    pub scheduled_audio_ms: u64,
    pub interruptions: u64,
    pub buffers_cut: u64,
    pub turns_completed: u64,
    pub state_transitions: u64,
    pub sessions_ended: HashMap<EndReason, u64>,

    total_connect_latency_ms: u64,
}

impl TelemetrySnapshot {
    /// Folds one event into the running totals.
    pub fn apply(&mut self, event: &TelemetryEvent) {
        match event {
            TelemetryEvent::StateTransition { .. } => self.state_transitions += 1,
            TelemetryEvent::SessionOpened { connect_latency_ms } => {
                self.sessions_opened += 1;
                self.total_connect_latency_ms += connect_latency_ms;
                self.avg_connect_latency_ms =
                    self.total_connect_latency_ms as f64 / self.sessions_opened as f64;
            }
            TelemetryEvent::FrameSent => self.frames_sent += 1,
            TelemetryEvent::FramesDropped { count } => self.frames_dropped += count,
            TelemetryEvent::ChunkScheduled { duration_ms, .. } => {
                self.chunks_scheduled += 1;
                self.scheduled_audio_ms += duration_ms;
            }
            TelemetryEvent::ChunkDiscarded => self.chunks_discarded += 1,
            TelemetryEvent::DecodeFailed => self.decode_failures += 1,
            TelemetryEvent::Interruption { buffers_cut } => {
                self.interruptions += 1;
                self.buffers_cut += *buffers_cut as u64;
            }
            TelemetryEvent::TurnCompleted { .. } => self.turns_completed += 1,
            TelemetryEvent::SessionEnded { reason } => {
                *self.sessions_ended.entry(*reason).or_insert(0) += 1;
            }
        }
    }
}

pub fn compute_snapshot<'a>(
    events: impl IntoIterator<Item = &'a TelemetryEvent>,
) -> TelemetrySnapshot {
    let mut snap = TelemetrySnapshot::default();
    for event in events {
        snap.apply(event);
    }
    snap
}
