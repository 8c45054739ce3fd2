use super::event::{LogEntry, LogSource};

/// Per-turn transcript accumulation for both directions.
///
/// Deltas are concatenated verbatim in arrival order. Nothing survives a
/// `flush`: the buffers are emptied in the same call that emits their entries.
#[derive(Debug, Default)]
pub struct TranscriptAggregator {
    input: String,
    output: String,
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_input(&mut self, delta: &str) {
        self.input.push_str(delta);
    }

    pub fn append_output(&mut self, delta: &str) {
        self.output.push_str(delta);
    }

    /// Turn boundary. Emits at most one `user` entry then at most one `agent` entry.
    pub fn flush(&mut self) -> Vec<LogEntry> {
        let mut entries = Vec::with_capacity(2);
        if !self.input.is_empty() {
            entries.push(LogEntry::new(LogSource::User, std::mem::take(&mut self.input)));
        }
        if !self.output.is_empty() {
            entries.push(LogEntry::new(LogSource::Agent, std::mem::take(&mut self.output)));
        }
        entries
    }

    /// Drops the agent's partial utterance without logging it (barge-in).
    pub fn discard_output(&mut self) {
        self.output.clear();
    }

    pub fn pending_output(&self) -> &str {
        &self.output
    }
}
