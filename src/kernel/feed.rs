use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use super::event::LogEntry;

const FEED_CHANNEL_CAPACITY: usize = 256;

/// Append-only log shared between the orchestrator (writer) and observers.
///
/// Observers either take a snapshot or subscribe for entries appended after
/// the subscription. A lagging subscriber can always recover from `snapshot`.
#[derive(Debug, Clone)]
pub struct LogFeed {
    entries: Arc<Mutex<Vec<LogEntry>>>,
    tx: broadcast::Sender<LogEntry>,
}

impl Default for LogFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl LogFeed {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(FEED_CHANNEL_CAPACITY);
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            tx,
        }
    }

    pub fn push(&self, entry: LogEntry) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry.clone());
        // No subscribers is fine.
        let _ = self.tx.send(entry);
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.tx.subscribe()
    }
}
