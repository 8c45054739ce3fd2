use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic cancellation epoch.
///
/// Async work captures the current value when it starts. Bumping the
/// generation invalidates everything captured before, so a result that lands
/// late can be recognised and dropped instead of applied.
#[derive(Debug, Clone, Default)]
pub struct Generation {
    current: Arc<AtomicU64>,
}

impl Generation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Invalidates every outstanding capture. Returns the new generation.
    pub fn bump(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_current(&self, captured: u64) -> bool {
        self.current() == captured
    }
}
