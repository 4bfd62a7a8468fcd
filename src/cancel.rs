// src/cancel.rs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative stop flag shared between a batch run and whoever wants to halt it.
///
/// Clones observe the same flag. The run checks it only between items, so a
/// transfer already in flight always finishes.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent.
    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clears the flag. Only the orchestrator calls this, once at the start of a run.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
