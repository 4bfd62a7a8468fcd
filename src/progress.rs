// src/progress.rs

use crate::models::{BatchOutcome, BatchState, ItemStatus};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

/// Receives notifications from a batch run. It renders or forwards what it
/// is told and never holds the authoritative batch state.
pub trait ProgressTracker: Send + Sync {
    fn on_item_status_changed(&self, index: usize, status: ItemStatus);

    fn on_progress(&self, completed: usize, total: usize, percent: u8);

    fn on_batch_finished(&self, _outcome: BatchOutcome, _state: &BatchState) {}
}

/// Writes every notification to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressTracker for LogProgress {
    fn on_item_status_changed(&self, index: usize, status: ItemStatus) {
        debug!(index, ?status, "item status changed");
    }

    fn on_progress(&self, completed: usize, total: usize, percent: u8) {
        info!(completed, total, percent, "{completed} / {total} completed ({percent}%)");
    }

    fn on_batch_finished(&self, outcome: BatchOutcome, state: &BatchState) {
        info!(%outcome, completed = state.completed, total = state.total, "batch finished");
    }
}

/// Notification forwarded by [`ChannelProgress`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    ItemStatus {
        index: usize,
        status: ItemStatus,
    },
    Progress {
        completed: usize,
        total: usize,
        percent: u8,
    },
    Finished {
        outcome: BatchOutcome,
        completed: usize,
        total: usize,
    },
}

/// Forwards notifications over an unbounded channel, e.g. to a UI task.
/// A dropped receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    tx: UnboundedSender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn new(tx: UnboundedSender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressTracker for ChannelProgress {
    fn on_item_status_changed(&self, index: usize, status: ItemStatus) {
        let _ = self.tx.send(ProgressEvent::ItemStatus { index, status });
    }

    fn on_progress(&self, completed: usize, total: usize, percent: u8) {
        let _ = self.tx.send(ProgressEvent::Progress {
            completed,
            total,
            percent,
        });
    }

    fn on_batch_finished(&self, outcome: BatchOutcome, state: &BatchState) {
        let _ = self.tx.send(ProgressEvent::Finished {
            outcome,
            completed: state.completed,
            total: state.total,
        });
    }
}

/// Delivers each notification to several trackers in order.
#[derive(Clone, Default)]
pub struct Fanout {
    trackers: Vec<Arc<dyn ProgressTracker>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tracker: Arc<dyn ProgressTracker>) -> Self {
        self.trackers.push(tracker);
        self
    }
}

impl ProgressTracker for Fanout {
    fn on_item_status_changed(&self, index: usize, status: ItemStatus) {
        for t in &self.trackers {
            t.on_item_status_changed(index, status);
        }
    }

    fn on_progress(&self, completed: usize, total: usize, percent: u8) {
        for t in &self.trackers {
            t.on_progress(completed, total, percent);
        }
    }

    fn on_batch_finished(&self, outcome: BatchOutcome, state: &BatchState) {
        for t in &self.trackers {
            t.on_batch_finished(outcome, state);
        }
    }
}
