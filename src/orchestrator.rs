// src/orchestrator.rs

use crate::cancel::StopToken;
use crate::error::{Error, Result};
use crate::models::{
    percent, BatchOutcome, BatchReport, BatchState, Collection, ItemStatus, MediaFormat,
    TransferRequest,
};
use crate::progress::{LogProgress, ProgressTracker};
use crate::sink::ArtifactSink;
use crate::transfer::TransferClient;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

const DEFAULT_WATCH_URL_BASE: &str = "https://www.youtube.com/watch?v=";

#[derive(Debug, Default)]
struct RunState {
    completed: usize,
    total: usize,
    is_running: bool,
    statuses: Vec<ItemStatus>,
}

/// Downloads the items of a collection one after another.
///
/// At most one run is active per orchestrator, and within a run at most one
/// transfer is in flight. A stop request is honoured between items: the
/// current transfer finishes and every item that has not started yet is
/// marked [`ItemStatus::Skipped`].
pub struct BatchOrchestrator {
    client: Arc<dyn TransferClient>,
    sink: Arc<dyn ArtifactSink>,
    progress: Arc<dyn ProgressTracker>,
    watch_url_base: String,
    stop: StopToken,
    run: Mutex<RunState>,
}

impl BatchOrchestrator {
    pub fn new(client: Arc<dyn TransferClient>, sink: Arc<dyn ArtifactSink>) -> Self {
        Self {
            client,
            sink,
            progress: Arc::new(LogProgress),
            watch_url_base: DEFAULT_WATCH_URL_BASE.to_string(),
            stop: StopToken::new(),
            run: Mutex::new(RunState::default()),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressTracker>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_watch_url_base(mut self, base: impl Into<String>) -> Self {
        self.watch_url_base = base.into();
        self
    }

    /// Runs a batch over `collection` and resolves once it has completed or stopped.
    ///
    /// Returns [`Error::BatchAlreadyRunning`] without touching any state if
    /// another run is active. Failed items never abort the run.
    pub async fn start(
        &self,
        collection: &Collection,
        format: MediaFormat,
        quality: Option<&str>,
    ) -> Result<BatchReport> {
        let total = collection.len();
        {
            let mut run = self.lock();
            if run.is_running {
                warn!("batch start rejected, a run is already active");
                return Err(Error::BatchAlreadyRunning);
            }
            self.stop.reset();
            *run = RunState {
                completed: 0,
                total,
                is_running: true,
                statuses: vec![ItemStatus::Pending; total],
            };
        }
        let _running = RunningGuard(self);

        info!(title = %collection.title, total, %format, "starting batch");
        self.progress.on_progress(0, total, 0);

        let outcome = self.run_items(collection, format, quality).await;

        let (state, statuses) = {
            let mut run = self.lock();
            run.is_running = false;
            debug_assert!(
                run.statuses.iter().all(|s| s.is_terminal()),
                "run ended with unsettled items: {:?}",
                run.statuses
            );
            (self.snapshot(&run), run.statuses.clone())
        };
        self.progress.on_batch_finished(outcome, &state);

        Ok(BatchReport {
            outcome,
            state,
            statuses,
        })
    }

    async fn run_items(
        &self,
        collection: &Collection,
        format: MediaFormat,
        quality: Option<&str>,
    ) -> BatchOutcome {
        for (index, item) in collection.items().iter().enumerate() {
            if self.stop.is_stop_requested() {
                info!(index, "stop requested, skipping remaining items");
                self.skip_from(index);
                return BatchOutcome::Stopped;
            }

            self.set_status(index, ItemStatus::InProgress);
            let request =
                TransferRequest::for_item(item, &self.watch_url_base, format, quality);

            let status = match self.client.fetch(&request).await {
                Ok(artifact) => match self.sink.save(&artifact).await {
                    Ok(saved) => {
                        debug!(
                            index,
                            item_id = %item.id,
                            path = %saved.path.display(),
                            "item done"
                        );
                        ItemStatus::Done
                    }
                    Err(e) => {
                        warn!(index, item_id = %item.id, error = %e, "saving artifact failed");
                        ItemStatus::Failed
                    }
                },
                Err(e) => {
                    warn!(index, item_id = %item.id, reason = %e, "item failed");
                    ItemStatus::Failed
                }
            };
            self.set_status(index, status);

            // Failed items count as completed for progress.
            let (completed, total) = {
                let mut run = self.lock();
                run.completed += 1;
                (run.completed, run.total)
            };
            self.progress
                .on_progress(completed, total, percent(completed, total));
        }

        // A stop that lands while the last item is in flight still counts.
        if self.stop.is_stop_requested() {
            BatchOutcome::Stopped
        } else {
            BatchOutcome::Completed
        }
    }

    /// Asks the active run to stop before its next item. Idempotent, and a
    /// no-op when nothing is running.
    pub fn request_stop(&self) {
        let run = self.lock();
        if run.is_running {
            if !self.stop.is_stop_requested() {
                info!(completed = run.completed, total = run.total, "stop requested");
            }
            self.stop.request_stop();
        } else {
            debug!("stop requested with no active run, ignoring");
        }
    }

    /// Shared handle to the stop flag, e.g. for a signal handler.
    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    pub fn state(&self) -> BatchState {
        let run = self.lock();
        self.snapshot(&run)
    }

    pub fn statuses(&self) -> Vec<ItemStatus> {
        self.lock().statuses.clone()
    }

    pub fn is_running(&self) -> bool {
        self.lock().is_running
    }

    fn snapshot(&self, run: &RunState) -> BatchState {
        BatchState {
            completed: run.completed,
            total: run.total,
            is_running: run.is_running,
            cancel_requested: self.stop.is_stop_requested(),
        }
    }

    fn set_status(&self, index: usize, status: ItemStatus) {
        {
            let mut run = self.lock();
            let current = run.statuses[index];
            debug_assert!(
                current.can_transition_to(status),
                "item {index}: {current:?} -> {status:?}"
            );
            run.statuses[index] = status;
        }
        self.progress.on_item_status_changed(index, status);
    }

    fn skip_from(&self, start: usize) {
        let total = self.lock().total;
        for index in start..total {
            self.set_status(index, ItemStatus::Skipped);
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// Clears the running flag if a run is dropped or unwinds before finishing.
struct RunningGuard<'a>(&'a BatchOrchestrator);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.lock().is_running = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Artifact, Item};
    use crate::progress::ProgressEvent;
    use crate::sink::SavedArtifact;
    use crate::transfer::{TransferError, TransferResult};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[derive(Default)]
    struct FakeClient {
        failing: HashSet<String>,
        /// Requests a stop while fetching the item with this id.
        stop_during: Option<(String, StopToken)>,
        requests: Mutex<Vec<TransferRequest>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl TransferClient for FakeClient {
        async fn fetch(&self, request: &TransferRequest) -> TransferResult {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());

            if let Some((id, token)) = &self.stop_during {
                if *id == request.item.id {
                    token.request_stop();
                    token.request_stop();
                }
            }
            tokio::task::yield_now().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing.contains(&request.item.id) {
                Err(TransferError::new("server returned 500"))
            } else {
                Ok(Artifact {
                    filename: request.fallback_filename.clone(),
                    payload: request.item.id.as_bytes().to_vec(),
                })
            }
        }
    }

    #[derive(Default)]
    struct MemorySink {
        fail_on: Option<String>,
        saved: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ArtifactSink for MemorySink {
        async fn save(&self, artifact: &Artifact) -> Result<SavedArtifact> {
            if self.fail_on.as_deref() == Some(artifact.filename.as_str()) {
                return Err(std::io::Error::other("disk full").into());
            }
            self.saved.lock().unwrap().push(artifact.filename.clone());
            Ok(SavedArtifact {
                path: artifact.filename.clone().into(),
                sha256: String::new(),
                bytes: artifact.payload.len() as u64,
            })
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<ProgressEvent>>,
        /// Requests a stop on the first progress notification, before item 0.
        stop_at_start: Option<StopToken>,
    }

    impl Recorder {
        fn percents(&self) -> Vec<u8> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    ProgressEvent::Progress { percent, .. } => Some(*percent),
                    _ => None,
                })
                .collect()
        }

        fn finished(&self) -> Vec<BatchOutcome> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    ProgressEvent::Finished { outcome, .. } => Some(*outcome),
                    _ => None,
                })
                .collect()
        }
    }

    impl ProgressTracker for Recorder {
        fn on_item_status_changed(&self, index: usize, status: ItemStatus) {
            self.events
                .lock()
                .unwrap()
                .push(ProgressEvent::ItemStatus { index, status });
        }

        fn on_progress(&self, completed: usize, total: usize, percent: u8) {
            if let Some(token) = &self.stop_at_start {
                token.request_stop();
            }
            self.events.lock().unwrap().push(ProgressEvent::Progress {
                completed,
                total,
                percent,
            });
        }

        fn on_batch_finished(&self, outcome: BatchOutcome, state: &BatchState) {
            self.events.lock().unwrap().push(ProgressEvent::Finished {
                outcome,
                completed: state.completed,
                total: state.total,
            });
        }
    }

    fn collection(n: usize) -> Collection {
        let items = (0..n)
            .map(|i| Item::new(i.to_string(), format!("Track {i}")))
            .collect();
        Collection::new("Mix", "someone", items)
    }

    fn orchestrator(
        client: Arc<FakeClient>,
        sink: Arc<MemorySink>,
        recorder: Arc<Recorder>,
    ) -> BatchOrchestrator {
        BatchOrchestrator::new(client, sink).with_progress(recorder)
    }

    #[tokio::test]
    async fn all_items_succeed() {
        let client = Arc::new(FakeClient::default());
        let sink = Arc::new(MemorySink::default());
        let recorder = Arc::new(Recorder::default());
        let orch = orchestrator(client.clone(), sink.clone(), recorder.clone());

        let report = orch
            .start(&collection(3), MediaFormat::Audio, None)
            .await
            .unwrap();

        assert_eq!(report.outcome, BatchOutcome::Completed);
        assert_eq!(report.statuses, vec![ItemStatus::Done; 3]);
        assert_eq!(report.state.completed, 3);
        assert!(!report.state.is_running);
        assert_eq!(recorder.percents(), vec![0, 33, 67, 100]);
        assert_eq!(recorder.finished(), vec![BatchOutcome::Completed]);
        assert_eq!(
            *sink.saved.lock().unwrap(),
            vec!["Track 0.mp3", "Track 1.mp3", "Track 2.mp3"]
        );

        let requests = client.requests.lock().unwrap();
        assert_eq!(requests[1].url, "https://www.youtube.com/watch?v=1");
        assert!(requests.iter().all(|r| r.format == MediaFormat::Audio));
        assert_eq!(client.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_item_does_not_halt_the_run() {
        let client = Arc::new(FakeClient {
            failing: HashSet::from(["1".to_string()]),
            ..FakeClient::default()
        });
        let recorder = Arc::new(Recorder::default());
        let orch = orchestrator(client, Arc::new(MemorySink::default()), recorder.clone());

        let report = orch
            .start(&collection(3), MediaFormat::Video, Some("720p"))
            .await
            .unwrap();

        assert_eq!(
            report.statuses,
            vec![ItemStatus::Done, ItemStatus::Failed, ItemStatus::Done]
        );
        assert_eq!(report.state.completed, 3);
        assert_eq!(report.outcome, BatchOutcome::Completed);
        assert_eq!(report.count(ItemStatus::Failed), 1);
    }

    #[tokio::test]
    async fn every_item_failing_still_completes() {
        let client = Arc::new(FakeClient {
            failing: HashSet::from(["0".to_string(), "1".to_string()]),
            ..FakeClient::default()
        });
        let recorder = Arc::new(Recorder::default());
        let orch = orchestrator(client, Arc::new(MemorySink::default()), recorder.clone());

        let report = orch
            .start(&collection(2), MediaFormat::Audio, None)
            .await
            .unwrap();
        assert_eq!(report.outcome, BatchOutcome::Completed);
        assert_eq!(report.statuses, vec![ItemStatus::Failed; 2]);
        assert_eq!(recorder.percents(), vec![0, 50, 100]);
    }

    #[tokio::test]
    async fn sink_failure_marks_item_failed() {
        let sink = Arc::new(MemorySink {
            fail_on: Some("Track 0.mp3".into()),
            ..MemorySink::default()
        });
        let orch = orchestrator(
            Arc::new(FakeClient::default()),
            sink,
            Arc::new(Recorder::default()),
        );

        let report = orch
            .start(&collection(2), MediaFormat::Audio, None)
            .await
            .unwrap();
        assert_eq!(report.statuses, vec![ItemStatus::Failed, ItemStatus::Done]);
        assert_eq!(report.state.completed, 2);
    }

    #[tokio::test]
    async fn empty_collection_completes_immediately() {
        let recorder = Arc::new(Recorder::default());
        let orch = orchestrator(
            Arc::new(FakeClient::default()),
            Arc::new(MemorySink::default()),
            recorder.clone(),
        );

        let report = orch
            .start(&Collection::default(), MediaFormat::Audio, None)
            .await
            .unwrap();
        assert_eq!(report.outcome, BatchOutcome::Completed);
        assert_eq!(report.state, BatchState::default());
        assert!(report.statuses.is_empty());
        assert_eq!(recorder.percents(), vec![0]);
    }

    fn progress(completed: usize, total: usize) -> ProgressEvent {
        ProgressEvent::Progress {
            completed,
            total,
            percent: percent(completed, total),
        }
    }

    fn status(index: usize, status: ItemStatus) -> ProgressEvent {
        ProgressEvent::ItemStatus { index, status }
    }

    #[tokio::test]
    async fn status_notifications_follow_each_item() {
        let recorder = Arc::new(Recorder::default());
        let orch = orchestrator(
            Arc::new(FakeClient::default()),
            Arc::new(MemorySink::default()),
            recorder.clone(),
        );
        orch.start(&collection(2), MediaFormat::Audio, None)
            .await
            .unwrap();

        let events = recorder.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                progress(0, 2),
                status(0, ItemStatus::InProgress),
                status(0, ItemStatus::Done),
                progress(1, 2),
                status(1, ItemStatus::InProgress),
                status(1, ItemStatus::Done),
                progress(2, 2),
                ProgressEvent::Finished {
                    outcome: BatchOutcome::Completed,
                    completed: 2,
                    total: 2
                },
            ]
        );
    }

    #[tokio::test]
    async fn stop_before_first_item_skips_everything() {
        let client = Arc::new(FakeClient::default());
        let sink = Arc::new(MemorySink::default());
        let mut orch = BatchOrchestrator::new(client.clone(), sink);
        let recorder = Arc::new(Recorder {
            stop_at_start: Some(orch.stop_token()),
            ..Recorder::default()
        });
        orch = orch.with_progress(recorder.clone());

        let report = orch
            .start(&collection(4), MediaFormat::Audio, None)
            .await
            .unwrap();

        assert_eq!(report.outcome, BatchOutcome::Stopped);
        assert_eq!(report.statuses, vec![ItemStatus::Skipped; 4]);
        assert_eq!(report.state.completed, 0);
        assert!(report.state.cancel_requested);
        assert!(client.requests.lock().unwrap().is_empty());
        assert_eq!(recorder.finished(), vec![BatchOutcome::Stopped]);
    }

    #[tokio::test]
    async fn stop_during_an_item_lets_it_finish() {
        let mut orch = BatchOrchestrator::new(
            Arc::new(FakeClient::default()),
            Arc::new(MemorySink::default()),
        );
        let client = Arc::new(FakeClient {
            failing: HashSet::from(["1".to_string()]),
            stop_during: Some(("1".to_string(), orch.stop_token())),
            ..FakeClient::default()
        });
        orch.client = client.clone();

        let report = orch
            .start(&collection(4), MediaFormat::Audio, None)
            .await
            .unwrap();

        assert_eq!(
            report.statuses,
            vec![
                ItemStatus::Done,
                ItemStatus::Failed,
                ItemStatus::Skipped,
                ItemStatus::Skipped
            ]
        );
        assert!(report.statuses.iter().all(|s| s.is_terminal()));
        assert_eq!(report.state.completed, 2);
        assert_eq!(report.outcome, BatchOutcome::Stopped);
        assert_eq!(client.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn stop_during_last_item_reports_stopped() {
        let mut orch = BatchOrchestrator::new(
            Arc::new(FakeClient::default()),
            Arc::new(MemorySink::default()),
        );
        orch.client = Arc::new(FakeClient {
            stop_during: Some(("1".to_string(), orch.stop_token())),
            ..FakeClient::default()
        });

        let report = orch
            .start(&collection(2), MediaFormat::Audio, None)
            .await
            .unwrap();
        assert_eq!(report.statuses, vec![ItemStatus::Done; 2]);
        assert_eq!(report.state.completed, 2);
        assert_eq!(report.outcome, BatchOutcome::Stopped);
    }

    #[tokio::test]
    async fn request_stop_without_a_run_is_ignored() {
        let orch = orchestrator(
            Arc::new(FakeClient::default()),
            Arc::new(MemorySink::default()),
            Arc::new(Recorder::default()),
        );
        orch.request_stop();
        assert!(!orch.state().cancel_requested);
        assert!(!orch.is_running());

        let report = orch
            .start(&collection(2), MediaFormat::Audio, None)
            .await
            .unwrap();
        assert_eq!(report.outcome, BatchOutcome::Completed);
    }

    /// Blocks the transfer of item "0" until released.
    struct GatedClient {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl TransferClient for GatedClient {
        async fn fetch(&self, request: &TransferRequest) -> TransferResult {
            if request.item.id == "0" {
                self.entered.notify_one();
                self.release.notified().await;
            }
            Ok(Artifact {
                filename: request.fallback_filename.clone(),
                payload: Vec::new(),
            })
        }
    }

    #[tokio::test]
    async fn concurrent_start_is_rejected_and_stop_applies_after_current_item() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let recorder = Arc::new(Recorder::default());
        let orch = Arc::new(
            BatchOrchestrator::new(
                Arc::new(GatedClient {
                    entered: entered.clone(),
                    release: release.clone(),
                }),
                Arc::new(MemorySink::default()),
            )
            .with_progress(recorder.clone()),
        );

        let runner = {
            let orch = orch.clone();
            tokio::spawn(async move {
                orch.start(&collection(5), MediaFormat::Audio, None).await
            })
        };
        entered.notified().await;

        let before = orch.state();
        assert!(before.is_running);
        assert_eq!(orch.statuses()[0], ItemStatus::InProgress);

        let second = orch.start(&collection(2), MediaFormat::Video, None).await;
        assert!(matches!(second, Err(Error::BatchAlreadyRunning)));
        assert_eq!(orch.state(), before);
        assert_eq!(orch.statuses().len(), 5);

        orch.request_stop();
        orch.request_stop();
        release.notify_one();

        let report = runner.await.unwrap().unwrap();
        assert_eq!(report.outcome, BatchOutcome::Stopped);
        assert_eq!(report.statuses[0], ItemStatus::Done);
        assert_eq!(&report.statuses[1..], &[ItemStatus::Skipped; 4]);
        assert_eq!(report.state.completed, 1);
        assert_eq!(recorder.finished(), vec![BatchOutcome::Stopped]);
        assert!(!orch.is_running());
    }

    #[tokio::test]
    async fn new_run_resets_state_after_a_stop() {
        let mut orch = BatchOrchestrator::new(
            Arc::new(FakeClient::default()),
            Arc::new(MemorySink::default()),
        );
        orch.client = Arc::new(FakeClient {
            stop_during: Some(("0".to_string(), orch.stop_token())),
            ..FakeClient::default()
        });
        let first = orch
            .start(&collection(3), MediaFormat::Audio, None)
            .await
            .unwrap();
        assert_eq!(first.outcome, BatchOutcome::Stopped);

        orch.client = Arc::new(FakeClient::default());
        let second = orch
            .start(&collection(3), MediaFormat::Audio, None)
            .await
            .unwrap();
        assert_eq!(second.outcome, BatchOutcome::Completed);
        assert_eq!(second.statuses, vec![ItemStatus::Done; 3]);
        assert!(!second.state.cancel_requested);
    }
}
