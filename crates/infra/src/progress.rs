//! Periodic progress reporting for enrichment runs.
//!
//! Workers bump a shared [`ProgressCounter`]; a background ticker reads it on a
//! fixed interval and, only when the value moved, persists it and emits a
//! `progress` event. [`ProgressReporter::finish`] stops the ticker and flushes
//! whatever it had not reported yet, so the last event carries the true
//! final counts.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use atelier_core::{ItemId, ProjectId};
use atelier_events::{EventBus, ProgressEvent};

use crate::store::StatusStore;

/// Default tick of the reporter.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Counters shared between workers and the reporter.
#[derive(Debug, Default)]
pub struct ProgressCounter {
    processed: AtomicU32,
    current: Mutex<Option<ItemId>>,
}

impl ProgressCounter {
    pub fn new(first_item: Option<ItemId>) -> Self {
        Self {
            processed: AtomicU32::new(0),
            current: Mutex::new(first_item),
        }
    }

    /// Record that a worker picked up `item_id`.
    pub fn mark_started(&self, item_id: ItemId) {
        if let Ok(mut current) = self.current.lock() {
            *current = Some(item_id);
        }
    }

    /// Record one handled item (success or failure). Returns the new count.
    pub fn mark_handled(&self) -> u32 {
        self.processed.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn processed(&self) -> u32 {
        self.processed.load(Ordering::Acquire)
    }

    pub fn current(&self) -> Option<ItemId> {
        self.current.lock().ok().and_then(|current| *current)
    }
}

#[derive(Clone)]
struct Flusher {
    project_id: ProjectId,
    total: u32,
    counter: Arc<ProgressCounter>,
    store: Arc<dyn StatusStore>,
    bus: Arc<dyn EventBus<ProgressEvent>>,
}

impl Flusher {
    /// Persist and emit when the counter moved past `last`. Returns the value
    /// now considered reported.
    ///
    /// A full count is left to the run's terminal write, so `processed == total`
    /// is never stored under `running`.
    async fn tick(&self, last: u32) -> u32 {
        let processed = self.counter.processed();
        if processed == last || processed >= self.total {
            return last;
        }
        let current = self.counter.current();
        if let Err(err) = self
            .store
            .record_progress(self.project_id, processed, current)
            .await
        {
            tracing::warn!(project_id = %self.project_id, processed, error = %err, "failed to persist progress");
            return last;
        }
        self.emit(processed, current);
        processed
    }

    /// Emit unreported progress. Not persisted: the caller stores the final
    /// count together with the terminal status.
    fn final_flush(&self, last: u32) -> u32 {
        let processed = self.counter.processed();
        if processed != last {
            self.emit(processed, self.counter.current());
        }
        processed
    }

    fn emit(&self, processed: u32, current: Option<ItemId>) {
        let event = ProgressEvent::progress(processed, self.total, current);
        if let Err(err) = self.bus.publish(self.project_id, event) {
            tracing::warn!(project_id = %self.project_id, error = %err, "failed to broadcast progress");
        }
    }
}

/// Handle to a running progress ticker.
pub struct ProgressReporter {
    flusher: Flusher,
    stop: Option<oneshot::Sender<()>>,
    ticker: JoinHandle<u32>,
}

impl ProgressReporter {
    /// Start ticking every `interval`. The run's state is expected to already
    /// be `running` with `processed = 0`.
    pub fn spawn(
        project_id: ProjectId,
        total: u32,
        counter: Arc<ProgressCounter>,
        store: Arc<dyn StatusStore>,
        bus: Arc<dyn EventBus<ProgressEvent>>,
        interval: Duration,
    ) -> Self {
        let flusher = Flusher {
            project_id,
            total,
            counter,
            store,
            bus,
        };
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let ticking = flusher.clone();
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last = 0;
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = interval.tick() => {
                        last = ticking.tick(last).await;
                    }
                }
            }
            last
        });

        Self {
            flusher,
            stop: Some(stop_tx),
            ticker,
        }
    }

    /// Stop the ticker and emit unreported progress. Returns the final
    /// `processed`, which the caller must persist with the run's outcome.
    pub async fn finish(mut self) -> u32 {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let last = match (&mut self.ticker).await {
            Ok(last) => last,
            Err(err) => {
                tracing::error!(project_id = %self.flusher.project_id, error = %err, "progress ticker crashed");
                u32::MAX
            }
        };
        self.flusher.final_flush(last)
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        if self.stop.is_some() {
            self.ticker.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_core::{Project, ProjectEnrichmentState, RunStatus};
    use atelier_events::InMemoryEventBus;
    use chrono::Utc;

    use crate::store::InMemoryStatusStore;

    async fn running_project(total: u32) -> (Arc<InMemoryStatusStore>, ProjectId) {
        let store = Arc::new(InMemoryStatusStore::new());
        let project = Project::new(ProjectId::new(), "Reporter");
        let project_id = project.id;
        store.insert_project(project).unwrap();
        let mut state = ProjectEnrichmentState::idle(project_id);
        state.begin_run(total, None, Utc::now()).unwrap();
        store.save_enrichment_state(&state).await.unwrap();
        (store, project_id)
    }

    fn progress_of(event: ProgressEvent) -> (u32, u32) {
        match event {
            ProgressEvent::Progress(p) => (p.processed, p.total),
            other => panic!("expected progress event, got {other:?}"),
        }
    }

    #[test]
    fn counter_tracks_handled_items() {
        let counter = ProgressCounter::new(None);
        let item = ItemId::new();
        counter.mark_started(item);
        assert_eq!(counter.mark_handled(), 1);
        assert_eq!(counter.mark_handled(), 2);
        assert_eq!(counter.processed(), 2);
        assert_eq!(counter.current(), Some(item));
    }

    #[tokio::test(start_paused = true)]
    async fn emits_only_when_counter_moves() {
        let (store, project_id) = running_project(3).await;
        let bus = Arc::new(InMemoryEventBus::<ProgressEvent>::new());
        let mut sub = bus.subscribe(project_id);
        let counter = Arc::new(ProgressCounter::new(None));

        let reporter = ProgressReporter::spawn(
            project_id,
            3,
            counter.clone(),
            store.clone(),
            bus.clone(),
            Duration::from_millis(500),
        );

        counter.mark_handled();
        counter.mark_handled();
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(progress_of(sub.try_recv().unwrap()), (2, 3));

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(sub.try_recv().is_none(), "unchanged counter must not emit");

        counter.mark_handled();
        assert_eq!(reporter.finish().await, 3);
        assert_eq!(progress_of(sub.try_recv().unwrap()), (3, 3));

        // The full count is the caller's to store with the terminal status.
        let project = store.load_project(project_id).await.unwrap().unwrap();
        assert_eq!(project.enrichment.processed, 2);
        assert_eq!(project.enrichment.status, RunStatus::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_never_stores_a_full_count() {
        let (store, project_id) = running_project(2).await;
        let bus = Arc::new(InMemoryEventBus::<ProgressEvent>::new());
        let mut sub = bus.subscribe(project_id);
        let counter = Arc::new(ProgressCounter::new(None));
        let reporter = ProgressReporter::spawn(
            project_id,
            2,
            counter.clone(),
            store.clone(),
            bus.clone(),
            Duration::from_millis(100),
        );

        counter.mark_handled();
        counter.mark_handled();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(sub.try_recv().is_none(), "full count waits for finish");

        assert_eq!(reporter.finish().await, 2);
        assert_eq!(progress_of(sub.try_recv().unwrap()), (2, 2));
        let writes: Vec<(u32, u32)> = store
            .state_history(project_id)
            .unwrap()
            .iter()
            .map(|s| (s.processed, s.total))
            .collect();
        assert_eq!(writes, vec![(0, 2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn finish_flushes_unreported_progress() {
        let (store, project_id) = running_project(1).await;
        let bus = Arc::new(InMemoryEventBus::<ProgressEvent>::new());
        let mut sub = bus.subscribe(project_id);
        let counter = Arc::new(ProgressCounter::new(None));
        let reporter = ProgressReporter::spawn(
            project_id,
            1,
            counter.clone(),
            store,
            bus.clone(),
            Duration::from_secs(60),
        );

        counter.mark_handled();
        assert_eq!(reporter.finish().await, 1);
        assert_eq!(progress_of(sub.try_recv().unwrap()), (1, 1));
        assert!(sub.try_recv().is_none());
    }
}
