//! Enrichment runs: drive a project's backlog of unenriched items through the
//! vision model with bounded concurrency, per-item retry and live progress.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use atelier_ai::{AiError, ImageFetch, InferenceContext, VisionInference};
use atelier_core::{
    AttributeSchema, DomainError, EnrichmentResult, EnrichmentSnapshot, ItemId, Project,
    ProjectEnrichmentState, ProjectId, RunStatus, WorkItem, item::truncate_error,
};
use atelier_events::{EventBus, ProgressEvent, Subscription};

use crate::jobs::{ConcurrencyController, ConcurrencyError, RetryError, RetryPolicy, TaskSupervisor};
use crate::progress::{DEFAULT_PROGRESS_INTERVAL, ProgressCounter, ProgressReporter};
use crate::store::{StatusStore, StoreError};

#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("project not found: {0}")]
    ProjectNotFound(ProjectId),

    #[error("project {0} has no attribute schema")]
    MissingSchema(ProjectId),

    #[error("an enrichment run is already active for project {0}")]
    AlreadyRunning(ProjectId),

    #[error("{0} enrichment worker(s) panicked")]
    WorkerPanicked(usize),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),
}

#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    /// Maximum number of items in flight.
    pub concurrency: usize,
    /// Retry budget of one vision call.
    pub retry: RetryPolicy,
    pub progress_interval: Duration,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            retry: RetryPolicy::default(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

/// Outcome of one finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub processed: u32,
    pub total: u32,
    pub enriched: u32,
    pub failed: u32,
}

/// Which items a run picks up.
#[derive(Debug, Clone)]
enum Backlog {
    /// Every item with neither a result nor an error.
    Pending,
    /// Pending items restricted to these ids (after their errors were cleared).
    Only(Vec<ItemId>),
}

impl Backlog {
    fn only(&self) -> Option<&[ItemId]> {
        match self {
            Backlog::Pending => None,
            Backlog::Only(ids) => Some(ids),
        }
    }
}

#[derive(Debug)]
enum ItemOutcome {
    Enriched,
    Failed,
    Unrecorded(StoreError),
}

#[derive(Debug, Error)]
enum ItemError {
    #[error(transparent)]
    Inference(#[from] RetryError<AiError>),
    #[error("invalid vision output: {0}")]
    Invalid(#[from] DomainError),
}

impl ItemError {
    /// Inference attempts spent before giving up. None when inference succeeded.
    fn attempts(&self) -> Option<u32> {
        match self {
            ItemError::Inference(err) => Some(err.attempts()),
            ItemError::Invalid(_) => None,
        }
    }
}

/// Everything one worker needs, shared across the batch.
struct Worker {
    store: Arc<dyn StatusStore>,
    vision: Arc<dyn VisionInference>,
    images: Arc<dyn ImageFetch>,
    schema: AttributeSchema,
    retry: RetryPolicy,
    counter: Arc<ProgressCounter>,
}

impl Worker {
    async fn process(&self, item: WorkItem) -> ItemOutcome {
        self.counter.mark_started(item.id);
        let outcome = match self.enrich(&item).await {
            Ok(result) => match self.store.save_item_result(&result).await {
                Ok(()) => ItemOutcome::Enriched,
                Err(err) => ItemOutcome::Unrecorded(err),
            },
            Err(err) => {
                tracing::warn!(
                    item_id = %item.id,
                    attempts = err.attempts(),
                    error = %err,
                    "item enrichment failed"
                );
                let message = truncate_error(&err.to_string());
                match self.store.save_item_error(item.id, &message).await {
                    Ok(()) => ItemOutcome::Failed,
                    Err(err) => ItemOutcome::Unrecorded(err),
                }
            }
        };
        self.counter.mark_handled();
        outcome
    }

    async fn enrich(&self, item: &WorkItem) -> Result<EnrichmentResult, ItemError> {
        let context = InferenceContext {
            product_type: item.product_type.clone(),
            description: item.description.clone(),
        };
        let (images, vision, schema, context) = (&self.images, &self.vision, &self.schema, &context);
        let item_id = item.id;

        let output = self
            .retry
            .run(
                move || async move {
                    let bytes = images.fetch(item_id).await?;
                    vision.infer(&bytes, schema, context).await
                },
                AiError::is_transient,
            )
            .await?;

        let attributes = self.schema.retain_known(output.attributes);
        Ok(EnrichmentResult::new(item.id, attributes, output.mismatch_score)?)
    }
}

/// Releases the project's slot in the active-run registry when dropped.
struct ActiveRun {
    registry: Arc<Mutex<HashSet<ProjectId>>>,
    project_id: ProjectId,
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        if let Ok(mut active) = self.registry.lock() {
            active.remove(&self.project_id);
        }
    }
}

pub struct EnrichmentOrchestrator {
    store: Arc<dyn StatusStore>,
    vision: Arc<dyn VisionInference>,
    images: Arc<dyn ImageFetch>,
    bus: Arc<dyn EventBus<ProgressEvent>>,
    config: EnrichmentConfig,
    controller: ConcurrencyController,
    supervisor: TaskSupervisor,
    active: Arc<Mutex<HashSet<ProjectId>>>,
}

impl EnrichmentOrchestrator {
    pub fn new(
        store: Arc<dyn StatusStore>,
        vision: Arc<dyn VisionInference>,
        images: Arc<dyn ImageFetch>,
        bus: Arc<dyn EventBus<ProgressEvent>>,
        config: EnrichmentConfig,
    ) -> Result<Self, EnrichmentError> {
        let controller = ConcurrencyController::new(config.concurrency)?.with_name("enrichment");
        Ok(Self {
            store,
            vision,
            images,
            bus,
            config,
            controller,
            supervisor: TaskSupervisor::new("enrichment"),
            active: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub fn supervisor(&self) -> &TaskSupervisor {
        &self.supervisor
    }

    pub fn is_running(&self, project_id: ProjectId) -> bool {
        self.active
            .lock()
            .map(|active| active.contains(&project_id))
            .unwrap_or(false)
    }

    /// Current run state of the project.
    pub async fn status(&self, project_id: ProjectId) -> Result<EnrichmentSnapshot, EnrichmentError> {
        Ok(self.load_project(project_id).await?.enrichment.snapshot())
    }

    /// Attach to the project's event stream. The snapshot is read after the
    /// subscription exists, so no event between the two is lost.
    pub async fn subscribe(
        &self,
        project_id: ProjectId,
    ) -> Result<(EnrichmentSnapshot, Subscription<ProgressEvent>), EnrichmentError> {
        let subscription = self.bus.subscribe(project_id);
        let snapshot = self.status(project_id).await?;
        Ok((snapshot, subscription))
    }

    /// Validate the project and run its backlog in the background.
    pub async fn start(self: &Arc<Self>, project_id: ProjectId) -> Result<(), EnrichmentError> {
        self.validate(project_id).await?;
        let guard = self.claim(project_id)?;
        self.spawn_run(guard, Backlog::Pending);
        Ok(())
    }

    /// Clear the errors of failed items (all, or those in `ids`) and re-run
    /// them in the background. Returns how many items were queued; zero means
    /// nothing changed.
    pub async fn retry_failed(
        self: &Arc<Self>,
        project_id: ProjectId,
        ids: Option<Vec<ItemId>>,
    ) -> Result<usize, EnrichmentError> {
        self.validate(project_id).await?;
        let guard = self.claim(project_id)?;

        let failed = self.store.failed_items(project_id, ids.as_deref()).await?;
        if failed.is_empty() {
            tracing::info!(project_id = %project_id, "no failed items to retry");
            return Ok(0);
        }

        let failed_ids: Vec<ItemId> = failed.iter().map(|item| item.id).collect();
        let cleared = self.store.clear_item_errors(project_id, &failed_ids).await?;
        tracing::info!(project_id = %project_id, queued = cleared, "retrying failed items");
        self.spawn_run(guard, Backlog::Only(failed_ids));
        Ok(cleared)
    }

    /// Run the project's backlog to completion on the calling task.
    pub async fn run(&self, project_id: ProjectId) -> Result<RunSummary, EnrichmentError> {
        let _guard = self.claim(project_id)?;
        self.execute(project_id, Backlog::Pending).await
    }

    async fn load_project(&self, project_id: ProjectId) -> Result<Project, EnrichmentError> {
        self.store
            .load_project(project_id)
            .await?
            .ok_or(EnrichmentError::ProjectNotFound(project_id))
    }

    async fn validate(&self, project_id: ProjectId) -> Result<AttributeSchema, EnrichmentError> {
        let project = self.load_project(project_id).await?;
        project
            .usable_schema()
            .cloned()
            .ok_or(EnrichmentError::MissingSchema(project_id))
    }

    fn claim(&self, project_id: ProjectId) -> Result<ActiveRun, EnrichmentError> {
        let mut active = self
            .active
            .lock()
            .map_err(|_| StoreError::Backend("active-run registry poisoned".to_string()))?;
        if !active.insert(project_id) {
            return Err(EnrichmentError::AlreadyRunning(project_id));
        }
        Ok(ActiveRun {
            registry: self.active.clone(),
            project_id,
        })
    }

    fn spawn_run(self: &Arc<Self>, guard: ActiveRun, backlog: Backlog) {
        let this = Arc::clone(self);
        let project_id = guard.project_id;
        self.supervisor
            .spawn(format!("enrichment run {project_id}"), async move {
                let _guard = guard;
                this.execute(project_id, backlog).await.map(|_| ())
            });
    }

    async fn execute(&self, project_id: ProjectId, backlog: Backlog) -> Result<RunSummary, EnrichmentError> {
        let outcome = self.drive(project_id, &backlog).await;
        match &outcome {
            Ok(summary) => tracing::info!(
                project_id = %project_id,
                processed = summary.processed,
                enriched = summary.enriched,
                failed = summary.failed,
                "enrichment run completed"
            ),
            Err(err) => self.fail_run(project_id, err).await,
        }
        outcome
    }

    async fn drive(&self, project_id: ProjectId, backlog: &Backlog) -> Result<RunSummary, EnrichmentError> {
        let project = self.load_project(project_id).await?;
        let schema = project
            .usable_schema()
            .cloned()
            .ok_or(EnrichmentError::MissingSchema(project_id))?;
        let mut state = project.enrichment;
        let items = self.store.pending_items(project_id, backlog.only()).await?;

        if items.is_empty() {
            let now = Utc::now();
            state.begin_run(0, None, now)?;
            self.store.save_enrichment_state(&state).await?;
            state.complete(0, now)?;
            self.store.save_enrichment_state(&state).await?;
            self.publish(project_id, ProgressEvent::completed(0, 0));
            return Ok(RunSummary::default());
        }

        let total = u32::try_from(items.len())
            .map_err(|_| DomainError::invariant(format!("backlog of {} items is too large", items.len())))?;
        let first = items.first().map(|item| item.id);
        state.begin_run(total, first, Utc::now())?;
        self.store.save_enrichment_state(&state).await?;
        tracing::info!(
            project_id = %project_id,
            total,
            concurrency = self.controller.limit(),
            "enrichment run started"
        );

        let counter = Arc::new(ProgressCounter::new(first));
        let reporter = ProgressReporter::spawn(
            project_id,
            total,
            counter.clone(),
            self.store.clone(),
            self.bus.clone(),
            self.config.progress_interval,
        );

        let worker = Arc::new(Worker {
            store: self.store.clone(),
            vision: self.vision.clone(),
            images: self.images.clone(),
            schema,
            retry: self.config.retry.clone(),
            counter: counter.clone(),
        });
        let report = self
            .controller
            .run(items, move |item| {
                let worker = worker.clone();
                async move { worker.process(item).await }
            })
            .await;

        let processed = reporter.finish().await;

        let mut summary = RunSummary {
            processed,
            total,
            ..RunSummary::default()
        };
        let mut unrecorded = None;
        for outcome in report.outcomes {
            match outcome {
                ItemOutcome::Enriched => summary.enriched += 1,
                ItemOutcome::Failed => summary.failed += 1,
                ItemOutcome::Unrecorded(err) => {
                    tracing::error!(project_id = %project_id, error = %err, "item outcome could not be persisted");
                    unrecorded.get_or_insert(err);
                }
            }
        }
        if report.panicked > 0 {
            return Err(EnrichmentError::WorkerPanicked(report.panicked));
        }
        if let Some(err) = unrecorded {
            return Err(err.into());
        }

        state.processed = processed;
        state.current_item_id = counter.current();
        state.complete(processed, Utc::now())?;
        self.store.save_enrichment_state(&state).await?;
        self.publish(project_id, ProgressEvent::completed(processed, total));
        Ok(summary)
    }

    /// Flip the project to `failed` (if it exists) and notify subscribers.
    async fn fail_run(&self, project_id: ProjectId, err: &EnrichmentError) {
        tracing::error!(project_id = %project_id, error = %err, "enrichment run failed");
        if !matches!(err, EnrichmentError::ProjectNotFound(_)) {
            if let Err(store_err) = self.persist_failed(project_id).await {
                tracing::error!(project_id = %project_id, error = %store_err, "could not mark run failed");
            }
        }
        self.publish(project_id, ProgressEvent::error(err.to_string()));
    }

    async fn persist_failed(&self, project_id: ProjectId) -> Result<(), EnrichmentError> {
        let mut state: ProjectEnrichmentState = self.load_project(project_id).await?.enrichment;
        let now = Utc::now();
        if state.status != RunStatus::Running {
            // Failed before the run began: record it as an empty run that failed.
            state.begin_run(0, None, now)?;
            self.store.save_enrichment_state(&state).await?;
        }
        state.fail(now)?;
        self.store.save_enrichment_state(&state).await?;
        Ok(())
    }

    fn publish(&self, project_id: ProjectId, event: ProgressEvent) {
        if let Err(err) = self.bus.publish(project_id, event) {
            tracing::warn!(project_id = %project_id, error = %err, "failed to broadcast enrichment event");
        }
    }
}
