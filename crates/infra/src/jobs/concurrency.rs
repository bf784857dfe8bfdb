//! Bounded-concurrency fan-out over a batch of work items.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConcurrencyError {
    #[error("concurrency limit must be at least 1")]
    ZeroLimit,
}

/// Outcome of one batch.
#[derive(Debug)]
pub struct BatchReport<O> {
    /// Worker outputs, in completion order.
    pub outcomes: Vec<O>,
    /// Workers that panicked instead of returning an outcome.
    pub panicked: usize,
}

impl<O> BatchReport<O> {
    fn empty() -> Self {
        Self {
            outcomes: Vec::new(),
            panicked: 0,
        }
    }
}

/// Runs every item through a worker with at most `limit` workers in flight.
///
/// Dispatch waits for a free slot before spawning, so nothing queues beyond the
/// limit. Workers are expected to turn per-item failures into their output
/// value; a panicking worker is logged and counted, and the batch still runs to
/// completion.
#[derive(Debug, Clone)]
pub struct ConcurrencyController {
    limit: usize,
    name: String,
}

impl ConcurrencyController {
    pub fn new(limit: usize) -> Result<Self, ConcurrencyError> {
        if limit == 0 {
            return Err(ConcurrencyError::ZeroLimit);
        }
        Ok(Self {
            limit,
            name: "batch".to_string(),
        })
    }

    /// Name for logging.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Invoke `worker` exactly once per item and wait for all of them.
    pub async fn run<I, O, F, Fut>(&self, items: Vec<I>, worker: F) -> BatchReport<O>
    where
        I: Send + 'static,
        O: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = O> + Send + 'static,
    {
        if items.is_empty() {
            return BatchReport::empty();
        }

        let total = items.len();
        debug!(batch = %self.name, total, limit = self.limit, "dispatching batch");

        let slots = Arc::new(Semaphore::new(self.limit));
        let worker = Arc::new(worker);
        let mut tasks = JoinSet::new();

        for item in items {
            // The semaphore is never closed, so acquiring only ever waits.
            let Ok(permit) = slots.clone().acquire_owned().await else {
                break;
            };
            let worker = worker.clone();
            tasks.spawn(async move {
                let _slot = permit;
                worker(item).await
            });
        }

        let mut report = BatchReport {
            outcomes: Vec::with_capacity(total),
            panicked: 0,
        };
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(e) => {
                    error!(batch = %self.name, error = %e, "worker task did not complete");
                    report.panicked += 1;
                }
            }
        }

        debug!(
            batch = %self.name,
            completed = report.outcomes.len(),
            panicked = report.panicked,
            "batch finished"
        );
        report
    }
}
