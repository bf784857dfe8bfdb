//! Supervised fire-and-forget background tasks.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;
use tracing::{debug, error, warn};

/// Spawns detached tasks whose outcome is still observed.
///
/// The caller does not wait on the task. When it finishes, an `Err` result is
/// logged with the task name, and so is a panic or cancellation. The
/// supervisor keeps an in-flight count so shutdown (and tests) can wait for
/// background work to drain.
#[derive(Debug, Clone)]
pub struct TaskSupervisor {
    name: &'static str,
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl TaskSupervisor {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            in_flight: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Spawn `fut` on the current runtime.
    pub fn spawn<F, E>(&self, task: impl Into<String>, fut: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let task = task.into();
        let supervisor = self.name;
        let in_flight = self.in_flight.clone();
        let idle = self.idle.clone();

        in_flight.fetch_add(1, Ordering::SeqCst);
        let handle = tokio::spawn(fut);

        tokio::spawn(async move {
            match handle.await {
                Ok(Ok(())) => debug!(supervisor, task = %task, "background task finished"),
                Ok(Err(e)) => error!(supervisor, task = %task, error = %e, "background task failed"),
                Err(e) if e.is_panic() => error!(supervisor, task = %task, "background task panicked"),
                Err(_) => warn!(supervisor, task = %task, "background task cancelled"),
            }
            if in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                idle.notify_waiters();
            }
        });
    }

    /// Wait until no supervised task is running.
    pub async fn wait_idle(&self) {
        loop {
            // Register before checking so a wake-up between the two is not lost.
            let notified = self.idle.notified();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}
