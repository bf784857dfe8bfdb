//! Event publishing/subscription abstraction (mechanics only).
//!
//! Topics are projects: every subscriber of a project receives a copy of every
//! event published to that project after it subscribed (broadcast, not
//! work-stealing). There is no replay; callers that need the current state
//! read it from the status store and send it first.
//!
//! Delivery is best-effort. A slow subscriber that falls more than the bus
//! capacity behind skips the overwritten events and continues with newer ones;
//! publishers never block on subscribers.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio_stream::{Stream, StreamExt, wrappers::BroadcastStream};

use atelier_core::ProjectId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Publish failed due to internal lock poisoning.
    #[error("event bus lock poisoned")]
    Poisoned,
}

/// A live subscription to one project's events.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: broadcast::Receiver<M>,
}

impl<M> Subscription<M>
where
    M: Clone + Send + 'static,
{
    pub fn new(receiver: broadcast::Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Wait for the next message. `None` once the topic is closed.
    pub async fn recv(&mut self) -> Option<M> {
        loop {
            match self.receiver.recv().await {
                Ok(m) => return Some(m),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "progress subscriber lagged; events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive; `None` when nothing is queued (or the topic is closed).
    pub fn try_recv(&mut self) -> Option<M> {
        loop {
            match self.receiver.try_recv() {
                Ok(m) => return Some(m),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Convert into a stream, silently skipping lag gaps.
    pub fn into_stream(self) -> impl Stream<Item = M> + Send + 'static {
        BroadcastStream::new(self.receiver).filter_map(|m| m.ok())
    }
}

/// Project-scoped pub/sub.
///
/// `publish` returns how many subscribers received the message; zero
/// subscribers is not an error.
pub trait EventBus<M>: Send + Sync {
    fn publish(&self, topic: ProjectId, message: M) -> Result<usize, BusError>;

    fn subscribe(&self, topic: ProjectId) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    fn publish(&self, topic: ProjectId, message: M) -> Result<usize, BusError> {
        (**self).publish(topic, message)
    }

    fn subscribe(&self, topic: ProjectId) -> Subscription<M> {
        (**self).subscribe(topic)
    }
}
