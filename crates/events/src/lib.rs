//! Progress events and their per-project broadcast.

pub mod bus;
pub mod event;
pub mod in_memory_bus;

pub use bus::{BusError, EventBus, Subscription};
pub use event::{ProgressEvent, ProgressUpdate, RunCompleted, RunFailed};
pub use in_memory_bus::InMemoryEventBus;
