//! Execution primitives shared by the enrichment and generation engines:
//! retry with backoff, bounded fan-out, supervised background tasks.

pub mod concurrency;
pub mod retry;
pub mod supervisor;

pub use concurrency::{BatchReport, ConcurrencyController, ConcurrencyError};
pub use retry::{Backoff, RetryError, RetryPolicy};
pub use supervisor::TaskSupervisor;
