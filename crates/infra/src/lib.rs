//! Infrastructure layer: orchestration engines, persistence, config, external services.
//!
//! - [`jobs`]: retry, bounded concurrency and supervised background tasks
//! - [`store`]: durable project / item / design status
//! - [`progress`]: periodic progress persistence and broadcast
//! - [`enrichment`]: per-project enrichment runs
//! - [`generation`]: design prediction and image/text generation stages

pub mod config;
pub mod enrichment;
pub mod external;
pub mod generation;
pub mod jobs;
pub mod progress;
pub mod store;


pub use config::{AppConfig, ConfigError};
pub use enrichment::{EnrichmentConfig, EnrichmentError, EnrichmentOrchestrator, RunSummary};
pub use generation::{GenerationConfig, GenerationError, GenerationPipeline, PredictRequest};
pub use store::{InMemoryStatusStore, PostgresStatusStore, StatusStore, StoreError};
