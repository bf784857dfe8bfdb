//! `atelier-core`: domain building blocks of the enrichment and design engine.
//!
//! This crate contains **pure domain** types (no IO): identifiers, status
//! state machines, attribute maps, and the item/project/design records the
//! orchestration layer reads and writes.

pub mod attributes;
pub mod design;
pub mod error;
pub mod id;
pub mod item;
pub mod project;
pub mod status;

pub use attributes::{AttributeMap, AttributeSchema};
pub use design::{GeneratedDesign, View, ViewImage, ViewSet};
pub use error::{DomainError, DomainResult};
pub use id::{DesignId, ItemId, ProjectId};
pub use item::{ContextRow, EnrichmentResult, ItemRecord, WorkItem};
pub use project::{EnrichmentSnapshot, ProgressCounts, Project, ProjectEnrichmentState};
pub use status::{ImageStatus, ItemStatus, RunStatus, StageStatus, StatusMachine};
