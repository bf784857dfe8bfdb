//! Durable status of projects, items and designs.
//!
//! Every writer goes through [`StatusStore`]. Implementations validate status
//! moves against the transition tables in `atelier-core` and reject anything
//! that would make a poller observe a regression.

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use atelier_core::{
    ContextRow, DesignId, DomainError, EnrichmentResult, GeneratedDesign, ImageStatus, ItemId,
    ItemRecord, Project, ProjectEnrichmentState, ProjectId, StageStatus, ViewSet, WorkItem,
};

pub use in_memory::{InMemoryStatusStore, ViewWrite};
pub use postgres::PostgresStatusStore;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("project not found: {0}")]
    ProjectNotFound(ProjectId),
    #[error("item not found: {0}")]
    ItemNotFound(ItemId),
    #[error("design not found: {0}")]
    DesignNotFound(DesignId),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("rejected write: {0}")]
    InvalidTransition(#[from] DomainError),
    #[error("storage error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait StatusStore: Send + Sync + 'static {
    // ── projects ────────────────────────────────────────────────────────────

    async fn load_project(&self, project_id: ProjectId) -> Result<Option<Project>, StoreError>;

    /// Overwrite the project's run state (status move is validated).
    async fn save_enrichment_state(&self, state: &ProjectEnrichmentState) -> Result<(), StoreError>;

    /// Persist the in-flight counters of the active run.
    async fn record_progress(
        &self,
        project_id: ProjectId,
        processed: u32,
        current_item_id: Option<ItemId>,
    ) -> Result<(), StoreError>;

    // ── items ───────────────────────────────────────────────────────────────

    /// Items with neither a result nor an error, oldest first, optionally
    /// restricted to `only`.
    async fn pending_items(
        &self,
        project_id: ProjectId,
        only: Option<&[ItemId]>,
    ) -> Result<Vec<WorkItem>, StoreError>;

    /// Items with a recorded error, oldest first, optionally restricted to `only`.
    async fn failed_items(
        &self,
        project_id: ProjectId,
        only: Option<&[ItemId]>,
    ) -> Result<Vec<WorkItem>, StoreError>;

    /// Clear the stored error of the given items; returns how many were cleared.
    async fn clear_item_errors(&self, project_id: ProjectId, ids: &[ItemId]) -> Result<usize, StoreError>;

    async fn save_item_result(&self, result: &EnrichmentResult) -> Result<(), StoreError>;

    /// Record a (pre-truncated) failure message against a pending item.
    async fn save_item_error(&self, item_id: ItemId, error: &str) -> Result<(), StoreError>;

    async fn load_item(&self, item_id: ItemId) -> Result<Option<ItemRecord>, StoreError>;

    async fn list_items(&self, project_id: ProjectId) -> Result<Vec<ItemRecord>, StoreError>;

    /// Enriched, scored items usable as prediction context.
    async fn context_rows(&self, project_id: ProjectId) -> Result<Vec<ContextRow>, StoreError>;

    // ── designs ─────────────────────────────────────────────────────────────

    async fn insert_design(&self, design: &GeneratedDesign) -> Result<(), StoreError>;

    async fn load_design(
        &self,
        project_id: ProjectId,
        design_id: DesignId,
    ) -> Result<Option<GeneratedDesign>, StoreError>;

    /// Replace the full view map (every view move is validated).
    async fn save_views(&self, design_id: DesignId, views: &ViewSet) -> Result<(), StoreError>;

    /// Set the aggregate image status and the legacy single-image URL.
    async fn save_image_status(
        &self,
        design_id: DesignId,
        status: ImageStatus,
        primary_url: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn save_sales_text(
        &self,
        design_id: DesignId,
        status: StageStatus,
        text: Option<&str>,
    ) -> Result<(), StoreError>;
}

pub(crate) fn filter_only(only: Option<&[ItemId]>, id: &ItemId) -> bool {
    only.is_none_or(|ids| ids.contains(id))
}
