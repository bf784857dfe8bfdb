use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use atelier_core::{
    ContextRow, DesignId, EnrichmentResult, GeneratedDesign, ImageStatus, ItemId, ItemRecord,
    ItemStatus, Project, ProjectEnrichmentState, ProjectId, StageStatus, StatusMachine, ViewSet,
    WorkItem,
};

use super::{filter_only, StatusStore, StoreError};

/// One persisted snapshot of a design's view map.
#[derive(Debug, Clone)]
pub struct ViewWrite {
    pub design_id: DesignId,
    pub at: DateTime<Utc>,
    pub views: ViewSet,
}

/// Process-local store for tests and single-node deployments.
///
/// Keeps a log of every view-map and run-state write so callers can inspect
/// the order in which stages and runs progressed.
#[derive(Debug, Default)]
pub struct InMemoryStatusStore {
    projects: RwLock<HashMap<ProjectId, Project>>,
    items: RwLock<HashMap<ItemId, ItemRecord>>,
    designs: RwLock<HashMap<DesignId, GeneratedDesign>>,
    view_log: Mutex<Vec<ViewWrite>>,
    state_log: Mutex<Vec<ProjectEnrichmentState>>,
}

fn poisoned<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Backend("in-memory store lock poisoned".to_string())
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_project(&self, project: Project) -> Result<(), StoreError> {
        let mut projects = self.projects.write().map_err(poisoned)?;
        if projects.contains_key(&project.id) {
            return Err(StoreError::AlreadyExists(format!("project {}", project.id)));
        }
        projects.insert(project.id, project);
        Ok(())
    }

    pub fn insert_item(&self, record: ItemRecord) -> Result<(), StoreError> {
        if !self.projects.read().map_err(poisoned)?.contains_key(&record.project_id) {
            return Err(StoreError::ProjectNotFound(record.project_id));
        }
        let mut items = self.items.write().map_err(poisoned)?;
        if items.contains_key(&record.item.id) {
            return Err(StoreError::AlreadyExists(format!("item {}", record.item.id)));
        }
        items.insert(record.item.id, record);
        Ok(())
    }

    /// Every view-map write for `design_id`, oldest first.
    pub fn view_history(&self, design_id: DesignId) -> Result<Vec<ViewWrite>, StoreError> {
        Ok(self
            .view_log
            .lock()
            .map_err(poisoned)?
            .iter()
            .filter(|w| w.design_id == design_id)
            .cloned()
            .collect())
    }

    /// Every persisted run state of `project_id`, oldest first.
    pub fn state_history(&self, project_id: ProjectId) -> Result<Vec<ProjectEnrichmentState>, StoreError> {
        Ok(self
            .state_log
            .lock()
            .map_err(poisoned)?
            .iter()
            .filter(|s| s.project_id == project_id)
            .cloned()
            .collect())
    }

    fn log_state(&self, state: &ProjectEnrichmentState) -> Result<(), StoreError> {
        self.state_log.lock().map_err(poisoned)?.push(state.clone());
        Ok(())
    }

    fn items_where(
        &self,
        project_id: ProjectId,
        status: ItemStatus,
        only: Option<&[ItemId]>,
    ) -> Result<Vec<WorkItem>, StoreError> {
        let items = self.items.read().map_err(poisoned)?;
        let mut out: Vec<WorkItem> = items
            .values()
            .filter(|r| r.project_id == project_id && r.status() == status)
            .filter(|r| filter_only(only, &r.item.id))
            .map(|r| r.item.clone())
            .collect();
        out.sort_by_key(|item| item.id);
        Ok(out)
    }

    fn with_design<T>(
        &self,
        design_id: DesignId,
        f: impl FnOnce(&mut GeneratedDesign) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut designs = self.designs.write().map_err(poisoned)?;
        let design = designs
            .get_mut(&design_id)
            .ok_or(StoreError::DesignNotFound(design_id))?;
        // Work on a copy so a rejected write leaves the stored design untouched.
        let mut next = design.clone();
        let out = f(&mut next)?;
        *design = next;
        Ok(out)
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn load_project(&self, project_id: ProjectId) -> Result<Option<Project>, StoreError> {
        Ok(self.projects.read().map_err(poisoned)?.get(&project_id).cloned())
    }

    async fn save_enrichment_state(&self, state: &ProjectEnrichmentState) -> Result<(), StoreError> {
        let mut projects = self.projects.write().map_err(poisoned)?;
        let project = projects
            .get_mut(&state.project_id)
            .ok_or(StoreError::ProjectNotFound(state.project_id))?;
        project.enrichment.status.transition(state.status)?;
        project.enrichment = state.clone();
        self.log_state(state)
    }

    async fn record_progress(
        &self,
        project_id: ProjectId,
        processed: u32,
        current_item_id: Option<ItemId>,
    ) -> Result<(), StoreError> {
        let mut projects = self.projects.write().map_err(poisoned)?;
        let project = projects
            .get_mut(&project_id)
            .ok_or(StoreError::ProjectNotFound(project_id))?;
        let mut next = project.enrichment.clone();
        next.record_progress(processed, current_item_id)?;
        self.log_state(&next)?;
        project.enrichment = next;
        Ok(())
    }

    async fn pending_items(
        &self,
        project_id: ProjectId,
        only: Option<&[ItemId]>,
    ) -> Result<Vec<WorkItem>, StoreError> {
        self.items_where(project_id, ItemStatus::Pending, only)
    }

    async fn failed_items(
        &self,
        project_id: ProjectId,
        only: Option<&[ItemId]>,
    ) -> Result<Vec<WorkItem>, StoreError> {
        self.items_where(project_id, ItemStatus::Failed, only)
    }

    async fn clear_item_errors(&self, project_id: ProjectId, ids: &[ItemId]) -> Result<usize, StoreError> {
        let mut items = self.items.write().map_err(poisoned)?;
        let mut cleared = 0;
        for record in items.values_mut() {
            if record.project_id != project_id || !ids.contains(&record.item.id) {
                continue;
            }
            if record.status() == ItemStatus::Failed {
                record.status().transition(ItemStatus::Pending)?;
                record.clear_error();
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    async fn save_item_result(&self, result: &EnrichmentResult) -> Result<(), StoreError> {
        let mut items = self.items.write().map_err(poisoned)?;
        let record = items
            .get_mut(&result.item_id)
            .ok_or(StoreError::ItemNotFound(result.item_id))?;
        record.status().transition(ItemStatus::Enriched)?;
        record.apply_result(result);
        Ok(())
    }

    async fn save_item_error(&self, item_id: ItemId, error: &str) -> Result<(), StoreError> {
        let mut items = self.items.write().map_err(poisoned)?;
        let record = items.get_mut(&item_id).ok_or(StoreError::ItemNotFound(item_id))?;
        record.status().transition(ItemStatus::Failed)?;
        record.apply_error(error);
        Ok(())
    }

    async fn load_item(&self, item_id: ItemId) -> Result<Option<ItemRecord>, StoreError> {
        Ok(self.items.read().map_err(poisoned)?.get(&item_id).cloned())
    }

    async fn list_items(&self, project_id: ProjectId) -> Result<Vec<ItemRecord>, StoreError> {
        let items = self.items.read().map_err(poisoned)?;
        let mut out: Vec<ItemRecord> = items
            .values()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.item.id);
        Ok(out)
    }

    async fn context_rows(&self, project_id: ProjectId) -> Result<Vec<ContextRow>, StoreError> {
        let items = self.list_items(project_id).await?;
        Ok(items.iter().filter_map(ItemRecord::context_row).collect())
    }

    async fn insert_design(&self, design: &GeneratedDesign) -> Result<(), StoreError> {
        if !self.projects.read().map_err(poisoned)?.contains_key(&design.project_id) {
            return Err(StoreError::ProjectNotFound(design.project_id));
        }
        let mut designs = self.designs.write().map_err(poisoned)?;
        if designs.contains_key(&design.id) {
            return Err(StoreError::AlreadyExists(format!("design {}", design.id)));
        }
        designs.insert(design.id, design.clone());
        Ok(())
    }

    async fn load_design(
        &self,
        project_id: ProjectId,
        design_id: DesignId,
    ) -> Result<Option<GeneratedDesign>, StoreError> {
        let designs = self.designs.read().map_err(poisoned)?;
        Ok(designs
            .get(&design_id)
            .filter(|d| d.project_id == project_id)
            .cloned())
    }

    async fn save_views(&self, design_id: DesignId, views: &ViewSet) -> Result<(), StoreError> {
        self.with_design(design_id, |design| {
            design.generated_images.advance_to(views)?;
            Ok(())
        })?;
        self.view_log.lock().map_err(poisoned)?.push(ViewWrite {
            design_id,
            at: Utc::now(),
            views: views.clone(),
        });
        Ok(())
    }

    async fn save_image_status(
        &self,
        design_id: DesignId,
        status: ImageStatus,
        primary_url: Option<&str>,
    ) -> Result<(), StoreError> {
        self.with_design(design_id, |design| {
            design.set_image_status(status)?;
            if let Some(url) = primary_url {
                design.generated_image_url = Some(url.to_string());
            }
            Ok(())
        })
    }

    async fn save_sales_text(
        &self,
        design_id: DesignId,
        status: StageStatus,
        text: Option<&str>,
    ) -> Result<(), StoreError> {
        self.with_design(design_id, |design| {
            design.set_sales_text(status, text.map(str::to_string))?;
            Ok(())
        })
    }
}
