//! Projects and their enrichment run state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attributes::AttributeSchema;
use crate::error::{DomainError, DomainResult};
use crate::id::{ItemId, ProjectId};
use crate::status::{RunStatus, StatusMachine};

/// A project: a bounded catalog backlog with an attribute ontology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    /// Product type used when the schema carries no `subset`.
    pub product_type: Option<String>,
    pub attribute_schema: Option<AttributeSchema>,
    pub enrichment: ProjectEnrichmentState,
}

impl Project {
    pub fn new(id: ProjectId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            product_type: None,
            attribute_schema: None,
            enrichment: ProjectEnrichmentState::idle(id),
        }
    }

    pub fn with_schema(mut self, schema: AttributeSchema) -> Self {
        self.attribute_schema = Some(schema);
        self
    }

    pub fn with_product_type(mut self, product_type: impl Into<String>) -> Self {
        self.product_type = Some(product_type.into());
        self
    }

    /// The schema, if present and non-empty.
    pub fn usable_schema(&self) -> Option<&AttributeSchema> {
        self.attribute_schema.as_ref().filter(|s| !s.is_empty())
    }

    pub fn product_type(&self) -> &str {
        self.product_type
            .as_deref()
            .or_else(|| self.attribute_schema.as_ref().and_then(|s| s.subset()))
            .unwrap_or("product")
    }
}

/// Aggregate state of a project's enrichment run.
///
/// Invariants: `processed <= total`; `processed == total` with a finished run
/// implies a terminal status. The state is reset by every [`begin_run`](Self::begin_run).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectEnrichmentState {
    pub project_id: ProjectId,
    pub status: RunStatus,
    pub processed: u32,
    pub total: u32,
    pub current_item_id: Option<ItemId>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProjectEnrichmentState {
    pub fn idle(project_id: ProjectId) -> Self {
        Self {
            project_id,
            status: RunStatus::Idle,
            processed: 0,
            total: 0,
            current_item_id: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Reset for a new run over `total` items.
    pub fn begin_run(
        &mut self,
        total: u32,
        first_item: Option<ItemId>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.status = self.status.transition(RunStatus::Running)?;
        self.processed = 0;
        self.total = total;
        self.current_item_id = first_item;
        self.started_at = Some(now);
        self.completed_at = None;
        Ok(())
    }

    /// Record progress of the active run. Counters never move backwards.
    pub fn record_progress(&mut self, processed: u32, current: Option<ItemId>) -> DomainResult<()> {
        if self.status != RunStatus::Running {
            return Err(DomainError::invariant(format!(
                "progress reported while run is {}",
                self.status
            )));
        }
        if processed > self.total {
            return Err(DomainError::invariant(format!(
                "processed {processed} exceeds total {}",
                self.total
            )));
        }
        if processed < self.processed {
            return Err(DomainError::invariant(format!(
                "processed regressed from {} to {processed}",
                self.processed
            )));
        }
        self.processed = processed;
        if current.is_some() {
            self.current_item_id = current;
        }
        Ok(())
    }

    pub fn complete(&mut self, processed: u32, now: DateTime<Utc>) -> DomainResult<()> {
        self.record_progress(processed, None)?;
        self.status = self.status.transition(RunStatus::Completed)?;
        self.completed_at = Some(now);
        Ok(())
    }

    /// Mark the run failed. Counters keep their last value.
    pub fn fail(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.status = self.status.transition(RunStatus::Failed)?;
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn snapshot(&self) -> EnrichmentSnapshot {
        EnrichmentSnapshot {
            status: self.status,
            progress: ProgressCounts {
                processed: self.processed,
                total: self.total,
            },
            current_item_id: self.current_item_id,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressCounts {
    pub processed: u32,
    pub total: u32,
}

/// Read-only view of a run, as returned to status polls and the initial SSE event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentSnapshot {
    pub status: RunStatus,
    pub progress: ProgressCounts,
    pub current_item_id: Option<ItemId>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}
