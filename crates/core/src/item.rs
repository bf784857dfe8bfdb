//! Catalog items and their enrichment outcome.

use serde::{Deserialize, Serialize};

use crate::attributes::AttributeMap;
use crate::error::{DomainError, DomainResult};
use crate::id::{ItemId, ProjectId};
use crate::status::ItemStatus;

/// Mismatch scores at or above this value flag the item for human review.
pub const REVIEW_THRESHOLD: u8 = 80;

/// Stored enrichment errors are capped at this many characters.
pub const MAX_ERROR_CHARS: usize = 1000;

/// One enrichable catalog entry. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: ItemId,
    pub product_type: String,
    pub description: String,
}

/// Vision-derived attributes for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub item_id: ItemId,
    pub attributes: AttributeMap,
    mismatch_score: u8,
}

impl EnrichmentResult {
    pub fn new(item_id: ItemId, attributes: AttributeMap, mismatch_score: u8) -> DomainResult<Self> {
        if mismatch_score > 100 {
            return Err(DomainError::validation(format!(
                "mismatch score must be within 0..=100, got {mismatch_score}"
            )));
        }
        Ok(Self {
            item_id,
            attributes,
            mismatch_score,
        })
    }

    pub fn mismatch_score(&self) -> u8 {
        self.mismatch_score
    }

    pub fn needs_review(&self) -> bool {
        self.mismatch_score >= REVIEW_THRESHOLD
    }
}

/// Persisted state of an item: the item plus exactly one of result / error (or neither).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub project_id: ProjectId,
    pub item: WorkItem,
    pub enriched_attributes: Option<AttributeMap>,
    pub enrichment_error: Option<String>,
    pub mismatch_confidence: Option<u8>,
    /// Commercial success score used as prediction context.
    pub success_score: Option<f64>,
}

impl ItemRecord {
    pub fn new(project_id: ProjectId, item: WorkItem) -> Self {
        Self {
            project_id,
            item,
            enriched_attributes: None,
            enrichment_error: None,
            mismatch_confidence: None,
            success_score: None,
        }
    }

    pub fn with_success_score(mut self, score: f64) -> Self {
        self.success_score = Some(score);
        self
    }

    pub fn status(&self) -> ItemStatus {
        match (&self.enriched_attributes, &self.enrichment_error) {
            (_, Some(_)) => ItemStatus::Failed,
            (Some(_), None) => ItemStatus::Enriched,
            (None, None) => ItemStatus::Pending,
        }
    }

    pub fn needs_review(&self) -> bool {
        self.mismatch_confidence
            .is_some_and(|score| score >= REVIEW_THRESHOLD)
    }

    pub fn apply_result(&mut self, result: &EnrichmentResult) {
        self.enriched_attributes = Some(result.attributes.clone());
        self.mismatch_confidence = Some(result.mismatch_score());
        self.enrichment_error = None;
    }

    pub fn apply_error(&mut self, error: &str) {
        self.enriched_attributes = None;
        self.mismatch_confidence = None;
        self.enrichment_error = Some(truncate_error(error));
    }

    pub fn clear_error(&mut self) {
        self.enrichment_error = None;
    }

    /// Context row for attribute prediction, if this item is enriched and scored.
    pub fn context_row(&self) -> Option<ContextRow> {
        match (self.status(), &self.enriched_attributes, self.success_score) {
            (ItemStatus::Enriched, Some(attrs), Some(score)) => Some(ContextRow {
                item_id: Some(self.item.id),
                attributes: attrs.clone(),
                success_score: score,
            }),
            _ => None,
        }
    }
}

/// One enriched catalog entry with its observed success, fed to the predictor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextRow {
    #[serde(default)]
    pub item_id: Option<ItemId>,
    pub attributes: AttributeMap,
    pub success_score: f64,
}

impl ContextRow {
    /// A row is usable when it carries attributes and a finite score.
    pub fn is_valid(&self) -> bool {
        !self.attributes.is_empty() && self.success_score.is_finite()
    }
}

/// Cap an error message at [`MAX_ERROR_CHARS`] characters (not bytes).
pub fn truncate_error(msg: &str) -> String {
    match msg.char_indices().nth(MAX_ERROR_CHARS) {
        Some((byte_idx, _)) => msg[..byte_idx].to_string(),
        None => msg.to_string(),
    }
}
