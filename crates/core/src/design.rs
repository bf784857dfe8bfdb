//! Generated designs: predicted attributes, three image views and sales copy.

use chrono::{DateTime, Utc};
use core::fmt;
use serde::{Deserialize, Serialize};

use crate::attributes::AttributeMap;
use crate::error::DomainResult;
use crate::id::{DesignId, ProjectId};
use crate::status::{ImageStatus, StageStatus, StatusMachine};

/// One of the three rendered views of a design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    Front,
    Back,
    Model,
}

impl View {
    /// Generation order of the image stage.
    pub const ALL: [View; 3] = [View::Front, View::Back, View::Model];

    pub fn as_str(&self) -> &'static str {
        match self {
            View::Front => "front",
            View::Back => "back",
            View::Model => "model",
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ViewImage {
    pub url: Option<String>,
    pub status: StageStatus,
}

impl ViewImage {
    pub fn generating() -> Self {
        Self {
            url: None,
            status: StageStatus::Generating,
        }
    }

    pub fn completed(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            status: StageStatus::Completed,
        }
    }

    pub fn failed() -> Self {
        Self {
            url: None,
            status: StageStatus::Failed,
        }
    }
}

/// The `generated_images` map of a design.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ViewSet {
    pub front: ViewImage,
    pub back: ViewImage,
    pub model: ViewImage,
}

impl ViewSet {
    pub fn get(&self, view: View) -> &ViewImage {
        match view {
            View::Front => &self.front,
            View::Back => &self.back,
            View::Model => &self.model,
        }
    }

    pub fn set(&mut self, view: View, image: ViewImage) {
        match view {
            View::Front => self.front = image,
            View::Back => self.back = image,
            View::Model => self.model = image,
        }
    }

    pub fn statuses(&self) -> [StageStatus; 3] {
        [self.front.status, self.back.status, self.model.status]
    }

    pub fn aggregate_status(&self) -> ImageStatus {
        ImageStatus::from_views(&self.statuses())
    }

    /// Replace `self` with `next` if every view moves legally.
    pub fn advance_to(&mut self, next: &ViewSet) -> DomainResult<()> {
        for view in View::ALL {
            self.get(view).status.transition(next.get(view).status)?;
        }
        *self = next.clone();
        Ok(())
    }
}

/// One generated artifact of the design pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedDesign {
    pub id: DesignId,
    pub project_id: ProjectId,
    pub product_type: String,
    pub locked_attributes: AttributeMap,
    pub predicted_attributes: AttributeMap,
    pub success_score: f64,
    pub generated_images: ViewSet,
    pub image_status: ImageStatus,
    /// Front view URL, kept for single-image consumers.
    pub generated_image_url: Option<String>,
    pub sales_text: Option<String>,
    pub sales_text_status: StageStatus,
    pub created_at: DateTime<Utc>,
}

impl GeneratedDesign {
    /// A fresh design with every stage and view `pending`.
    pub fn new(
        project_id: ProjectId,
        product_type: impl Into<String>,
        locked_attributes: AttributeMap,
        predicted_attributes: AttributeMap,
        success_score: f64,
    ) -> Self {
        Self {
            id: DesignId::new(),
            project_id,
            product_type: product_type.into(),
            locked_attributes,
            predicted_attributes,
            success_score,
            generated_images: ViewSet::default(),
            image_status: ImageStatus::Pending,
            generated_image_url: None,
            sales_text: None,
            sales_text_status: StageStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// Locked attributes overlaid with predictions for the remaining keys.
    pub fn merged_attributes(&self) -> AttributeMap {
        let mut merged = self.predicted_attributes.clone();
        merged.extend(self.locked_attributes.clone());
        merged
    }

    pub fn set_image_status(&mut self, status: ImageStatus) -> DomainResult<()> {
        self.image_status = self.image_status.transition(status)?;
        Ok(())
    }

    pub fn set_sales_text(&mut self, status: StageStatus, text: Option<String>) -> DomainResult<()> {
        self.sales_text_status = self.sales_text_status.transition(status)?;
        if text.is_some() {
            self.sales_text = text;
        }
        Ok(())
    }
}
