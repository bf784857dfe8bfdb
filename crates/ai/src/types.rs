use serde::{Deserialize, Serialize};

use atelier_core::{AttributeMap, ContextRow};

/// Item context passed alongside the image to the vision model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceContext {
    pub product_type: String,
    pub description: String,
}

/// Raw answer of the vision model for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisionOutput {
    pub attributes: AttributeMap,
    /// Confidence (0-100) that the image does not match the expected category.
    pub mismatch_score: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub product_type: String,
    pub locked_attributes: AttributeMap,
    /// Attribute names the predictor must fill in.
    pub ai_variables: Vec<String>,
    pub context_rows: Vec<ContextRow>,
    pub target_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptRequest {
    pub product_type: String,
    pub locked_attributes: AttributeMap,
    pub predicted_attributes: AttributeMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyRequest {
    pub product_type: String,
    pub attributes: AttributeMap,
    pub success_score: f64,
    /// Front view of the design, when the image stage had already finished.
    pub image_url: Option<String>,
    #[serde(skip)]
    pub image: Option<Vec<u8>>,
}
