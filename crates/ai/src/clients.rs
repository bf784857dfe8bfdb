//! Collaborator traits.
//!
//! Each trait is one narrow capability of an external service. The engine
//! owns `Arc<dyn Trait>` instances handed to it at construction, so tests swap
//! in scripted fakes and production wires the HTTP gateway.

use async_trait::async_trait;

use atelier_core::{AttributeMap, AttributeSchema, ItemId};

use crate::error::AiError;
use crate::prompt::ViewPrompts;
use crate::types::{CopyRequest, InferenceContext, PredictionRequest, PromptRequest, VisionOutput};

/// Vision model: image + ontology -> attributes and mismatch score.
#[async_trait]
pub trait VisionInference: Send + Sync + 'static {
    async fn infer(
        &self,
        image: &[u8],
        schema: &AttributeSchema,
        context: &InferenceContext,
    ) -> Result<VisionOutput, AiError>;
}

/// Source of catalog item images.
#[async_trait]
pub trait ImageFetch: Send + Sync + 'static {
    /// `AiError::NotFound` when the item has no image.
    async fn fetch(&self, item_id: ItemId) -> Result<Vec<u8>, AiError>;
}

/// Text-to-image model.
#[async_trait]
pub trait ImageSynthesis: Send + Sync + 'static {
    async fn synthesize(&self, prompt: &str) -> Result<Vec<u8>, AiError>;
}

/// Blob storage for generated images.
#[async_trait]
pub trait ImageStore: Send + Sync + 'static {
    /// Store bytes under `key` and return a URL clients can load.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String, AiError>;

    /// `AiError::NotFound` when nothing is stored under `key`.
    async fn get(&self, key: &str) -> Result<Vec<u8>, AiError>;
}

/// Predicts the open attributes of a design from successful catalog rows.
#[async_trait]
pub trait AttributePredictor: Send + Sync + 'static {
    async fn predict(&self, request: &PredictionRequest) -> Result<AttributeMap, AiError>;
}

/// LLM-written image prompts for the three views.
#[async_trait]
pub trait PromptGenerator: Send + Sync + 'static {
    async fn generate(&self, request: &PromptRequest) -> Result<ViewPrompts, AiError>;
}

/// Marketing copy writer.
#[async_trait]
pub trait CopySynthesizer: Send + Sync + 'static {
    async fn synthesize(&self, request: &CopyRequest) -> Result<String, AiError>;
}
