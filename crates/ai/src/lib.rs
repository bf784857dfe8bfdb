//! `atelier-ai`
//!
//! **Responsibility:** boundary to the external vision / generation services.
//!
//! This crate only declares what the engine needs from those services:
//! - one narrow async trait per collaborator (see [`clients`])
//! - typed request/response payloads
//! - a single error type that tells retryable from permanent failures
//!
//! It does not pick models or talk to any vendor API.

pub mod clients;
pub mod error;
pub mod prompt;
pub mod types;

pub use clients::{
    AttributePredictor, CopySynthesizer, ImageFetch, ImageStore, ImageSynthesis, PromptGenerator,
    VisionInference,
};
pub use error::AiError;
pub use prompt::{ViewPrompts, fallback_prompts};
pub use types::{CopyRequest, InferenceContext, PredictionRequest, PromptRequest, VisionOutput};
