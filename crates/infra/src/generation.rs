//! Design generation: attribute prediction on the request path, then an image
//! stage and a text stage running as independent supervised background tasks.
//!
//! Each stage persists every status move through the [`StatusStore`], so a
//! poller sees per-view progress and never a regression.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use atelier_ai::{
    AiError, AttributePredictor, CopyRequest, CopySynthesizer, ImageStore, ImageSynthesis,
    PredictionRequest, PromptGenerator, PromptRequest, ViewPrompts, fallback_prompts,
};
use atelier_core::{
    AttributeMap, ContextRow, DesignId, DomainError, GeneratedDesign, ImageStatus, ProjectId,
    StageStatus, StatusMachine, View, ViewImage, ViewSet,
};

use crate::jobs::{RetryPolicy, TaskSupervisor};
use crate::store::{StatusStore, StoreError};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("project not found: {0}")]
    ProjectNotFound(ProjectId),

    #[error("design not found: {0}")]
    DesignNotFound(DesignId),

    #[error("invalid prediction request: {0}")]
    Validation(String),

    #[error("insufficient context: {found} usable row(s), at least {required} required")]
    InsufficientContext { required: usize, found: usize },

    #[error("attribute prediction failed: {0}")]
    Prediction(#[source] AiError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Budget for one image synthesis or copy call (one retry by default).
    pub stage_retry: RetryPolicy,
    /// Budget for the prompt generator before falling back to templates.
    pub prompt_retry: RetryPolicy,
    pub min_context_rows: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            stage_retry: RetryPolicy::linear(2, Duration::from_millis(1000)),
            prompt_retry: RetryPolicy::linear(2, Duration::from_millis(1000)),
            min_context_rows: 2,
        }
    }
}

/// Input of [`GenerationPipeline::predict`].
#[derive(Debug, Clone, Deserialize)]
pub struct PredictRequest {
    #[serde(default)]
    pub locked_attributes: AttributeMap,
    pub ai_variables: Vec<String>,
    pub success_score: f64,
    /// Caller-supplied context; the project's enriched items are used when absent.
    #[serde(default, alias = "context_attributes")]
    pub context_rows: Option<Vec<ContextRow>>,
}

impl PredictRequest {
    fn validate(&self) -> Result<(), GenerationError> {
        if self.ai_variables.is_empty() {
            return Err(GenerationError::Validation("ai_variables must not be empty".into()));
        }
        if let Some(blank) = self.ai_variables.iter().find(|v| v.trim().is_empty()) {
            return Err(GenerationError::Validation(format!("blank ai variable {blank:?}")));
        }
        if let Some(locked) = self
            .ai_variables
            .iter()
            .find(|v| self.locked_attributes.contains_key(v.as_str()))
        {
            return Err(GenerationError::Validation(format!(
                "{locked} is both locked and requested for prediction"
            )));
        }
        if !self.success_score.is_finite() || self.success_score < 0.0 {
            return Err(GenerationError::Validation(format!(
                "success_score must be a non-negative number, got {}",
                self.success_score
            )));
        }
        Ok(())
    }
}

/// Storage key of one generated view.
pub fn image_key(project_id: ProjectId, design_id: DesignId, view: View) -> String {
    format!("designs/{project_id}/{design_id}/{view}.png")
}

pub struct GenerationPipeline {
    store: Arc<dyn StatusStore>,
    predictor: Arc<dyn AttributePredictor>,
    prompts: Arc<dyn PromptGenerator>,
    synthesis: Arc<dyn ImageSynthesis>,
    images: Arc<dyn ImageStore>,
    copy: Arc<dyn CopySynthesizer>,
    config: GenerationConfig,
    supervisor: TaskSupervisor,
}

impl GenerationPipeline {
    pub fn new(
        store: Arc<dyn StatusStore>,
        predictor: Arc<dyn AttributePredictor>,
        prompts: Arc<dyn PromptGenerator>,
        synthesis: Arc<dyn ImageSynthesis>,
        images: Arc<dyn ImageStore>,
        copy: Arc<dyn CopySynthesizer>,
        config: GenerationConfig,
    ) -> Self {
        Self {
            store,
            predictor,
            prompts,
            synthesis,
            images,
            copy,
            config,
            supervisor: TaskSupervisor::new("generation"),
        }
    }

    pub fn supervisor(&self) -> &TaskSupervisor {
        &self.supervisor
    }

    /// Predict the open attributes, persist the design and start both
    /// generation stages in the background. Nothing is persisted on error.
    pub async fn predict(
        self: &Arc<Self>,
        project_id: ProjectId,
        request: PredictRequest,
    ) -> Result<GeneratedDesign, GenerationError> {
        request.validate()?;
        let project = self
            .store
            .load_project(project_id)
            .await?
            .ok_or(GenerationError::ProjectNotFound(project_id))?;

        let rows = match request.context_rows {
            Some(rows) => rows,
            None => self.store.context_rows(project_id).await?,
        };
        let context_rows: Vec<ContextRow> = rows.into_iter().filter(ContextRow::is_valid).collect();
        if context_rows.len() < self.config.min_context_rows {
            return Err(GenerationError::InsufficientContext {
                required: self.config.min_context_rows,
                found: context_rows.len(),
            });
        }

        let product_type = project.product_type().to_string();
        let prediction = PredictionRequest {
            product_type: product_type.clone(),
            locked_attributes: request.locked_attributes.clone(),
            ai_variables: request.ai_variables.clone(),
            context_rows,
            target_score: request.success_score,
        };
        let mut predicted = self
            .predictor
            .predict(&prediction)
            .await
            .map_err(GenerationError::Prediction)?;
        predicted.retain(|key, _| request.ai_variables.contains(key));
        if predicted.is_empty() {
            return Err(GenerationError::Prediction(AiError::BadResponse(
                "predictor returned none of the requested attributes".into(),
            )));
        }

        let design = GeneratedDesign::new(
            project_id,
            product_type,
            request.locked_attributes,
            predicted,
            request.success_score,
        );
        self.store.insert_design(&design).await?;
        tracing::info!(project_id = %project_id, design_id = %design.id, "design created");

        self.spawn_stages(&design);
        Ok(design)
    }

    /// Current state of a design, for polling.
    pub async fn design(
        &self,
        project_id: ProjectId,
        design_id: DesignId,
    ) -> Result<GeneratedDesign, GenerationError> {
        self.store
            .load_design(project_id, design_id)
            .await?
            .ok_or(GenerationError::DesignNotFound(design_id))
    }

    fn spawn_stages(self: &Arc<Self>, design: &GeneratedDesign) {
        let this = Arc::clone(self);
        let for_images = design.clone();
        self.supervisor
            .spawn(format!("image stage {}", design.id), async move {
                this.image_stage(&for_images).await
            });

        let this = Arc::clone(self);
        let for_text = design.clone();
        self.supervisor
            .spawn(format!("text stage {}", design.id), async move {
                this.text_stage(&for_text).await
            });
    }

    /// Generate the three views in order; always ends in a terminal status.
    pub async fn image_stage(&self, design: &GeneratedDesign) -> Result<(), GenerationError> {
        let outcome = self.generate_images(design).await;
        if let Err(err) = &outcome {
            tracing::error!(design_id = %design.id, error = %err, "image stage aborted");
            self.abandon_images(design).await;
        }
        outcome
    }

    async fn generate_images(&self, design: &GeneratedDesign) -> Result<(), GenerationError> {
        self.store
            .save_image_status(design.id, ImageStatus::Generating, None)
            .await?;
        let prompts = self.prompts_for(design).await;

        let mut views = design.generated_images.clone();
        for view in View::ALL {
            views.set(view, ViewImage::generating());
            self.store.save_views(design.id, &views).await?;

            let image = match self.render_view(design, view, prompts.get(view)).await {
                Ok(url) => ViewImage::completed(url),
                Err(err) => {
                    tracing::warn!(design_id = %design.id, view = %view, error = %err, "view generation failed");
                    ViewImage::failed()
                }
            };
            views.set(view, image);
            self.store.save_views(design.id, &views).await?;
        }

        let status = views.aggregate_status();
        self.store
            .save_image_status(design.id, status, views.front.url.as_deref())
            .await?;
        tracing::info!(design_id = %design.id, status = %status, "image stage finished");
        Ok(())
    }

    async fn prompts_for(&self, design: &GeneratedDesign) -> ViewPrompts {
        let request = PromptRequest {
            product_type: design.product_type.clone(),
            locked_attributes: design.locked_attributes.clone(),
            predicted_attributes: design.predicted_attributes.clone(),
        };
        let (prompts, request) = (&self.prompts, &request);
        let generated = self
            .config
            .prompt_retry
            .run(move || async move { prompts.generate(request).await }, AiError::is_transient)
            .await;
        match generated {
            Ok(prompts) if prompts.is_complete() => prompts,
            Ok(_) => {
                tracing::warn!(design_id = %design.id, "prompt generator returned blank prompts; using templates");
                fallback_prompts(&design.product_type, &design.merged_attributes())
            }
            Err(err) => {
                tracing::warn!(design_id = %design.id, error = %err, "prompt generation failed; using templates");
                fallback_prompts(&design.product_type, &design.merged_attributes())
            }
        }
    }

    async fn render_view(
        &self,
        design: &GeneratedDesign,
        view: View,
        prompt: &str,
    ) -> Result<String, AiError> {
        let synthesis = &self.synthesis;
        let bytes = self
            .config
            .stage_retry
            .run(move || async move { synthesis.synthesize(prompt).await }, AiError::is_transient)
            .await
            .map_err(|err| err.into_inner())?;
        self.images
            .put(&image_key(design.project_id, design.id, view), bytes)
            .await
    }

    /// Drive every unfinished view and the aggregate to a terminal status.
    async fn abandon_images(&self, design: &GeneratedDesign) {
        let result: Result<(), GenerationError> = async {
            let current = self.design(design.project_id, design.id).await?;
            let mut views: ViewSet = current.generated_images.clone();
            for view in View::ALL {
                if !views.get(view).status.is_terminal() {
                    let url = views.get(view).url.clone();
                    views.set(view, ViewImage { url, status: StageStatus::Failed });
                }
            }
            if views != current.generated_images {
                self.store.save_views(design.id, &views).await?;
            }
            if !current.image_status.is_terminal() {
                self.store
                    .save_image_status(design.id, views.aggregate_status(), views.front.url.as_deref())
                    .await?;
            }
            Ok(())
        }
        .await;
        if let Err(err) = result {
            tracing::error!(design_id = %design.id, error = %err, "could not mark image stage failed");
        }
    }

    /// Write the marketing copy; always ends in a terminal status.
    pub async fn text_stage(&self, design: &GeneratedDesign) -> Result<(), GenerationError> {
        let outcome = self.generate_text(design).await;
        if let Err(err) = &outcome {
            tracing::error!(design_id = %design.id, error = %err, "text stage aborted");
            if let Err(mark_err) = self
                .store
                .save_sales_text(design.id, StageStatus::Failed, None)
                .await
            {
                tracing::error!(design_id = %design.id, error = %mark_err, "could not mark text stage failed");
            }
        }
        outcome
    }

    async fn generate_text(&self, design: &GeneratedDesign) -> Result<(), GenerationError> {
        self.store
            .save_sales_text(design.id, StageStatus::Generating, None)
            .await?;

        // Unsynchronised read: the image stage may finish a moment later.
        let snapshot = self.design(design.project_id, design.id).await?;
        let (image_url, image) = if snapshot.image_status == ImageStatus::Completed {
            let key = image_key(design.project_id, design.id, View::Front);
            let image = match self.images.get(&key).await {
                Ok(bytes) => Some(bytes),
                Err(err) => {
                    tracing::debug!(design_id = %design.id, error = %err, "front view unavailable for copy");
                    None
                }
            };
            (snapshot.generated_images.front.url.clone(), image)
        } else {
            (None, None)
        };

        let request = CopyRequest {
            product_type: design.product_type.clone(),
            attributes: design.merged_attributes(),
            success_score: design.success_score,
            image_url,
            image,
        };
        let (copy, request) = (&self.copy, &request);
        let written = self
            .config
            .stage_retry
            .run(move || async move { copy.synthesize(request).await }, AiError::is_transient)
            .await;

        match written {
            Ok(text) => {
                self.store
                    .save_sales_text(design.id, StageStatus::Completed, Some(&text))
                    .await?;
                tracing::info!(design_id = %design.id, "text stage finished");
            }
            Err(err) => {
                tracing::warn!(design_id = %design.id, error = %err, "copy generation failed");
                self.store
                    .save_sales_text(design.id, StageStatus::Failed, None)
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use atelier_core::Project;
    use std::sync::Mutex;

    use crate::store::InMemoryStatusStore;

    struct EchoPredictor {
        calls: Mutex<Vec<PredictionRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl AttributePredictor for EchoPredictor {
        async fn predict(&self, request: &PredictionRequest) -> Result<AttributeMap, AiError> {
            self.calls.lock().unwrap().push(request.clone());
            if self.fail {
                return Err(AiError::InferenceFailed("model offline".into()));
            }
            let mut out: AttributeMap = request
                .ai_variables
                .iter()
                .map(|v| (v.clone(), format!("predicted-{v}")))
                .collect();
            out.insert("unrequested".into(), "noise".into());
            Ok(out)
        }
    }

    struct Unused;

    #[async_trait]
    impl PromptGenerator for Unused {
        async fn generate(&self, _request: &PromptRequest) -> Result<ViewPrompts, AiError> {
            Err(AiError::Transport("unused".into()))
        }
    }

    #[async_trait]
    impl ImageSynthesis for Unused {
        async fn synthesize(&self, _prompt: &str) -> Result<Vec<u8>, AiError> {
            Err(AiError::Transport("unused".into()))
        }
    }

    #[async_trait]
    impl ImageStore for Unused {
        async fn put(&self, _key: &str, _bytes: Vec<u8>) -> Result<String, AiError> {
            Err(AiError::Transport("unused".into()))
        }
        async fn get(&self, key: &str) -> Result<Vec<u8>, AiError> {
            Err(AiError::NotFound(key.into()))
        }
    }

    #[async_trait]
    impl CopySynthesizer for Unused {
        async fn synthesize(&self, _request: &CopyRequest) -> Result<String, AiError> {
            Err(AiError::Transport("unused".into()))
        }
    }

    fn pipeline(store: Arc<InMemoryStatusStore>, fail: bool) -> (Arc<GenerationPipeline>, Arc<EchoPredictor>) {
        let predictor = Arc::new(EchoPredictor {
            calls: Mutex::new(Vec::new()),
            fail,
        });
        let config = GenerationConfig {
            stage_retry: RetryPolicy::no_retry(),
            prompt_retry: RetryPolicy::no_retry(),
            min_context_rows: 2,
        };
        let pipeline = GenerationPipeline::new(
            store,
            predictor.clone(),
            Arc::new(Unused),
            Arc::new(Unused),
            Arc::new(Unused),
            Arc::new(Unused),
            config,
        );
        (Arc::new(pipeline), predictor)
    }

    fn project(store: &InMemoryStatusStore) -> ProjectId {
        let project = Project::new(ProjectId::new(), "Designs").with_product_type("tee");
        let id = project.id;
        store.insert_project(project).unwrap();
        id
    }

    fn row(color: &str, score: f64) -> ContextRow {
        ContextRow {
            item_id: None,
            attributes: [("color".to_string(), color.to_string())].into(),
            success_score: score,
        }
    }

    fn request(rows: Vec<ContextRow>) -> PredictRequest {
        PredictRequest {
            locked_attributes: [("fit".to_string(), "oversized".to_string())].into(),
            ai_variables: vec!["color".into()],
            success_score: 0.9,
            context_rows: Some(rows),
        }
    }

    #[test]
    fn image_keys_are_namespaced_by_design() {
        let (p, d) = (ProjectId::new(), DesignId::new());
        assert_eq!(image_key(p, d, View::Back), format!("designs/{p}/{d}/back.png"));
    }

    #[tokio::test]
    async fn rejects_empty_and_conflicting_variables() {
        let store = Arc::new(InMemoryStatusStore::new());
        let id = project(&store);
        let (pipeline, _) = pipeline(store, false);

        let mut empty = request(vec![row("red", 0.5), row("blue", 0.7)]);
        empty.ai_variables.clear();
        assert!(matches!(pipeline.predict(id, empty).await, Err(GenerationError::Validation(_))));

        let mut conflict = request(vec![row("red", 0.5), row("blue", 0.7)]);
        conflict.ai_variables.push("fit".into());
        assert!(matches!(pipeline.predict(id, conflict).await, Err(GenerationError::Validation(_))));
    }

    #[tokio::test]
    async fn too_few_valid_rows_is_insufficient_context() {
        let store = Arc::new(InMemoryStatusStore::new());
        let id = project(&store);
        let (pipeline, predictor) = pipeline(store, false);

        let rows = vec![row("red", 0.5), row("blue", f64::NAN)];
        let err = pipeline.predict(id, request(rows)).await.unwrap_err();
        assert!(matches!(err, GenerationError::InsufficientContext { required: 2, found: 1 }));
        assert!(predictor.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn predictor_failure_creates_no_design() {
        let store = Arc::new(InMemoryStatusStore::new());
        let id = project(&store);
        let (pipeline, _) = pipeline(store.clone(), true);

        let err = pipeline
            .predict(id, request(vec![row("red", 0.5), row("blue", 0.7)]))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Prediction(_)));
        assert_eq!(pipeline.supervisor().in_flight(), 0);
    }

    #[tokio::test]
    async fn prediction_keeps_only_requested_variables() {
        let store = Arc::new(InMemoryStatusStore::new());
        let id = project(&store);
        let (pipeline, predictor) = pipeline(store.clone(), false);

        let design = pipeline
            .predict(id, request(vec![row("red", 0.5), row("blue", 0.7)]))
            .await
            .unwrap();
        assert_eq!(design.product_type, "tee");
        assert_eq!(
            design.predicted_attributes,
            AttributeMap::from([("color".to_string(), "predicted-color".to_string())])
        );
        assert_eq!(predictor.calls.lock().unwrap()[0].context_rows.len(), 2);

        pipeline.supervisor().wait_idle().await;
        let stored = pipeline.design(id, design.id).await.unwrap();
        assert_eq!(stored.image_status, ImageStatus::Failed);
        assert_eq!(stored.sales_text_status, StageStatus::Failed);
        assert!(stored.generated_images.statuses().iter().all(|s| *s == StageStatus::Failed));
    }

    #[tokio::test]
    async fn unknown_design_is_not_found() {
        let store = Arc::new(InMemoryStatusStore::new());
        let id = project(&store);
        let (pipeline, _) = pipeline(store, false);
        assert!(matches!(
            pipeline.design(id, DesignId::new()).await,
            Err(GenerationError::DesignNotFound(_))
        ));
    }
}
