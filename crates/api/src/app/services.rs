use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use atelier_ai::{
    AttributePredictor, CopySynthesizer, ImageFetch, ImageStore, ImageSynthesis, PromptGenerator,
    VisionInference,
};
use atelier_events::{EventBus, InMemoryEventBus, ProgressEvent};
use atelier_infra::external::{FsImageStore, HttpAiGateway};
use atelier_infra::{
    AppConfig, EnrichmentError, EnrichmentOrchestrator, GenerationPipeline, InMemoryStatusStore,
    PostgresStatusStore, StatusStore,
};

/// External services the engines call into.
#[derive(Clone)]
pub struct Collaborators {
    pub vision: Arc<dyn VisionInference>,
    pub image_fetch: Arc<dyn ImageFetch>,
    pub predictor: Arc<dyn AttributePredictor>,
    pub prompts: Arc<dyn PromptGenerator>,
    pub synthesis: Arc<dyn ImageSynthesis>,
    pub images: Arc<dyn ImageStore>,
    pub copy: Arc<dyn CopySynthesizer>,
}

impl Collaborators {
    /// HTTP gateway for every model plus the filesystem image store.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let gateway = Arc::new(
            HttpAiGateway::new(config.ai_gateway_url.clone(), config.ai_gateway_timeout)
                .context("failed to build AI gateway client")?,
        );
        let images = Arc::new(FsImageStore::new(
            config.image_store_dir.clone(),
            config.image_public_base_url.clone(),
        ));
        Ok(Self {
            vision: gateway.clone(),
            image_fetch: gateway.clone(),
            predictor: gateway.clone(),
            prompts: gateway.clone(),
            synthesis: gateway.clone(),
            images,
            copy: gateway,
        })
    }
}

/// Everything a handler needs.
pub struct AppServices {
    pub store: Arc<dyn StatusStore>,
    pub enrichment: Arc<EnrichmentOrchestrator>,
    pub generation: Arc<GenerationPipeline>,
    pub images: Arc<dyn ImageStore>,
    pub sse_keepalive: Duration,
}

impl AppServices {
    /// Wait for every background run and generation stage to finish.
    pub async fn wait_idle(&self) {
        self.enrichment.supervisor().wait_idle().await;
        self.generation.supervisor().wait_idle().await;
    }
}

/// Wire services from configuration: Postgres when `DATABASE_URL` is set,
/// in-memory otherwise.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let store: Arc<dyn StatusStore> = match &config.database_url {
        Some(url) => {
            let store = PostgresStatusStore::connect(url)
                .await
                .context("failed to connect to Postgres")?;
            tracing::info!("using Postgres status store");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory status store");
            Arc::new(InMemoryStatusStore::new())
        }
    };
    let collaborators = Collaborators::from_config(config)?;
    Ok(build_services_with(store, collaborators, config)?)
}

pub fn build_services_with(
    store: Arc<dyn StatusStore>,
    collaborators: Collaborators,
    config: &AppConfig,
) -> Result<AppServices, EnrichmentError> {
    let bus: Arc<dyn EventBus<ProgressEvent>> = Arc::new(InMemoryEventBus::<ProgressEvent>::new());
    let enrichment = Arc::new(EnrichmentOrchestrator::new(
        store.clone(),
        collaborators.vision,
        collaborators.image_fetch,
        bus,
        config.enrichment(),
    )?);
    let generation = Arc::new(GenerationPipeline::new(
        store.clone(),
        collaborators.predictor,
        collaborators.prompts,
        collaborators.synthesis,
        collaborators.images.clone(),
        collaborators.copy,
        config.generation(),
    ));
    Ok(AppServices {
        store,
        enrichment,
        generation,
        images: collaborators.images,
        sse_keepalive: config.sse_keepalive,
    })
}
