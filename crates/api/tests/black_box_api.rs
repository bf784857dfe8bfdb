use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::sync::Semaphore;

use atelier_ai::{
    AiError, AttributePredictor, CopyRequest, CopySynthesizer, ImageFetch, ImageStore,
    ImageSynthesis, InferenceContext, PredictionRequest, PromptGenerator, PromptRequest,
    ViewPrompts, VisionInference, VisionOutput,
};
use atelier_api::app::{
    self,
    services::{self, AppServices, Collaborators},
};
use atelier_core::{
    AttributeMap, AttributeSchema, ItemId, ItemRecord, Project, ProjectId, WorkItem,
};
use atelier_infra::{AppConfig, InMemoryStatusStore};

// ── fake collaborators ──────────────────────────────────────────────────────

/// Vision model that waits on `gate` and rejects items described as "broken".
struct GatedVision {
    gate: Arc<Semaphore>,
}

#[async_trait]
impl VisionInference for GatedVision {
    async fn infer(
        &self,
        _image: &[u8],
        _schema: &AttributeSchema,
        context: &InferenceContext,
    ) -> Result<VisionOutput, AiError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| AiError::Transport("gate closed".into()))?;
        if context.description == "broken" {
            return Err(AiError::InvalidInput("unreadable image".into()));
        }
        let mut attributes = AttributeMap::new();
        attributes.insert("color".into(), "black".into());
        attributes.insert("unknown_key".into(), "dropped".into());
        Ok(VisionOutput {
            attributes,
            mismatch_score: 90,
        })
    }
}

struct StaticImages;

#[async_trait]
impl ImageFetch for StaticImages {
    async fn fetch(&self, _item_id: ItemId) -> Result<Vec<u8>, AiError> {
        Ok(b"catalog image".to_vec())
    }
}

struct Predictor;

#[async_trait]
impl AttributePredictor for Predictor {
    async fn predict(&self, request: &PredictionRequest) -> Result<AttributeMap, AiError> {
        Ok(request
            .ai_variables
            .iter()
            .map(|v| (v.clone(), format!("predicted {v}")))
            .collect())
    }
}

struct Prompts;

#[async_trait]
impl PromptGenerator for Prompts {
    async fn generate(&self, request: &PromptRequest) -> Result<ViewPrompts, AiError> {
        Ok(ViewPrompts {
            front: format!("{} front", request.product_type),
            back: format!("{} back", request.product_type),
            model: format!("{} on model", request.product_type),
        })
    }
}

struct Synthesis;

#[async_trait]
impl ImageSynthesis for Synthesis {
    async fn synthesize(&self, prompt: &str) -> Result<Vec<u8>, AiError> {
        Ok(prompt.as_bytes().to_vec())
    }
}

#[derive(Default)]
struct MemoryImages {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl ImageStore for MemoryImages {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String, AiError> {
        self.blobs.lock().unwrap().insert(key.to_string(), bytes);
        Ok(format!("/images/{key}"))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, AiError> {
        self.blobs
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| AiError::NotFound(key.to_string()))
    }
}

struct Copywriter;

#[async_trait]
impl CopySynthesizer for Copywriter {
    async fn synthesize(&self, request: &CopyRequest) -> Result<String, AiError> {
        Ok(format!("A {} you will love.", request.product_type))
    }
}

// ── server harness ──────────────────────────────────────────────────────────

struct TestServer {
    base_url: String,
    store: Arc<InMemoryStatusStore>,
    services: Arc<AppServices>,
    gate: Arc<Semaphore>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// `open` decides whether vision calls proceed immediately.
    async fn spawn(open: bool) -> Self {
        let config = AppConfig::from_pairs(&[
            ("ENRICHMENT_PROGRESS_INTERVAL_MS", "10"),
            ("ENRICHMENT_RETRY_BASE_MS", "1"),
            ("SSE_KEEPALIVE_SECS", "1"),
        ])
        .expect("valid test config");

        let gate = Arc::new(Semaphore::new(if open { Semaphore::MAX_PERMITS } else { 0 }));
        let store = Arc::new(InMemoryStatusStore::new());
        let collaborators = Collaborators {
            vision: Arc::new(GatedVision { gate: gate.clone() }),
            image_fetch: Arc::new(StaticImages),
            predictor: Arc::new(Predictor),
            prompts: Arc::new(Prompts),
            synthesis: Arc::new(Synthesis),
            images: Arc::new(MemoryImages::default()),
            copy: Arc::new(Copywriter),
        };
        let services = Arc::new(
            services::build_services_with(store.clone(), collaborators, &config)
                .expect("services wire up"),
        );

        // Same router as prod, bound to an ephemeral port.
        let app = app::build_app_with(services.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            store,
            services,
            gate,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Project with a usable schema and the given item descriptions.
    fn seed_project(&self, descriptions: &[&str]) -> (ProjectId, Vec<ItemId>) {
        let project_id = ProjectId::new();
        let schema = AttributeSchema::from_json(json!({
            "subset": "dress",
            "attributes": { "color": ["black", "red"] }
        }))
        .unwrap();
        self.store
            .insert_project(
                Project::new(project_id, "summer")
                    .with_schema(schema)
                    .with_product_type("dress"),
            )
            .unwrap();

        let ids = descriptions
            .iter()
            .map(|description| {
                let id = ItemId::new();
                let item = WorkItem {
                    id,
                    product_type: "dress".into(),
                    description: description.to_string(),
                };
                self.store
                    .insert_item(ItemRecord::new(project_id, item).with_success_score(0.7))
                    .unwrap();
                id
            })
            .collect();
        (project_id, ids)
    }

    fn seed_project_without_schema(&self) -> ProjectId {
        let project_id = ProjectId::new();
        self.store
            .insert_project(Project::new(project_id, "no schema"))
            .unwrap();
        project_id
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn fetch_status(client: &reqwest::Client, srv: &TestServer, project_id: ProjectId) -> Value {
    client
        .get(srv.url(&format!("/projects/{project_id}/enrichment/status")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

/// Poll until `wanted`, then let background work settle and read the final state.
async fn status_eventually(
    client: &reqwest::Client,
    srv: &TestServer,
    project_id: ProjectId,
    wanted: &str,
) -> Value {
    for _ in 0..200 {
        if fetch_status(client, srv, project_id).await["status"] == wanted {
            // A just-spawned run may not have written `running` yet.
            srv.services.wait_idle().await;
            let body = fetch_status(client, srv, project_id).await;
            assert_eq!(body["status"], wanted);
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("enrichment did not reach {wanted} in time");
}

// ── tests ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_is_ok() {
    let srv = TestServer::spawn(true).await;
    let res = reqwest::get(srv.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn start_rejects_bad_ids_unknown_projects_and_missing_schema() {
    let srv = TestServer::spawn(true).await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/projects/not-a-uuid/enrichment/start"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_id");

    let res = client
        .post(srv.url(&format!("/projects/{}/enrichment/start", ProjectId::new())))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let bare = srv.seed_project_without_schema();
    let res = client
        .post(srv.url(&format!("/projects/{bare}/enrichment/start")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "missing_schema");
}

#[tokio::test]
async fn enrichment_run_completes_and_items_report_outcomes() {
    let srv = TestServer::spawn(true).await;
    let client = reqwest::Client::new();
    let (project_id, ids) = srv.seed_project(&["linen", "broken", "silk"]);

    let res = client
        .post(srv.url(&format!("/projects/{project_id}/enrichment/start")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!({ "success": true }));

    let status = status_eventually(&client, &srv, project_id, "completed").await;
    assert_eq!(status["progress"], json!({ "processed": 3, "total": 3 }));
    assert!(status["started_at"].is_string());
    assert!(status["completed_at"].is_string());

    let body: Value = client
        .get(srv.url(&format!("/projects/{project_id}/enrichment/items")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 3);

    let broken = items
        .iter()
        .find(|i| i["id"] == ids[1].to_string())
        .unwrap();
    assert_eq!(broken["status"], "failed");
    assert!(broken["enrichment_error"].as_str().unwrap().contains("unreadable"));

    let linen = items.iter().find(|i| i["id"] == ids[0].to_string()).unwrap();
    assert_eq!(linen["status"], "enriched");
    assert_eq!(linen["enriched_attributes"], json!({ "color": "black" }));
    assert_eq!(linen["needs_review"], true);
}

#[tokio::test]
async fn retry_requeues_failed_items_and_reports_zero_when_none_failed() {
    let srv = TestServer::spawn(true).await;
    let client = reqwest::Client::new();
    let (project_id, ids) = srv.seed_project(&["linen", "broken"]);

    client
        .post(srv.url(&format!("/projects/{project_id}/enrichment/start")))
        .send()
        .await
        .unwrap();
    status_eventually(&client, &srv, project_id, "completed").await;

    let res = client
        .post(srv.url(&format!("/projects/{project_id}/enrichment/retry")))
        .json(&json!({ "article_ids": [ids[1].to_string()] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!({ "success": true, "queued_count": 1 }));

    let status = status_eventually(&client, &srv, project_id, "completed").await;
    assert_eq!(status["progress"], json!({ "processed": 1, "total": 1 }));

    // Only the enriched item selected: nothing to do.
    let res = client
        .post(srv.url(&format!("/projects/{project_id}/enrichment/retry")))
        .json(&json!({ "article_ids": [ids[0].to_string()] }))
        .send()
        .await
        .unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!({ "success": true, "queued_count": 0 }));

    let res = client
        .post(srv.url(&format!("/projects/{project_id}/enrichment/retry")))
        .json(&json!({ "article_ids": ["garbage"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn second_start_while_running_conflicts() {
    let srv = TestServer::spawn(false).await;
    let client = reqwest::Client::new();
    let (project_id, _) = srv.seed_project(&["linen"]);
    let start = srv.url(&format!("/projects/{project_id}/enrichment/start"));

    let res = client.post(&start).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client.post(&start).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "already_running");

    srv.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    status_eventually(&client, &srv, project_id, "completed").await;

    let res = client.post(&start).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn progress_stream_opens_with_status_snapshot() {
    let srv = TestServer::spawn(true).await;
    let (project_id, _) = srv.seed_project(&["linen"]);

    let mut res = reqwest::get(srv.url(&format!("/projects/{project_id}/enrichment/progress")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(
        res.headers()[reqwest::header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    let mut received = String::new();
    while !received.contains("\n\n") {
        let chunk = tokio::time::timeout(Duration::from_secs(5), res.chunk())
            .await
            .expect("first event in time")
            .unwrap()
            .expect("stream still open");
        received.push_str(&String::from_utf8_lossy(&chunk));
    }
    assert!(received.contains("event: status"));
    assert!(received.contains(r#""status":"idle""#));

    let res = reqwest::get(srv.url(&format!(
        "/projects/{}/enrichment/progress",
        ProjectId::new()
    )))
    .await
    .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn predict_creates_design_and_generation_finishes() {
    let srv = TestServer::spawn(true).await;
    let client = reqwest::Client::new();
    let (project_id, _) = srv.seed_project(&[]);

    let res = client
        .post(srv.url(&format!("/projects/{project_id}/designs/predict")))
        .json(&json!({
            "locked_attributes": { "color": "red" },
            "ai_variables": ["neckline", "sleeve"],
            "success_score": 0.9,
            "context_attributes": [
                { "attributes": { "color": "red", "neckline": "v" }, "success_score": 0.8 },
                { "attributes": { "color": "blue", "neckline": "round" }, "success_score": 0.4 }
            ]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: Value = res.json().await.unwrap();
    assert_eq!(
        created["predicted_attributes"],
        json!({ "neckline": "predicted neckline", "sleeve": "predicted sleeve" })
    );
    let design_id = created["id"].as_str().unwrap().to_string();

    srv.services.wait_idle().await;

    let status: Value = client
        .get(srv.url(&format!(
            "/projects/{project_id}/designs/{design_id}/image-status"
        )))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["image_status"], "completed");
    for view in ["front", "back", "model"] {
        assert_eq!(status["generated_images"][view]["status"], "completed");
    }
    let front_url = status["generated_images"]["front"]["url"].as_str().unwrap();
    assert_eq!(status["generated_image_url"], front_url);

    let image = client.get(srv.url(front_url)).send().await.unwrap();
    assert_eq!(image.status(), StatusCode::OK);
    assert_eq!(image.bytes().await.unwrap().as_ref(), b"dress front");

    let design: Value = client
        .get(srv.url(&format!("/projects/{project_id}/designs/{design_id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(design["sales_text_status"], "completed");
    assert_eq!(design["sales_text"], "A dress you will love.");
}

#[tokio::test]
async fn predict_rejects_invalid_requests() {
    let srv = TestServer::spawn(true).await;
    let client = reqwest::Client::new();
    let (project_id, _) = srv.seed_project(&[]);
    let predict = srv.url(&format!("/projects/{project_id}/designs/predict"));

    // No enriched items and no explicit context.
    let res = client
        .post(&predict)
        .json(&json!({ "ai_variables": ["neckline"], "success_score": 0.5 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "insufficient_context");

    let res = client
        .post(&predict)
        .json(&json!({ "ai_variables": [], "success_score": 0.5 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");

    let res = client
        .post(&predict)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body("{")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .get(srv.url(&format!(
            "/projects/{project_id}/designs/{}/image-status",
            ProjectId::new()
        )))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
