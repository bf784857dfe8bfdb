//! JSON/HTTP client for the inference gateway.
//!
//! One gateway fronts every model the engine uses:
//!
//! | Trait | Request | Response |
//! |-------|---------|----------|
//! | `ImageFetch` | `GET /items/{id}/image` | image bytes |
//! | `VisionInference` | `POST /vision` (multipart: `request` JSON + `image`) | `VisionOutput` |
//! | `AttributePredictor` | `POST /predict` | `{predicted_attributes}` |
//! | `PromptGenerator` | `POST /prompts` | `ViewPrompts` |
//! | `ImageSynthesis` | `POST /images` `{prompt}` | image bytes |
//! | `CopySynthesizer` | `POST /copy` (multipart when an image is attached) | `{text}` |
//!
//! Status codes map onto [`AiError`] so the retry policy can tell transient
//! failures from permanent ones.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use atelier_ai::{
    AiError, AttributePredictor, CopyRequest, CopySynthesizer, ImageFetch, ImageSynthesis,
    InferenceContext, PredictionRequest, PromptGenerator, PromptRequest, ViewPrompts,
    VisionInference, VisionOutput,
};
use atelier_core::{AttributeMap, AttributeSchema, ItemId};

#[derive(Debug, Clone)]
pub struct HttpAiGateway {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    predicted_attributes: AttributeMap,
}

#[derive(Debug, Deserialize)]
struct CopyResponse {
    text: String,
}

impl HttpAiGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AiError::Transport(format!("failed to build http client: {e}")))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response, AiError> {
        let response = request.send().await.map_err(|e| map_transport(what, e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(map_status(what, status, body))
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T, AiError> {
        self.send(request, what)
            .await?
            .json::<T>()
            .await
            .map_err(|e| AiError::BadResponse(format!("{what}: {e}")))
    }

    async fn bytes(&self, request: RequestBuilder, what: &str) -> Result<Vec<u8>, AiError> {
        let bytes = self
            .send(request, what)
            .await?
            .bytes()
            .await
            .map_err(|e| map_transport(what, e))?;
        if bytes.is_empty() {
            return Err(AiError::BadResponse(format!("{what}: empty body")));
        }
        Ok(bytes.to_vec())
    }
}

fn json_part(value: &serde_json::Value) -> Result<Part, AiError> {
    Part::text(value.to_string())
        .mime_str("application/json")
        .map_err(|e| AiError::InvalidInput(format!("bad multipart body: {e}")))
}

fn image_part(bytes: Vec<u8>) -> Result<Part, AiError> {
    Part::bytes(bytes)
        .file_name("image")
        .mime_str("application/octet-stream")
        .map_err(|e| AiError::InvalidInput(format!("bad multipart body: {e}")))
}

fn map_transport(what: &str, err: reqwest::Error) -> AiError {
    if err.is_timeout() {
        AiError::Timeout(format!("{what}: {err}"))
    } else if err.is_decode() {
        AiError::BadResponse(format!("{what}: {err}"))
    } else {
        AiError::Transport(format!("{what}: {err}"))
    }
}

fn map_status(what: &str, status: StatusCode, body: String) -> AiError {
    let msg = if body.is_empty() {
        format!("{what}: {status}")
    } else {
        format!("{what}: {status}: {body}")
    };
    if status == StatusCode::NOT_FOUND {
        AiError::NotFound(msg)
    } else if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY {
        AiError::InvalidInput(msg)
    } else if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
        AiError::Timeout(msg)
    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        AiError::Transport(msg)
    } else {
        AiError::BadResponse(msg)
    }
}

#[async_trait]
impl ImageFetch for HttpAiGateway {
    async fn fetch(&self, item_id: ItemId) -> Result<Vec<u8>, AiError> {
        let request = self.client.get(self.url(&format!("/items/{item_id}/image")));
        self.bytes(request, "fetch item image").await
    }
}

#[async_trait]
impl VisionInference for HttpAiGateway {
    async fn infer(
        &self,
        image: &[u8],
        schema: &AttributeSchema,
        context: &InferenceContext,
    ) -> Result<VisionOutput, AiError> {
        if image.is_empty() {
            return Err(AiError::InvalidInput("empty image".into()));
        }
        let form = Form::new()
            .part("request", json_part(&json!({ "schema": schema, "context": context }))?)
            .part("image", image_part(image.to_vec())?);
        let output: VisionOutput = self
            .json(self.client.post(self.url("/vision")).multipart(form), "vision")
            .await?;
        if output.mismatch_score > 100 {
            return Err(AiError::BadResponse(format!(
                "vision: mismatch score {} out of range",
                output.mismatch_score
            )));
        }
        Ok(output)
    }
}

#[async_trait]
impl AttributePredictor for HttpAiGateway {
    async fn predict(&self, request: &PredictionRequest) -> Result<AttributeMap, AiError> {
        let response: PredictResponse = self
            .json(self.client.post(self.url("/predict")).json(request), "predict")
            .await?;
        Ok(response.predicted_attributes)
    }
}

#[async_trait]
impl PromptGenerator for HttpAiGateway {
    async fn generate(&self, request: &PromptRequest) -> Result<ViewPrompts, AiError> {
        self.json(self.client.post(self.url("/prompts")).json(request), "prompts")
            .await
    }
}

#[async_trait]
impl ImageSynthesis for HttpAiGateway {
    async fn synthesize(&self, prompt: &str) -> Result<Vec<u8>, AiError> {
        let request = self
            .client
            .post(self.url("/images"))
            .json(&json!({ "prompt": prompt }));
        self.bytes(request, "image synthesis").await
    }
}

#[async_trait]
impl CopySynthesizer for HttpAiGateway {
    async fn synthesize(&self, request: &CopyRequest) -> Result<String, AiError> {
        let builder = self.client.post(self.url("/copy"));
        let builder = match &request.image {
            Some(image) => {
                let body = serde_json::to_value(request)
                    .map_err(|e| AiError::InvalidInput(format!("copy request: {e}")))?;
                let form = Form::new()
                    .part("request", json_part(&body)?)
                    .part("image", image_part(image.clone())?);
                builder.multipart(form)
            }
            None => builder.json(request),
        };
        let response: CopyResponse = self.json(builder, "copy").await?;
        Ok(response.text)
    }
}
