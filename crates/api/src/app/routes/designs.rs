use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{Path, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};

use atelier_core::{DesignId, ProjectId};
use atelier_infra::PredictRequest;

use crate::app::{dto, errors, services::AppServices};

pub fn router() -> Router {
    Router::new()
        .route("/projects/:project_id/designs/predict", post(predict))
        .route("/projects/:project_id/designs/:design_id", get(design))
        .route(
            "/projects/:project_id/designs/:design_id/image-status",
            get(image_status),
        )
}

/// Predict the open attributes and start image and text generation.
pub async fn predict(
    Extension(services): Extension<Arc<AppServices>>,
    Path(project_id): Path<String>,
    body: Result<Json<PredictRequest>, JsonRejection>,
) -> Response {
    let project_id = match dto::parse_id::<ProjectId>(&project_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Json(request) = match body {
        Ok(v) => v,
        Err(rejection) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_body",
                rejection.body_text(),
            );
        }
    };

    match services.generation.predict(project_id, request).await {
        Ok(design) => (
            StatusCode::CREATED,
            Json(dto::created_design_to_json(&design)),
        )
            .into_response(),
        Err(e) => errors::generation_error_to_response(e),
    }
}

pub async fn design(
    Extension(services): Extension<Arc<AppServices>>,
    Path((project_id, design_id)): Path<(String, String)>,
) -> Response {
    let (project_id, design_id) = match parse_design_path(&project_id, &design_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.generation.design(project_id, design_id).await {
        Ok(design) => Json(design).into_response(),
        Err(e) => errors::generation_error_to_response(e),
    }
}

/// Polling fallback for clients without SSE.
pub async fn image_status(
    Extension(services): Extension<Arc<AppServices>>,
    Path((project_id, design_id)): Path<(String, String)>,
) -> Response {
    let (project_id, design_id) = match parse_design_path(&project_id, &design_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.generation.design(project_id, design_id).await {
        Ok(design) => Json(dto::image_status_to_json(&design)).into_response(),
        Err(e) => errors::generation_error_to_response(e),
    }
}

fn parse_design_path(project_id: &str, design_id: &str) -> Result<(ProjectId, DesignId), Response> {
    Ok((dto::parse_id(project_id)?, dto::parse_id(design_id)?))
}
