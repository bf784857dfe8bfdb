use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use atelier_ai::AiError;
use atelier_infra::{EnrichmentError, GenerationError, StoreError};

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn invalid_id(message: impl Into<String>) -> Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_id", message)
}

pub fn store_error_to_response(err: StoreError) -> Response {
    match err {
        StoreError::ProjectNotFound(_)
        | StoreError::ItemNotFound(_)
        | StoreError::DesignNotFound(_) => {
            json_error(StatusCode::NOT_FOUND, "not_found", err.to_string())
        }
        StoreError::AlreadyExists(_) => {
            json_error(StatusCode::CONFLICT, "conflict", err.to_string())
        }
        StoreError::InvalidTransition(_) => {
            json_error(StatusCode::CONFLICT, "invalid_transition", err.to_string())
        }
        StoreError::Backend(_) => {
            tracing::error!(error = %err, "store failure");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "store_error",
                "status store unavailable",
            )
        }
    }
}

pub fn enrichment_error_to_response(err: EnrichmentError) -> Response {
    match err {
        EnrichmentError::ProjectNotFound(_) => {
            json_error(StatusCode::NOT_FOUND, "not_found", err.to_string())
        }
        EnrichmentError::MissingSchema(_) => {
            json_error(StatusCode::BAD_REQUEST, "missing_schema", err.to_string())
        }
        EnrichmentError::AlreadyRunning(_) => {
            json_error(StatusCode::CONFLICT, "already_running", err.to_string())
        }
        EnrichmentError::Store(e) => store_error_to_response(e),
        other => {
            tracing::error!(error = %other, "enrichment request failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", other.to_string())
        }
    }
}

pub fn generation_error_to_response(err: GenerationError) -> Response {
    match err {
        GenerationError::ProjectNotFound(_) | GenerationError::DesignNotFound(_) => {
            json_error(StatusCode::NOT_FOUND, "not_found", err.to_string())
        }
        GenerationError::Validation(_) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", err.to_string())
        }
        GenerationError::InsufficientContext { .. } => {
            json_error(StatusCode::BAD_REQUEST, "insufficient_context", err.to_string())
        }
        GenerationError::Prediction(ref source) => {
            tracing::warn!(error = %source, "attribute prediction failed");
            json_error(StatusCode::BAD_GATEWAY, "prediction_failed", err.to_string())
        }
        GenerationError::Store(e) => store_error_to_response(e),
        GenerationError::Domain(e) => {
            tracing::error!(error = %e, "generation invariant violated");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e.to_string())
        }
    }
}

pub fn image_error_to_response(err: AiError) -> Response {
    match err {
        AiError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", err.to_string()),
        AiError::InvalidInput(_) => {
            json_error(StatusCode::BAD_REQUEST, "invalid_key", err.to_string())
        }
        other => {
            tracing::error!(error = %other, "image read failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "image_store_error", other.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_core::ProjectId;

    #[test]
    fn enrichment_errors_map_to_statuses() {
        let id = ProjectId::new();
        assert_eq!(
            enrichment_error_to_response(EnrichmentError::ProjectNotFound(id)).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            enrichment_error_to_response(EnrichmentError::MissingSchema(id)).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            enrichment_error_to_response(EnrichmentError::AlreadyRunning(id)).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            enrichment_error_to_response(EnrichmentError::WorkerPanicked(1)).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn generation_errors_map_to_statuses() {
        let insufficient = GenerationError::InsufficientContext { required: 2, found: 0 };
        assert_eq!(
            generation_error_to_response(insufficient).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            generation_error_to_response(GenerationError::Prediction(AiError::Timeout("t".into())))
                .status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            generation_error_to_response(GenerationError::Store(StoreError::Backend("down".into())))
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
