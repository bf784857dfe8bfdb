use std::sync::Arc;

use axum::{
    Extension, Router,
    extract::Path,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};

use crate::app::{errors, services::AppServices};

pub fn router() -> Router {
    Router::new().route("/images/*key", get(image))
}

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Serve a generated image from the image store.
pub async fn image(
    Extension(services): Extension<Arc<AppServices>>,
    Path(key): Path<String>,
) -> Response {
    match services.images.get(&key).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "image/png")], bytes).into_response(),
        Err(e) => errors::image_error_to_response(e),
    }
}
