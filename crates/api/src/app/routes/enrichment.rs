use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::Path,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use serde_json::json;
use tokio_stream::StreamExt;

use atelier_core::ProjectId;
use atelier_events::ProgressEvent;

use crate::app::{dto, errors, services::AppServices};

pub fn router() -> Router {
    Router::new()
        .route("/projects/:project_id/enrichment/start", post(start))
        .route("/projects/:project_id/enrichment/progress", get(progress))
        .route("/projects/:project_id/enrichment/status", get(status))
        .route("/projects/:project_id/enrichment/retry", post(retry))
        .route("/projects/:project_id/enrichment/items", get(items))
}

/// Validate the project and start its enrichment run in the background.
pub async fn start(
    Extension(services): Extension<Arc<AppServices>>,
    Path(project_id): Path<String>,
) -> Response {
    let project_id = match dto::parse_id::<ProjectId>(&project_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.enrichment.start(project_id).await {
        Ok(()) => Json(json!({ "success": true })).into_response(),
        Err(e) => errors::enrichment_error_to_response(e),
    }
}

/// Live progress as server-sent events.
///
/// The first event is a `status` snapshot; `progress`, `completed` and `error`
/// events follow as the run advances. The stream stays open until the client
/// disconnects, so a later run on the same project is delivered too.
pub async fn progress(
    Extension(services): Extension<Arc<AppServices>>,
    Path(project_id): Path<String>,
) -> Response {
    let project_id = match dto::parse_id::<ProjectId>(&project_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let (snapshot, subscription) = match services.enrichment.subscribe(project_id).await {
        Ok(v) => v,
        Err(e) => return errors::enrichment_error_to_response(e),
    };

    let stream = tokio_stream::once(ProgressEvent::Status(snapshot))
        .chain(subscription.into_stream())
        .map(move |ev| {
            if ev.is_terminal() {
                tracing::debug!(project_id = %project_id, event = ev.event_type(), "run ended on progress stream");
            }
            Ok::<Event, Infallible>(to_sse_event(&ev))
        });

    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(services.sse_keepalive))
        .into_response()
}

pub async fn status(
    Extension(services): Extension<Arc<AppServices>>,
    Path(project_id): Path<String>,
) -> Response {
    let project_id = match dto::parse_id::<ProjectId>(&project_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.enrichment.status(project_id).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => errors::enrichment_error_to_response(e),
    }
}

/// Clear the errors of failed items (all, or `article_ids`) and re-run them.
pub async fn retry(
    Extension(services): Extension<Arc<AppServices>>,
    Path(project_id): Path<String>,
    body: Bytes,
) -> Response {
    let project_id = match dto::parse_id::<ProjectId>(&project_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let ids = match dto::RetryRequest::from_body(&body).and_then(|req| req.item_ids()) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.enrichment.retry_failed(project_id, ids).await {
        Ok(queued) => Json(json!({ "success": true, "queued_count": queued })).into_response(),
        Err(e) => errors::enrichment_error_to_response(e),
    }
}

pub async fn items(
    Extension(services): Extension<Arc<AppServices>>,
    Path(project_id): Path<String>,
) -> Response {
    let project_id = match dto::parse_id::<ProjectId>(&project_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    if let Err(e) = services.enrichment.status(project_id).await {
        return errors::enrichment_error_to_response(e);
    }
    match services.store.list_items(project_id).await {
        Ok(records) => {
            let items: Vec<_> = records.iter().map(dto::item_to_json).collect();
            Json(json!({ "items": items })).into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

fn to_sse_event(ev: &ProgressEvent) -> Event {
    Event::default()
        .event(ev.event_type())
        .data(ev.to_json().to_string())
}

