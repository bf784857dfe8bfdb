//! HTTP route modules.
//!
//! Each module owns one area of the API and exposes `router()`.

use axum::Router;

pub mod designs;
pub mod enrichment;
pub mod system;

pub fn router() -> Router {
    Router::new()
        .merge(enrichment::router())
        .merge(designs::router())
        .merge(system::router())
}
