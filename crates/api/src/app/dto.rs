use core::str::FromStr;

use axum::response::Response;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

use atelier_core::{DomainError, GeneratedDesign, ItemId, ItemRecord};

use super::errors;

/// Body of the retry endpoint. Absent or null `article_ids` retries every failed item.
#[derive(Debug, Default, Deserialize)]
pub struct RetryRequest {
    #[serde(default, alias = "articleIds")]
    pub article_ids: Option<Vec<String>>,
}

impl RetryRequest {
    /// Parse an optional JSON body; an empty body means "all failed items".
    pub fn from_body(body: &[u8]) -> Result<Self, Response> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body).map_err(|e| {
            errors::json_error(
                axum::http::StatusCode::BAD_REQUEST,
                "invalid_body",
                e.to_string(),
            )
        })
    }

    pub fn item_ids(&self) -> Result<Option<Vec<ItemId>>, Response> {
        self.article_ids
            .as_ref()
            .map(|ids| parse_ids::<ItemId>(ids))
            .transpose()
    }
}

pub fn parse_id<T>(raw: &str) -> Result<T, Response>
where
    T: FromStr<Err = DomainError>,
{
    raw.parse::<T>().map_err(|e| errors::invalid_id(e.to_string()))
}

pub fn parse_ids<T>(raw: &[String]) -> Result<Vec<T>, Response>
where
    T: FromStr<Err = DomainError>,
{
    raw.iter().map(|id| parse_id(id)).collect()
}

pub fn item_to_json(record: &ItemRecord) -> JsonValue {
    json!({
        "id": record.item.id,
        "product_type": record.item.product_type,
        "description": record.item.description,
        "status": record.status(),
        "enriched_attributes": record.enriched_attributes,
        "enrichment_error": record.enrichment_error,
        "mismatch_confidence": record.mismatch_confidence,
        "needs_review": record.needs_review(),
        "success_score": record.success_score,
    })
}

/// Response of the predict endpoint.
pub fn created_design_to_json(design: &GeneratedDesign) -> JsonValue {
    json!({
        "id": design.id,
        "predicted_attributes": design.predicted_attributes,
        "image_status": design.image_status,
        "sales_text_status": design.sales_text_status,
    })
}

/// Polling snapshot of the image stage.
pub fn image_status_to_json(design: &GeneratedDesign) -> JsonValue {
    json!({
        "image_status": design.image_status,
        "generated_images": design.generated_images,
        "generated_image_url": design.generated_image_url,
    })
}
