use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use atelier_core::{EnrichmentSnapshot, ItemId};

/// In-flight counters of an enrichment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub processed: u32,
    pub total: u32,
    pub current_item_id: Option<ItemId>,
}

/// Terminal counters of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCompleted {
    pub processed: u32,
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailed {
    pub message: String,
}

/// Event emitted to live subscribers of a project's enrichment run.
///
/// Serialises to the bare payload; the variant travels separately as
/// [`event_type`](ProgressEvent::event_type) (the SSE `event:` field).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ProgressEvent {
    /// Current state, sent once when a subscriber attaches.
    Status(EnrichmentSnapshot),
    Progress(ProgressUpdate),
    Completed(RunCompleted),
    Error(RunFailed),
}

impl ProgressEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ProgressEvent::Status(_) => "status",
            ProgressEvent::Progress(_) => "progress",
            ProgressEvent::Completed(_) => "completed",
            ProgressEvent::Error(_) => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Completed(_) | ProgressEvent::Error(_))
    }

    pub fn progress(processed: u32, total: u32, current_item_id: Option<ItemId>) -> Self {
        Self::Progress(ProgressUpdate {
            processed,
            total,
            current_item_id,
        })
    }

    pub fn completed(processed: u32, total: u32) -> Self {
        Self::Completed(RunCompleted { processed, total })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(RunFailed {
            message: message.into(),
        })
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}
