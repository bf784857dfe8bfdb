//! Image prompts per view, with a deterministic template used when the
//! prompt generator is unavailable.

use serde::{Deserialize, Serialize};

use atelier_core::{AttributeMap, View};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewPrompts {
    pub front: String,
    pub back: String,
    pub model: String,
}

impl ViewPrompts {
    pub fn get(&self, view: View) -> &str {
        match view {
            View::Front => &self.front,
            View::Back => &self.back,
            View::Model => &self.model,
        }
    }

    /// All three prompts carry text.
    pub fn is_complete(&self) -> bool {
        View::ALL.iter().all(|v| !self.get(*v).trim().is_empty())
    }
}

/// Templated prompts built from the merged attribute map only.
pub fn fallback_prompts(product_type: &str, attributes: &AttributeMap) -> ViewPrompts {
    let details = if attributes.is_empty() {
        String::from("no specific attributes")
    } else {
        attributes
            .iter()
            .map(|(k, v)| format!("{}: {v}", k.replace('_', " ")))
            .collect::<Vec<_>>()
            .join(", ")
    };

    ViewPrompts {
        front: format!(
            "Studio product photo of a {product_type}, front view, flat lay on a plain white background. {details}."
        ),
        back: format!(
            "Studio product photo of a {product_type}, back view, flat lay on a plain white background. {details}."
        ),
        model: format!(
            "Fashion photo of a model wearing the {product_type}, natural light, neutral backdrop. {details}."
        ),
    }
}
