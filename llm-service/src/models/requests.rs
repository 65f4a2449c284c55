use serde::{Deserialize, Serialize};
use validator::Validate;

/// Body of both generation endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GenerationRequest {
    #[validate(length(min = 1, message = "Context cannot be empty"))]
    pub context: String,
}

impl GenerationRequest {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
        }
    }
}

/// JSON body accepted by the material endpoint. Exactly one of `text` or
/// `uri` is expected; `uri` must be a `file://` reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct MaterialRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 8, message = "File reference is too short"))]
    pub uri: Option<String>,
}
