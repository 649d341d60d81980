//! The `image` argument shared by every tool that takes a capture.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::session::ImageSource;
use crate::types::{McpError, McpResult};

#[derive(Debug, Deserialize)]
pub struct ImageArg {
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

impl ImageArg {
    /// Read the image bytes from a file or decode them from base64.
    pub fn bytes(&self) -> McpResult<Vec<u8>> {
        let source = ImageSource::parse(&self.source_type)?;
        let payload = match source {
            ImageSource::File => self.path.as_deref(),
            ImageSource::Base64 => self.data.as_deref(),
        };
        let payload = payload.ok_or_else(|| {
            McpError::InvalidParams(match source {
                ImageSource::File => "image.path is required for type=file".to_string(),
                ImageSource::Base64 => "image.data is required for type=base64".to_string(),
            })
        })?;
        source.load(payload)
    }
}

pub fn schema(description: &str) -> Value {
    json!({
        "type": "object",
        "description": description,
        "properties": {
            "type": { "type": "string", "enum": ["file", "base64"], "description": "Source type" },
            "path": { "type": "string", "description": "File path (for type=file)" },
            "data": { "type": "string", "description": "Base64 image, data URL accepted (for type=base64)" }
        },
        "required": ["type"]
    })
}

/// A match threshold argument, falling back to the engine's decision threshold.
pub fn threshold_or(value: Option<f32>, default: f32) -> McpResult<f32> {
    let threshold = value.unwrap_or(default);
    if !(0.0..=1.0).contains(&threshold) {
        return Err(McpError::InvalidParams(format!(
            "threshold must be within [0, 1], got {threshold}"
        )));
    }
    Ok(threshold)
}
