//! Google Gemini image provider
//!
//! Uses `generateContent` on an image-capable model; conditioning images are
//! sent as inline base64 parts after the text prompt.

use super::http::{self, Headers};
use crate::image_ref::mime_for_path;
use crate::provider::*;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use kiln_core::{KilnError, Result};
use serde_json::{json, Value};
use std::path::PathBuf;

pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const IMAGE_MODEL: &str = "gemini-2.5-flash-image";

pub struct GeminiImageBackend {
    api_key: String,
    base_url: String,
}

impl GeminiImageBackend {
    pub fn new(api_key: impl Into<String>, base_url: Option<&str>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.unwrap_or(DEFAULT_GEMINI_URL).trim_end_matches('/').to_string(),
        }
    }
}

fn request_body(request: &ImageRequest) -> Result<Value> {
    let mut parts = vec![json!({ "text": request.prompt })];
    for path in &request.input_images {
        let bytes = std::fs::read(path)?;
        parts.push(json!({
            "inline_data": {
                "mime_type": mime_for_path(path),
                "data": STANDARD.encode(&bytes)
            }
        }));
    }
    Ok(json!({
        "contents": [{ "parts": parts }],
        "generationConfig": { "responseModalities": ["TEXT", "IMAGE"] }
    }))
}

/// Decode the first inline image part of a response
fn first_inline_image(response: &Value) -> Result<Vec<u8>> {
    let parts = response
        .get("candidates")
        .and_then(|c| c.as_array())
        .into_iter()
        .flatten()
        .filter_map(|candidate| candidate.pointer("/content/parts"))
        .filter_map(|p| p.as_array())
        .flatten();

    for part in parts {
        let inline = part.get("inlineData").or_else(|| part.get("inline_data"));
        if let Some(data) = inline.and_then(|i| i.get("data")).and_then(|d| d.as_str()) {
            return STANDARD
                .decode(data)
                .map_err(|e| KilnError::backend("gemini", format!("invalid base64 image: {}", e)));
        }
    }

    Err(KilnError::backend(
        "gemini",
        format!(
            "response contains no image: {}",
            http::truncate(&response.to_string(), 300)
        ),
    ))
}

#[async_trait]
impl ImageBackend for GeminiImageBackend {
    async fn generate(&self, request: &ImageRequest) -> Result<Vec<PathBuf>> {
        let request = request.clone();
        let url = format!("{}/models/{}:generateContent", self.base_url, IMAGE_MODEL);
        let headers: Headers = vec![("x-goog-api-key", self.api_key.clone())];

        http::blocking("gemini", move || {
            let body = request_body(&request)?;
            let response = http::post_json("gemini", &url, &headers, &body)?;
            let bytes = first_inline_image(&response)?;

            if let Some(parent) = request.output_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&request.output_path, bytes)?;
            Ok(vec![request.output_path.clone()])
        })
        .await
    }
}
