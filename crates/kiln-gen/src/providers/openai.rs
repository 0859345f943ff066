//! OpenAI image provider (`gpt-image-1`)
//!
//! Unconditioned views use `/images/generations`; conditioned views upload
//! the earlier references to `/images/edits` as a `reqwest` multipart form.

use super::http::{self, Headers};
use crate::image_ref::mime_for_path;
use crate::provider::*;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use kiln_core::{KilnError, Result};
use reqwest::blocking::multipart::{Form, Part};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
const IMAGE_MODEL: &str = "gpt-image-1";

pub struct OpenAiImageBackend {
    api_key: String,
    base_url: String,
}

impl OpenAiImageBackend {
    pub fn new(api_key: impl Into<String>, base_url: Option<&str>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.unwrap_or(DEFAULT_OPENAI_URL).trim_end_matches('/').to_string(),
        }
    }
}

/// A conditioning image read from disk, ready to upload
#[derive(Debug, Clone, PartialEq, Eq)]
struct Upload {
    file_name: String,
    mime: &'static str,
    bytes: Vec<u8>,
}

fn read_uploads(paths: &[PathBuf]) -> Result<Vec<Upload>> {
    paths
        .iter()
        .map(|path| {
            let bytes = std::fs::read(path)?;
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("reference.png")
                .to_string();
            Ok(Upload {
                file_name,
                mime: mime_for_path(path),
                bytes,
            })
        })
        .collect()
}

fn edits_form(request: &ImageRequest, uploads: Vec<Upload>) -> Result<Form> {
    let mut form = Form::new()
        .text("model", IMAGE_MODEL)
        .text("prompt", request.prompt.clone())
        .text("size", request.size.clone())
        .text("quality", request.quality.clone())
        .text("n", "1");
    for upload in uploads {
        let part = Part::bytes(upload.bytes)
            .file_name(upload.file_name)
            .mime_str(upload.mime)
            .map_err(|e| {
                KilnError::backend("openai", format!("invalid mime '{}': {}", upload.mime, e))
            })?;
        form = form.part("image[]", part);
    }
    Ok(form)
}

/// Save the first image of an OpenAI images response
fn save_first_image(response: &Value, output_path: &Path) -> Result<()> {
    let first = response
        .get("data")
        .and_then(|d| d.get(0))
        .ok_or_else(|| KilnError::backend("openai", "response contains no images"))?;

    let bytes = if let Some(b64) = first.get("b64_json").and_then(|b| b.as_str()) {
        STANDARD
            .decode(b64)
            .map_err(|e| KilnError::backend("openai", format!("invalid base64 image: {}", e)))?
    } else if let Some(url) = first.get("url").and_then(|u| u.as_str()) {
        http::get_bytes("openai", url)?
    } else {
        return Err(KilnError::backend("openai", "image has neither b64_json nor url"));
    };

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output_path, bytes)?;
    Ok(())
}

#[async_trait]
impl ImageBackend for OpenAiImageBackend {
    async fn generate(&self, request: &ImageRequest) -> Result<Vec<PathBuf>> {
        let request = request.clone();
        let base_url = self.base_url.clone();
        let headers: Headers = vec![("Authorization", format!("Bearer {}", self.api_key))];

        http::blocking("openai", move || {
            let response = if request.input_images.is_empty() {
                let payload = json!({
                    "model": IMAGE_MODEL,
                    "prompt": request.prompt,
                    "size": request.size,
                    "quality": request.quality,
                    "n": 1
                });
                let url = format!("{}/images/generations", base_url);
                http::post_json("openai", &url, &headers, &payload)?
            } else {
                let form = edits_form(&request, read_uploads(&request.input_images)?)?;
                let url = format!("{}/images/edits", base_url);
                http::post_form("openai", &url, &headers, form)?
            };

            save_first_image(&response, &request.output_path)?;
            Ok(vec![request.output_path.clone()])
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kiln_openai_test_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_uploads_follow_conditioning_order() {
        let dir = temp_dir();
        let front = dir.join("mug_ref_front.png");
        let back = dir.join("mug_ref_back.jpg");
        std::fs::write(&front, b"front-bytes").unwrap();
        std::fs::write(&back, b"back-bytes").unwrap();

        let uploads = read_uploads(&[front, back]).unwrap();
        assert_eq!(uploads.len(), 2);
        assert_eq!(uploads[0].file_name, "mug_ref_front.png");
        assert_eq!(uploads[0].mime, "image/png");
        assert_eq!(uploads[0].bytes, b"front-bytes");
        assert_eq!(uploads[1].file_name, "mug_ref_back.jpg");
        assert_eq!(uploads[1].mime, "image/jpeg");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_conditioning_image_is_an_error() {
        let err = read_uploads(&[PathBuf::from("/nonexistent/kiln_ref_front.png")]).unwrap_err();
        assert!(matches!(err, KilnError::IoError(_)), "unexpected error: {err:?}");
    }

    #[test]
    fn test_edits_form_accepts_uploads() {
        let request = ImageRequest {
            provider: crate::model::ImageProvider::OpenAi,
            prompt: "a mug, back view".to_string(),
            input_images: vec![PathBuf::from("mug_ref_front.png")],
            size: "1024x1024".to_string(),
            quality: "high".to_string(),
            output_path: PathBuf::from("mug_ref_back.png"),
        };
        let uploads = vec![Upload {
            file_name: "mug_ref_front.png".to_string(),
            mime: "image/png",
            bytes: b"png".to_vec(),
        }];
        let form = edits_form(&request, uploads).unwrap();
        assert!(!form.boundary().is_empty());
    }

    #[test]
    fn test_save_first_image_decodes_base64() {
        let dir = temp_dir();
        let out = dir.join("nested").join("lamp_ref_front.png");
        let response = json!({ "data": [{ "b64_json": STANDARD.encode(b"fake-png") }] });

        save_first_image(&response, &out).unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), b"fake-png");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_save_first_image_rejects_empty_response() {
        let err = save_first_image(&json!({ "data": [] }), Path::new("unused.png")).unwrap_err();
        assert!(err.to_string().contains("openai"));
    }
}
