//! fal.ai adapters: synchronous image-to-3D endpoints and Flux images
//!
//! `fal.run` answers in a single request, so the mesh adapter always
//! returns a ready artifact and never creates a pollable task.

use super::http::{self, Headers};
use crate::image_ref::ImageRef;
use crate::model::{MeshFormat, MeshModel};
use crate::provider::*;
use async_trait::async_trait;
use kiln_core::{KilnError, Result};
use serde_json::{json, Value};
use std::path::PathBuf;

pub const DEFAULT_FAL_URL: &str = "https://fal.run";
const FLUX_TEXT_ENDPOINT: &str = "fal-ai/flux/dev";
const FLUX_MULTI_ENDPOINT: &str = "fal-ai/flux-pro/kontext/max/multi";

/// Mesh generation through fal.ai hosted models
pub struct FalMeshBackend {
    api_key: String,
    base_url: String,
}

impl FalMeshBackend {
    pub fn new(api_key: impl Into<String>, base_url: Option<&str>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.unwrap_or(DEFAULT_FAL_URL).trim_end_matches('/').to_string(),
        }
    }

    fn headers(&self) -> Headers {
        vec![("Authorization", format!("Key {}", self.api_key))]
    }
}

/// Locate the mesh URL in a fal.ai response; shapes differ per model
pub fn extract_mesh_url(response: &Value, format: MeshFormat) -> Option<String> {
    http::first_str(
        response,
        &[
            &["model_mesh", "url"],
            &["model_glb", "url"],
            &["model_url"],
            &["model_url", "url"],
            &["model_urls", format.as_str(), "url"],
            &["model_urls", format.as_str()],
        ],
    )
}

#[async_trait]
impl MeshBackend for FalMeshBackend {
    fn name(&self) -> &str {
        "fal"
    }

    async fn submit(&self, call: &MeshCall) -> Result<Submission> {
        let mut payload = call.image_fields();
        if call.model == MeshModel::Hunyuan3d {
            payload.insert("textured_mesh".to_string(), Value::Bool(true));
        }

        let url = format!("{}/{}", self.base_url, call.endpoint);
        let headers = self.headers();
        let format = call.format;
        let payload = Value::Object(payload);

        let response =
            http::blocking("fal", move || http::post_json("fal", &url, &headers, &payload)).await?;

        let mesh_url = extract_mesh_url(&response, format).ok_or_else(|| {
            KilnError::backend(
                "fal",
                format!(
                    "no mesh URL in response: {}",
                    http::truncate(&response.to_string(), 300)
                ),
            )
        })?;
        Ok(Submission::Ready(Artifact::Url(mesh_url)))
    }

    async fn poll(&self, task: &TaskRef, _format: MeshFormat) -> Result<TaskPoll> {
        Err(KilnError::backend(
            "fal",
            format!("{} is synchronous; task {} cannot be polled", task.endpoint, task.id),
        ))
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let url = url.to_string();
        http::blocking("fal", move || http::get_bytes("fal", &url)).await
    }
}

/// Reference images through Flux on fal.ai
pub struct FluxImageBackend {
    api_key: String,
    base_url: String,
}

impl FluxImageBackend {
    pub fn new(api_key: impl Into<String>, base_url: Option<&str>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.unwrap_or(DEFAULT_FAL_URL).trim_end_matches('/').to_string(),
        }
    }
}

fn flux_payload(request: &ImageRequest, images: Vec<String>) -> (&'static str, Value) {
    if images.is_empty() {
        (
            FLUX_TEXT_ENDPOINT,
            json!({
                "prompt": request.prompt,
                "image_size": "square_hd",
                "num_images": 1,
                "enable_safety_checker": false
            }),
        )
    } else {
        (
            FLUX_MULTI_ENDPOINT,
            json!({
                "prompt": request.prompt,
                "image_urls": images,
                "num_images": 1
            }),
        )
    }
}

#[async_trait]
impl ImageBackend for FluxImageBackend {
    async fn generate(&self, request: &ImageRequest) -> Result<Vec<PathBuf>> {
        let request = request.clone();
        let base_url = self.base_url.clone();
        let headers = vec![("Authorization", format!("Key {}", self.api_key))];

        http::blocking("flux", move || {
            let images = request
                .input_images
                .iter()
                .map(|p| ImageRef::Path(p.clone()).to_data_uri())
                .collect::<Result<Vec<_>>>()?;
            let (endpoint, payload) = flux_payload(&request, images);

            let url = format!("{}/{}", base_url, endpoint);
            let response = http::post_json("flux", &url, &headers, &payload)?;
            let image_url = response
                .get("images")
                .and_then(|i| i.get(0))
                .and_then(|i| i.get("url"))
                .and_then(|u| u.as_str())
                .ok_or_else(|| KilnError::backend("flux", "no image URL in response"))?
                .to_string();

            let bytes = http::get_bytes("flux", &image_url)?;
            if let Some(parent) = request.output_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&request.output_path, &bytes)?;
            Ok(vec![request.output_path.clone()])
        })
        .await
    }
}
