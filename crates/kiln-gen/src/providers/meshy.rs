//! Meshy image-to-3D provider
//!
//! Meshy creates a task and must be polled. Single-image requests go to
//! `/openapi/v1/image-to-3d`, multi-image requests to
//! `/openapi/v1/multi-image-to-3d`; polling reads the same path plus the
//! task id.

use super::http::{self, Headers};
use crate::model::MeshFormat;
use crate::provider::*;
use async_trait::async_trait;
use kiln_core::{KilnError, Result};
use serde_json::Value;

pub const DEFAULT_MESHY_URL: &str = "https://api.meshy.ai";

/// Meshy provider for image-to-3D generation
pub struct MeshyBackend {
    api_key: String,
    base_url: String,
}

impl MeshyBackend {
    pub fn new(api_key: impl Into<String>, base_url: Option<&str>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.unwrap_or(DEFAULT_MESHY_URL).trim_end_matches('/').to_string(),
        }
    }

    fn headers(&self) -> Headers {
        vec![("Authorization", format!("Bearer {}", self.api_key))]
    }

    fn task_url(&self, endpoint: &str) -> String {
        format!("{}/openapi/v1/{}", self.base_url, endpoint)
    }
}

/// Interpret a Meshy task document
pub fn parse_task(response: &Value, format: MeshFormat) -> Result<TaskPoll> {
    let status = response
        .get("status")
        .and_then(|s| s.as_str())
        .unwrap_or("UNKNOWN");

    let progress = response
        .get("progress")
        .and_then(|p| p.as_u64())
        .unwrap_or(0)
        .min(100) as u8;

    match status {
        "SUCCEEDED" => {
            let url = response
                .get("model_urls")
                .and_then(|u| u.get(format.as_str()))
                .and_then(|u| u.as_str())
                .filter(|u| !u.is_empty())
                .ok_or_else(|| {
                    KilnError::backend(
                        "meshy",
                        format!("task succeeded but has no {} URL", format),
                    )
                })?;
            Ok(TaskPoll::Succeeded(Artifact::Url(url.to_string())))
        }
        "FAILED" | "EXPIRED" | "CANCELED" => {
            let msg = response
                .get("task_error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .filter(|m| !m.is_empty())
                .unwrap_or("Unknown error");
            Ok(TaskPoll::Failed(format!("{} ({})", msg, status.to_lowercase())))
        }
        other => Ok(TaskPoll::Pending {
            status: other.to_string(),
            progress,
        }),
    }
}

#[async_trait]
impl MeshBackend for MeshyBackend {
    fn name(&self) -> &str {
        "meshy"
    }

    async fn submit(&self, call: &MeshCall) -> Result<Submission> {
        let mut payload = call.image_fields();
        payload.insert("should_texture".to_string(), Value::Bool(true));
        payload.insert("should_remesh".to_string(), Value::Bool(true));
        payload.insert("enable_pbr".to_string(), Value::Bool(false));

        let url = self.task_url(call.endpoint);
        let headers = self.headers();
        let payload = Value::Object(payload);
        let response = http::blocking("meshy", move || {
            http::post_json("meshy", &url, &headers, &payload)
        })
        .await?;

        let id = response
            .get("result")
            .and_then(|r| r.as_str())
            .ok_or_else(|| {
                KilnError::backend(
                    "meshy",
                    format!(
                        "unexpected submit response: {}",
                        http::truncate(&response.to_string(), 300)
                    ),
                )
            })?;

        Ok(Submission::Task(TaskRef {
            endpoint: call.endpoint.to_string(),
            id: id.to_string(),
        }))
    }

    async fn poll(&self, task: &TaskRef, format: MeshFormat) -> Result<TaskPoll> {
        let url = format!("{}/{}", self.task_url(&task.endpoint), task.id);
        let headers = self.headers();
        let response =
            http::blocking("meshy", move || http::get_json("meshy", &url, &headers)).await?;
        parse_task(&response, format)
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let url = url.to_string();
        http::blocking("meshy", move || http::get_bytes("meshy", &url)).await
    }
}
