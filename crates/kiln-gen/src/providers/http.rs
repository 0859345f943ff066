//! Blocking HTTP plumbing shared by the adapters
//!
//! JSON requests go through `ureq` with status-as-error disabled so error
//! bodies can be surfaced verbatim in `BackendError`s. Multipart uploads use
//! the `reqwest` blocking client, which encodes the form itself. Callers run
//! these helpers inside [`blocking`] so the async runtime is never stalled.

use kiln_core::{KilnError, Result};
use reqwest::blocking::multipart::Form;
use serde_json::Value;
use std::io::Read;
use std::time::Duration;

const REQUEST_TIMEOUT_SECS: u64 = 300;
const ERROR_BODY_LIMIT: usize = 500;

/// Extra request headers, e.g. `("Authorization", "Key ...")`
pub type Headers = Vec<(&'static str, String)>;

pub fn build_agent() -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .timeout_global(Some(Duration::from_secs(REQUEST_TIMEOUT_SECS)))
        .http_status_as_error(false)
        .build();
    config.into()
}

/// Run a blocking adapter call on the runtime's blocking pool
pub async fn blocking<T, F>(provider: &str, work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| KilnError::backend(provider, format!("worker task failed: {}", e)))?
}

pub fn post_json(provider: &str, url: &str, headers: &Headers, payload: &Value) -> Result<Value> {
    let mut request = build_agent().post(url);
    for (name, value) in headers {
        request = request.header(*name, value.as_str());
    }
    let response = request
        .send_json(payload)
        .map_err(|e| KilnError::backend(provider, format!("request to {} failed: {}", url, e)))?;
    read_json(provider, response)
}

/// POST a multipart form through the `reqwest` blocking client
pub fn post_form(provider: &str, url: &str, headers: &Headers, form: Form) -> Result<Value> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .map_err(|e| KilnError::backend(provider, format!("failed to build client: {}", e)))?;
    let mut request = client.post(url).multipart(form);
    for (name, value) in headers {
        request = request.header(*name, value.as_str());
    }
    let response = request
        .send()
        .map_err(|e| KilnError::backend(provider, format!("request to {} failed: {}", url, e)))?;

    let status = response.status();
    let body = response
        .text()
        .map_err(|e| KilnError::backend(provider, format!("failed to read response: {}", e)))?;
    if !status.is_success() {
        return Err(KilnError::backend(
            provider,
            format!("HTTP {}: {}", status.as_u16(), truncate(body.trim(), ERROR_BODY_LIMIT)),
        ));
    }
    serde_json::from_str(&body)
        .map_err(|e| KilnError::backend(provider, format!("invalid JSON response: {}", e)))
}

pub fn get_json(provider: &str, url: &str, headers: &Headers) -> Result<Value> {
    let mut request = build_agent().get(url);
    for (name, value) in headers {
        request = request.header(*name, value.as_str());
    }
    let response = request
        .call()
        .map_err(|e| KilnError::backend(provider, format!("request to {} failed: {}", url, e)))?;
    read_json(provider, response)
}

/// Download a binary artifact
pub fn get_bytes(provider: &str, url: &str) -> Result<Vec<u8>> {
    let mut response = build_agent()
        .get(url)
        .call()
        .map_err(|e| KilnError::backend(provider, format!("download failed: {}", e)))?;
    check_status(provider, &mut response)?;

    let mut reader = response.into_body().into_reader();
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .map_err(|e| KilnError::backend(provider, format!("failed to read download: {}", e)))?;
    Ok(bytes)
}

fn read_json(provider: &str, mut response: ureq::http::Response<ureq::Body>) -> Result<Value> {
    check_status(provider, &mut response)?;
    response
        .body_mut()
        .read_json::<Value>()
        .map_err(|e| KilnError::backend(provider, format!("invalid JSON response: {}", e)))
}

fn check_status(provider: &str, response: &mut ureq::http::Response<ureq::Body>) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.body_mut().read_to_string().unwrap_or_default();
    Err(KilnError::backend(
        provider,
        format!("HTTP {}: {}", status.as_u16(), truncate(body.trim(), ERROR_BODY_LIMIT)),
    ))
}

/// First string found at any of the given JSON paths
pub fn first_str(value: &Value, paths: &[&[&str]]) -> Option<String> {
    paths.iter().find_map(|path| {
        path.iter()
            .try_fold(value, |node, key| node.get(*key))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    })
}

pub fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_str_prefers_earlier_paths() {
        let value = json!({
            "model_mesh": { "url": "https://a/mesh.glb" },
            "model_url": "https://b/mesh.glb"
        });
        let url = first_str(&value, &[&["model_mesh", "url"], &["model_url"]]);
        assert_eq!(url.as_deref(), Some("https://a/mesh.glb"));
    }

    #[test]
    fn test_first_str_falls_through_missing_paths() {
        let value = json!({ "model_url": "https://b/mesh.glb" });
        let url = first_str(&value, &[&["model_glb", "url"], &["model_url"]]);
        assert_eq!(url.as_deref(), Some("https://b/mesh.glb"));
        assert!(first_str(&value, &[&["nope"]]).is_none());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééé", 3), "é...");
    }
}
