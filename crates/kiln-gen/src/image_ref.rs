//! Input image references: local file paths or inline `data:` URIs

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use kiln_core::{KilnError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// An image supplied to a backend, either on disk or inline-encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ImageRef {
    Path(PathBuf),
    Inline(String),
}

impl ImageRef {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.starts_with("data:") {
            ImageRef::Inline(trimmed.to_string())
        } else {
            ImageRef::Path(PathBuf::from(trimmed))
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            ImageRef::Path(p) => Some(p),
            ImageRef::Inline(_) => None,
        }
    }

    /// Load the raw bytes and MIME type
    pub fn load(&self) -> Result<(Vec<u8>, String)> {
        match self {
            ImageRef::Path(path) => {
                let bytes = std::fs::read(path).map_err(|e| {
                    KilnError::ValidationError(format!(
                        "cannot read input image {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Ok((bytes, mime_for_path(path).to_string()))
            }
            ImageRef::Inline(uri) => decode_data_uri(uri),
        }
    }

    /// Render as a `data:` URI suitable for JSON request bodies
    pub fn to_data_uri(&self) -> Result<String> {
        match self {
            ImageRef::Inline(uri) => Ok(uri.clone()),
            ImageRef::Path(_) => {
                let (bytes, mime) = self.load()?;
                Ok(encode_data_uri(&bytes, &mime))
            }
        }
    }
}

impl From<String> for ImageRef {
    fn from(raw: String) -> Self {
        ImageRef::parse(&raw)
    }
}

impl From<ImageRef> for String {
    fn from(image: ImageRef) -> Self {
        match image {
            ImageRef::Path(p) => p.to_string_lossy().to_string(),
            ImageRef::Inline(uri) => uri,
        }
    }
}

impl From<PathBuf> for ImageRef {
    fn from(path: PathBuf) -> Self {
        ImageRef::Path(path)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageRef::Path(p) => write!(f, "{}", p.display()),
            // Inline payloads can be megabytes; show only the header
            ImageRef::Inline(uri) => {
                let header = uri.split(',').next().unwrap_or("data:");
                write!(f, "{},<{} bytes>", header, uri.len())
            }
        }
    }
}

pub fn encode_data_uri(bytes: &[u8], mime: &str) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

pub fn decode_data_uri(uri: &str) -> Result<(Vec<u8>, String)> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| KilnError::ValidationError("not a data URI".to_string()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| KilnError::ValidationError("data URI has no payload".to_string()))?;
    let mime = header.strip_suffix(";base64").ok_or_else(|| {
        KilnError::ValidationError("only base64 data URIs are supported".to_string())
    })?;
    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| KilnError::ValidationError(format!("invalid base64 image data: {}", e)))?;
    let mime = if mime.is_empty() { "image/png" } else { mime };
    Ok((bytes, mime.to_string()))
}

pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "image/png",
    }
}
