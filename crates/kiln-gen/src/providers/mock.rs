//! Offline mock providers
//!
//! Produce a minimal single-triangle GLB (or OBJ) and solid-color PNG
//! references without any network calls. Used by `--mock` and by tests.

use crate::model::{MeshFormat, MeshProvider};
use crate::provider::*;
use async_trait::async_trait;
use kiln_core::{KilnError, Result};
use std::path::PathBuf;

const MOCK_IMAGE_SIZE: u32 = 64;

/// Mesh backend that answers instantly with placeholder geometry.
///
/// Calls routed to a polled provider (Meshy) return a task that succeeds on
/// the first poll, so the polling path is exercised offline too.
#[derive(Default)]
pub struct MockMeshBackend;

impl MockMeshBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MeshBackend for MockMeshBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn submit(&self, call: &MeshCall) -> Result<Submission> {
        if call.images.is_empty() {
            return Err(KilnError::backend("mock", "no input images"));
        }
        match call.provider {
            MeshProvider::Meshy => Ok(Submission::Task(TaskRef {
                endpoint: call.endpoint.to_string(),
                id: uuid::Uuid::new_v4().to_string(),
            })),
            MeshProvider::Fal => Ok(Submission::Ready(Artifact::Bytes(placeholder_mesh(
                call.format,
            )?))),
        }
    }

    async fn poll(&self, _task: &TaskRef, format: MeshFormat) -> Result<TaskPoll> {
        Ok(TaskPoll::Succeeded(Artifact::Bytes(placeholder_mesh(format)?)))
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        Err(KilnError::backend(
            "mock",
            format!("mock artifacts are inline; cannot fetch {}", url),
        ))
    }
}

/// Image backend writing solid-color PNGs derived from the prompt
#[derive(Default)]
pub struct MockImageBackend;

impl MockImageBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ImageBackend for MockImageBackend {
    async fn generate(&self, request: &ImageRequest) -> Result<Vec<PathBuf>> {
        if let Some(parent) = request.output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let png = solid_png(&request.prompt, MOCK_IMAGE_SIZE, MOCK_IMAGE_SIZE)?;
        tokio::fs::write(&request.output_path, png).await?;
        Ok(vec![request.output_path.clone()])
    }
}

pub fn placeholder_mesh(format: MeshFormat) -> Result<Vec<u8>> {
    match format {
        MeshFormat::Glb => minimal_glb(),
        MeshFormat::Obj => Ok(minimal_obj()),
    }
}

/// Encode a solid-color PNG whose color is derived from `seed`
pub fn solid_png(seed: &str, width: u32, height: u32) -> Result<Vec<u8>> {
    let hash_val = seed
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    let color = image::Rgba([
        ((hash_val >> 16) & 0xFF) as u8,
        ((hash_val >> 8) & 0xFF) as u8,
        (hash_val & 0xFF) as u8,
        255,
    ]);

    let img = image::RgbaImage::from_pixel(width, height, color);
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .map_err(|e| KilnError::backend("mock", format!("failed to encode PNG: {}", e)))?;
    Ok(out.into_inner())
}

/// Minimal valid glTF 2.0 binary containing one triangle
pub fn minimal_glb() -> Result<Vec<u8>> {
    let json = serde_json::json!({
        "asset": { "version": "2.0", "generator": "kiln-mock" },
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [{ "mesh": 0 }],
        "meshes": [{
            "primitives": [{
                "attributes": { "POSITION": 0 },
                "indices": 1
            }]
        }],
        "accessors": [
            {
                "bufferView": 0,
                "componentType": 5126,
                "count": 3,
                "type": "VEC3",
                "max": [1.0, 1.0, 0.0],
                "min": [-1.0, 0.0, 0.0]
            },
            {
                "bufferView": 1,
                "componentType": 5123,
                "count": 3,
                "type": "SCALAR",
                "max": [2],
                "min": [0]
            }
        ],
        "bufferViews": [
            { "buffer": 0, "byteOffset": 0, "byteLength": 36, "target": 34962 },
            { "buffer": 0, "byteOffset": 36, "byteLength": 6, "target": 34963 }
        ],
        "buffers": [{ "byteLength": 44 }]
    });

    let mut json_chunk = serde_json::to_vec(&json)?;
    json_chunk.resize((json_chunk.len() + 3) & !3, b' ');

    let vertices: [f32; 9] = [-1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
    let indices: [u16; 3] = [0, 1, 2];

    let mut bin_chunk = Vec::with_capacity(44);
    for v in &vertices {
        bin_chunk.extend_from_slice(&v.to_le_bytes());
    }
    for i in &indices {
        bin_chunk.extend_from_slice(&i.to_le_bytes());
    }
    bin_chunk.resize((bin_chunk.len() + 3) & !3, 0);

    let total_len = 12 + 8 + json_chunk.len() + 8 + bin_chunk.len();
    let mut glb = Vec::with_capacity(total_len);

    glb.extend_from_slice(b"glTF");
    glb.extend_from_slice(&2u32.to_le_bytes());
    glb.extend_from_slice(&(total_len as u32).to_le_bytes());

    glb.extend_from_slice(&(json_chunk.len() as u32).to_le_bytes());
    glb.extend_from_slice(&0x4E4F534Au32.to_le_bytes()); // "JSON"
    glb.extend_from_slice(&json_chunk);

    glb.extend_from_slice(&(bin_chunk.len() as u32).to_le_bytes());
    glb.extend_from_slice(&0x004E4942u32.to_le_bytes()); // "BIN\0"
    glb.extend_from_slice(&bin_chunk);

    Ok(glb)
}

pub fn minimal_obj() -> Vec<u8> {
    b"# kiln-mock\nv -1.0 0.0 0.0\nv 1.0 0.0 0.0\nv 0.0 1.0 0.0\nf 1 2 3\n".to_vec()
}
