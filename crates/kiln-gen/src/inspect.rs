//! Mesh artifact inspection for result metadata

use crate::model::MeshFormat;
use gltf::mesh::Mode;
use serde::{Deserialize, Serialize};

/// Summary of a generated mesh file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertex_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_count: Option<u64>,
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_textures: Option<bool>,
    /// `sha256:<hex>` of the file contents
    pub content_hash: String,
}

/// Inspect downloaded mesh bytes.
///
/// Counts are best-effort: an artifact the parser rejects still yields size
/// and hash, with the counts left empty.
pub fn inspect_mesh(bytes: &[u8], format: MeshFormat) -> MeshMetadata {
    let (vertex_count, face_count, has_textures) = match format {
        MeshFormat::Glb => glb_counts(bytes),
        MeshFormat::Obj => obj_counts(bytes),
    };

    MeshMetadata {
        vertex_count,
        face_count,
        file_size: bytes.len() as u64,
        has_textures,
        content_hash: kiln_core::sha256_prefixed(bytes),
    }
}

fn glb_counts(bytes: &[u8]) -> (Option<u64>, Option<u64>, Option<bool>) {
    let gltf = match gltf::Gltf::from_slice(bytes) {
        Ok(gltf) => gltf,
        Err(e) => {
            tracing::warn!(error = %e, "could not parse GLB for metadata");
            return (None, None, None);
        }
    };

    let mut vertices = 0u64;
    let mut faces = 0u64;
    for mesh in gltf.document.meshes() {
        for primitive in mesh.primitives() {
            let positions = primitive
                .get(&gltf::Semantic::Positions)
                .map(|a| a.count() as u64)
                .unwrap_or(0);
            vertices += positions;

            if primitive.mode() == Mode::Triangles {
                let corners = primitive
                    .indices()
                    .map(|a| a.count() as u64)
                    .unwrap_or(positions);
                faces += corners / 3;
            }
        }
    }

    let has_textures = gltf.document.textures().len() > 0;
    (Some(vertices), Some(faces), Some(has_textures))
}

fn obj_counts(bytes: &[u8]) -> (Option<u64>, Option<u64>, Option<bool>) {
    let text = String::from_utf8_lossy(bytes);
    let mut vertices = 0u64;
    let mut faces = 0u64;
    let mut textured = false;
    for line in text.lines() {
        let line = line.trim_start();
        if line.starts_with("v ") {
            vertices += 1;
        } else if line.starts_with("f ") {
            faces += 1;
        } else if line.starts_with("mtllib ") || line.starts_with("vt ") {
            textured = true;
        }
    }
    (Some(vertices), Some(faces), Some(textured))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::{minimal_glb, minimal_obj};

    #[test]
    fn test_inspect_minimal_glb() {
        let glb = minimal_glb().unwrap();
        let meta = inspect_mesh(&glb, MeshFormat::Glb);
        assert_eq!(meta.vertex_count, Some(3));
        assert_eq!(meta.face_count, Some(1));
        assert_eq!(meta.has_textures, Some(false));
        assert_eq!(meta.file_size, glb.len() as u64);
        assert!(meta.content_hash.starts_with("sha256:"));
    }

    #[test]
    fn test_inspect_obj() {
        let meta = inspect_mesh(&minimal_obj(), MeshFormat::Obj);
        assert_eq!(meta.vertex_count, Some(3));
        assert_eq!(meta.face_count, Some(1));
    }

    #[test]
    fn test_unparseable_glb_keeps_size_and_hash() {
        let meta = inspect_mesh(b"not a glb", MeshFormat::Glb);
        assert_eq!(meta.vertex_count, None);
        assert_eq!(meta.file_size, 9);
        assert_eq!(meta.content_hash, kiln_core::sha256_prefixed(b"not a glb"));
    }

    #[test]
    fn test_metadata_serializes_camel_case() {
        let meta = inspect_mesh(&minimal_glb().unwrap(), MeshFormat::Glb);
        let json = serde_json::to_value(&meta).unwrap();
        assert!(json.get("vertexCount").is_some());
        assert!(json.get("contentHash").is_some());
    }
}
