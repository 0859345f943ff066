//! Reference image synthesis
//!
//! The front view anchors identity and is generated first from the prompt
//! alone. Every later view is conditioned on all views that succeeded so
//! far. A failed view is logged and skipped; the caller decides whether a
//! partial set is good enough.

use crate::model::{ImageProvider, View};
use crate::provider::{ImageBackend, ImageRequest};
use kiln_core::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const REFERENCE_SIZE: &str = "1024x1024";
pub const REFERENCE_QUALITY: &str = "high";

/// One successfully generated reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceImage {
    pub view: View,
    pub path: PathBuf,
}

/// Front first, the rest in requested order, duplicates dropped
pub fn generation_order(views: &[View]) -> Vec<View> {
    let mut ordered = Vec::with_capacity(views.len());
    if views.contains(&View::Front) {
        ordered.push(View::Front);
    }
    for view in views {
        if !ordered.contains(view) {
            ordered.push(*view);
        }
    }
    ordered
}

/// `<dir>/<stem>_ref_<view>.png` next to the requested mesh output
pub fn reference_path(output_path: &Path, view: View) -> PathBuf {
    let stem = output_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("model");
    let name = format!("{}_ref_{}.png", stem, view);
    match output_path.parent() {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

fn view_description(view: View) -> &'static str {
    match view {
        View::Front => "seen straight on from the front",
        View::Back => "seen directly from behind",
        View::Left => "seen from its left side in exact profile",
        View::Right => "seen from its right side in exact profile",
        View::Top => "seen from directly above",
        View::Bottom => "seen from directly below",
    }
}

/// Prompt for the first view of a set, generated without conditioning
pub fn anchor_prompt(prompt: &str, view: View) -> String {
    format!(
        "{}. Reference sheet for 3D modeling: the complete object {}, centered on a plain \
         white background, orthographic camera, even studio lighting, no cast shadows, \
         no text or labels.",
        prompt.trim_end_matches('.'),
        view_description(view)
    )
}

/// Prompt for a view conditioned on earlier references
pub fn consistency_prompt(prompt: &str, view: View) -> String {
    format!(
        "The same object as in the provided reference image(s): {}. Show it {}. Keep it \
         exactly consistent with the references: identical shape, proportions, colors, \
         materials and surface details. Plain white background, orthographic camera, even \
         studio lighting, no text or labels.",
        prompt.trim_end_matches('.'),
        view_description(view)
    )
}

/// Generate reference images for `views` and return those that succeeded,
/// in generation order.
///
/// Only failure to prepare the output directory is an error; individual
/// view failures shrink the returned set instead.
pub async fn generate_references(
    backend: &dyn ImageBackend,
    provider: ImageProvider,
    prompt: &str,
    output_path: &Path,
    views: &[View],
) -> Result<Vec<ReferenceImage>> {
    if let Some(dir) = output_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir).await?;
    }

    let order = generation_order(views);
    let requested = order.len();
    let mut produced: Vec<ReferenceImage> = Vec::with_capacity(order.len());

    for view in order {
        let conditioning: Vec<PathBuf> = produced.iter().map(|r| r.path.clone()).collect();
        let text = if conditioning.is_empty() {
            anchor_prompt(prompt, view)
        } else {
            consistency_prompt(prompt, view)
        };

        let request = ImageRequest {
            provider,
            prompt: text,
            input_images: conditioning,
            size: REFERENCE_SIZE.to_string(),
            quality: REFERENCE_QUALITY.to_string(),
            output_path: reference_path(output_path, view),
        };

        match backend.generate(&request).await {
            Ok(paths) => match paths.into_iter().next() {
                Some(path) => {
                    info!(%view, path = %path.display(), "reference image generated");
                    produced.push(ReferenceImage { view, path });
                }
                None => warn!(%view, %provider, "reference provider returned no image"),
            },
            Err(e) => warn!(%view, %provider, error = %e, "reference view failed, continuing"),
        }
    }

    if produced.len() < requested {
        warn!(
            requested,
            produced = produced.len(),
            "partial reference image set"
        );
    }
    Ok(produced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockImageBackend;
    use async_trait::async_trait;
    use kiln_core::KilnError;
    use std::sync::Mutex;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kiln_ref_test_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Records every request and fails the views it is told to
    struct ScriptedImages {
        fail: Vec<View>,
        seen: Mutex<Vec<ImageRequest>>,
    }

    impl ScriptedImages {
        fn new(fail: Vec<View>) -> Self {
            Self {
                fail,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ImageBackend for ScriptedImages {
        async fn generate(&self, request: &ImageRequest) -> Result<Vec<PathBuf>> {
            self.seen.lock().unwrap().push(request.clone());
            let name = request.output_path.file_name().unwrap().to_string_lossy();
            if self.fail.iter().any(|v| name.ends_with(&format!("_ref_{}.png", v))) {
                return Err(KilnError::backend("scripted", "content policy"));
            }
            Ok(vec![request.output_path.clone()])
        }
    }

    #[test]
    fn test_front_moves_first() {
        assert_eq!(
            generation_order(&[View::Top, View::Front, View::Back]),
            vec![View::Front, View::Top, View::Back]
        );
    }

    #[test]
    fn test_order_dedupes_and_keeps_missing_front_out() {
        assert_eq!(
            generation_order(&[View::Back, View::Back, View::Top]),
            vec![View::Back, View::Top]
        );
    }

    #[test]
    fn test_reference_path_naming() {
        assert_eq!(
            reference_path(Path::new("out/models/chair.glb"), View::Back),
            PathBuf::from("out/models/chair_ref_back.png")
        );
        assert_eq!(
            reference_path(Path::new("chair.glb"), View::Front),
            PathBuf::from("chair_ref_front.png")
        );
    }

    #[tokio::test]
    async fn test_each_view_conditioned_on_all_prior_successes() {
        let backend = ScriptedImages::new(vec![]);
        let out = PathBuf::from("chair.glb");
        let produced = generate_references(
            &backend,
            ImageProvider::OpenAi,
            "a wooden chair",
            &out,
            &[View::Top, View::Front, View::Back],
        )
        .await
        .unwrap();

        assert_eq!(
            produced.iter().map(|r| r.view).collect::<Vec<_>>(),
            vec![View::Front, View::Top, View::Back]
        );

        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen[0].input_images.is_empty());
        assert!(seen[0].prompt.contains("Reference sheet"));
        assert_eq!(seen[1].input_images, vec![PathBuf::from("chair_ref_front.png")]);
        assert_eq!(
            seen[2].input_images,
            vec![
                PathBuf::from("chair_ref_front.png"),
                PathBuf::from("chair_ref_top.png")
            ]
        );
        assert!(seen[2].prompt.contains("consistent"));
        assert!(seen.iter().all(|r| r.size == REFERENCE_SIZE && r.quality == REFERENCE_QUALITY));
    }

    #[tokio::test]
    async fn test_failed_view_is_skipped() {
        let backend = ScriptedImages::new(vec![View::Back]);
        let produced = generate_references(
            &backend,
            ImageProvider::Gemini,
            "a wooden chair",
            Path::new("chair.glb"),
            &[View::Front, View::Back, View::Top],
        )
        .await
        .unwrap();

        assert_eq!(
            produced.iter().map(|r| r.view).collect::<Vec<_>>(),
            vec![View::Front, View::Top]
        );
        let seen = backend.seen.lock().unwrap();
        // top is conditioned only on front since back failed
        assert_eq!(seen[2].input_images, vec![PathBuf::from("chair_ref_front.png")]);
    }

    #[tokio::test]
    async fn test_all_views_failing_returns_empty() {
        let backend = ScriptedImages::new(vec![View::Front, View::Back]);
        let produced = generate_references(
            &backend,
            ImageProvider::Flux,
            "a lamp",
            Path::new("lamp.glb"),
            &[View::Front, View::Back],
        )
        .await
        .unwrap();
        assert!(produced.is_empty());

        let seen = backend.seen.lock().unwrap();
        // back falls back to the anchor prompt with no conditioning
        assert!(seen[1].input_images.is_empty());
        assert!(seen[1].prompt.contains("Reference sheet"));
    }

    #[tokio::test]
    async fn test_mock_backend_writes_files() {
        let dir = temp_dir();
        let out = dir.join("assets").join("crate.glb");
        let produced = generate_references(
            &MockImageBackend::new(),
            ImageProvider::OpenAi,
            "a supply crate",
            &out,
            &[View::Front, View::Back],
        )
        .await
        .unwrap();

        assert_eq!(produced.len(), 2);
        assert!(dir.join("assets").join("crate_ref_front.png").exists());
        assert!(dir.join("assets").join("crate_ref_back.png").exists());

        std::fs::remove_dir_all(&dir).ok();
    }
}
