//! Backend adapter traits and the normalized values that cross them
//!
//! Every provider quirk (synchronous response vs task id, `model_mesh.url`
//! vs `model_urls.glb`, base64 vs download URL) stays behind these traits.

use crate::model::{ImageProvider, MeshFormat, MeshModel, MeshProvider, Variant, View};
use async_trait::async_trait;
use kiln_core::{KilnError, Result};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// How a backend endpoint expects its input images
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputShape {
    /// One image under the given key; extra images are ignored
    Single(&'static str),
    /// All images as an array under the given key
    List(&'static str),
    /// One image per camera view, each under its own key
    PerView(&'static [(View, &'static str)]),
}

impl InputShape {
    /// Views the endpoint needs one image each for, if it names them
    pub fn required_views(self) -> Option<Vec<View>> {
        match self {
            InputShape::PerView(slots) => Some(slots.iter().map(|(view, _)| *view).collect()),
            _ => None,
        }
    }
}

/// An input image as sent to a mesh backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallImage {
    /// Camera view for synthesized references; `None` for caller-supplied images
    pub view: Option<View>,
    /// The image as a `data:` URI
    pub uri: String,
}

/// A normalized mesh-generation call produced by the dispatcher
#[derive(Debug, Clone)]
pub struct MeshCall {
    pub model: MeshModel,
    pub variant: Variant,
    pub provider: MeshProvider,
    pub endpoint: &'static str,
    pub input: InputShape,
    /// Input images in conditioning order
    pub images: Vec<CallImage>,
    pub format: MeshFormat,
    pub prompt: Option<String>,
}

impl MeshCall {
    /// JSON fields carrying the input images, shaped for this endpoint
    pub fn image_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        match self.input {
            InputShape::Single(key) => {
                if let Some(first) = self.images.first() {
                    fields.insert(key.to_string(), Value::String(first.uri.clone()));
                }
            }
            InputShape::List(key) => {
                let list = self
                    .images
                    .iter()
                    .map(|image| Value::String(image.uri.clone()))
                    .collect();
                fields.insert(key.to_string(), Value::Array(list));
            }
            InputShape::PerView(slots) => {
                for ((_, key), image) in slots.iter().zip(self.assign_views(slots)) {
                    if let Some(image) = image {
                        fields.insert(key.to_string(), Value::String(image.uri.clone()));
                    }
                }
            }
        }
        fields
    }

    /// Fail when a per-view endpoint would be left without one of its views
    pub fn check_inputs(&self) -> Result<()> {
        let InputShape::PerView(slots) = self.input else {
            return Ok(());
        };
        let missing: Vec<&str> = slots
            .iter()
            .zip(self.assign_views(slots))
            .filter(|(_, image)| image.is_none())
            .map(|((view, _), _)| view.as_str())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        Err(KilnError::ConfigurationError(format!(
            "{} {} needs one image per view ({}); missing: {}",
            self.model,
            self.variant,
            slots
                .iter()
                .map(|(view, _)| view.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            missing.join(", ")
        )))
    }

    /// Match images to view slots.
    ///
    /// A tagged image only ever fills the slot of its own view. Untagged
    /// images fill the slots left over, in slot order.
    fn assign_views<'a>(&'a self, slots: &[(View, &'static str)]) -> Vec<Option<&'a CallImage>> {
        let mut assigned: Vec<Option<&CallImage>> = vec![None; slots.len()];
        for image in &self.images {
            let Some(view) = image.view else { continue };
            if let Some(index) = slots.iter().position(|(slot, _)| *slot == view) {
                if assigned[index].is_none() {
                    assigned[index] = Some(image);
                }
            }
        }

        let mut untagged = self.images.iter().filter(|image| image.view.is_none());
        for slot in assigned.iter_mut().filter(|slot| slot.is_none()) {
            *slot = untagged.next();
        }
        assigned
    }
}

/// The generated mesh: either a URL to download or inline bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    Url(String),
    Bytes(Vec<u8>),
}

/// Reference to a remote task that must be polled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRef {
    pub endpoint: String,
    pub id: String,
}

/// Outcome of submitting a mesh call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// The backend answered synchronously
    Ready(Artifact),
    /// The backend created a task that has to be polled
    Task(TaskRef),
}

/// Result of polling a remote task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskPoll {
    Pending { status: String, progress: u8 },
    Succeeded(Artifact),
    /// Terminal failure or expiry, with the provider's message
    Failed(String),
}

/// A 3D mesh generation service
#[async_trait]
pub trait MeshBackend: Send + Sync {
    /// Provider name used in logs and `BackendError`s
    fn name(&self) -> &str;

    /// Start generation
    async fn submit(&self, call: &MeshCall) -> Result<Submission>;

    /// Poll a task returned by `submit`
    async fn poll(&self, task: &TaskRef, format: MeshFormat) -> Result<TaskPoll>;

    /// Download an artifact URL
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// A text/image-to-image request for reference synthesis
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub provider: ImageProvider,
    pub prompt: String,
    /// Conditioning images, oldest first
    pub input_images: Vec<PathBuf>,
    /// Size hint, e.g. `1024x1024`
    pub size: String,
    /// Quality hint, e.g. `high`
    pub quality: String,
    /// Where the image should be saved
    pub output_path: PathBuf,
}

/// An image synthesis service
#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// Generate and save image(s), returning the saved paths
    async fn generate(&self, request: &ImageRequest) -> Result<Vec<PathBuf>>;
}
