//! Kiln Gen - asynchronous 3D asset generation gateway
//!
//! Resolves generation options against a static model table, optionally
//! synthesizes reference images (OpenAI, Gemini, Flux), dispatches to mesh
//! backends (fal.ai, Meshy) and tracks each job in a pollable JSON status
//! record.

pub mod config;
pub mod dispatch;
pub mod image_ref;
pub mod inspect;
pub mod job;
pub mod model;
pub mod options;
pub mod provider;
pub mod providers;
pub mod reference;
pub mod status;

pub use config::KilnConfig;
pub use dispatch::{AutoReferences, Dispatcher, GenerationResult, PollPolicy};
pub use image_ref::ImageRef;
pub use inspect::MeshMetadata;
pub use job::{JobHandle, JobRunner};
pub use model::{ImageProvider, MeshFormat, MeshModel, MeshProvider, Variant, View};
pub use options::{
    best_variant, resolve, select_variant, GenerationOptions, GenerationRequest, ResolveDefaults,
};
pub use provider::{ImageBackend, ImageRequest, MeshBackend};
pub use providers::{ImageBackends, MeshBackends};
pub use reference::{generate_references, ReferenceImage};
pub use status::{
    read_status, FileStatusStore, JobStatus, JobStatusRecord, JobStatusSink, MemoryStatusSink,
    StatusUpdate,
};
