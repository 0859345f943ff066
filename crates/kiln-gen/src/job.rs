//! Asynchronous generation jobs
//!
//! [`JobRunner::start_async_generation`] validates the options, writes a
//! `pending` status record and returns immediately; the pipeline runs on a
//! spawned task and reports progress through the job's status sink:
//!
//! | progress | stage                                        |
//! |----------|----------------------------------------------|
//! | 5        | validate inputs against the filesystem       |
//! | 10       | inspect supplied images                      |
//! | 20       | generate reference images (when needed)      |
//! | 30       | resolve the final variant                    |
//! | 40       | dispatch to the backend                      |
//! | 90       | attach reference metadata                    |
//! | 100      | completed                                    |
//!
//! Any stage error ends the job as `failed` with progress 0. Auto-generated
//! references are removed on every exit path when cleanup is enabled.

use crate::dispatch::{AutoReferences, Dispatcher, GenerationResult};
use crate::image_ref::ImageRef;
use crate::options::{
    resolve, select_variant, GenerationOptions, GenerationRequest, ResolveDefaults,
};
use crate::provider::ImageBackend;
use crate::reference::generate_references;
use crate::status::{FileStatusStore, JobStatusRecord, JobStatusSink, StatusUpdate};
use kiln_core::{KilnError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Handle to a running job.
///
/// Dropping the handle detaches the job; it keeps running and keeps
/// updating its status record.
#[derive(Debug)]
pub struct JobHandle {
    id: String,
    status_location: String,
    task: JoinHandle<()>,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Where the status record lives (the status file path for file stores)
    pub fn status_location(&self) -> &str {
        &self.status_location
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Abort the job; the cleanup guard still removes generated references
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Wait for the job to reach a terminal state
    pub async fn wait(self) -> Result<()> {
        let id = self.id;
        self.task.await.map_err(|e| {
            KilnError::IoError(std::io::Error::other(format!(
                "job {} panicked or was aborted: {}",
                id, e
            )))
        })
    }
}

/// Runs generation jobs against a fixed set of backends
pub struct JobRunner {
    dispatcher: Dispatcher,
    images: Arc<dyn ImageBackend>,
    defaults: ResolveDefaults,
}

impl JobRunner {
    pub fn new(
        dispatcher: Dispatcher,
        images: Arc<dyn ImageBackend>,
        defaults: ResolveDefaults,
    ) -> Self {
        Self {
            dispatcher,
            images,
            defaults,
        }
    }

    pub fn defaults(&self) -> ResolveDefaults {
        self.defaults
    }

    pub fn images(&self) -> Arc<dyn ImageBackend> {
        self.images.clone()
    }

    /// Start a job that reports to a JSON status file
    pub async fn start_async_generation(
        self: &Arc<Self>,
        options: &GenerationOptions,
        status_path: impl AsRef<Path>,
    ) -> Result<JobHandle> {
        let sink = Arc::new(FileStatusStore::new(status_path));
        self.start_with_sink(options, sink).await
    }

    /// Start a job that reports to an arbitrary status sink.
    ///
    /// Option errors are returned here, before any record is written or any
    /// task is spawned.
    pub async fn start_with_sink(
        self: &Arc<Self>,
        options: &GenerationOptions,
        sink: Arc<dyn JobStatusSink>,
    ) -> Result<JobHandle> {
        let request = resolve(options, &self.defaults)?;

        let id = uuid::Uuid::new_v4().to_string();
        let record = JobStatusRecord::pending(&id, "Job queued");
        sink.create(&record).await?;
        note(
            sink.as_ref(),
            &format!("Job {} created for model {}", id, request.model),
        )
        .await;
        info!(job = %id, model = %request.model, status = %sink.location(), "job started");

        let runner = Arc::clone(self);
        let status_location = sink.location();
        let job_id = id.clone();
        let task = tokio::spawn(async move {
            runner.run(job_id, request, sink).await;
        });

        Ok(JobHandle {
            id,
            status_location,
            task,
        })
    }

    async fn run(&self, id: String, request: GenerationRequest, sink: Arc<dyn JobStatusSink>) {
        let mut cleanup = ReferenceCleanup::new(request.cleanup_references);
        let outcome = self.run_stages(&request, sink.as_ref(), &mut cleanup).await;

        for line in cleanup.release_async().await {
            note(sink.as_ref(), &line).await;
        }

        match outcome {
            Ok(result) => {
                info!(job = %id, path = %request.output_path.display(), "job completed");
                checkpoint(sink.as_ref(), StatusUpdate::completed(result)).await;
                note(sink.as_ref(), "Generation completed").await;
            }
            Err(e) => {
                let description = e.to_string();
                warn!(job = %id, error = %description, "job failed");
                checkpoint(sink.as_ref(), StatusUpdate::failed(description.clone())).await;
                note(sink.as_ref(), &format!("Generation failed: {}", description)).await;
            }
        }
    }

    async fn run_stages(
        &self,
        request: &GenerationRequest,
        sink: &dyn JobStatusSink,
        cleanup: &mut ReferenceCleanup,
    ) -> Result<GenerationResult> {
        stage(sink, 5, "Validating generation options").await;
        check_input_files(request).await?;

        stage(
            sink,
            10,
            &format!("Checking {} input image(s)", request.input_images.len()),
        )
        .await;

        let mut images = request.input_images.clone();
        let mut image_views = Vec::new();
        let mut auto_references = None;

        if images.is_empty() {
            if !request.wants_references() {
                return Err(KilnError::ValidationError(
                    "no input images supplied and reference auto-generation is disabled".to_string(),
                ));
            }

            let views = request.planned_reference_views();
            let provider = request.reference_provider;
            stage(
                sink,
                20,
                &format!(
                    "Generating {} reference image(s) via {}",
                    views.len(),
                    provider
                ),
            )
            .await;

            let prompt = request.prompt.as_deref().unwrap_or_default();
            let produced = generate_references(
                self.images.as_ref(),
                provider,
                prompt,
                &request.output_path,
                &views,
            )
            .await?;
            cleanup.track(produced.iter().map(|r| r.path.clone()));

            if produced.is_empty() {
                return Err(KilnError::backend(
                    provider.as_str(),
                    "no reference images could be generated",
                ));
            }
            if produced.len() < views.len() {
                note(
                    sink,
                    &format!(
                        "Only {} of {} reference views succeeded",
                        produced.len(),
                        views.len()
                    ),
                )
                .await;
            }

            images = produced.iter().map(|r| ImageRef::Path(r.path.clone())).collect();
            image_views = produced.iter().map(|r| r.view).collect();
            auto_references = Some(AutoReferences {
                paths: produced.iter().map(|r| r.path.clone()).collect(),
                views: produced.iter().map(|r| r.view).collect(),
                provider,
                requested: views.len(),
            });
        }

        let variant = match request.variant {
            Some(variant) => variant,
            None => select_variant(request.model, images.len(), request.prefer_fast),
        };
        stage(
            sink,
            30,
            &format!("Using {} variant '{}'", request.model, variant),
        )
        .await;

        let effective = GenerationRequest {
            input_images: images,
            ..request.clone()
        };
        stage(
            sink,
            40,
            &format!("Dispatching to {} backend", request.model.provider()),
        )
        .await;
        let mut result = self
            .dispatcher
            .dispatch_with_views(&effective, variant, &image_views)
            .await?;

        stage(sink, 90, "Finalizing result").await;
        result.auto_generated_references = auto_references;
        Ok(result)
    }
}

async fn check_input_files(request: &GenerationRequest) -> Result<()> {
    for image in &request.input_images {
        if let Some(path) = image.as_path() {
            let is_file = tokio::fs::metadata(path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false);
            if !is_file {
                return Err(KilnError::ValidationError(format!(
                    "input image not found: {}",
                    path.display()
                )));
            }
        }
    }
    Ok(())
}

/// Record a processing checkpoint plus a matching log line
async fn stage(sink: &dyn JobStatusSink, progress: u8, message: &str) {
    info!(progress, "{}", message);
    checkpoint(sink, StatusUpdate::stage(progress, message)).await;
    note(sink, message).await;
}

async fn checkpoint(sink: &dyn JobStatusSink, update: StatusUpdate) {
    if let Err(e) = sink.update(update).await {
        error!(status = %sink.location(), error = %e, "failed to write status update");
    }
}

async fn note(sink: &dyn JobStatusSink, text: &str) {
    if let Err(e) = sink.append_log(text).await {
        error!(status = %sink.location(), error = %e, "failed to append status log");
    }
}

/// Deletes auto-generated references when released or dropped
struct ReferenceCleanup {
    enabled: bool,
    paths: Vec<PathBuf>,
}

impl ReferenceCleanup {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            paths: Vec::new(),
        }
    }

    fn track(&mut self, paths: impl IntoIterator<Item = PathBuf>) {
        self.paths.extend(paths);
    }

    /// Remove tracked files without blocking the runtime, returning log lines
    async fn release_async(&mut self) -> Vec<String> {
        let paths = std::mem::take(&mut self.paths);
        if paths.is_empty() {
            return Vec::new();
        }
        if !self.enabled {
            return vec![format!("Keeping {} reference image(s)", paths.len())];
        }

        let mut lines = Vec::with_capacity(paths.len());
        for path in paths {
            lines.push(removal_line(&path, tokio::fs::remove_file(&path).await));
        }
        lines
    }

    /// Synchronous removal for the drop path
    fn release(&mut self) -> Vec<String> {
        let paths = std::mem::take(&mut self.paths);
        if paths.is_empty() {
            return Vec::new();
        }
        if !self.enabled {
            return vec![format!("Keeping {} reference image(s)", paths.len())];
        }

        paths
            .into_iter()
            .map(|path| removal_line(&path, std::fs::remove_file(&path)))
            .collect()
    }
}

fn removal_line(path: &Path, outcome: std::io::Result<()>) -> String {
    match outcome {
        Ok(()) => format!("Removed reference image {}", path.display()),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to remove reference image");
            format!("Could not remove reference image {}: {}", path.display(), e)
        }
    }
}

impl Drop for ReferenceCleanup {
    fn drop(&mut self) {
        self.release();
    }
}
