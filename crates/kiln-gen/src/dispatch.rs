//! Backend dispatch: routing, polling and result normalization
//!
//! A static table maps (model, variant) to a provider, an endpoint and the
//! shape the endpoint expects its images in. The [`Dispatcher`] submits the
//! call, polls when the provider answers with a task, downloads the artifact,
//! writes it to the requested path and summarizes it.

use crate::inspect::{inspect_mesh, MeshMetadata};
use crate::model::{ImageProvider, MeshFormat, MeshModel, MeshProvider, Variant, View};
use crate::options::GenerationRequest;
use crate::provider::*;
use crate::providers::MeshBackends;
use kiln_core::{KilnError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const HUNYUAN_VIEWS: &[(View, &str)] = &[
    (View::Front, "front_image_url"),
    (View::Back, "back_image_url"),
    (View::Left, "left_image_url"),
];

/// Where a (model, variant) pair is served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub provider: MeshProvider,
    pub endpoint: &'static str,
    pub input: InputShape,
}

const fn fal(endpoint: &'static str, input: InputShape) -> Route {
    Route {
        provider: MeshProvider::Fal,
        endpoint,
        input,
    }
}

const fn meshy(endpoint: &'static str, input: InputShape) -> Route {
    Route {
        provider: MeshProvider::Meshy,
        endpoint,
        input,
    }
}

static ROUTES: &[(MeshModel, Variant, Route)] = &[
    (MeshModel::Trellis, Variant::Single, fal("fal-ai/trellis", InputShape::Single("image_url"))),
    (MeshModel::Trellis, Variant::Multi, fal("fal-ai/trellis/multi", InputShape::List("image_urls"))),
    (MeshModel::Hunyuan3d, Variant::Single, fal("fal-ai/hunyuan3d/v2", InputShape::Single("input_image_url"))),
    (MeshModel::Hunyuan3d, Variant::Multi, fal("fal-ai/hunyuan3d/v2/multi-view", InputShape::PerView(HUNYUAN_VIEWS))),
    (MeshModel::Hunyuan3d, Variant::SingleFast, fal("fal-ai/hunyuan3d/v2/turbo", InputShape::Single("input_image_url"))),
    (MeshModel::Hunyuan3d, Variant::MultiFast, fal("fal-ai/hunyuan3d/v2/multi-view/turbo", InputShape::PerView(HUNYUAN_VIEWS))),
    (MeshModel::Tripo, Variant::Single, fal("tripo3d/tripo/v2.5/image-to-3d", InputShape::Single("image_url"))),
    (MeshModel::Meshy, Variant::Single, meshy("image-to-3d", InputShape::Single("image_url"))),
    (MeshModel::Meshy, Variant::Multi, meshy("multi-image-to-3d", InputShape::List("image_urls"))),
];

/// Look up the route for a model/variant pair
pub fn route(model: MeshModel, variant: Variant) -> Result<Route> {
    ROUTES
        .iter()
        .find(|(m, v, _)| *m == model && *v == variant)
        .map(|(_, _, route)| *route)
        .ok_or_else(|| {
            KilnError::ConfigurationError(format!(
                "no backend route for model '{}' variant '{}'",
                model, variant
            ))
        })
}

/// How long to wait for polled backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 120,
        }
    }
}

/// References produced on the caller's behalf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoReferences {
    pub paths: Vec<PathBuf>,
    pub views: Vec<View>,
    pub provider: ImageProvider,
    /// Number of views asked for; more than `views.len()` on partial failure
    pub requested: usize,
}

/// Normalized outcome of a successful generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub provider: String,
    /// Endpoint identifier that served the request
    pub backend: String,
    pub model: MeshModel,
    pub variant: Variant,
    pub format: MeshFormat,
    pub saved_paths: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default)]
    pub input_images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_time_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MeshMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_generated_references: Option<AutoReferences>,
}

/// Routes validated requests to mesh backends
#[derive(Clone)]
pub struct Dispatcher {
    backends: MeshBackends,
    poll: PollPolicy,
}

impl Dispatcher {
    pub fn new(backends: MeshBackends, poll: PollPolicy) -> Self {
        Self { backends, poll }
    }

    pub fn poll_policy(&self) -> PollPolicy {
        self.poll
    }

    /// Run one generation with an already-resolved variant
    pub async fn dispatch(
        &self,
        request: &GenerationRequest,
        variant: Variant,
    ) -> Result<GenerationResult> {
        self.dispatch_with_views(request, variant, &[]).await
    }

    /// Like [`Dispatcher::dispatch`], with the camera view of each input image.
    ///
    /// `views[i]` tags `request.input_images[i]`; images past the end of
    /// `views` are untagged.
    pub async fn dispatch_with_views(
        &self,
        request: &GenerationRequest,
        variant: Variant,
        views: &[View],
    ) -> Result<GenerationResult> {
        let start = Instant::now();
        let route = route(request.model, variant)?;
        let backend = self.backends.get(route.provider)?;
        let name = backend.name().to_string();

        let images = request
            .input_images
            .iter()
            .enumerate()
            .map(|(i, image)| -> Result<CallImage> {
                Ok(CallImage {
                    view: views.get(i).copied(),
                    uri: image.to_data_uri()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let call = MeshCall {
            model: request.model,
            variant,
            provider: route.provider,
            endpoint: route.endpoint,
            input: route.input,
            images,
            format: request.format,
            prompt: request.prompt.clone(),
        };
        call.check_inputs()?;

        info!(
            provider = %name,
            endpoint = route.endpoint,
            images = call.images.len(),
            "submitting mesh generation"
        );

        let artifact = match backend
            .submit(&call)
            .await
            .map_err(|e| e.into_backend(&name))?
        {
            Submission::Ready(artifact) => artifact,
            Submission::Task(task) => self.wait_for(backend.as_ref(), &task, request.format).await?,
        };

        let bytes = match artifact {
            Artifact::Bytes(bytes) => bytes,
            Artifact::Url(url) => {
                debug!(%url, "downloading mesh artifact");
                backend.fetch(&url).await.map_err(|e| e.into_backend(&name))?
            }
        };
        if bytes.is_empty() {
            return Err(KilnError::backend(&name, "downloaded artifact is empty"));
        }

        if let Some(parent) = request
            .output_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&request.output_path, &bytes).await?;

        let metadata = inspect_mesh(&bytes, request.format);
        info!(
            path = %request.output_path.display(),
            size = metadata.file_size,
            "mesh saved"
        );

        Ok(GenerationResult {
            provider: name,
            backend: route.endpoint.to_string(),
            model: request.model,
            variant,
            format: request.format,
            saved_paths: vec![request.output_path.clone()],
            prompt: request.prompt.clone(),
            input_images: request.input_images.iter().map(|i| i.to_string()).collect(),
            generation_time_secs: Some(start.elapsed().as_secs_f64()),
            metadata: Some(metadata),
            auto_generated_references: None,
        })
    }

    async fn wait_for(
        &self,
        backend: &dyn MeshBackend,
        task: &TaskRef,
        format: MeshFormat,
    ) -> Result<Artifact> {
        let name = backend.name().to_string();
        info!(provider = %name, task = %task.id, "waiting for remote task");

        for attempt in 1..=self.poll.max_attempts {
            tokio::time::sleep(self.poll.interval).await;

            match backend
                .poll(task, format)
                .await
                .map_err(|e| e.into_backend(&name))?
            {
                TaskPoll::Pending { status, progress } => {
                    debug!(task = %task.id, attempt, %status, progress, "task still running");
                }
                TaskPoll::Succeeded(artifact) => return Ok(artifact),
                TaskPoll::Failed(msg) => {
                    return Err(KilnError::backend(
                        &name,
                        format!("task {} failed: {}", task.id, msg),
                    ))
                }
            }
        }

        Err(KilnError::TimeoutError(format!(
            "{} task {} did not finish after {} poll attempts",
            name, task.id, self.poll.max_attempts
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_ref::ImageRef;
    use crate::providers::mock::{minimal_glb, MockMeshBackend};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::sync::Mutex;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kiln_dispatch_test_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn fast_poll(max_attempts: u32) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            max_attempts,
        }
    }

    fn request(dir: &std::path::Path, model: MeshModel, images: usize) -> GenerationRequest {
        GenerationRequest {
            prompt: None,
            input_images: (0..images)
                .map(|i| ImageRef::Inline(format!("data:image/png;base64,AA{}=", i)))
                .collect(),
            output_path: dir.join("out").join("model.glb"),
            model,
            variant: None,
            format: MeshFormat::Glb,
            auto_generate_references: true,
            reference_views: View::DEFAULT_REFERENCE_VIEWS.to_vec(),
            cleanup_references: true,
            reference_provider: ImageProvider::OpenAi,
            prefer_fast: false,
        }
    }

    /// Polled backend that stays pending for a fixed number of polls
    struct Polled {
        pending_polls: u32,
        polls: AtomicU32,
        fail_with: Option<String>,
        calls: Mutex<Vec<MeshCall>>,
    }

    impl Polled {
        fn new(pending_polls: u32, fail_with: Option<&str>) -> Self {
            Self {
                pending_polls,
                polls: AtomicU32::new(0),
                fail_with: fail_with.map(|s| s.to_string()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MeshBackend for Polled {
        fn name(&self) -> &str {
            "meshy"
        }

        async fn submit(&self, call: &MeshCall) -> Result<Submission> {
            self.calls.lock().unwrap().push(call.clone());
            Ok(Submission::Task(TaskRef {
                endpoint: call.endpoint.to_string(),
                id: "task-1".to_string(),
            }))
        }

        async fn poll(&self, _task: &TaskRef, _format: MeshFormat) -> Result<TaskPoll> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.pending_polls {
                return Ok(TaskPoll::Pending {
                    status: "IN_PROGRESS".to_string(),
                    progress: 50,
                });
            }
            Ok(match &self.fail_with {
                Some(msg) => TaskPoll::Failed(msg.clone()),
                None => TaskPoll::Succeeded(Artifact::Url("https://assets/m.glb".to_string())),
            })
        }

        async fn fetch(&self, _url: &str) -> Result<Vec<u8>> {
            minimal_glb()
        }
    }

    struct Failing;

    #[async_trait]
    impl MeshBackend for Failing {
        fn name(&self) -> &str {
            "fal"
        }

        async fn submit(&self, _call: &MeshCall) -> Result<Submission> {
            Err(KilnError::IoError(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            )))
        }

        async fn poll(&self, _task: &TaskRef, _format: MeshFormat) -> Result<TaskPoll> {
            unreachable!()
        }

        async fn fetch(&self, _url: &str) -> Result<Vec<u8>> {
            unreachable!()
        }
    }

    struct NoUrl;

    #[async_trait]
    impl MeshBackend for NoUrl {
        fn name(&self) -> &str {
            "fal"
        }

        async fn submit(&self, _call: &MeshCall) -> Result<Submission> {
            Ok(Submission::Ready(Artifact::Url(String::new())))
        }

        async fn poll(&self, _task: &TaskRef, _format: MeshFormat) -> Result<TaskPoll> {
            unreachable!()
        }

        async fn fetch(&self, _url: &str) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_every_permitted_pair_has_a_route() {
        for model in MeshModel::ALL {
            for variant in model.spec().variants {
                let route = route(model, *variant).unwrap();
                assert_eq!(route.provider, model.provider());
            }
        }
    }

    #[test]
    fn test_unsupported_pair_has_no_route() {
        let err = route(MeshModel::Tripo, Variant::Multi).unwrap_err();
        assert!(matches!(err, KilnError::ConfigurationError(_)));
    }

    #[test]
    fn test_multi_routes_take_several_images() {
        let route = route(MeshModel::Hunyuan3d, Variant::Multi).unwrap();
        assert_eq!(
            route.input.required_views(),
            Some(vec![View::Front, View::Back, View::Left])
        );
        let route = super::route(MeshModel::Trellis, Variant::Multi).unwrap();
        assert_eq!(route.input, InputShape::List("image_urls"));
    }

    #[tokio::test]
    async fn test_ready_artifact_is_written_and_inspected() {
        let dir = temp_dir();
        let backends = MeshBackends::new().with(MeshProvider::Fal, Arc::new(MockMeshBackend::new()));
        let dispatcher = Dispatcher::new(backends, fast_poll(3));

        let result = dispatcher
            .dispatch(&request(&dir, MeshModel::Trellis, 1), Variant::Single)
            .await
            .unwrap();

        assert_eq!(result.provider, "mock");
        assert_eq!(result.backend, "fal-ai/trellis");
        assert_eq!(result.variant, Variant::Single);
        assert_eq!(result.saved_paths, vec![dir.join("out").join("model.glb")]);
        assert!(result.saved_paths[0].exists());
        let meta = result.metadata.unwrap();
        assert_eq!(meta.vertex_count, Some(3));
        assert!(result.generation_time_secs.is_some());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_polled_task_succeeds_after_pending() {
        let dir = temp_dir();
        let backend = Arc::new(Polled::new(2, None));
        let backends = MeshBackends::new().with(MeshProvider::Meshy, backend.clone());
        let dispatcher = Dispatcher::new(backends, fast_poll(5));

        let result = dispatcher
            .dispatch(&request(&dir, MeshModel::Meshy, 2), Variant::Multi)
            .await
            .unwrap();

        assert_eq!(backend.polls.load(Ordering::SeqCst), 3);
        assert_eq!(result.backend, "multi-image-to-3d");
        let calls = backend.calls.lock().unwrap();
        assert_eq!(calls[0].images.len(), 2);
        assert_eq!(calls[0].input, InputShape::List("image_urls"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_per_view_route_rejects_missing_views() {
        let dir = temp_dir();
        let backend = Arc::new(Polled::new(0, None));
        let backends = MeshBackends::new().with(MeshProvider::Fal, backend.clone());
        let dispatcher = Dispatcher::new(backends, fast_poll(1));

        let request = request(&dir, MeshModel::Hunyuan3d, 3);
        let err = dispatcher
            .dispatch_with_views(&request, Variant::Multi, &[View::Front, View::Back, View::Top])
            .await
            .unwrap_err();

        assert!(matches!(err, KilnError::ConfigurationError(ref m) if m.contains("left")));
        assert!(backend.calls.lock().unwrap().is_empty());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_per_view_route_sends_tagged_views() {
        let dir = temp_dir();
        let backend = Arc::new(Polled::new(0, None));
        let backends = MeshBackends::new().with(MeshProvider::Fal, backend.clone());
        let dispatcher = Dispatcher::new(backends, fast_poll(2));

        let request = request(&dir, MeshModel::Hunyuan3d, 3);
        dispatcher
            .dispatch_with_views(&request, Variant::Multi, &[View::Front, View::Left, View::Back])
            .await
            .unwrap();

        let calls = backend.calls.lock().unwrap();
        let fields = calls[0].image_fields();
        assert_eq!(fields["front_image_url"], "data:image/png;base64,AA0=");
        assert_eq!(fields["left_image_url"], "data:image/png;base64,AA1=");
        assert_eq!(fields["back_image_url"], "data:image/png;base64,AA2=");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_poll_ceiling_is_timeout() {
        let dir = temp_dir();
        let backend = Arc::new(Polled::new(u32::MAX, None));
        let backends = MeshBackends::new().with(MeshProvider::Meshy, backend.clone());
        let dispatcher = Dispatcher::new(backends, fast_poll(4));

        let err = dispatcher
            .dispatch(&request(&dir, MeshModel::Meshy, 1), Variant::Single)
            .await
            .unwrap_err();

        assert!(matches!(err, KilnError::TimeoutError(_)));
        assert_eq!(backend.polls.load(Ordering::SeqCst), 4);
        assert!(!dir.join("out").join("model.glb").exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_task_failure_is_backend_error() {
        let dir = temp_dir();
        let backends =
            MeshBackends::new().with(MeshProvider::Meshy, Arc::new(Polled::new(0, Some("bad image"))));
        let dispatcher = Dispatcher::new(backends, fast_poll(4));

        let err = dispatcher
            .dispatch(&request(&dir, MeshModel::Meshy, 1), Variant::Single)
            .await
            .unwrap_err();

        match err {
            KilnError::BackendError { provider, detail } => {
                assert_eq!(provider, "meshy");
                assert!(detail.contains("bad image"));
            }
            other => panic!("unexpected {:?}", other),
        }

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_transport_errors_become_backend_errors() {
        let dir = temp_dir();
        let backends = MeshBackends::new().with(MeshProvider::Fal, Arc::new(Failing));
        let dispatcher = Dispatcher::new(backends, fast_poll(1));

        let err = dispatcher
            .dispatch(&request(&dir, MeshModel::Tripo, 1), Variant::Single)
            .await
            .unwrap_err();
        assert!(matches!(err, KilnError::BackendError { ref provider, .. } if provider == "fal"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_empty_artifact_is_backend_error() {
        let dir = temp_dir();
        let backends = MeshBackends::new().with(MeshProvider::Fal, Arc::new(NoUrl));
        let dispatcher = Dispatcher::new(backends, fast_poll(1));

        let err = dispatcher
            .dispatch(&request(&dir, MeshModel::Trellis, 1), Variant::Single)
            .await
            .unwrap_err();
        assert!(matches!(err, KilnError::BackendError { .. }));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_unconfigured_provider_is_backend_error() {
        let dir = temp_dir();
        let dispatcher = Dispatcher::new(MeshBackends::new(), fast_poll(1));
        let err = dispatcher
            .dispatch(&request(&dir, MeshModel::Meshy, 1), Variant::Single)
            .await
            .unwrap_err();
        assert!(matches!(err, KilnError::BackendError { ref provider, .. } if provider == "meshy"));

        std::fs::remove_dir_all(&dir).ok();
    }
}
