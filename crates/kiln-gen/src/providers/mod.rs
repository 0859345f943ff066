//! Provider registry
//!
//! Maps mesh and image providers to concrete adapters. Providers without an
//! API key are left out; asking for one yields a `BackendError` naming the
//! key to set.

pub mod fal;
pub mod gemini;
pub mod http;
pub mod meshy;
pub mod mock;
pub mod openai;

use crate::config::KilnConfig;
use crate::model::{ImageProvider, MeshProvider};
use crate::provider::{ImageBackend, ImageRequest, MeshBackend};
use async_trait::async_trait;
use kiln_core::{KilnError, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Config section holding the credentials for an image provider
fn image_config_name(provider: ImageProvider) -> &'static str {
    match provider {
        ImageProvider::OpenAi => "openai",
        ImageProvider::Gemini => "gemini",
        ImageProvider::Flux => "fal",
    }
}

fn missing_key(config_name: &str) -> String {
    format!(
        "no API key configured; set KILN_{}_API_KEY or add [providers.{}] to .kiln/config.toml",
        config_name.to_uppercase(),
        config_name
    )
}

/// Mesh adapters by provider
#[derive(Clone, Default)]
pub struct MeshBackends {
    backends: HashMap<MeshProvider, Arc<dyn MeshBackend>>,
}

impl MeshBackends {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: MeshProvider, backend: Arc<dyn MeshBackend>) -> Self {
        self.backends.insert(provider, backend);
        self
    }

    pub fn get(&self, provider: MeshProvider) -> Result<Arc<dyn MeshBackend>> {
        self.backends
            .get(&provider)
            .cloned()
            .ok_or_else(|| KilnError::backend(provider.as_str(), missing_key(provider.as_str())))
    }

    /// Real adapters for every provider that has a key
    pub fn from_config(config: &KilnConfig) -> Self {
        let mut backends = Self::new();
        if let Some(key) = config.api_key("fal") {
            backends = backends.with(
                MeshProvider::Fal,
                Arc::new(fal::FalMeshBackend::new(key, config.api_url("fal"))),
            );
        }
        if let Some(key) = config.api_key("meshy") {
            backends = backends.with(
                MeshProvider::Meshy,
                Arc::new(meshy::MeshyBackend::new(key, config.api_url("meshy"))),
            );
        }
        tracing::debug!(configured = backends.backends.len(), "mesh backends loaded");
        backends
    }

    /// The offline mock serving every provider
    pub fn mock() -> Self {
        let backend: Arc<dyn MeshBackend> = Arc::new(mock::MockMeshBackend::new());
        Self::new()
            .with(MeshProvider::Fal, backend.clone())
            .with(MeshProvider::Meshy, backend)
    }
}

/// Image adapters by provider; routes each request by its provider tag
#[derive(Clone, Default)]
pub struct ImageBackends {
    backends: HashMap<ImageProvider, Arc<dyn ImageBackend>>,
}

impl ImageBackends {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: ImageProvider, backend: Arc<dyn ImageBackend>) -> Self {
        self.backends.insert(provider, backend);
        self
    }

    pub fn from_config(config: &KilnConfig) -> Self {
        let mut backends = Self::new();
        if let Some(key) = config.api_key("openai") {
            backends = backends.with(
                ImageProvider::OpenAi,
                Arc::new(openai::OpenAiImageBackend::new(key, config.api_url("openai"))),
            );
        }
        if let Some(key) = config.api_key("gemini") {
            backends = backends.with(
                ImageProvider::Gemini,
                Arc::new(gemini::GeminiImageBackend::new(key, config.api_url("gemini"))),
            );
        }
        if let Some(key) = config.api_key("fal") {
            backends = backends.with(
                ImageProvider::Flux,
                Arc::new(fal::FluxImageBackend::new(key, config.api_url("fal"))),
            );
        }
        tracing::debug!(configured = backends.backends.len(), "image backends loaded");
        backends
    }

    pub fn mock() -> Self {
        let backend: Arc<dyn ImageBackend> = Arc::new(mock::MockImageBackend::new());
        ImageProvider::ALL
            .iter()
            .fold(Self::new(), |acc, p| acc.with(*p, backend.clone()))
    }
}

#[async_trait]
impl ImageBackend for ImageBackends {
    async fn generate(&self, request: &ImageRequest) -> Result<Vec<PathBuf>> {
        let backend = self.backends.get(&request.provider).ok_or_else(|| {
            KilnError::backend(
                request.provider.as_str(),
                missing_key(image_config_name(request.provider)),
            )
        })?;
        backend.generate(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(keys: &[(&str, &str)]) -> KilnConfig {
        let mut providers = HashMap::new();
        for (name, key) in keys {
            providers.insert(
                name.to_string(),
                crate::config::ProviderConfig {
                    api_key: Some(key.to_string()),
                    api_url: None,
                    enabled: true,
                },
            );
        }
        KilnConfig {
            providers,
            generation: Default::default(),
        }
    }

    #[test]
    fn test_only_configured_mesh_providers_load() {
        let backends = MeshBackends::from_config(&config_with(&[("fal", "k")]));
        assert!(backends.get(MeshProvider::Fal).is_ok());
        let err = backends.get(MeshProvider::Meshy).err().unwrap();
        assert!(err.to_string().contains("KILN_MESHY_API_KEY"));
    }

    #[test]
    fn test_fal_key_enables_flux_images() {
        let backends = ImageBackends::from_config(&config_with(&[("fal", "k")]));
        assert!(backends.backends.contains_key(&ImageProvider::Flux));
        assert!(!backends.backends.contains_key(&ImageProvider::OpenAi));
    }

    #[tokio::test]
    async fn test_unconfigured_image_provider_is_backend_error() {
        let request = ImageRequest {
            provider: ImageProvider::Gemini,
            prompt: "a mug".to_string(),
            input_images: vec![],
            size: "1024x1024".to_string(),
            quality: "high".to_string(),
            output_path: PathBuf::from("mug_ref_front.png"),
        };
        let err = ImageBackends::new().generate(&request).await.unwrap_err();
        match err {
            KilnError::BackendError { provider, detail } => {
                assert_eq!(provider, "gemini");
                assert!(detail.contains("KILN_GEMINI_API_KEY"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_mock_covers_every_provider() {
        let mesh = MeshBackends::mock();
        assert!(mesh.get(MeshProvider::Fal).is_ok());
        assert!(mesh.get(MeshProvider::Meshy).is_ok());
        let images = ImageBackends::mock();
        assert_eq!(images.backends.len(), ImageProvider::ALL.len());
    }
}
