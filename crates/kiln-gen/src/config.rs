//! Layered configuration system
//!
//! Config is loaded with three layers of precedence (highest wins):
//! 1. Environment variables: `KILN_{PROVIDER}_API_KEY`, then the providers'
//!    conventional variables (`OPENAI_API_KEY`, `GEMINI_API_KEY`, `FAL_KEY`,
//!    `MESHY_API_KEY`) for keys no other layer supplied
//! 2. Project-local: `.kiln/config.toml`
//! 3. Global: `~/.kiln/config.toml`

use crate::dispatch::PollPolicy;
use crate::options::ResolveDefaults;
use kiln_core::{KilnError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Provider names understood by the config file
pub const PROVIDER_NAMES: [&str; 4] = ["fal", "meshy", "openai", "gemini"];

/// Provider-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

// Entries created from environment variables alone must start enabled
impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: None,
            enabled: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Generation defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_reference_provider")]
    pub reference_provider: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default = "default_jobs_dir")]
    pub jobs_dir: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            reference_provider: default_reference_provider(),
            output_dir: default_output_dir(),
            jobs_dir: default_jobs_dir(),
            poll_interval_secs: default_poll_interval_secs(),
            max_poll_attempts: default_max_poll_attempts(),
        }
    }
}

fn default_model() -> String {
    "trellis".to_string()
}
fn default_reference_provider() -> String {
    "openai".to_string()
}
fn default_output_dir() -> String {
    ".kiln/generated".to_string()
}
fn default_jobs_dir() -> String {
    ".kiln/jobs".to_string()
}
fn default_poll_interval_secs() -> u64 {
    5
}
fn default_max_poll_attempts() -> u32 {
    120
}

/// Top-level config file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KilnConfigFile {
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub generation: GenerationConfig,
}

/// Resolved configuration with environment variable overrides applied
#[derive(Debug, Clone, Default)]
pub struct KilnConfig {
    pub providers: HashMap<String, ProviderConfig>,
    pub generation: GenerationConfig,
}

impl KilnConfig {
    /// Load config with layered precedence: global < project < env vars
    pub fn load() -> Result<Self> {
        let mut config = KilnConfigFile::default();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                let global = Self::load_file(&global_path)?;
                Self::merge_into(&mut config, global);
            }
        }

        let local_path = PathBuf::from(".kiln/config.toml");
        if local_path.exists() {
            let local = Self::load_file(&local_path)?;
            Self::merge_into(&mut config, local);
        }

        Self::apply_env_overrides(&mut config);

        Ok(KilnConfig {
            providers: config.providers,
            generation: config.generation,
        })
    }

    /// Load config from a specific file path only (for testing)
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let mut config = Self::load_file(path)?;
        Self::apply_env_overrides(&mut config);
        Ok(KilnConfig {
            providers: config.providers,
            generation: config.generation,
        })
    }

    /// API key for a provider, if configured and the provider is enabled
    pub fn api_key(&self, provider_name: &str) -> Option<&str> {
        self.providers
            .get(provider_name)
            .filter(|p| p.enabled)
            .and_then(|p| p.api_key.as_deref())
            .filter(|k| !k.is_empty())
    }

    /// API base URL override for a provider
    pub fn api_url(&self, provider_name: &str) -> Option<&str> {
        self.providers
            .get(provider_name)
            .and_then(|p| p.api_url.as_deref())
    }

    pub fn is_enabled(&self, provider_name: &str) -> bool {
        self.providers
            .get(provider_name)
            .map(|p| p.enabled)
            .unwrap_or(true)
    }

    /// Process-wide defaults for the option resolver
    pub fn resolve_defaults(&self) -> Result<ResolveDefaults> {
        let model = self.generation.default_model.parse().map_err(|e| {
            KilnError::ConfigError(format!("[generation] default_model: {}", e))
        })?;
        let reference_provider = self.generation.reference_provider.parse().map_err(|e| {
            KilnError::ConfigError(format!("[generation] reference_provider: {}", e))
        })?;
        Ok(ResolveDefaults {
            model,
            reference_provider,
        })
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(self.generation.poll_interval_secs),
            max_attempts: self.generation.max_poll_attempts.max(1),
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(&self.generation.output_dir)
    }

    pub fn jobs_dir(&self) -> PathBuf {
        PathBuf::from(&self.generation.jobs_dir)
    }

    fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".kiln").join("config.toml"))
    }

    fn load_file(path: &Path) -> Result<KilnConfigFile> {
        let content = std::fs::read_to_string(path)?;
        let config: KilnConfigFile = toml::from_str(&content).map_err(|e| {
            KilnError::ConfigError(format!("Failed to parse config {}: {}", path.display(), e))
        })?;
        Ok(config)
    }

    fn merge_into(base: &mut KilnConfigFile, overlay: KilnConfigFile) {
        for (name, provider) in overlay.providers {
            let entry = base.providers.entry(name).or_default();
            if provider.api_key.is_some() {
                entry.api_key = provider.api_key;
            }
            if provider.api_url.is_some() {
                entry.api_url = provider.api_url;
            }
            entry.enabled = provider.enabled;
        }

        let overlay = overlay.generation;
        let base = &mut base.generation;
        if overlay.default_model != default_model() {
            base.default_model = overlay.default_model;
        }
        if overlay.reference_provider != default_reference_provider() {
            base.reference_provider = overlay.reference_provider;
        }
        if overlay.output_dir != default_output_dir() {
            base.output_dir = overlay.output_dir;
        }
        if overlay.jobs_dir != default_jobs_dir() {
            base.jobs_dir = overlay.jobs_dir;
        }
        if overlay.poll_interval_secs != default_poll_interval_secs() {
            base.poll_interval_secs = overlay.poll_interval_secs;
        }
        if overlay.max_poll_attempts != default_max_poll_attempts() {
            base.max_poll_attempts = overlay.max_poll_attempts;
        }
    }

    fn apply_env_overrides(config: &mut KilnConfigFile) {
        for name in PROVIDER_NAMES {
            let env_key = format!("KILN_{}_API_KEY", name.to_uppercase());
            if let Ok(key) = std::env::var(&env_key) {
                let entry = config.providers.entry(name.to_string()).or_default();
                entry.api_key = Some(key);
                continue;
            }

            let has_key = config
                .providers
                .get(name)
                .and_then(|p| p.api_key.as_ref())
                .is_some();
            if has_key {
                continue;
            }
            if let Some(key) = conventional_env_key(name) {
                let entry = config.providers.entry(name.to_string()).or_default();
                entry.api_key = Some(key);
            }
        }
    }
}

fn conventional_env_key(provider_name: &str) -> Option<String> {
    let candidates: &[&str] = match provider_name {
        "openai" => &["OPENAI_API_KEY"],
        "gemini" => &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
        "fal" => &["FAL_KEY", "FAL_API_KEY"],
        "meshy" => &["MESHY_API_KEY"],
        _ => &[],
    };
    candidates
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ImageProvider, MeshModel};
    use std::io::Write;

    fn temp_config(content: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kiln_config_test_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_config_from_file() {
        std::env::remove_var("KILN_OPENAI_API_KEY");

        let config_str = r#"
[providers.openai]
api_key = "sk-test-123"
api_url = "https://proxy.example.com/v1"
enabled = true

[providers.gemini]
api_key = "g-test"
enabled = false

[generation]
default_model = "hunyuan3d"
reference_provider = "flux"
poll_interval_secs = 2
max_poll_attempts = 30
"#;
        let path = temp_config(config_str);
        let config = KilnConfig::load_from_file(&path).unwrap();

        assert!(config.is_enabled("openai"));
        assert!(!config.is_enabled("gemini"));
        assert_eq!(config.api_key("gemini"), None);
        assert_eq!(config.api_url("openai"), Some("https://proxy.example.com/v1"));

        let defaults = config.resolve_defaults().unwrap();
        assert_eq!(defaults.model, MeshModel::Hunyuan3d);
        assert_eq!(defaults.reference_provider, ImageProvider::Flux);

        let poll = config.poll_policy();
        assert_eq!(poll.interval, Duration::from_secs(2));
        assert_eq!(poll.max_attempts, 30);

        std::fs::remove_file(&path).ok();
        std::fs::remove_dir(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_env_var_override() {
        let config_str = r#"
[providers.meshy]
api_key = "file-key"
"#;
        let path = temp_config(config_str);

        std::env::set_var("KILN_MESHY_API_KEY", "env-key-override");

        let config = KilnConfig::load_from_file(&path).unwrap();
        assert_eq!(config.api_key("meshy"), Some("env-key-override"));

        std::env::remove_var("KILN_MESHY_API_KEY");
        std::fs::remove_file(&path).ok();
        std::fs::remove_dir(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_env_only_key_is_enabled() {
        let path = temp_config("[generation]\ndefault_model = \"meshy\"\n");
        std::env::set_var("KILN_GEMINI_API_KEY", "env-only");

        let config = KilnConfig::load_from_file(&path).unwrap();
        assert!(config.is_enabled("gemini"));
        assert_eq!(config.api_key("gemini"), Some("env-only"));

        std::env::remove_var("KILN_GEMINI_API_KEY");
        std::fs::remove_file(&path).ok();
        std::fs::remove_dir(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_file_key_beats_conventional_env() {
        let path = temp_config("[providers.fal]\napi_key = \"from-file\"\n");
        std::env::set_var("FAL_API_KEY", "from-env");

        let config = KilnConfig::load_from_file(&path).unwrap();
        assert_eq!(config.api_key("fal"), Some("from-file"));

        std::env::remove_var("FAL_API_KEY");
        std::fs::remove_file(&path).ok();
        std::fs::remove_dir(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_defaults() {
        let config = KilnConfig::default();
        let defaults = config.resolve_defaults().unwrap();
        assert_eq!(defaults, ResolveDefaults::default());
        assert_eq!(config.poll_policy(), PollPolicy::default());
        assert_eq!(config.jobs_dir(), PathBuf::from(".kiln/jobs"));
    }

    #[test]
    fn test_bad_default_model_is_config_error() {
        let mut config = KilnConfig::default();
        config.generation.default_model = "sculptor".to_string();
        let err = config.resolve_defaults().unwrap_err();
        assert!(matches!(err, KilnError::ConfigError(_)));
    }

    #[test]
    fn test_merge_overlay_wins() {
        let mut base = KilnConfigFile::default();
        base.providers.insert(
            "fal".to_string(),
            ProviderConfig {
                api_key: Some("global".to_string()),
                api_url: None,
                enabled: true,
            },
        );
        let mut overlay = KilnConfigFile::default();
        overlay.providers.insert(
            "fal".to_string(),
            ProviderConfig {
                api_key: None,
                api_url: Some("http://localhost:9000".to_string()),
                enabled: true,
            },
        );
        overlay.generation.jobs_dir = "/tmp/jobs".to_string();

        KilnConfig::merge_into(&mut base, overlay);
        let fal = &base.providers["fal"];
        assert_eq!(fal.api_key.as_deref(), Some("global"));
        assert_eq!(fal.api_url.as_deref(), Some("http://localhost:9000"));
        assert_eq!(base.generation.jobs_dir, "/tmp/jobs");
    }

    #[test]
    fn test_missing_provider_returns_none() {
        let config = KilnConfig::default();
        assert_eq!(config.api_key("nonexistent"), None);
        assert!(config.is_enabled("nonexistent"));
    }
}
