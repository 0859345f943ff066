//! CLI command implementations

pub mod generate;
pub mod references;
pub mod serve;
pub mod status;
pub mod variant;

use anyhow::{Context, Result};
use kiln_gen::{Dispatcher, ImageBackends, JobRunner, KilnConfig, MeshBackends, PollPolicy};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Configuration plus the job runner built from it, shared by every command
pub struct Gateway {
    pub config: KilnConfig,
    pub runner: Arc<JobRunner>,
}

impl Gateway {
    pub fn load(mock: bool) -> Result<Self> {
        let config = KilnConfig::load().unwrap_or_else(|e| {
            tracing::warn!("could not load config, using defaults: {}", e);
            KilnConfig::default()
        });
        Self::from_config(config, mock)
    }

    pub fn from_config(config: KilnConfig, mock: bool) -> Result<Self> {
        let defaults = config
            .resolve_defaults()
            .context("Invalid [generation] defaults in config")?;

        let (meshes, images, poll) = if mock {
            // Mock tasks finish on the first poll
            let poll = PollPolicy {
                interval: Duration::from_millis(50),
                max_attempts: config.poll_policy().max_attempts,
            };
            (MeshBackends::mock(), ImageBackends::mock(), poll)
        } else {
            (
                MeshBackends::from_config(&config),
                ImageBackends::from_config(&config),
                config.poll_policy(),
            )
        };

        let runner = JobRunner::new(Dispatcher::new(meshes, poll), Arc::new(images), defaults);
        Ok(Self {
            config,
            runner: Arc::new(runner),
        })
    }

    /// Fresh status file location under the configured jobs directory
    pub fn new_status_path(&self) -> PathBuf {
        self.config
            .jobs_dir()
            .join(format!("{}.json", uuid::Uuid::new_v4()))
    }

    /// Default mesh location when the caller gives none
    pub fn default_output_path(&self, stem: &str, extension: &str) -> PathBuf {
        self.config
            .output_dir()
            .join(format!("{}.{}", stem, extension))
    }
}

/// Split a comma-separated CLI list, dropping blanks
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
