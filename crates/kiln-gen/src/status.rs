//! Job status records and the stores that hold them
//!
//! A job owns exactly one status record. The orchestrator is the only
//! writer; any number of readers may poll the JSON file concurrently.
//! File writes go to a sibling temp file followed by a rename so readers
//! never observe a half-written document.

use crate::dispatch::GenerationResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kiln_core::{time, KilnError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The persisted status document for one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusRecord {
    pub id: String,
    pub status: JobStatus,
    /// 0-100
    pub progress: u8,
    pub message: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<GenerationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub logs: Vec<String>,
}

impl JobStatusRecord {
    /// A fresh `pending` record
    pub fn pending(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Pending,
            progress: 0,
            message: message.into(),
            start_time: time::now(),
            end_time: None,
            result: None,
            error: None,
            logs: Vec::new(),
        }
    }

    /// Merge a partial update, enforcing the lifecycle.
    ///
    /// Returns `false` when the update was ignored because the record is
    /// already terminal. Status never moves backwards and progress never
    /// decreases, except that a transition to `failed` takes its progress
    /// as given.
    pub fn apply(&mut self, update: StatusUpdate) -> bool {
        if self.status.is_terminal() {
            return false;
        }

        if let Some(status) = update.status {
            if status.rank() >= self.status.rank() {
                self.status = status;
            } else {
                tracing::warn!(
                    job = %self.id,
                    from = %self.status,
                    to = %status,
                    "ignoring backwards status transition"
                );
            }
        }

        if let Some(progress) = update.progress {
            let progress = progress.min(100);
            if self.status == JobStatus::Failed {
                self.progress = progress;
            } else {
                self.progress = self.progress.max(progress);
            }
        }

        if let Some(message) = update.message {
            self.message = message;
        }
        if let Some(end_time) = update.end_time {
            self.end_time = Some(end_time);
        }
        if let Some(result) = update.result {
            self.result = Some(*result);
        }
        if let Some(error) = update.error {
            self.error = Some(error);
        }
        true
    }
}

/// A partial update to a [`JobStatusRecord`]; unset fields are left alone
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub end_time: Option<DateTime<Utc>>,
    pub result: Option<Box<GenerationResult>>,
    pub error: Option<String>,
}

impl StatusUpdate {
    /// A `processing` checkpoint
    pub fn stage(progress: u8, message: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Processing),
            progress: Some(progress),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn completed(result: GenerationResult) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            progress: Some(100),
            message: Some("Generation completed".to_string()),
            end_time: Some(time::now()),
            result: Some(Box::new(result)),
            error: None,
        }
    }

    /// Failure resets progress to 0 and records the description twice
    pub fn failed(description: impl Into<String>) -> Self {
        let description = description.into();
        Self {
            status: Some(JobStatus::Failed),
            progress: Some(0),
            message: Some(description.clone()),
            end_time: Some(time::now()),
            result: None,
            error: Some(description),
        }
    }
}

/// Destination for a job's status updates
#[async_trait]
pub trait JobStatusSink: Send + Sync {
    /// Write the initial record
    async fn create(&self, record: &JobStatusRecord) -> Result<()>;

    /// Merge a partial update into the record
    async fn update(&self, update: StatusUpdate) -> Result<()>;

    /// Append a timestamped line to the record's logs
    async fn append_log(&self, text: &str) -> Result<()>;

    /// Human-readable location (a file path for file-backed stores)
    fn location(&self) -> String;
}

/// JSON file status store
pub struct FileStatusStore {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl FileStatusStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write(&self, record: &JobStatusRecord) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(record)?;

        let mut tmp_name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp = self.path.with_file_name(tmp_name);

        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn modify<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut JobStatusRecord) + Send,
    {
        let _guard = self.lock.lock().await;
        let mut record = read_status(&self.path).await?;
        change(&mut record);
        self.write(&record).await
    }
}

#[async_trait]
impl JobStatusSink for FileStatusStore {
    async fn create(&self, record: &JobStatusRecord) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.write(record).await
    }

    async fn update(&self, update: StatusUpdate) -> Result<()> {
        self.modify(|record| {
            record.apply(update);
        })
        .await
    }

    async fn append_log(&self, text: &str) -> Result<()> {
        let line = time::log_line(text);
        self.modify(|record| record.logs.push(line)).await
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Read and parse a status file
pub async fn read_status<P: AsRef<Path>>(path: P) -> Result<JobStatusRecord> {
    let path = path.as_ref();
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            KilnError::ValidationError(format!("status file not found: {}", path.display()))
        } else {
            KilnError::IoError(e)
        }
    })?;
    Ok(serde_json::from_str(&content)?)
}

/// In-memory status sink that keeps every intermediate snapshot
#[derive(Default)]
pub struct MemoryStatusSink {
    history: Mutex<Vec<JobStatusRecord>>,
}

impl MemoryStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest record, if one was created
    pub fn snapshot(&self) -> Option<JobStatusRecord> {
        self.history.lock().ok().and_then(|h| h.last().cloned())
    }

    /// Every record state in write order
    pub fn history(&self) -> Vec<JobStatusRecord> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    fn modify<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut JobStatusRecord),
    {
        let mut history = self
            .history
            .lock()
            .map_err(|_| KilnError::ConfigError("status history lock poisoned".to_string()))?;
        let mut record = history.last().cloned().ok_or_else(|| {
            KilnError::ValidationError("status record has not been created".to_string())
        })?;
        change(&mut record);
        history.push(record);
        Ok(())
    }
}

#[async_trait]
impl JobStatusSink for MemoryStatusSink {
    async fn create(&self, record: &JobStatusRecord) -> Result<()> {
        let mut history = self
            .history
            .lock()
            .map_err(|_| KilnError::ConfigError("status history lock poisoned".to_string()))?;
        history.push(record.clone());
        Ok(())
    }

    async fn update(&self, update: StatusUpdate) -> Result<()> {
        self.modify(|record| {
            record.apply(update);
        })
    }

    async fn append_log(&self, text: &str) -> Result<()> {
        let line = time::log_line(text);
        self.modify(|record| record.logs.push(line))
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
