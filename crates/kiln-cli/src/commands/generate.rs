//! `kiln generate` - start a job and follow its status file

use super::{split_list, status, Gateway};
use anyhow::{bail, Context, Result};
use clap::Args;
use kiln_gen::{read_status, GenerationOptions, JobStatus, JobStatusRecord};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Args, Debug, Default)]
pub struct GenerateArgs {
    /// Text description of the object
    #[arg(short, long)]
    pub prompt: Option<String>,

    /// Input image path or data URI (repeatable)
    #[arg(short, long = "image")]
    pub images: Vec<String>,

    /// Mesh output path (defaults to <output_dir>/<job>.<format>)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Backend model (trellis, hunyuan3d, tripo, meshy)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Variant (single, multi, single-fast, multi-fast)
    #[arg(long)]
    pub variant: Option<String>,

    /// Mesh format (glb, obj)
    #[arg(long)]
    pub format: Option<String>,

    /// Comma-separated reference views
    #[arg(long)]
    pub views: Option<String>,

    /// Reference image provider (openai, gemini, flux)
    #[arg(long)]
    pub reference_provider: Option<String>,

    /// Do not synthesize reference images from the prompt
    #[arg(long)]
    pub no_auto_references: bool,

    /// Keep synthesized reference images after the job ends
    #[arg(long)]
    pub keep_references: bool,

    /// Prefer fast/turbo variants
    #[arg(long)]
    pub fast: bool,

    /// Status file path (defaults to <jobs_dir>/<uuid>.json)
    #[arg(long)]
    pub status_file: Option<String>,
}

impl GenerateArgs {
    /// Only flags the user actually set become options, so defaults layer underneath
    pub fn to_options(&self, default_output: impl FnOnce(&str) -> PathBuf) -> GenerationOptions {
        let format = self.format.clone();
        let output_path = self.output.clone().unwrap_or_else(|| {
            let ext = format.as_deref().unwrap_or("glb").to_ascii_lowercase();
            default_output(&ext).to_string_lossy().to_string()
        });

        GenerationOptions {
            prompt: self.prompt.clone(),
            input_images: (!self.images.is_empty()).then(|| self.images.clone()),
            output_path: Some(output_path),
            model: self.model.clone(),
            variant: self.variant.clone(),
            format,
            auto_generate_references: self.no_auto_references.then_some(false),
            reference_views: self.views.as_deref().map(split_list),
            cleanup_references: self.keep_references.then_some(false),
            reference_provider: self.reference_provider.clone(),
            prefer_fast: self.fast.then_some(true),
        }
    }
}

pub async fn run(gateway: &Gateway, args: GenerateArgs) -> Result<()> {
    let stem = match args.prompt.as_deref() {
        Some(prompt) => slug(prompt),
        None => "mesh".to_string(),
    };
    let stem = format!("{}-{}", stem, &uuid::Uuid::new_v4().simple().to_string()[..8]);
    let options = args.to_options(|ext| gateway.default_output_path(&stem, ext));

    let status_path = args
        .status_file
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| gateway.new_status_path());

    let handle = gateway
        .runner
        .start_async_generation(&options, &status_path)
        .await
        .context("Failed to start generation")?;

    println!("Started job {}", handle.id());
    println!("  Status: {}", status_path.display());
    if let Some(output) = &options.output_path {
        println!("  Output: {}", output);
    }

    let record = follow_status(&status_path, POLL_INTERVAL, || handle.is_finished()).await?;
    handle.wait().await.context("Job task ended abnormally")?;
    println!();
    status::print_record(&record);
    if record.status == JobStatus::Failed {
        bail!(
            "Generation failed: {}",
            record.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Print status changes until the record is terminal.
///
/// `finished` is sampled before each read, so a job task that has exited
/// without a terminal record is reported instead of polled forever.
async fn follow_status(
    status_path: &Path,
    interval: Duration,
    finished: impl Fn() -> bool,
) -> Result<JobStatusRecord> {
    let mut last: Option<JobStatusRecord> = None;
    loop {
        tokio::time::sleep(interval).await;
        let task_done = finished();
        match read_status(status_path).await {
            Ok(record) => {
                if last.as_ref().map(|r| &r.message) != Some(&record.message) {
                    println!("  [{:>3}%] {}", record.progress, record.message);
                }
                if record.status.is_terminal() {
                    return Ok(record);
                }
                last = Some(record);
            }
            Err(e) => tracing::debug!("status not readable yet: {}", e),
        }

        if task_done {
            match &last {
                Some(record) => bail!(
                    "Job stopped without finishing ({} at {}%): {}",
                    record.status,
                    record.progress,
                    record.message
                ),
                None => bail!(
                    "Job stopped without writing a status file at {}",
                    status_path.display()
                ),
            }
        }
    }
}

fn slug(prompt: &str) -> String {
    let words: Vec<String> = prompt
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .take(4)
        .map(|w| w.to_ascii_lowercase())
        .collect();
    if words.is_empty() {
        "mesh".to_string()
    } else {
        words.join("_")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_gen::StatusUpdate;

    #[test]
    fn test_unset_flags_stay_unset() {
        let args = GenerateArgs {
            prompt: Some("a chair".to_string()),
            ..Default::default()
        };
        let options = args.to_options(|ext| PathBuf::from(format!("out/chair.{}", ext)));
        assert_eq!(options.output_path.as_deref(), Some("out/chair.glb"));
        assert_eq!(options.input_images, None);
        assert_eq!(options.auto_generate_references, None);
        assert_eq!(options.cleanup_references, None);
        assert_eq!(options.prefer_fast, None);
        assert_eq!(options.variant, None);
    }

    #[test]
    fn test_flags_map_to_options() {
        let args = GenerateArgs {
            images: vec!["a.png".to_string(), "b.png".to_string()],
            format: Some("OBJ".to_string()),
            views: Some("front, left,,back".to_string()),
            no_auto_references: true,
            keep_references: true,
            fast: true,
            ..Default::default()
        };
        let options = args.to_options(|ext| PathBuf::from(format!("out/x.{}", ext)));
        assert_eq!(options.output_path.as_deref(), Some("out/x.obj"));
        assert_eq!(options.input_images.unwrap().len(), 2);
        assert_eq!(
            options.reference_views,
            Some(vec!["front".to_string(), "left".to_string(), "back".to_string()])
        );
        assert_eq!(options.auto_generate_references, Some(false));
        assert_eq!(options.cleanup_references, Some(false));
        assert_eq!(options.prefer_fast, Some(true));
    }

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kiln_generate_test_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_record(path: &Path, record: &JobStatusRecord) {
        std::fs::write(path, serde_json::to_string_pretty(record).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_follow_returns_terminal_record() {
        let dir = temp_dir();
        let path = dir.join("done.json");
        let mut record = JobStatusRecord::pending("job-1", "Job queued");
        record.apply(StatusUpdate::failed("fal backend error: quota exceeded"));
        write_record(&path, &record);

        let followed = follow_status(&path, Duration::from_millis(1), || false)
            .await
            .unwrap();
        assert_eq!(followed.status, JobStatus::Failed);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_follow_stops_when_task_exits_early() {
        let dir = temp_dir();
        let path = dir.join("stuck.json");
        let mut record = JobStatusRecord::pending("job-2", "Job queued");
        record.apply(StatusUpdate::stage(40, "Dispatching to fal backend"));
        write_record(&path, &record);

        let err = follow_status(&path, Duration::from_millis(1), || true)
            .await
            .unwrap_err()
            .to_string();
        assert!(err.contains("40%"), "unexpected error: {}", err);
        assert!(err.contains("Dispatching to fal backend"), "unexpected error: {}", err);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_follow_stops_when_no_status_was_written() {
        let dir = temp_dir();
        let err = follow_status(&dir.join("missing.json"), Duration::from_millis(1), || true)
            .await
            .unwrap_err()
            .to_string();
        assert!(err.contains("without writing a status file"), "unexpected error: {}", err);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("A Red, wooden Chair with arms"), "a_red_wooden_chair");
        assert_eq!(slug("!!!"), "mesh");
    }
}
