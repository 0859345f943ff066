//! `kiln status` - read a job status file

use anyhow::{Context, Result};
use kiln_gen::{read_status, JobStatusRecord};

pub async fn run(path: &str, json: bool) -> Result<()> {
    let record = read_status(path)
        .await
        .with_context(|| format!("Failed to read status file '{}'", path))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        print_record(&record);
    }
    Ok(())
}

pub fn print_record(record: &JobStatusRecord) {
    println!("Job: {}", record.id);
    println!("  Status: {}", record.status);
    println!("  Progress: {}%", record.progress);
    println!("  Message: {}", record.message);
    println!("  Started: {}", record.start_time.to_rfc3339());
    if let Some(end) = record.end_time {
        println!("  Finished: {}", end.to_rfc3339());
    }
    if let Some(err) = &record.error {
        println!("  Error: {}", err);
    }

    if let Some(result) = &record.result {
        println!(
            "  Model: {} ({}, via {})",
            result.model, result.variant, result.provider
        );
        for path in &result.saved_paths {
            println!("  Output: {}", path.display());
        }
        if let Some(secs) = result.generation_time_secs {
            println!("  Generated in {:.1}s", secs);
        }
        if let Some(meta) = &result.metadata {
            if let (Some(v), Some(f)) = (meta.vertex_count, meta.face_count) {
                println!("  Mesh: {} vertices, {} faces", v, f);
            }
            println!("  Size: {} bytes", meta.file_size);
            println!("  Hash: {}", meta.content_hash);
        }
        if let Some(refs) = &result.auto_generated_references {
            println!(
                "  References: {} of {} views via {}",
                refs.views.len(),
                refs.requested,
                refs.provider
            );
        }
    }

    if !record.logs.is_empty() {
        println!("  Log:");
        for line in &record.logs {
            println!("    {}", line);
        }
    }
}
