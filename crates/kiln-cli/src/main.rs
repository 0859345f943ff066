//! Kiln CLI - Command-line interface for the Kiln asset gateway

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{generate, references, serve, status, variant, Gateway};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Asset-generation gateway for image-to-3D backends", long_about = None)]
#[command(version)]
struct Cli {
    /// Use offline mock providers instead of real APIs
    #[arg(long, global = true)]
    mock: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a 3D generation job and follow it to completion
    Generate(generate::GenerateArgs),

    /// Show a job status file
    Status {
        /// Path to the status file
        path: String,

        /// Print the raw JSON record
        #[arg(long)]
        json: bool,
    },

    /// Generate reference images from a prompt
    References {
        /// Description of the object
        prompt: String,

        /// Mesh output path the references are named after
        #[arg(short, long)]
        output: String,

        /// Comma-separated views (front, back, left, right, top, bottom)
        #[arg(long, default_value = "front,back,top")]
        views: String,

        /// Image provider (openai, gemini, flux)
        #[arg(long)]
        provider: Option<String>,
    },

    /// Recommend a variant for a model
    Variant {
        /// Model name (trellis, hunyuan3d, tripo, meshy)
        model: String,

        /// Requested variant, replaced if incompatible
        #[arg(long)]
        variant: Option<String>,

        /// Number of input images
        #[arg(long, default_value = "1")]
        images: usize,

        /// Prefer a fast variant when available
        #[arg(long)]
        prefer_fast: bool,
    },

    /// Run the JSON-RPC tool server on stdin/stdout
    Serve,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout belongs to command output and the tool protocol
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let gateway = Gateway::load(cli.mock)?;

    match cli.command {
        Commands::Generate(args) => generate::run(&gateway, args).await,
        Commands::Status { path, json } => status::run(&path, json).await,
        Commands::References {
            prompt,
            output,
            views,
            provider,
        } => references::run(&gateway, &prompt, &output, &views, provider.as_deref()).await,
        Commands::Variant {
            model,
            variant,
            images,
            prefer_fast,
        } => variant::run(&model, variant.as_deref(), images, prefer_fast),
        Commands::Serve => serve::run(gateway).await,
    }
}
