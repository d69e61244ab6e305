use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use condense::{
    config, logging,
    processing::{SummarizationJob, SummarizationService},
};

#[derive(Parser)]
#[command(
    name = "condense",
    about = "Condense oversized documents into quality-checked summaries"
)]
struct Cli {
    /// Pretty-print the outcome JSON.
    #[arg(long, global = true)]
    pretty: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Summarize a plain-text file.
    Text {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value = "en")]
        language: String,
        #[arg(long, default_value = "")]
        topic: String,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        quality_threshold: Option<f64>,
        #[arg(long)]
        max_output_tokens: Option<usize>,
        #[arg(long)]
        correlation_id: Option<String>,
    },
    /// Run a JSON job specification.
    Job {
        #[arg(long)]
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = config::init_config().context("failed to load configuration")?;
    logging::init_tracing();

    let mut job = match cli.command {
        Command::Text {
            input,
            language,
            topic,
            model,
            quality_threshold,
            max_output_tokens,
            correlation_id,
        } => SummarizationJob {
            original_filename: file_name(&input),
            model,
            quality_threshold,
            max_output_tokens,
            correlation_id,
            ..SummarizationJob::new(read(&input)?, language, topic)
        },
        Command::Job { input } => serde_json::from_str(&read(&input)?)
            .with_context(|| format!("invalid job specification in {}", input.display()))?,
    };
    if job.correlation_id.is_none() {
        job.correlation_id = Some(uuid::Uuid::new_v4().to_string());
    }

    let service =
        SummarizationService::from_config(config).context("failed to initialize service")?;
    let outcome = service.generate_summary(&job).await.map_err(|error| {
        tracing::error!(code = error.code(), error = %error, "Summarization job failed");
        anyhow!("[{}] {error}", error.code())
    })?;
    tracing::debug!(metrics = ?service.metrics_snapshot(), "Job metrics");

    let rendered = if cli.pretty {
        serde_json::to_string_pretty(&outcome)?
    } else {
        serde_json::to_string(&outcome)?
    };
    println!("{rendered}");
    Ok(())
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
}
