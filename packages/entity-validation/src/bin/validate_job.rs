//! Run one validation job against the OpenAI judge.
//!
//! Reads a job JSON document, validates it, and prints the output JSON to
//! stdout. Logs go to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use entity_validation::calibration::CalibrationSnapshot;
use entity_validation::{
    Calibrator, JobContext, OpenAIJudge, RateLimitedJudge, ValidationConfig, ValidationPipeline,
};

#[derive(Parser)]
#[command(name = "validate_job")]
#[command(about = "Validate the content blocks of one crawled page")]
struct Cli {
    /// Path to the job JSON
    job: PathBuf,

    /// Config JSON (defaults to $ENTITY_VALIDATION_CONFIG or built-in defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Calibration snapshot JSON to start from
    #[arg(long)]
    calibration: Option<PathBuf>,

    /// Override the judge model
    #[arg(long)]
    model: Option<String>,

    /// Judge requests per minute
    #[arg(long, default_value_t = 60)]
    rpm: u32,

    /// Pretty-print the output
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,entity_validation=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ValidationConfig::from_file(path),
        None => ValidationConfig::from_env(),
    }
    .context("Failed to load configuration")?;

    let raw = std::fs::read_to_string(&cli.job)
        .with_context(|| format!("Failed to read job {}", cli.job.display()))?;
    let job: JobContext = serde_json::from_str(&raw).context("Failed to parse job JSON")?;

    let mut judge = OpenAIJudge::from_env().context("Failed to configure OpenAI judge")?;
    if let Some(model) = cli.model.clone().or_else(|| config.judge.model.clone()) {
        judge = judge.with_model(model);
    }
    tracing::info!(model = judge.model(), rpm = cli.rpm, "Judge configured");

    let calibration_config = config.calibration.clone();
    let mut pipeline = ValidationPipeline::new(
        Arc::new(RateLimitedJudge::per_minute(judge, cli.rpm)),
        config,
    )?;

    if let Some(path) = &cli.calibration {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read calibration {}", path.display()))?;
        let snapshot: CalibrationSnapshot =
            serde_json::from_str(&raw).context("Failed to parse calibration snapshot")?;
        pipeline = pipeline.with_calibrator(Arc::new(Calibrator::from_snapshot(
            snapshot,
            calibration_config,
        )));
    }

    let output = pipeline.run(job).await.context("Validation job failed")?;

    let rendered = if cli.pretty {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    println!("{}", rendered);

    Ok(())
}
