use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use recsys_pipeline::{PipelineConfig, PipelineJob, Stage};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "recsys-pipeline")]
#[command(version, about = "Offline candidate generation, blending and reranking")]
struct Cli {
    /// Pipeline configuration (YAML)
    #[arg(short, long, global = true, default_value = "config/pipeline.yaml")]
    config: PathBuf,

    /// Evaluation stage
    #[arg(short, long, global = true, default_value = "val")]
    stage: Stage,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build co-visitation and popularity candidates
    Candidates,
    /// Fuse candidate and ranker scores with RRF
    Blend,
    /// Diversity rerank the blended scores
    Rerank,
    /// Write the submission CSV
    Submit,
    /// Run every step
    Run,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init(),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = PipelineConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config {}", cli.config.display()))?;
    let job = PipelineJob::new(config)?;
    let stage = cli.stage;

    match cli.command {
        Commands::Candidates => {
            let stats = job.candidates(stage)?;
            info!(
                stage = %stage,
                users = stats.users,
                pairs = stats.merged_candidates,
                "Candidates done"
            );
        }
        Commands::Blend => {
            let stats = job.blend(stage)?;
            info!(
                stage = %stage,
                mode = stats.mode.as_str(),
                pairs = stats.fused_pairs,
                "Blend done"
            );
        }
        Commands::Rerank => {
            let stats = job.rerank(stage)?;
            info!(stage = %stage, users = stats.users, items = stats.items_emitted, "Rerank done");
        }
        Commands::Submit => {
            let rows = job.submit(stage)?;
            info!(stage = %stage, rows = rows, "Submission done");
        }
        Commands::Run => {
            let stats = job.run(stage)?;
            info!(
                stage = %stage,
                rows = stats.submission_rows,
                duration_ms = stats.total_duration_ms,
                "Run done"
            );
        }
    }

    Ok(())
}
