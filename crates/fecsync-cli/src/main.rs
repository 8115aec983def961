//! fecsync - incremental OpenFEC extraction into the warehouse raw layer

use anyhow::Result;
use clap::{Parser, Subcommand};
use fecsync_common::logging::{init_logging, LogConfig, LogLevel};
use fecsync_engine::config::{DatabaseConfig, EngineConfig};
use fecsync_engine::control::PgRunControl;
use fecsync_engine::loader::PgRawLoader;
use fecsync_engine::orchestrator::ExtractionOrchestrator;
use fecsync_engine::source::{self, SourceDescriptor};
use std::process;
use tracing::error;

#[derive(Parser, Debug)]
#[command(name = "fecsync")]
#[command(author, version, about = "Incremental OpenFEC extraction and load")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run extraction pipelines (all registered sources by default)
    Run {
        /// Source to run; repeatable (e.g. --source candidates --source schedule_a)
        #[arg(short, long)]
        source: Vec<String>,
    },

    /// Show recent run records from the control table
    Status {
        /// Restrict to one logical source system (e.g. openfec)
        #[arg(long)]
        source: Option<String>,

        /// Number of records to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Show the current watermark per registered source
    Watermark,

    /// Create the control table and raw tables if absent
    Init,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::from_env()
        .unwrap_or_default()
        .with_level(log_level);
    // The CLI should keep working even if a subscriber is already installed
    let _ = init_logging(&log_config);

    let result = execute_command(&cli).await;

    if let Err(e) = result {
        error!(error = %e, "command failed");
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn execute_command(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Run { source } => run_pipelines(source).await,
        Commands::Status { source, limit } => show_status(source.as_deref(), *limit).await,
        Commands::Watermark => show_watermarks().await,
        Commands::Init => init_schema().await,
    }
}

/// Resolve requested source names against the registry
fn resolve_descriptors(names: &[String]) -> Result<Vec<SourceDescriptor>> {
    if names.is_empty() {
        return Ok(source::all());
    }

    let mut descriptors = Vec::with_capacity(names.len());
    for name in names {
        let descriptor = source::descriptor(name).ok_or_else(|| {
            let known: Vec<String> = source::all().into_iter().map(|d| d.name).collect();
            anyhow::anyhow!(
                "unknown source '{}' (known sources: {})",
                name,
                known.join(", ")
            )
        })?;
        descriptors.push(descriptor);
    }
    Ok(descriptors)
}

async fn run_pipelines(names: &[String]) -> Result<()> {
    let descriptors = resolve_descriptors(names)?;
    let config = EngineConfig::from_env()?;
    let pool = config.database.connect().await?;

    let control = PgRunControl::new(pool.clone());
    control.ensure_control_table().await?;

    let loader = PgRawLoader::new(pool);
    for descriptor in &descriptors {
        loader.ensure_raw_table(descriptor).await?;
    }

    let orchestrator = ExtractionOrchestrator::new(config, control, loader)?;
    let outcomes = orchestrator.run_all(&descriptors).await;

    let mut failed = 0;
    for (name, outcome) in &outcomes {
        match outcome {
            Ok(summary) => {
                println!(
                    "{name}: SUCCEEDED (run {}, {} rows, watermark {})",
                    summary.run_id,
                    summary.rows_loaded,
                    summary
                        .last_indexed_date
                        .map(|d| d.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string())
                );
            },
            Err(e) => {
                failed += 1;
                println!("{name}: FAILED ({e})");
            },
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} runs failed", outcomes.len());
    }
    Ok(())
}

async fn show_status(source: Option<&str>, limit: i64) -> Result<()> {
    let database = DatabaseConfig::from_env()?;
    let pool = database.connect().await?;
    let control = PgRunControl::new(pool);

    let runs = control.recent_runs(source, limit).await?;
    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }

    println!(
        "{:>6}  {:<8}  {:<24}  {:<9}  {:>10}  {:<20}  NOTES",
        "RUN", "SOURCE", "ENDPOINT", "STATUS", "ROWS", "WATERMARK"
    );
    for run in runs {
        println!(
            "{:>6}  {:<8}  {:<24}  {:<9}  {:>10}  {:<20}  {}",
            run.run_id,
            run.source,
            run.endpoint,
            run.status.as_str(),
            run.rows_loaded,
            run.last_indexed_date
                .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
            run.notes.as_deref().unwrap_or(""),
        );
    }
    Ok(())
}

async fn show_watermarks() -> Result<()> {
    use fecsync_engine::control::RunControl;

    let database = DatabaseConfig::from_env()?;
    let pool = database.connect().await?;
    let control = PgRunControl::new(pool);

    for descriptor in source::all() {
        let watermark = control
            .get_watermark(&descriptor.source, &descriptor.endpoint)
            .await?;
        println!(
            "{:<12}  {}",
            descriptor.name,
            watermark
                .map(|d| d.to_rfc3339())
                .unwrap_or_else(|| "(no successful run)".to_string())
        );
    }
    Ok(())
}

async fn init_schema() -> Result<()> {
    let database = DatabaseConfig::from_env()?;
    let pool = database.connect().await?;

    let control = PgRunControl::new(pool.clone());
    control.ensure_control_table().await?;
    println!("control table ingest_runs ready");

    let loader = PgRawLoader::new(pool);
    for descriptor in source::all() {
        loader.ensure_raw_table(&descriptor).await?;
        println!("raw table {} ready", descriptor.dest_table);
    }
    Ok(())
}
