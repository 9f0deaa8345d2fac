//! Student Import CLI
//!
//! Imports a CSV file of student records into a relational database.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use student_import::{analyze, build_runtime, run_import, Config, JobResult};

#[derive(Parser)]
#[command(name = "student-import")]
#[command(about = "Import student records from CSV into a relational database", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// Override the input CSV path
    #[arg(long, global = true)]
    input: Option<PathBuf>,

    /// Override records per chunk
    #[arg(long, global = true)]
    chunk_size: Option<usize>,

    /// Override concurrency level
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the import (default if no command specified)
    Run,

    /// Read, transform and chunk the input without writing
    Analyze,

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

/// Command-line overrides applied on top of the configuration file.
struct Overrides {
    input: Option<PathBuf>,
    chunk_size: Option<usize>,
    concurrency: Option<usize>,
}

impl Overrides {
    fn apply(self, config: &mut Config) {
        if let Some(input) = self.input {
            config.input.path = input;
        }
        if let Some(n) = self.chunk_size {
            config.processing.chunk_size = n;
        }
        if let Some(c) = self.concurrency {
            config.processing.concurrency = c;
        }
    }
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    let overrides = Overrides {
        input: cli.input,
        chunk_size: cli.chunk_size,
        concurrency: cli.concurrency,
    };

    match cli.command {
        None | Some(Commands::Run) => {
            run_command(cli.config, overrides, false)?;
        }

        Some(Commands::Analyze) => {
            run_command(cli.config, overrides, true)?;
        }

        Some(Commands::Validate) => {
            validate_command(cli.config, overrides)?;
        }

        Some(Commands::GenerateConfig { output }) => {
            generate_config_command(output)?;
        }
    }

    Ok(())
}

/// Load the configuration file, falling back to defaults when it is absent.
fn load_config(config_path: &PathBuf, overrides: Overrides) -> Result<Config> {
    let mut config = if config_path.exists() {
        Config::from_file(config_path)?
    } else {
        tracing::warn!(
            "Configuration file {} not found, using defaults",
            config_path.display()
        );
        Config::default()
    };

    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

fn run_command(config_path: PathBuf, overrides: Overrides, dry_run: bool) -> Result<()> {
    let config = load_config(&config_path, overrides)?;

    // Build and run Tokio runtime
    let runtime = build_runtime(config.processing.worker_threads)?;
    let result = runtime.block_on(async {
        let cancel = CancellationToken::new();
        tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

        if dry_run {
            tracing::info!("Dry run mode - analyzing input without writing");
            analyze(config, cancel).await
        } else {
            run_import(config, cancel).await
        }
    })?;

    report(&result);

    if !result.is_success() {
        anyhow::bail!(
            "Import failed: {}",
            result.failure.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::warn!("Interrupt received, finishing in-flight chunks");
        cancel.cancel();
    }
}

fn report(result: &JobResult) {
    println!("\n=== Import Result ===");
    println!("Status: {}", result.status);
    println!("Records read: {}", result.records_read);
    println!("Records written: {}", result.written);
    println!("Chunks written: {}", result.chunks_written);
    println!("Records rejected: {}", result.rejections.len());
    for rejection in result.rejections.iter().take(10) {
        println!("  line {}: {}", rejection.line, rejection.reason);
    }
    if result.rejections.len() > 10 {
        println!("  ... {} more", result.rejections.len() - 10);
    }
    if !result.failed_chunks.is_empty() {
        println!("Failed chunks: {}", result.failed_chunks.len());
        for failure in &result.failed_chunks {
            println!("  {}", failure);
        }
    }
    if result.cancelled {
        println!("Cancelled: yes");
    }
    println!("Elapsed: {:.1}s", result.elapsed.as_secs_f64());
    println!("=====================\n");
}

fn validate_command(config_path: PathBuf, overrides: Overrides) -> Result<()> {
    let config = load_config(&config_path, overrides)?;
    if !config.input.path.exists() {
        tracing::warn!("Input file {} does not exist yet", config.input.path.display());
    }
    println!("Configuration is valid");
    Ok(())
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    // Generate a commented YAML config
    let yaml = r#"# Student Import Configuration

# === INPUT: The CSV file to import ===
input:
  # Header line followed by id,firstName,lastName,age rows
  path: "students.csv"

  # Field delimiter (single ASCII character)
  delimiter: ","

  # Leading lines to skip (the header)
  skip_lines: 1

  # Abort on rows without exactly four fields.
  # When false, short rows are padded and long rows truncated.
  strict: false

# === OUTPUT: Where to write the student table ===
output:
  # sea-orm database URL
  database_url: "sqlite://students.db?mode=rwc"

  # Connection pool size (driver default when omitted)
  # max_connections: 10

  # Create the student table if it does not exist
  create_schema: true

# === PROCESSING: Performance tuning ===
processing:
  # Records per chunk; each chunk is one transaction
  chunk_size: 1000

  # Maximum chunk writes in flight
  concurrency: 10

  # Tokio async worker threads (null = num CPUs)
  # worker_threads: 4

  # Print throughput metrics during processing
  enable_metrics: true

  # Metrics reporting interval in seconds
  metrics_interval_secs: 10

  # Save final metrics as JSON
  # metrics_output_path: "metrics.json"

  # Retry configuration for transient database failures
  # (0 retries fails a chunk on its first error)
  retry:
    max_retries: 0
    initial_backoff_ms: 100
    max_backoff_ms: 10000
"#;

    std::fs::write(&output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}
