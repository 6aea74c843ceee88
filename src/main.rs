//! CLI Entry Point for spectropol-daq
//!
//! Provides command-line interface for:
//! - Validating acquisition scripts without touching hardware
//! - Running a script end to end against the simulated rig
//!
//! # Usage
//!
//! Validate a script:
//! ```bash
//! spectropol-daq validate demos/two_step.acq
//! ```
//!
//! Run a script:
//! ```bash
//! spectropol-daq run demos/two_step.acq --config config/acquisition.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use spectropol_daq::acquisition::{script, AcquisitionService, TracingNotifier};
use spectropol_daq::config::{AcquisitionConfig, DEFAULT_CONFIG_PATH};
use spectropol_daq::hardware::mock::MockRig;
use spectropol_daq::logging::{self, OutputFormat, TracingConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "spectropol-daq")]
#[command(about = "Scripted acquisition runs for the polarimetry rig", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Compact,
    Json,
}

impl From<LogFormat> for OutputFormat {
    fn from(value: LogFormat) -> Self {
        match value {
            LogFormat::Pretty => OutputFormat::Pretty,
            LogFormat::Compact => OutputFormat::Compact,
            LogFormat::Json => OutputFormat::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate a script, then print a summary
    Validate {
        /// Path to the acquisition script
        script: PathBuf,
    },

    /// Run a script against the simulated rig
    Run {
        /// Path to the acquisition script
        script: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AcquisitionConfig::load_from(&cli.config)?;
    config.validate()?;
    logging::init(TracingConfig::from_config(&config)?.with_format(cli.log_format.into()))?;

    match cli.command {
        Commands::Validate { script } => validate_script(script).await,
        Commands::Run { script } => run_script(script, &config).await,
    }
}

async fn read_script(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading script {}", path.display()))
}

async fn validate_script(path: PathBuf) -> Result<()> {
    let text = read_script(&path).await?;
    let parsed = script::parse(&text)?;
    let d = &parsed.descriptor;

    println!("Script OK: {}", path.display());
    if let Some(version) = &parsed.version {
        println!("  version:    {version}");
    }
    println!("  project:    {}", d.project);
    println!("  experiment: {}", d.experiment);
    println!("  archive:    {}", d.path);
    println!("  date:       {}", d.date);
    println!("  operator:   {}", d.operator);
    for (key, value) in &d.metadata {
        println!("  {key}: {value}");
    }
    println!("  steps:      {}", parsed.steps.len());
    for step in &parsed.steps {
        println!("    {step}");
    }
    Ok(())
}

async fn run_script(path: PathBuf, config: &AcquisitionConfig) -> Result<()> {
    let text = read_script(&path).await?;

    let mock = MockRig::new(&config.rig);
    let service = AcquisitionService::new(
        Arc::new(mock.rig()),
        Arc::new(TracingNotifier),
        config.acquisition.clone(),
    );

    let report = service.run_acquisition(&text).await?;
    println!(
        "Run {} recorded {} steps to {}",
        report.run_id,
        report.steps_completed,
        report.archive_path.display()
    );
    Ok(())
}
