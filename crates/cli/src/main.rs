use anyhow::Result;
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use tas_workflow_core::SpaceId;

mod commands;
mod config;

use commands::{DocumentFormat, PlanFormat};
use config::CliConfig;

#[derive(Parser, Debug)]
#[command(name = "tas-workflow")]
#[command(about = "TAS Workflow Builder - validate, plan and catalog workflow definitions", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "tas-workflow.toml")]
    config: PathBuf,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, global = true, env = "LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate workflow files or directories
    Validate {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Treat warnings as errors
        #[arg(long)]
        strict: bool,
    },

    /// Show the execution plan for a workflow
    Plan {
        file: PathBuf,

        /// Parameter value as key=value
        #[arg(short, long = "param", value_parser = commands::parse_key_value)]
        params: Vec<(String, String)>,

        #[arg(long, value_enum, default_value_t = PlanFormat::Text)]
        format: PlanFormat,
    },

    /// Substitute parameters and print the resulting definition
    Render {
        file: PathBuf,

        /// Parameter value as key=value
        #[arg(short, long = "param", value_parser = commands::parse_key_value)]
        params: Vec<(String, String)>,

        #[arg(long, value_enum, default_value_t = DocumentFormat::Yaml)]
        format: DocumentFormat,
    },

    /// Print the catalog content digest of a workflow
    Digest { file: PathBuf },

    /// Load a directory into an in-memory catalog and list it
    Catalog {
        /// Defaults to the configured workflow directory
        dir: Option<PathBuf>,

        /// Register everything into this space
        #[arg(long)]
        space: Option<String>,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = CliConfig::load(&args.config)?;

    let level = args
        .log_level
        .clone()
        .or_else(|| config.log_level.clone())
        .unwrap_or_else(|| "info".to_string());

    // Logs go to stderr, command output to stdout
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("tas_workflow={}", level).into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match &config.source {
        Some(path) => tracing::debug!("Loaded configuration from {}", path.display()),
        None => tracing::debug!("Configuration file not found, using defaults"),
    }

    match args.command {
        Command::Validate { paths, strict } => commands::validate(&paths, strict),
        Command::Plan {
            file,
            params,
            format,
        } => commands::plan(&file, &params.into_iter().collect::<HashMap<_, _>>(), format),
        Command::Render {
            file,
            params,
            format,
        } => commands::render(&file, &params.into_iter().collect::<HashMap<_, _>>(), format),
        Command::Digest { file } => commands::digest(&file, &config),
        Command::Catalog { dir, space } => {
            let dir = dir.unwrap_or_else(|| config.workflows.dir.clone());
            commands::catalog(&dir, space.map(SpaceId::new), &config).await
        }
        Command::Config => commands::show_config(&config),
    }
}
