//! Main CLI application structure

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser};
use tracing::Level;

use super::output::{Output, OutputFormat};
use super::usage::usage;
use crate::command::CommandRegistry;
use crate::config::Config;
use crate::format::FormatRegistry;
use crate::pipeline::{Evaluation, Pipeline};

#[derive(Parser, Debug)]
#[command(name = "uv3dp")]
#[command(version, about = "Pipeline tool for masked-light resin printer files")]
#[command(override_usage = "uv3dp [OPTIONS] INFILE [command [options] | OUTFILE [options]]...")]
pub struct Cli {
    /// Increase verbosity (repeatable)
    #[arg(long, short = 'v', action = ArgAction::Count)]
    pub verbose: u8,

    /// Number of decoded layers to keep in memory
    #[arg(long, value_name = "LAYERS")]
    pub cached_layers: Option<usize>,

    /// Configuration file
    #[arg(long, env = "UV3DP_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Input file, then commands and output files, each with its options
    #[arg(value_name = "PIPELINE", trailing_var_arg = true)]
    pub pipeline: Vec<String>,
}

/// Effective settings after merging flags, config file and defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub verbosity: u8,
    pub cached_layers: usize,
}

impl Cli {
    /// Flags win over the config file, which wins over defaults
    pub fn settings(&self, config: &Config) -> Settings {
        Settings {
            verbosity: if self.verbose > 0 {
                self.verbose
            } else {
                config.log.verbosity
            },
            cached_layers: self
                .cached_layers
                .unwrap_or(config.pipeline.cached_layers),
        }
    }
}

fn log_level(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn init_logging(verbosity: u8) {
    let initialized = tracing_subscriber::fmt()
        .with_max_level(log_level(verbosity))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();

    // A subscriber may already be installed when embedded
    if initialized.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Parses the command line and runs the pipeline
pub fn run() -> Result<()> {
    run_with(Cli::parse())
}

/// Runs the pipeline for already-parsed arguments
pub fn run_with(cli: Cli) -> Result<()> {
    let config_path = Config::resolve_path(cli.config.as_deref());
    let config = Config::load(cli.config.as_deref())?;
    let settings = cli.settings(&config);
    init_logging(settings.verbosity);
    match &config_path {
        Some(path) => tracing::debug!(path = %path.display(), ?config, "loaded configuration"),
        None => tracing::debug!("no configuration file, using defaults"),
    }

    let formats = FormatRegistry::builtin();
    let commands = CommandRegistry::builtin();
    let pipeline = Pipeline::new(&formats, &commands).cached_layers(settings.cached_layers);

    match pipeline.evaluate(&cli.pipeline)? {
        Evaluation::ShowUsage => {
            Output::new(OutputFormat::Text).text(&usage(&formats, &commands));
        }
        Evaluation::Finished(summary) => {
            tracing::info!(
                input = ?summary.input,
                filters = ?summary.filters,
                outputs = summary.outputs.len(),
                "pipeline finished"
            );
        }
    }
    Ok(())
}
