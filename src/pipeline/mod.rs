//! # Pipeline Interpreter
//!
//! Threads one printable through a flat list of tokens:
//!
//! ```text
//! INFILE [command [options] | OUTFILE [options]]...
//! ```
//!
//! ## States
//!
//! | State | Command token | Format token |
//! |-------|---------------|--------------|
//! | Empty | `NoInput` error | decode, wrap in the layer cache, go to Loaded |
//! | Loaded | filter, replace the live printable | encode; the live printable is kept |
//!
//! A `help` token at any point, or no tokens at all, asks for usage.
//! The first failure aborts the run; outputs already written stay written.
//!
//! ## Key Types
//!
//! - [`Pipeline`] - The interpreter, bound to a pair of registries
//! - [`Evaluation`] - What a successful run did
//! - [`PipelineError`] - The stage that failed and why

use std::path::{Path, PathBuf};
use std::rc::Rc;

use thiserror::Error;

use crate::command::{CommandError, CommandRegistry};
use crate::domain::{CacheStats, CachedPrintable, Printable, PrintableError, DEFAULT_CACHED_LAYERS};
use crate::format::{FormatError, FormatRegistry};

/// Failure categories, one per kind of pipeline error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnrecognizedFormat,
    BadOption,
    MissingFilename,
    NoInput,
    Decode,
    Encode,
    InvalidCapacity,
    Filter,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("at '{token}'")]
    Format {
        token: String,
        #[source]
        source: FormatError,
    },

    #[error("at '{command}'")]
    Command {
        command: &'static str,
        #[source]
        source: CommandError,
    },

    #[error("'{command}' needs an input file before it")]
    NoInput { command: String },

    #[error("Cannot cache layers")]
    Cache(#[source] PrintableError),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Format { source, .. } => match source {
                FormatError::Unrecognized(_) => ErrorKind::UnrecognizedFormat,
                FormatError::MissingFilename { .. } => ErrorKind::MissingFilename,
                FormatError::BadOption { .. } => ErrorKind::BadOption,
                FormatError::Decode { .. } => ErrorKind::Decode,
                FormatError::Encode { .. } => ErrorKind::Encode,
            },
            PipelineError::Command { source, .. } => match source {
                CommandError::BadOption { .. } => ErrorKind::BadOption,
                CommandError::Layer(_) => ErrorKind::Filter,
            },
            PipelineError::NoInput { .. } => ErrorKind::NoInput,
            PipelineError::Cache(_) => ErrorKind::InvalidCapacity,
        }
    }
}

/// What a run did, in order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    /// The decoded input, if any format token was reached
    pub input: Option<PathBuf>,

    /// Commands applied, in order
    pub filters: Vec<&'static str>,

    /// Files written, in order
    pub outputs: Vec<PathBuf>,

    pub cache: Option<CacheStats>,
}

/// Result of a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// No tokens, or `help`: the caller should print usage
    ShowUsage,

    /// Every token was consumed
    Finished(Summary),
}

/// The interpreter
///
/// Registries are borrowed read-only for the whole run.
pub struct Pipeline<'a> {
    formats: &'a FormatRegistry,
    commands: &'a CommandRegistry,
    cached_layers: usize,
}

type Cache = Rc<CachedPrintable<Box<dyn Printable>>>;

impl<'a> Pipeline<'a> {
    pub fn new(formats: &'a FormatRegistry, commands: &'a CommandRegistry) -> Self {
        Self {
            formats,
            commands,
            cached_layers: DEFAULT_CACHED_LAYERS,
        }
    }

    /// Sets the layer cache capacity used after the first decode
    pub fn cached_layers(mut self, cached_layers: usize) -> Self {
        self.cached_layers = cached_layers;
        self
    }

    /// Runs the pipeline over `args`
    pub fn evaluate(&self, args: &[String]) -> Result<Evaluation, PipelineError> {
        if args.is_empty() {
            return Ok(Evaluation::ShowUsage);
        }

        let mut live: Option<Box<dyn Printable>> = None;
        let mut cache: Option<Cache> = None;
        let mut summary = Summary::default();
        let mut args = args.to_vec();

        while let Some(token) = args.first().cloned() {
            if token == "help" {
                return Ok(Evaluation::ShowUsage);
            }
            let rest = &args[1..];

            args = if let Some(mut command) = self.commands.resolve(&token) {
                let name = command.name();
                command
                    .parse(rest)
                    .map_err(|source| PipelineError::Command { command: name, source })?;
                tracing::info!(command = name, args = ?rest, "filter");

                let input = live
                    .take()
                    .ok_or_else(|| PipelineError::NoInput { command: token.clone() })?;
                let next = command.remaining_args().to_vec();

                let output = command
                    .filter(input)
                    .map_err(|source| PipelineError::Command { command: name, source })?;
                live = Some(output);
                summary.filters.push(name);
                next
            } else {
                let stage_error = |source| PipelineError::Format {
                    token: token.clone(),
                    source,
                };

                let mut format = self.formats.resolve(&token).map_err(stage_error)?;
                format.parse(rest).map_err(stage_error)?;
                tracing::info!(format = format.name(), args = ?rest, "file");

                let path = format.path().map(Path::to_path_buf).unwrap_or_default();
                let next = format.remaining_args().to_vec();

                match live.take() {
                    None => {
                        let decoded = format.decode().map_err(stage_error)?;
                        tracing::debug!(
                            path = %path.display(),
                            layers = decoded.layer_count(),
                            "decoded input"
                        );

                        let cached = Rc::new(
                            CachedPrintable::new(decoded, self.cached_layers)
                                .map_err(PipelineError::Cache)?,
                        );
                        cache = Some(Rc::clone(&cached));
                        live = Some(Box::new(cached));
                        summary.input = Some(path);
                    }
                    Some(printable) => {
                        format.encode(printable.as_ref()).map_err(stage_error)?;
                        tracing::debug!(path = %path.display(), "wrote output");

                        live = Some(printable);
                        summary.outputs.push(path);
                    }
                }
                next
            };
        }

        if let Some(cache) = cache {
            let stats = cache.stats();
            tracing::debug!(
                hits = stats.hits,
                misses = stats.misses,
                evictions = stats.evictions,
                "layer cache"
            );
            summary.cache = Some(stats);
        }
        Ok(Evaluation::Finished(summary))
    }
}
