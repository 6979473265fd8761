//! # Pipeline Commands
//!
//! Commands transform the live printable between an input file and the
//! outputs that follow it.
//!
//! ## Built-in Commands
//!
//! | Name | Effect |
//! |------|--------|
//! | `info` | Prints properties (and optionally per-layer details); passes the input through |
//! | `decimate` | Erodes the outermost pixels of every island in each layer |
//! | `exposure` | Alters exposure, lift and bottom-layer settings |
//!
//! ## Key Types
//!
//! - [`Commander`] - One parsed command, ready to filter a printable
//! - [`CommandRegistry`] - Maps command names to constructors

mod decimate;
mod exposure;
mod info;
mod registry;

use thiserror::Error;

use crate::domain::{Printable, PrintableError};

pub use decimate::{Decimate, DecimateOptions, Decimated};
pub use exposure::{Exposed, ExposureCommand, ExposureOptions};
pub use info::{Info, InfoOptions, InfoReport};
pub use registry::{CommandEntry, CommandFactory, CommandRegistry};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{command}: {message}")]
    BadOption {
        command: &'static str,
        message: String,
    },

    #[error(transparent)]
    Layer(#[from] PrintableError),
}

/// A filter stage of the pipeline
///
/// Like a format, a commander is single-use: it is parsed once and then
/// consumed by [`Commander::filter`].
pub trait Commander {
    /// Registry name of this command
    fn name(&self) -> &'static str;

    /// Consumes this command's leading options
    fn parse(&mut self, args: &[String]) -> Result<(), CommandError>;

    /// Tokens left over after [`Commander::parse`]
    fn remaining_args(&self) -> &[String];

    /// Transforms `input` into its replacement
    fn filter(self: Box<Self>, input: Box<dyn Printable>) -> Result<Box<dyn Printable>, CommandError>;
}

/// Parses a command's options with [`crate::options::parse`]
pub(crate) fn parse_options<T: clap::Args>(
    command: &'static str,
    args: &[String],
) -> Result<(T, Vec<String>), CommandError> {
    crate::options::parse::<T>(command, args)
        .map_err(|message| CommandError::BadOption { command, message })
}
