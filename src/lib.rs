//! uv3dp - A pipeline tool for masked-light resin printer files
//!
//! A command line names an input file, any number of transformations and
//! one or more output files. The input is decoded once, cached layer by
//! layer, filtered in order and encoded to each output.

pub mod cli;
pub mod command;
pub mod config;
pub mod domain;
pub mod format;
pub mod options;
pub mod pipeline;

pub use domain::{CachedPrintable, Layer, MemoryPrintable, Printable, PrintableError, Properties};
pub use pipeline::{Evaluation, Pipeline, PipelineError};
