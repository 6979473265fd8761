//! # Command-Line Interface
//!
//! Parses global options, loads configuration, sets up logging and hands the
//! remaining tokens to the [`Pipeline`](crate::pipeline::Pipeline).
//!
//! ## Global Options
//!
//! | Option | Purpose |
//! |--------|---------|
//! | `-v`, `--verbose` | Repeatable: info, debug, then trace logging on stderr |
//! | `--cached-layers N` | Layer cache capacity (default 64) |
//! | `--config PATH` | Configuration file (also `UV3DP_CONFIG`) |
//!
//! ## Entry Point
//!
//! Call [`run()`] to parse arguments and execute the pipeline.

mod app;
mod output;
mod usage;

pub use app::{run, run_with, Cli, Settings};
pub use output::{Output, OutputFormat};
pub use usage::usage;
