//! Option parsing for pipeline stages
//!
//! Every format and command owns a `clap::Args` struct. A stage parses only
//! its leading option tokens: parsing stops at the first token that is not an
//! option, and that token plus everything after it is handed back untouched
//! for the next stage.

use clap::{Args, CommandFactory, FromArgMatches, Parser};

#[derive(Parser)]
#[command(disable_help_flag = true, disable_version_flag = true)]
struct Stage<T: Args> {
    #[command(flatten)]
    options: T,

    #[arg(trailing_var_arg = true, hide = true)]
    rest: Vec<String>,
}

/// Parses the leading options of `args` for the stage named `stage`
///
/// Returns the parsed options and the unconsumed tokens. On failure the
/// error is a one-line description suitable for a diagnostic.
pub fn parse<T: Args>(stage: &'static str, args: &[String]) -> Result<(T, Vec<String>), String> {
    let matches = Stage::<T>::command()
        .name(stage)
        .no_binary_name(true)
        .try_get_matches_from(args)
        .map_err(describe)?;

    let parsed = Stage::<T>::from_arg_matches(&matches).map_err(describe)?;
    Ok((parsed.options, parsed.rest))
}

/// Renders the option list for a stage
pub fn help<T: Args>(stage: &'static str) -> String {
    Stage::<T>::command()
        .name(stage)
        .no_binary_name(true)
        .help_template("{options}")
        .render_help()
        .to_string()
}

fn describe(err: clap::Error) -> String {
    err.render()
        .to_string()
        .lines()
        .next()
        .unwrap_or_default()
        .trim_start_matches("error: ")
        .to_string()
}
