//! uv3dp - Pipeline tool for masked-light resin printer files

use std::process::ExitCode;

fn main() -> ExitCode {
    if let Err(e) = uv3dp::cli::run() {
        eprintln!("Error: {:#}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
