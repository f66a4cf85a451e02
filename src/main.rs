// Audit aggregator - main.rs
// Parses the CLI and hands off to the selected command.

use std::process::ExitCode;

use audit_aggregator::cli::{dispatch, Cli};
use clap::Parser;

fn main() -> ExitCode {
    let cli = Cli::parse();
    match dispatch(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("audit_aggregator: {e:#}");
            ExitCode::FAILURE
        }
    }
}
