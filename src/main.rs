//! Application entry point.
//!
//! Parses command-line arguments, merges configuration layers and delegates
//! execution to [`runner::run`].

use ninjafy::{cli, runner};
use std::io;
use std::process::ExitCode;
use tracing::Level;
use tracing_subscriber::fmt;

fn main() -> ExitCode {
    let (parsed, matches) = match cli::parse_from(std::env::args_os()) {
        Ok(parsed) => parsed,
        Err(err) => err.exit(),
    };
    let merged = cli::merge_with_config(&parsed, &matches).map(cli::Cli::with_default_command);
    let verbose = merged.as_ref().map_or(parsed.verbose, |config| config.verbose);
    let max_level = if verbose { Level::DEBUG } else { Level::WARN };
    fmt()
        .with_max_level(max_level)
        .with_writer(io::stderr)
        .init();
    let result = merged
        .map_err(anyhow::Error::new)
        .and_then(|config| runner::run(&config));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "ninjafy failed");
            ExitCode::FAILURE
        }
    }
}
