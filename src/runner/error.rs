//! Error types for the runner module.
//!
//! Kept in a submodule to scope the lint suppression for derive-macro
//! expansion narrowly.

// The unused_assignments lint fires on thiserror/miette derive expansion in
// some Rust versions only, so `#[expect]` cannot be used here.
#![allow(
    clippy::allow_attributes,
    clippy::allow_attributes_without_reason,
    unused_assignments
)]

use camino::Utf8PathBuf;
use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised during command execution.
#[derive(Debug, Error, Diagnostic)]
pub enum RunnerError {
    /// The build graph file does not exist at the expected path.
    #[error("build graph `{path}` not found")]
    #[diagnostic(
        code(ninjafy::runner::graph_not_found),
        help("dump the graph from the upstream tool first, or pass --graph")
    )]
    GraphNotFound {
        /// The path that was attempted.
        path: Utf8PathBuf,
    },
    /// A path given on the command line is not valid UTF-8.
    #[error("path `{}` is not valid UTF-8", path.display())]
    #[diagnostic(code(ninjafy::runner::non_utf8_path))]
    NonUtf8Path {
        /// Offending path.
        path: PathBuf,
    },
}
