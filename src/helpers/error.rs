//! Helper program failures.

use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

/// Errors raised by the helper programs run from the emitted file.
#[derive(Debug, Error, Diagnostic)]
pub enum HelperError {
    /// A file could not be read or written.
    #[error("I/O error on {path}")]
    #[diagnostic(code(ninjafy::helper::io))]
    Io {
        /// Path being accessed.
        path: Utf8PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
    /// The response file does not hold the expected JSON payload.
    #[error("malformed payload in {path}")]
    #[diagnostic(
        code(ninjafy::helper::payload),
        help("the response file is written by Ninja from the exported build file; re-export it")
    )]
    Payload {
        /// Response file path.
        path: Utf8PathBuf,
        /// Parser failure.
        #[source]
        source: serde_json::Error,
    },
    /// A substitution key is not a valid regular expression.
    #[error("invalid substitution pattern `{pattern}`")]
    #[diagnostic(code(ninjafy::helper::pattern))]
    Pattern {
        /// Offending key.
        pattern: String,
        /// Compilation failure.
        #[source]
        source: regex::Error,
    },
}

impl HelperError {
    pub(crate) fn io(path: &camino::Utf8Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_owned(),
            source,
        }
    }
}
