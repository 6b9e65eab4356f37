//! Errors raised while loading the graph document or substituting commands.

use camino::Utf8PathBuf;
use miette::Diagnostic;
use semver::Version;
use thiserror::Error;

/// Errors raised while loading a graph document.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    /// The document could not be read.
    #[error("failed to read build graph {path}")]
    #[diagnostic(code(ninjafy::graph::read))]
    Read {
        /// Path of the document.
        path: Utf8PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The document is not valid JSON or YAML for the graph schema.
    #[error("failed to parse build graph {path}: {message}")]
    #[diagnostic(
        code(ninjafy::graph::parse),
        help("regenerate the graph dump with the upstream tool")
    )]
    Parse {
        /// Path of the document.
        path: Utf8PathBuf,
        /// Parser message.
        message: String,
    },
    /// The document was written for an incompatible format version.
    #[error("unsupported graph version {found}; expected {supported}.x")]
    #[diagnostic(code(ninjafy::graph::version))]
    UnsupportedVersion {
        /// Version found in the document.
        found: Version,
        /// Supported major version.
        supported: u64,
    },
}

/// Errors raised while substituting environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum SubstError {
    /// Expansion kept referring back to itself.
    #[error("substitution of `{text}` exceeded the recursion limit")]
    #[diagnostic(code(ninjafy::subst::recursion))]
    RecursionLimit {
        /// Text being expanded when the limit was hit.
        text: String,
    },
    /// A `${name(...)}` call needs the upstream tool's interpreter.
    #[error("call `{name}(...)` cannot be evaluated outside the upstream tool")]
    #[diagnostic(code(ninjafy::subst::call))]
    UnsupportedCall {
        /// Called function.
        name: String,
    },
    /// A braced expression is neither a variable nor a call.
    #[error("expression `{expr}` is not supported")]
    #[diagnostic(code(ninjafy::subst::expression))]
    UnsupportedExpression {
        /// Raw expression text.
        expr: String,
    },
    /// An attribute suffix such as `.abspath` is not known.
    #[error("unknown attribute `.{attr}` on `{name}`")]
    #[diagnostic(code(ninjafy::subst::attribute))]
    UnknownAttribute {
        /// Variable carrying the attribute.
        name: String,
        /// Attribute name.
        attr: String,
    },
}
