//! Fatal export failures.
//!
//! Every variant aborts the whole export; the runner never writes a partial
//! file. Recoverable degradations are logged instead of raised.

use miette::Diagnostic;
use thiserror::Error;

use crate::graph::SubstError;

/// Errors that abort an export.
#[derive(Debug, Error, Diagnostic)]
pub enum ExportError {
    /// A node's action does not have one of the expected composite shapes.
    #[error("unexpected action shape for {node}: {reason}\ncommand: {command}")]
    #[diagnostic(
        code(ninjafy::export::structural_mismatch),
        help("the upstream tool composes this action differently than expected")
    )]
    StructuralMismatch {
        /// Primary target of the offending node.
        node: String,
        /// Raw command of the node.
        command: String,
        /// What did not match.
        reason: String,
    },
    /// Two edges of the same tool rewrote to different command templates.
    #[error(
        "tool {tool} is used with two different command templates\nfirst: {existing}\nsecond: {conflicting}"
    )]
    #[diagnostic(code(ninjafy::export::rule_conflict))]
    RuleConflict {
        /// Tool name shared by the edges.
        tool: String,
        /// Template recorded first.
        existing: String,
        /// Template that disagreed.
        conflicting: String,
    },
    /// A placeholder survived rewriting.
    #[error("unhandled placeholder `{placeholder}` in command for {node}: {command}")]
    #[diagnostic(code(ninjafy::export::unresolved_placeholder))]
    UnresolvedPlaceholder {
        /// Primary target of the offending node.
        node: String,
        /// The placeholder text.
        placeholder: String,
        /// Rewritten command.
        command: String,
    },
    /// A toolchain program could not be located.
    #[error("unable to find the location of tool {tool} used by {node}")]
    #[diagnostic(code(ninjafy::export::missing_tool))]
    MissingTool {
        /// Tool variable, e.g. `$CXX`.
        tool: String,
        /// Primary target of the node needing it.
        node: String,
    },
    /// Variable substitution failed for a node.
    #[error("failed to expand the command for {node}")]
    #[diagnostic(code(ninjafy::export::substitution))]
    Substitution {
        /// Primary target of the node.
        node: String,
        /// Underlying failure.
        #[source]
        #[diagnostic_source]
        source: SubstError,
    },
    /// Two edges claim the same primary output.
    #[error("{output} is produced by more than one edge")]
    #[diagnostic(code(ninjafy::export::duplicate_output))]
    DuplicateOutput {
        /// The contested output.
        output: String,
    },
    /// A shared library links an object that was not built as shared.
    #[error("source {source_path} is static and is not compatible with shared target {target}")]
    #[diagnostic(code(ninjafy::export::static_in_shared))]
    StaticObjectInSharedLibrary {
        /// Shared library being linked.
        target: String,
        /// Offending object.
        source_path: String,
    },
    /// A helper payload could not be serialised.
    #[error("failed to serialise the helper payload for {node}")]
    #[diagnostic(code(ninjafy::export::payload))]
    Payload {
        /// Primary target of the node.
        node: String,
        /// Underlying failure.
        #[source]
        source: serde_json::Error,
    },
    /// An exporter-owned variable is already bound by the graph.
    #[error("variable {name} is reserved by the exporter")]
    #[diagnostic(code(ninjafy::export::reserved_variable))]
    ReservedVariable {
        /// Variable name.
        name: String,
    },
    /// The export options cannot be honoured for this graph.
    #[error("{message}")]
    #[diagnostic(code(ninjafy::export::configuration))]
    Configuration {
        /// Description of the problem.
        message: String,
    },
}

impl ExportError {
    pub(crate) fn mismatch(node: &str, command: &str, reason: impl Into<String>) -> Self {
        Self::StructuralMismatch {
            node: node.to_owned(),
            command: command.to_owned(),
            reason: reason.into(),
        }
    }

    pub(crate) fn subst(node: &str) -> impl FnOnce(SubstError) -> Self + '_ {
        move |source| Self::Substitution {
            node: node.to_owned(),
            source,
        }
    }
}
