//! Resolved build graph handed over by the upstream configuration tool.
//!
//! The upstream tool evaluates its configuration scripts once and dumps the
//! resulting graph as JSON or YAML. This module mirrors that document and
//! loads it. Nodes are read-only input: the exporter never mutates them.
//!
//! ```yaml
//! graph_version: "1.0.0"
//! toolchain: gcc
//! target_os: linux
//! upstream:
//!   program: python3 buildscripts/scons.py
//! nodes:
//!   - targets: [a.o]
//!     sources: [a.cpp]
//!     action: { kind: command, command: "$CXX -o $TARGET -c $SOURCES" }
//! ```

mod env;
mod error;
mod expr;
mod locate;

pub use env::{EnvValue, Environment, Executor, Vars};
pub use error::{GraphError, SubstError};
pub use expr::{Call, Segment, Slice, VarRef, parse_command};
pub use locate::{ToolLocator, WhichResolver};

use camino::Utf8Path;
use semver::Version;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;

/// Major version of the graph document this exporter understands.
pub const SUPPORTED_GRAPH_MAJOR: u64 = 1;

/// Compiler family the graph was configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Toolchain {
    /// GNU compiler collection.
    Gcc,
    /// LLVM clang.
    Clang,
    /// Microsoft Visual C++.
    Msvc,
}

impl Toolchain {
    /// Whether the toolchain speaks the GCC driver dialect.
    #[must_use]
    pub const fn is_gcc_like(self) -> bool {
        matches!(self, Self::Gcc | Self::Clang)
    }
}

/// Operating system the build targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetOs {
    /// Linux.
    Linux,
    /// macOS.
    Darwin,
    /// Windows.
    Windows,
    /// Any other POSIX system.
    Other,
}

impl TargetOs {
    /// Whether the target is Windows.
    #[must_use]
    pub const fn is_windows(self) -> bool {
        matches!(self, Self::Windows)
    }
}

/// Complete graph document produced by the upstream tool.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphDocument {
    /// Semantic version of the document format.
    pub graph_version: Version,
    /// Compiler family.
    pub toolchain: Toolchain,
    /// Target operating system.
    pub target_os: TargetOs,
    /// Global construction environment.
    #[serde(default)]
    pub env: Vars,
    /// Program locations the upstream tool already resolved.
    #[serde(default)]
    pub tools: BTreeMap<String, camino::Utf8PathBuf>,
    /// How to invoke the upstream tool again.
    pub upstream: Upstream,
    /// Derived nodes, one per executor.
    #[serde(default)]
    pub nodes: Vec<BuildNode>,
    /// Alias table.
    #[serde(default)]
    pub aliases: Vec<AliasSpec>,
    /// Default targets.
    #[serde(default)]
    pub defaults: Vec<String>,
    /// Project-specific hooks.
    #[serde(default)]
    pub project: ProjectHooks,
}

/// Invocation details for the upstream configuration tool.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Upstream {
    /// Command used to run the upstream tool, for example `python3 scons.py`.
    pub program: String,
    /// Arguments the export was configured with.
    #[serde(default)]
    pub args: Vec<String>,
    /// Flag that silences the upstream tool's own progress output.
    #[serde(default = "default_quiet_flag")]
    pub quiet_flag: String,
    /// Configuration scripts whose edits require a re-export.
    #[serde(default)]
    pub config_files: Vec<String>,
    /// Recursive globs locating further configuration scripts.
    #[serde(default)]
    pub config_globs: Vec<GlobSpec>,
}

fn default_quiet_flag() -> String {
    String::from("-Q")
}

/// File name pattern searched recursively below `root`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobSpec {
    /// Directory to walk. A leading `~/` refers to the home directory.
    pub root: String,
    /// File name pattern, for example `*.py`.
    pub pattern: String,
}

/// Input of a node: a file path or an in-memory value.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SourceRef {
    /// A file system node.
    Path(String),
    /// An in-memory value node.
    Value {
        /// The value carried by the node.
        value: serde_json::Value,
    },
}

impl SourceRef {
    /// Return the path of a file node.
    #[must_use]
    pub fn as_path(&self) -> Option<&str> {
        match self {
            Self::Path(path) => Some(path),
            Self::Value { .. } => None,
        }
    }

    /// Render the node the way it appears on a command line.
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            Self::Path(path) => path.clone(),
            Self::Value { value } => match value {
                serde_json::Value::String(text) => text.clone(),
                other => other.to_string(),
            },
        }
    }
}

/// Action attached to a node, as reported by the upstream tool.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum ActionSpec {
    /// The stock install (copy) action.
    Install,
    /// The stock text substitution action.
    Substitute {
        /// Substitution dictionary: an object or a list of `[pattern, replacement]` pairs.
        subs: serde_json::Value,
    },
    /// A command string action. Multi-command actions are newline separated.
    Command {
        /// Unsubstituted command text.
        command: String,
    },
    /// A list action, one entry per step.
    Composite {
        /// Stringified steps in execution order.
        steps: Vec<String>,
    },
    /// A Python function action, stringified as `name(target, source, env)`.
    Function {
        /// Stringified function call.
        name: String,
    },
}

/// Results of the upstream library dependency callbacks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Libdeps {
    /// Output of the object-mode resolver.
    #[serde(default)]
    pub objects: Vec<String>,
    /// Output of the library-mode resolver.
    #[serde(default)]
    pub libraries: Vec<String>,
}

/// A resolved unit of work.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildNode {
    /// Output paths; the first is primary.
    pub targets: Vec<String>,
    /// Inputs.
    #[serde(default)]
    pub sources: Vec<SourceRef>,
    /// Explicit extra dependencies.
    #[serde(default)]
    pub depends: Vec<String>,
    /// Dependencies found by the upstream scanners.
    #[serde(default)]
    pub implicit: Vec<String>,
    /// Rebuild on every run.
    #[serde(default)]
    pub always_build: bool,
    /// Node-local environment overrides.
    #[serde(default)]
    pub env: Vars,
    /// The action to perform.
    pub action: ActionSpec,
    /// Stringified post actions.
    #[serde(default)]
    pub post_actions: Vec<String>,
    /// Library dependency resolution results for link steps.
    #[serde(default)]
    pub libdeps: Option<Libdeps>,
    /// Sources of the node's first child, such as a test program's objects.
    #[serde(default)]
    pub child_sources: Vec<String>,
    /// Sources that were not compiled as shared objects.
    #[serde(default)]
    pub static_sources: Vec<String>,
    /// Versioned library symlinks requested for a shared library.
    #[serde(default)]
    pub shlib_links: Vec<String>,
}

impl BuildNode {
    /// Primary output path.
    #[must_use]
    pub fn primary_target(&self) -> &str {
        self.targets.first().map_or("", String::as_str)
    }

    /// File sources, skipping in-memory values.
    #[must_use]
    pub fn source_paths(&self) -> Vec<String> {
        self.sources
            .iter()
            .filter_map(SourceRef::as_path)
            .map(str::to_owned)
            .collect()
    }

    /// All sources as they appear on a command line.
    #[must_use]
    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(SourceRef::display_name).collect()
    }
}

/// Entry of the upstream alias table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AliasSpec {
    /// Alias name.
    pub name: String,
    /// Constituent targets.
    #[serde(default)]
    pub sources: Vec<String>,
    /// `true` when the alias is a plain grouping without a builder.
    #[serde(default = "default_true")]
    pub pure: bool,
}

const fn default_true() -> bool {
    true
}

/// Function action with a known flat command equivalent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FunctionCommand {
    /// Stringified function action to match, e.g. `jsToH(target, source, env)`.
    pub function: String,
    /// Replacement command using upstream placeholders.
    pub command: String,
    /// Scripts the replacement depends on.
    #[serde(default)]
    pub depends: Vec<String>,
}

/// Code generator able to report its own dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InlineDepGenerator {
    /// Leading command word, e.g. `$IDLC`.
    pub tool: String,
    /// Environment flag that must be truthy for the split to apply.
    pub gate: String,
    /// Argument that makes the tool print its dependencies.
    pub flag: String,
    /// Prefix of the dependency lines in the tool's output.
    pub deps_prefix: String,
    /// Globs locating the generator's own scripts.
    #[serde(default)]
    pub script_globs: Vec<String>,
}

impl InlineDepGenerator {
    fn idl() -> Self {
        Self {
            tool: String::from("$IDLC"),
            gate: String::from("IDL_HAS_INLINE_DEPENDENCIES"),
            flag: String::from("--write-dependencies-inline"),
            deps_prefix: String::from("import file:"),
            script_globs: vec![
                String::from("buildscripts/idl/*.py"),
                String::from("buildscripts/idl/idl/*.py"),
            ],
        }
    }
}

/// Layout of the pre-compiled header setup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PchLayout {
    /// Source directory holding the header files.
    pub headers_dir: String,
    /// Build directory that receives the headers, relative to the build root.
    pub dir: String,
    /// Include prefix under which the headers are reachable, e.g. `mongo/`.
    pub include_prefix: String,
    /// Only sources under this prefix use the headers.
    pub source_prefix: String,
    /// Source whose compile flags seed the header compile.
    pub flags_source: String,
    /// Header used by library code.
    pub header: String,
    /// Header used by test code.
    pub test_header: String,
}

/// Project-specific knobs that refine the export.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectHooks {
    /// Function actions with flat command equivalents.
    #[serde(default)]
    pub function_commands: Vec<FunctionCommand>,
    /// Generators whose dependencies are reported inline.
    #[serde(default = "default_generators")]
    pub inline_dep_generators: Vec<InlineDepGenerator>,
    /// Target prefixes excluded from the export.
    #[serde(default = "default_skip_prefixes")]
    pub skip_prefixes: Vec<String>,
    /// Function actions whose nodes are excluded from the export.
    #[serde(default = "default_skip_functions")]
    pub skip_functions: Vec<String>,
    /// Install directories whose contents get run shortcuts.
    #[serde(default = "default_test_dirs")]
    pub test_dirs: Vec<String>,
    /// Output name fragments of unusually slow compilation units.
    #[serde(default)]
    pub slow_compile_units: Vec<String>,
    /// Aliases with builders that are tolerated and left out.
    #[serde(default)]
    pub compound_aliases: Vec<String>,
    /// Order-only dependencies of the compile database.
    #[serde(default)]
    pub compile_db_order_only: Vec<String>,
    /// Command checking error codes before links.
    #[serde(default)]
    pub error_code_check: Option<String>,
    /// Command verifying the distributed compile setup on macOS.
    #[serde(default)]
    pub icecream_verify: Option<String>,
    /// Script that packages a compiler for distributed compilation.
    #[serde(default)]
    pub icecc_create_env: Option<String>,
    /// Pre-compiled header layout.
    #[serde(default)]
    pub pch: Option<PchLayout>,
}

impl Default for ProjectHooks {
    fn default() -> Self {
        Self {
            function_commands: Vec::new(),
            inline_dep_generators: default_generators(),
            skip_prefixes: default_skip_prefixes(),
            skip_functions: default_skip_functions(),
            test_dirs: default_test_dirs(),
            slow_compile_units: Vec::new(),
            compound_aliases: Vec::new(),
            compile_db_order_only: Vec::new(),
            error_code_check: None,
            icecream_verify: None,
            icecc_create_env: None,
            pch: None,
        }
    }
}

fn default_generators() -> Vec<InlineDepGenerator> {
    vec![InlineDepGenerator::idl()]
}

fn default_skip_prefixes() -> Vec<String> {
    vec![String::from("build/install/")]
}

fn default_skip_functions() -> Vec<String> {
    vec![String::from("write_uuid_to_file")]
}

fn default_test_dirs() -> Vec<String> {
    vec![String::from("build/unittests"), String::from("build/benchmark")]
}

impl GraphDocument {
    /// Parse a document, choosing YAML or JSON by the file extension.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Parse`] when the text is malformed and
    /// [`GraphError::UnsupportedVersion`] for an incompatible major version.
    pub fn from_str_named(text: &str, path: &Utf8Path) -> Result<Self, GraphError> {
        let is_yaml = matches!(path.extension(), Some("yml" | "yaml"));
        let doc: Self = if is_yaml {
            serde_saphyr::from_str(text).map_err(|err| GraphError::Parse {
                path: path.to_owned(),
                message: err.to_string(),
            })?
        } else {
            serde_json::from_str(text).map_err(|err| GraphError::Parse {
                path: path.to_owned(),
                message: err.to_string(),
            })?
        };
        if doc.graph_version.major != SUPPORTED_GRAPH_MAJOR {
            return Err(GraphError::UnsupportedVersion {
                found: doc.graph_version,
                supported: SUPPORTED_GRAPH_MAJOR,
            });
        }
        Ok(doc)
    }

    /// Read and parse the document at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Read`] when the file cannot be read, otherwise
    /// the errors of [`GraphDocument::from_str_named`].
    pub fn from_path(path: &Utf8Path) -> Result<Self, GraphError> {
        let text = fs::read_to_string(path).map_err(|source| GraphError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::from_str_named(&text, path)
    }

    /// Global environment of the document.
    #[must_use]
    pub const fn environment(&self) -> Environment<'_> {
        Environment::new(&self.env, self.target_os)
    }
}
