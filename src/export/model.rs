//! In-memory form of the emitted Ninja file.

use indexmap::IndexMap;
use std::collections::{BTreeMap, BTreeSet};

/// A build statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Edge {
    /// Rule name, or `phony`.
    pub rule: String,
    /// Explicit outputs; the first is primary.
    pub outputs: Vec<String>,
    /// Outputs Ninja tracks without passing them to the command.
    pub implicit_outputs: Vec<String>,
    /// Explicit inputs (`$in`).
    pub inputs: Vec<String>,
    /// Implicit dependencies.
    pub implicit: Vec<String>,
    /// Order-only dependencies.
    pub order_only: Vec<String>,
    /// Edge-level variable bindings, in insertion order.
    pub variables: IndexMap<String, String>,
}

impl Edge {
    /// Start an edge for `rule` producing `outputs`.
    #[must_use]
    pub fn new(rule: impl Into<String>, outputs: Vec<String>) -> Self {
        Self {
            rule: rule.into(),
            outputs,
            ..Self::default()
        }
    }

    /// Set the explicit inputs.
    #[must_use]
    pub fn inputs(mut self, inputs: Vec<String>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Set the implicit dependencies.
    #[must_use]
    pub fn implicit(mut self, implicit: Vec<String>) -> Self {
        self.implicit = implicit;
        self
    }

    /// Set the order-only dependencies.
    #[must_use]
    pub fn order_only(mut self, order_only: Vec<String>) -> Self {
        self.order_only = order_only;
        self
    }

    /// Bind an edge-level variable.
    #[must_use]
    pub fn var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Primary output.
    #[must_use]
    pub fn primary(&self) -> &str {
        self.outputs.first().map_or("", String::as_str)
    }
}

/// A rule declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rule {
    /// Rule name.
    pub name: String,
    /// Command template.
    pub command: String,
    /// Progress line.
    pub description: Option<String>,
    /// Dependency file written by the command.
    pub depfile: Option<String>,
    /// Dependency format (`gcc` or `msvc`).
    pub deps: Option<String>,
    /// Pool the rule runs in.
    pub pool: Option<String>,
    /// Re-stat outputs after the command ran.
    pub restat: bool,
    /// Marks the regeneration rule.
    pub generator: bool,
    /// Response file path.
    pub rspfile: Option<String>,
    /// Response file contents.
    pub rspfile_content: Option<String>,
}

impl Rule {
    /// Start a rule running `command`.
    #[must_use]
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            ..Self::default()
        }
    }

    /// Set the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the pool, ignoring `None`.
    #[must_use]
    pub fn pool(mut self, pool: Option<&str>) -> Self {
        self.pool = pool.map(str::to_owned);
        self
    }

    /// Use a response file at `$out.rsp` holding `content`.
    #[must_use]
    pub fn rsp(mut self, content: impl Into<String>) -> Self {
        self.rspfile = Some(String::from("$out.rsp"));
        self.rspfile_content = Some(content.into());
        self
    }

    /// Enable `restat`.
    #[must_use]
    pub const fn restat(mut self) -> Self {
        self.restat = true;
        self
    }
}

/// A pool declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pool {
    /// Pool name.
    pub name: String,
    /// Maximum concurrent jobs.
    pub depth: usize,
}

/// Self-regeneration edge and its dependency list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Regenerator {
    /// The Ninja file being regenerated.
    pub output: String,
    /// Command re-running the upstream tool.
    pub command: String,
    /// Companion dependency file.
    pub depfile: String,
    /// Existing configuration-affecting files, sorted and deduplicated.
    pub deps: Vec<String>,
}

impl Regenerator {
    /// Contents of the companion dependency file.
    #[must_use]
    pub fn depfile_contents(&self) -> String {
        format!("{}: {}", self.output, self.deps.join(" "))
    }
}

/// The complete Ninja file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NinjaFile {
    /// Executor binary for the `#!` line.
    pub shebang: Option<String>,
    /// Directory for Ninja's own log files.
    pub builddir: Option<String>,
    /// Quoted upstream arguments.
    pub upstream_args: String,
    /// Pools.
    pub pools: Vec<Pool>,
    /// Global variables.
    pub vars: BTreeMap<String, String>,
    /// Interned overrides per variable, indexed by suffix.
    pub overrides: BTreeMap<String, Vec<String>>,
    /// Rules in emission order.
    pub rules: Vec<Rule>,
    /// Edges in emission order.
    pub edges: Vec<Edge>,
    /// Alias table.
    pub aliases: BTreeMap<String, Vec<String>>,
    /// Generated headers aggregated by `_generated_headers`.
    pub generated_headers: BTreeSet<String>,
    /// Regeneration edge.
    pub regenerator: Regenerator,
    /// Default targets.
    pub defaults: Vec<String>,
}
