//! Action classification.
//!
//! [`classify`] maps a node to exactly one [`Action`]. It never mutates the
//! node: composite actions and function rewrites are reduced to a command
//! string which is then classified like any other command.

use serde_json::Value;

use super::error::ExportError;
use super::shim;
use crate::graph::{
    ActionSpec, BuildNode, Environment, InlineDepGenerator, ProjectHooks, Segment, SourceRef,
    parse_command,
};

/// Suffix of a command compiling a response file from the remaining sources.
const RSP_SUFFIX: &str = "${TEMPFILE(SOURCES[1:])}";

/// Target suffixes of generated test lists.
const LIST_SUFFIXES: [&str; 2] = ["tests.txt", "benchmarks.txt"];

/// Canonical compile database file name.
pub const COMPILE_DB: &str = "compile_commands.json";

/// Toolchain programs with dedicated rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tool {
    /// C compiler.
    Cc,
    /// C++ compiler.
    Cxx,
    /// C compiler for shared objects.
    ShCc,
    /// C++ compiler for shared objects.
    ShCxx,
    /// Program linker.
    Link,
    /// Shared library linker.
    ShLink,
    /// Static archiver.
    Ar,
    /// Windows resource compiler.
    Rc,
}

impl Tool {
    /// Every tool, in rule emission order.
    pub const ALL: [Self; 8] = [
        Self::Cxx,
        Self::ShCxx,
        Self::Cc,
        Self::ShCc,
        Self::ShLink,
        Self::Link,
        Self::Ar,
        Self::Rc,
    ];

    /// Recognise the leading word of a command, e.g. `$CXX`.
    #[must_use]
    pub fn from_word(word: &str) -> Option<Self> {
        let name = word.strip_prefix('$')?;
        Self::from_name(name)
    }

    /// Recognise a rule name, e.g. `CXX`.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.name() == name)
    }

    /// Variable and rule name of the tool.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cc => "CC",
            Self::Cxx => "CXX",
            Self::ShCc => "SHCC",
            Self::ShCxx => "SHCXX",
            Self::Link => "LINK",
            Self::ShLink => "SHLINK",
            Self::Ar => "AR",
            Self::Rc => "RC",
        }
    }

    /// Whether the tool compiles translation units.
    #[must_use]
    pub const fn is_compile(self) -> bool {
        matches!(self, Self::Cc | Self::Cxx | Self::ShCc | Self::ShCxx)
    }

    /// Whether the tool links programs or shared libraries.
    #[must_use]
    pub const fn is_link(self) -> bool {
        matches!(self, Self::Link | Self::ShLink)
    }
}

/// What a node does, as far as emission is concerned.
#[derive(Debug, Clone, PartialEq)]
pub enum Action<'a> {
    /// Copy the single source to the single target.
    Install,
    /// Expand a substitution dictionary into a template.
    TextSubstitute {
        /// Substitution dictionary.
        subs: &'a Value,
        /// Mark the output executable.
        do_chmod: bool,
    },
    /// Write a list of strings, one per line.
    ListGeneration {
        /// Entries to write.
        items: Vec<String>,
    },
    /// Produce the compile database with the executor's own tool.
    CompileDatabase,
    /// Run a generator that reports its dependencies inline.
    CodeGenWithInlineDeps {
        /// Unsubstituted command.
        command: String,
        /// Generator description.
        generator: &'a InlineDepGenerator,
    },
    /// Run a command that reads its remaining sources from a response file.
    ResponseFileScript {
        /// Unsubstituted command preceding the response file argument.
        prefix: String,
    },
    /// Run a command that is not a toolchain program.
    GenericScript {
        /// Unsubstituted command.
        command: String,
    },
    /// Run a toolchain program through its dedicated rule.
    ToolInvocation {
        /// Program kind.
        tool: Tool,
        /// Unsubstituted command.
        command: String,
    },
    /// Let the upstream tool build the node.
    NeedsUpstreamFallback {
        /// Command text that could not be understood.
        command: String,
    },
}

/// Classification result with node-local side data.
#[derive(Debug, Clone, PartialEq)]
pub struct Classified<'a> {
    /// The chosen action.
    pub action: Action<'a>,
    /// Dependencies introduced by rewriting, such as the script behind a
    /// replaced function action.
    pub extra_implicit: Vec<String>,
    /// Whether the shared-object compatibility check must run.
    pub check_shared_flags: bool,
}

impl<'a> Classified<'a> {
    const fn plain(action: Action<'a>) -> Self {
        Self {
            action,
            extra_implicit: Vec::new(),
            check_shared_flags: false,
        }
    }
}

/// Everything [`classify`] looks at besides the node.
#[derive(Debug, Clone, Copy)]
pub struct ClassifyContext<'a> {
    /// Node environment layered over the global one.
    pub env: Environment<'a>,
    /// Project hooks of the graph.
    pub hooks: &'a ProjectHooks,
    /// Whether the executor binary was found.
    pub ninja_known: bool,
}

/// Raw command text of a node, for diagnostics.
#[must_use]
pub fn command_text(node: &BuildNode) -> String {
    match &node.action {
        ActionSpec::Install => String::from("install(target, source, env)"),
        ActionSpec::Substitute { .. } => String::from("subst(target, source, env)"),
        ActionSpec::Command { command } => command.clone(),
        ActionSpec::Composite { steps } => steps.join("\n"),
        ActionSpec::Function { name } => name.clone(),
    }
}

/// Classify `node`.
///
/// # Errors
///
/// Returns [`ExportError::StructuralMismatch`] when the node has a shape
/// that must match one of a few known forms and does not.
pub fn classify<'a>(
    node: &'a BuildNode,
    ctx: &ClassifyContext<'a>,
) -> Result<Classified<'a>, ExportError> {
    let primary = node.primary_target();
    let raw = command_text(node);
    let mismatch = |reason: &str| ExportError::mismatch(primary, &raw, reason);

    let do_chmod = check_post_actions(node).map_err(mismatch)?;

    match &node.action {
        ActionSpec::Install => {
            if node.targets.len() != 1 || node.sources.len() != 1 {
                return Err(mismatch("install needs exactly one target and one source"));
            }
            return Ok(Classified::plain(Action::Install));
        }
        ActionSpec::Substitute { subs } => {
            return Ok(Classified::plain(Action::TextSubstitute { subs, do_chmod }));
        }
        _ => {}
    }

    if let Some(items) = list_items(node).map_err(mismatch)? {
        return Ok(Classified::plain(Action::ListGeneration { items }));
    }

    if primary == COMPILE_DB && ctx.ninja_known {
        if node.targets.len() != 1 {
            return Err(mismatch("the compile database has a single target"));
        }
        return Ok(Classified::plain(Action::CompileDatabase));
    }

    let mut extra_implicit = Vec::new();
    let mut check_shared_flags = false;
    let (mut text, mut is_function) = match &node.action {
        ActionSpec::Composite { steps } => {
            let reduced =
                shim::reduce_composite(steps, &ctx.env).map_err(|reason| mismatch(&reason))?;
            check_shared_flags = reduced.check_shared_flags;
            (reduced.command, false)
        }
        ActionSpec::Function { name } => (name.clone(), true),
        _ => (raw.clone(), false),
    };

    if let Some(rewrite) = ctx
        .hooks
        .function_commands
        .iter()
        .find(|rewrite| rewrite.function == text)
    {
        text.clone_from(&rewrite.command);
        is_function = false;
        extra_implicit.extend(rewrite.depends.iter().cloned());
    }

    if let Some(inner) = unwrap_tempfile(&text) {
        if inner.contains('(') {
            return Err(mismatch("the command wrapped in TEMPFILE calls a function"));
        }
        text = inner;
    }

    let action = if let Some(prefix) = text.strip_suffix(RSP_SUFFIX) {
        if node.targets.len() != 1 {
            return Err(mismatch("response file commands have a single target"));
        }
        Action::ResponseFileScript {
            prefix: prefix.to_owned(),
        }
    } else if is_function || text.contains('(') {
        Action::NeedsUpstreamFallback { command: text }
    } else {
        classify_command(node, ctx, text).map_err(mismatch)?
    };

    Ok(Classified {
        action,
        extra_implicit,
        check_shared_flags,
    })
}

fn classify_command<'a>(
    node: &BuildNode,
    ctx: &ClassifyContext<'a>,
    command: String,
) -> Result<Action<'a>, &'static str> {
    let first = command.split_whitespace().next().unwrap_or_default();
    if let Some(generator) = ctx
        .hooks
        .inline_dep_generators
        .iter()
        .find(|generator| generator.tool == first && ctx.env.is_truthy(&generator.gate))
    {
        if node.targets.len() < 2 {
            return Err("inline dependency generators produce a source and a header");
        }
        return Ok(Action::CodeGenWithInlineDeps { command, generator });
    }
    if let Some(tool) = Tool::from_word(first) {
        return Ok(Action::ToolInvocation { tool, command });
    }
    Ok(Action::GenericScript { command })
}

/// Validate post actions; returns whether the output must be made executable.
fn check_post_actions(node: &BuildNode) -> Result<bool, &'static str> {
    let [post] = node.post_actions.as_slice() else {
        return if node.post_actions.is_empty() {
            Ok(false)
        } else {
            Err("only a single post action is supported")
        };
    };
    if !matches!(node.action, ActionSpec::Substitute { .. }) {
        return Err("post actions are only supported after text substitution");
    }
    let is_chmod =
        post == "chmod 755 $TARGET" || (post.starts_with("Chmod(") && post.contains("oug+x"));
    if is_chmod {
        Ok(true)
    } else {
        Err("the post action must make the target executable")
    }
}

fn list_items(node: &BuildNode) -> Result<Option<Vec<String>>, &'static str> {
    let [target] = node.targets.as_slice() else {
        return Ok(None);
    };
    if !LIST_SUFFIXES.iter().any(|suffix| target.ends_with(suffix)) {
        return Ok(None);
    }
    if let [single] = node.sources.as_slice() {
        let SourceRef::Value { value } = single else {
            return Err("a single list source must be a value node");
        };
        let Value::Array(entries) = value else {
            return Err("the list value must be an array");
        };
        let items = entries
            .iter()
            .map(|entry| match entry {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect();
        return Ok(Some(items));
    }
    Ok(Some(node.source_names()))
}

/// Recover the command wrapped by a leading `${TEMPFILE("...")}` call.
fn unwrap_tempfile(text: &str) -> Option<String> {
    if !["${TEMPFILE(\"", "${TEMPFILE('"]
        .iter()
        .any(|opening| text.starts_with(opening))
    {
        return None;
    }
    parse_command(text).into_iter().find_map(|segment| match segment {
        Segment::Call(call) if call.name == "TEMPFILE" => call.string_literal(),
        _ => None,
    })
}
