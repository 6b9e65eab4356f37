//! Per-node edge emission.

use indexmap::IndexMap;
use serde_json::json;
use tracing::warn;

use super::classify::{Action, ClassifyContext, Tool, classify, command_text};
use super::error::ExportError;
use super::features::{ALWAYS_BUILD, GENERATED_HEADERS};
use super::libdeps;
use super::model::Edge;
use super::rewrite::{
    PER_EDGE_VARIABLES, escape_value, make_command, split_words, to_template, variable_words,
};
use super::rules::{
    COMPILE_DB, EXEC, EXEC_RSP, INSTALL, PHONY, RUN_TEST, SCRIPT_RSP, UPSTREAM,
};
use super::shortcuts::shortcut_name;
use super::Exporter;
use crate::graph::{BuildNode, Environment, Executor, InlineDepGenerator, Toolchain};

/// Everything an emitter needs about the node at hand.
struct NodeScope<'n> {
    node: &'n BuildNode,
    env: Environment<'n>,
    sources: Vec<String>,
    implicit: Vec<String>,
}

impl NodeScope<'_> {
    fn primary(&self) -> &str {
        self.node.primary_target()
    }

    fn executor(&self) -> Executor<'_> {
        Executor {
            targets: &self.node.targets,
            sources: &self.sources,
        }
    }

    fn subst(&self, text: &str) -> Result<String, ExportError> {
        self.env
            .subst(text, Some(&self.executor()))
            .map_err(ExportError::subst(self.primary()))
    }

    fn mismatch(&self, reason: &str) -> ExportError {
        ExportError::mismatch(self.primary(), &command_text(self.node), reason)
    }
}

impl<'a> Exporter<'a> {
    /// Classify `node` and emit its edges.
    pub(super) fn emit_node(&mut self, node: &'a BuildNode) -> Result<(), ExportError> {
        let env = self.global.with_local(&node.env);
        let ctx = ClassifyContext {
            env,
            hooks: &self.doc.project,
            ninja_known: self.opts.ninja.is_some(),
        };
        let classified = classify(node, &ctx)?;

        let mut implicit = node.depends.clone();
        implicit.extend(classified.extra_implicit);
        if node.always_build {
            implicit.push(ALWAYS_BUILD.to_owned());
        }
        let mut scope = NodeScope {
            node,
            env,
            sources: node.source_names(),
            implicit,
        };
        if classified.check_shared_flags {
            check_shared_flags(&scope)?;
        }

        match classified.action {
            Action::Install => self.edges.push(
                Edge::new(INSTALL, node.targets.clone())
                    .inputs(node.source_paths())
                    .implicit(scope.implicit),
            ),
            Action::TextSubstitute { subs, do_chmod } => {
                let payload = serde_json_canonicalizer::to_string(&json!({
                    "do_chmod": do_chmod,
                    "subs": subs,
                }))
                .map_err(|source| ExportError::Payload {
                    node: scope.primary().to_owned(),
                    source,
                })?;
                scope.implicit.push(self.helper.clone());
                self.edges.push(
                    Edge::new(SCRIPT_RSP, node.targets.clone())
                        .inputs(node.source_paths())
                        .implicit(scope.implicit)
                        .var("rspfile_content", escape_value(&payload))
                        .var("script", "subst"),
                );
            }
            Action::ListGeneration { items } => {
                let payload =
                    serde_json::to_string(&items).map_err(|source| ExportError::Payload {
                        node: scope.primary().to_owned(),
                        source,
                    })?;
                scope.implicit.push(self.helper.clone());
                scope.implicit.push(self.opts.ninja_file.clone());
                self.edges.push(
                    Edge::new(SCRIPT_RSP, node.targets.clone())
                        .implicit(scope.implicit)
                        .var("rspfile_content", escape_value(&payload))
                        .var("script", "test-list"),
                );
            }
            Action::CompileDatabase => self.edges.push(
                Edge::new(COMPILE_DB, node.targets.clone())
                    .inputs(vec![self.opts.ninja_file.clone()])
                    .order_only(self.doc.project.compile_db_order_only.clone()),
            ),
            Action::CodeGenWithInlineDeps { command, generator } => {
                self.emit_codegen(scope, &command, generator)?;
            }
            Action::ResponseFileScript { prefix } => self.emit_response_file(scope, &prefix)?,
            Action::GenericScript { command } => self.emit_script(scope, &command)?,
            Action::ToolInvocation { tool, command } => self.emit_tool(scope, tool, &command)?,
            Action::NeedsUpstreamFallback { command } => {
                warn!(
                    target = node.primary_target(),
                    command = %command,
                    "action cannot be expressed natively; deferring to the upstream tool"
                );
                self.fallbacks.push(node.primary_target().to_owned());
                self.edges.push(
                    Edge::new(UPSTREAM, node.targets.clone())
                        .inputs(node.source_paths())
                        .implicit(scope.implicit),
                );
            }
        }

        self.built_targets.extend(node.targets.iter().cloned());
        self.generated_headers.extend(
            node.targets
                .iter()
                .filter(|target| target.ends_with(".h") || target.ends_with(".hpp"))
                .cloned(),
        );
        Ok(())
    }

    fn emit_script(&mut self, mut scope: NodeScope<'_>, command: &str) -> Result<(), ExportError> {
        let node = scope.node;
        let os = self.doc.target_os;
        let expanded = make_command(&escape_value(&scope.subst(command)?), os);
        let inputs = node.source_paths();
        scope.implicit.extend(node.implicit.iter().cloned());
        self.edges.push(
            Edge::new(EXEC, node.targets.clone())
                .inputs(inputs.clone())
                .implicit(scope.implicit)
                .var("command", expanded),
        );

        if let Some(name) = node.primary_target().strip_prefix('@') {
            let run_name = format!("+{name}");
            self.shortcuts.reserve(&run_name);
            self.edges
                .push(Edge::new(RUN_TEST, vec![run_name]).inputs(inputs.clone()));
            for child in &node.child_sources {
                if let Some(shortcut) = shortcut_name(child, os.is_windows()) {
                    self.shortcuts.offer(shortcut, &inputs);
                }
            }
        }
        Ok(())
    }

    fn emit_codegen(
        &mut self,
        mut scope: NodeScope<'_>,
        command: &str,
        generator: &InlineDepGenerator,
    ) -> Result<(), ExportError> {
        let node = scope.node;
        let [source, header, ..] = node.targets.as_slice() else {
            return Err(scope.mismatch("inline dependency generators produce a source and a header"));
        };
        let expanded = escape_value(&scope.subst(command)?);
        let full = make_command(&format!("{expanded} {}", generator.flag), self.doc.target_os);
        scope.implicit.extend(node.implicit.iter().cloned());
        scope.implicit.extend(self.generator_scripts(generator));
        self.edges.push(
            Edge::new(EXEC, vec![header.clone()])
                .inputs(node.source_paths())
                .implicit(scope.implicit)
                .var("command", full)
                .var("deps", "msvc")
                .var("msvc_deps_prefix", generator.deps_prefix.as_str()),
        );
        self.edges
            .push(Edge::new(PHONY, vec![source.clone()]).inputs(vec![header.clone()]));
        Ok(())
    }

    /// Scripts of `generator`, globbed once per export.
    fn generator_scripts(&mut self, generator: &InlineDepGenerator) -> Vec<String> {
        self.script_deps
            .entry(generator.tool.clone())
            .or_insert_with(|| {
                let mut found: Vec<String> = generator
                    .script_globs
                    .iter()
                    .filter_map(|pattern| glob::glob(pattern).ok())
                    .flatten()
                    .filter_map(Result::ok)
                    .filter_map(|path| path.to_str().map(str::to_owned))
                    .collect();
                found.sort();
                found
            })
            .clone()
    }

    fn emit_response_file(
        &mut self,
        mut scope: NodeScope<'_>,
        prefix: &str,
    ) -> Result<(), ExportError> {
        let node = scope.node;
        let paths = node.source_paths();
        let Some((script, rest)) = paths.split_first() else {
            return Err(scope.mismatch("response file commands need at least one source"));
        };
        let command = format!(
            "{} @{}.rsp",
            escape_value(&scope.subst(prefix)?),
            node.primary_target()
        );
        scope.implicit.push(script.clone());
        self.edges.push(
            Edge::new(EXEC_RSP, node.targets.clone())
                .inputs(rest.to_vec())
                .implicit(scope.implicit)
                .var("command", command),
        );
        Ok(())
    }

    fn emit_tool(
        &mut self,
        mut scope: NodeScope<'_>,
        tool: Tool,
        command: &str,
    ) -> Result<(), ExportError> {
        let node = scope.node;
        let primary = node.primary_target();
        let os = self.doc.target_os;
        let msvc = self.doc.toolchain == Toolchain::Msvc;
        let tool_word = format!("${}", tool.name());
        let tool_path = scope
            .env
            .where_is(&tool_word, self.locator)
            .ok_or_else(|| ExportError::MissingTool {
                tool: tool_word.clone(),
                node: primary.to_owned(),
            })?;
        self.tool_paths.insert(tool_path.to_string());

        let template = to_template(primary, command, os)?;
        self.tools.register(tool, &template)?;

        let libdeps = if tool.is_link() {
            libdeps::resolve(node, self.policy.mode(&scope.env))
        } else {
            Vec::new()
        };
        if tool.is_link() && msvc {
            scope.implicit.push(self.helper.clone());
        }
        if tool == Tool::Rc {
            scope.implicit.extend(node.implicit.iter().cloned());
            if let Some(script) = node.source_paths().first() {
                self.rc_files.push(script.clone());
            }
        }

        let mut variables: IndexMap<String, String> = IndexMap::new();
        let words = split_words(primary, &template, os)?;
        for (word, name) in variable_words(primary, &template, &words)? {
            let value = if name == "_LIBFLAGS" {
                let fast = libdeps::expand_libflags(&scope.env, &scope.executor(), &libdeps)
                    .map_err(ExportError::subst(primary))?;
                match fast {
                    Some(flags) => flags,
                    None => scope.subst(&word)?,
                }
            } else {
                scope.subst(&word)?
            };
            let escaped = escape_value(&value);
            if PER_EDGE_VARIABLES.contains(&name.as_str()) {
                variables.insert(name, escaped);
                continue;
            }
            let global = self.global;
            self.interner.ensure_default(&name, || {
                global
                    .subst(&word, None)
                    .map(|default| escape_value(&default))
                    .map_err(ExportError::subst(primary))
            })?;
            if let Some(reference) = self.interner.intern(&name, &escaped) {
                variables.insert(name, reference);
            }
        }

        let mut outputs: Vec<String> = node
            .targets
            .iter()
            .filter(|target| !target.ends_with(".dwo"))
            .cloned()
            .collect();
        if outputs.is_empty() {
            return Err(scope.mismatch("every target is a split debug info file"));
        }
        let implicit_outputs = outputs.split_off(1);

        let mut inputs = node.source_paths();
        if tool == Tool::ShLink && msvc {
            let defs: Vec<String> = inputs
                .iter()
                .filter(|input| input.ends_with(".def"))
                .cloned()
                .collect();
            if defs.len() > 1 {
                return Err(scope.mismatch("a shared library takes at most one .def file"));
            }
            if let Some(def) = defs.first() {
                inputs.retain(|input| input != def);
                scope.implicit.push(def.clone());
                let flag = format!("/def:{def}");
                variables
                    .entry(String::from("_LIBFLAGS"))
                    .and_modify(|flags| {
                        flags.push(' ');
                        flags.push_str(&flag);
                    })
                    .or_insert_with(|| flag.clone());
            }
        }
        scope.implicit.extend(libdeps);
        scope.implicit.push(tool_path.to_string());

        let order_only = if tool.is_compile() || tool == Tool::Rc {
            vec![GENERATED_HEADERS.to_owned()]
        } else {
            Vec::new()
        };
        let mut edge = Edge::new(tool.name(), outputs)
            .inputs(inputs)
            .implicit(scope.implicit)
            .order_only(order_only);
        edge.implicit_outputs = implicit_outputs;
        edge.variables = variables;
        self.edges.push(edge);
        Ok(())
    }
}

fn check_shared_flags(scope: &NodeScope<'_>) -> Result<(), ExportError> {
    if let Some(source) = scope.node.static_sources.first() {
        if !scope.env.is_truthy("STATIC_AND_SHARED_OBJECTS_ARE_THE_SAME") {
            return Err(ExportError::StaticObjectInSharedLibrary {
                target: scope.primary().to_owned(),
                source_path: source.clone(),
            });
        }
    }
    if !scope.node.shlib_links.is_empty() {
        return Err(scope.mismatch("versioned library symlinks are not supported"));
    }
    Ok(())
}
