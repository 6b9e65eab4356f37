//! Translate a resolved build graph into a Ninja file model.
//!
//! [`export`] walks every node once, classifies its action and emits the
//! matching edges. Whole-file passes then add shortcuts, aliases, optional
//! compile features and the self-regeneration edge. The result is a
//! [`NinjaFile`] that [`crate::ninja_gen`] renders.

mod classify;
mod emit;
mod error;
mod features;
mod intern;
mod libdeps;
mod model;
mod priority;
mod regen;
mod rewrite;
mod rules;
mod shim;
mod shortcuts;

pub use classify::{Action, Classified, ClassifyContext, Tool, classify, command_text};
pub use error::ExportError;
pub use features::{ALWAYS_BUILD, CompilerTimestamps, GENERATED_HEADERS, TIMESTAMP_DIR};
pub use intern::Interner;
pub use libdeps::{LibdepsBinding, LinkMode, LinkPolicy};
pub use model::{Edge, NinjaFile, Pool, Regenerator, Rule};
pub use priority::priority;
pub use rules::GENERATOR;
pub use rewrite::{escape_path, escape_value, make_command, split_non_posix};
pub use shim::SHIM_VERSION;
pub use shortcuts::shortcut_name;

use camino::Utf8PathBuf;
use itertools::Itertools;
use semver::Version;
use shell_quote::{QuoteRefExt, Sh};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::graph::{ActionSpec, BuildNode, Environment, GraphDocument, TargetOs, ToolLocator};
use regen::RegenSources;
use rewrite::RuleTable;
use rules::{DistributedPools, RuleContext};
use shortcuts::Shortcuts;

/// Distributed compilation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcecreamOptions {
    /// `icecc` wrapper.
    pub icecc: String,
    /// `icerun` wrapper.
    pub icerun: String,
    /// Version reported by the local object cache.
    pub ccache_version: Option<Version>,
    /// Pre-built compiler package.
    pub version_file: Option<String>,
}

/// Settings of a single export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOptions {
    /// Path of the Ninja file as referenced from inside the file.
    pub ninja_file: String,
    /// Executor binary, when found.
    pub ninja: Option<Utf8PathBuf>,
    /// Exporter binary providing the helper programs.
    pub helper: Utf8PathBuf,
    /// Directory for Ninja's own log files.
    pub builddir: Option<String>,
    /// Depth of the MSVC link pool.
    pub link_pool_depth: usize,
    /// Depth of the `local` pool used with distributed compilation.
    pub local_pool_depth: usize,
    /// Use pre-compiled headers.
    pub pch: bool,
    /// Local object cache program.
    pub ccache: Option<String>,
    /// Distributed compilation.
    pub icecream: Option<IcecreamOptions>,
}

impl ExportOptions {
    /// Options with every optional feature disabled.
    #[must_use]
    pub fn new(ninja_file: impl Into<String>, helper: impl Into<Utf8PathBuf>) -> Self {
        Self {
            ninja_file: ninja_file.into(),
            ninja: None,
            helper: helper.into(),
            builddir: None,
            link_pool_depth: 4,
            local_pool_depth: 1,
            pch: false,
            ccache: None,
            icecream: None,
        }
    }
}

/// Result of [`export`].
#[derive(Debug, Clone)]
pub struct Export {
    /// The file model.
    pub file: NinjaFile,
    /// Compiler markers the runner refreshes before writing.
    pub timestamps: Option<CompilerTimestamps>,
    /// Run shortcut names withheld because several tests claimed them.
    pub suppressed_shortcuts: BTreeSet<String>,
    /// Primary targets left to the upstream tool.
    pub fallbacks: Vec<String>,
}

/// Export `doc` to a Ninja file model.
///
/// # Errors
///
/// Returns the first fatal [`ExportError`]; nothing is produced in that
/// case.
pub fn export(
    doc: &GraphDocument,
    opts: &ExportOptions,
    locator: &dyn ToolLocator,
    policy: &dyn LinkPolicy,
) -> Result<Export, ExportError> {
    Exporter::new(doc, opts, locator, policy).run()
}

/// Mutable state of one export.
struct Exporter<'a> {
    doc: &'a GraphDocument,
    opts: &'a ExportOptions,
    locator: &'a dyn ToolLocator,
    policy: &'a dyn LinkPolicy,
    global: Environment<'a>,
    helper: String,
    edges: Vec<Edge>,
    interner: Interner,
    tools: RuleTable,
    shortcuts: Shortcuts,
    built_targets: BTreeSet<String>,
    generated_headers: BTreeSet<String>,
    tool_paths: BTreeSet<String>,
    rc_files: Vec<String>,
    fallbacks: Vec<String>,
    script_deps: BTreeMap<String, Vec<String>>,
}

impl<'a> Exporter<'a> {
    fn new(
        doc: &'a GraphDocument,
        opts: &'a ExportOptions,
        locator: &'a dyn ToolLocator,
        policy: &'a dyn LinkPolicy,
    ) -> Self {
        Self {
            doc,
            opts,
            locator,
            policy,
            global: doc.environment(),
            helper: opts.helper.to_string(),
            edges: Vec::new(),
            interner: Interner::new(),
            tools: RuleTable::default(),
            shortcuts: Shortcuts::new(),
            built_targets: BTreeSet::new(),
            generated_headers: BTreeSet::new(),
            tool_paths: BTreeSet::new(),
            rc_files: Vec::new(),
            fallbacks: Vec::new(),
            script_deps: BTreeMap::new(),
        }
    }

    fn run(mut self) -> Result<Export, ExportError> {
        let doc = self.doc;
        let hooks = &doc.project;
        let os = doc.target_os;

        for node in &doc.nodes {
            if self.is_skipped(node) {
                debug!(target = node.primary_target(), "skipping node");
                continue;
            }
            self.emit_node(node)?;
        }
        let derived = self.shortcuts.drain();
        self.edges.extend(derived);
        for edge in self.edges.iter_mut().filter(|edge| edge.rule == rules::UPSTREAM) {
            edge.implicit.push(self.opts.ninja_file.clone());
        }

        let aliases =
            shortcuts::collect_aliases(&doc.aliases, &self.built_targets, &hooks.compound_aliases)?;
        shortcuts::installed_test_edges(&self.edges, &hooks.test_dirs, &mut self.shortcuts);
        let installed = self.shortcuts.drain();
        self.edges.extend(installed);

        let timestamps = self
            .global
            .where_is("$CXX", self.locator)
            .map(|cxx| CompilerTimestamps::for_compiler(&cxx));
        if let Some(stamps) = &timestamps {
            features::add_compiler_timestamps(&mut self.edges, stamps);
        }
        if let Some(check) = &hooks.error_code_check {
            let command = self
                .global
                .subst(check, None)
                .map_err(ExportError::subst("error code check"))?;
            features::add_error_code_check(
                &mut self.edges,
                &escape_value(&command),
                &self.opts.ninja_file,
                os,
            );
        }
        self.apply_compile_features(timestamps.as_ref())?;
        priority::annotate(&mut self.edges, &hooks.slow_compile_units);

        for name in ["COPY", "HELPER"] {
            if self.interner.vars().contains_key(name) {
                return Err(ExportError::ReservedVariable {
                    name: name.to_owned(),
                });
            }
        }
        let copy = if os.is_windows() { "cmd /c copy" } else { "install" };
        self.interner.set_var("COPY", copy);
        let helper = format!("{} helper", escape_value(&shell_quote(&self.helper)));
        self.interner.set_var("HELPER", helper);

        check_unique_outputs(&self.edges)?;

        let ninja = self.opts.ninja.as_ref().map(Utf8PathBuf::to_string);
        let used: BTreeSet<&str> = self
            .edges
            .iter()
            .map(|edge| edge.rule.as_str())
            .filter(|rule| *rule != rules::PHONY)
            .collect();
        let rule_ctx = RuleContext {
            toolchain: doc.toolchain,
            os,
            tools: &self.tools,
            upstream_program: &doc.upstream.program,
            quiet_flag: &doc.upstream.quiet_flag,
            ninja: ninja.as_deref(),
            distributed: self.opts.icecream.as_ref().map(|ice| DistributedPools {
                local_depth: self.opts.local_pool_depth,
                limit_compiles: ice.icecc == ice.icerun,
            }),
            link_pool_depth: self.opts.link_pool_depth,
        };
        let (pools, rule_list) = rules::declare(&rule_ctx, &used);

        let sources = RegenSources {
            upstream: &doc.upstream,
            helper: &self.opts.helper,
            tool_paths: &self.tool_paths,
            timestamp_file: timestamps.as_ref().map(|stamps| stamps.now_file.as_str()),
            rc_files: &self.rc_files,
            track_vcs: hooks.error_code_check.is_none(),
        };
        let deps = regen::filter_dependencies(regen::candidates(&sources));
        let regenerator = Regenerator {
            output: self.opts.ninja_file.clone(),
            command: format!("{} $upstream_args $out", doc.upstream.program),
            depfile: format!("{}.deps", self.opts.ninja_file),
            deps,
        };
        let upstream_args = doc
            .upstream
            .args
            .iter()
            .map(|arg| format!("\"{}\"", escape_value(arg)))
            .join(" ");
        let defaults = doc.defaults.iter().cloned().sorted().collect();

        let (vars, overrides) = self.interner.into_parts();
        let suppressed_shortcuts = self.shortcuts.into_suppressed();
        if !suppressed_shortcuts.is_empty() {
            info!(count = suppressed_shortcuts.len(), "suppressed ambiguous run shortcuts");
        }
        let file = NinjaFile {
            shebang: ninja,
            builddir: self.opts.builddir.clone(),
            upstream_args,
            pools,
            vars,
            overrides,
            rules: rule_list,
            edges: self.edges,
            aliases,
            generated_headers: self.generated_headers,
            regenerator,
            defaults,
        };
        Ok(Export {
            file,
            timestamps,
            suppressed_shortcuts,
            fallbacks: self.fallbacks,
        })
    }

    fn apply_compile_features(
        &mut self,
        timestamps: Option<&CompilerTimestamps>,
    ) -> Result<(), ExportError> {
        let doc = self.doc;
        let opts = self.opts;
        if let Some(ccache) = opts.ccache.as_deref().filter(|_| !opts.pch) {
            features::apply_ccache(&mut self.tools, ccache);
        }
        if let Some(ice) = &opts.icecream {
            if opts.ccache.is_none() {
                return Err(ExportError::Configuration {
                    message: String::from("distributed compilation needs the local object cache"),
                });
            }
            if doc.target_os == TargetOs::Darwin {
                if let Some(verify) = &doc.project.icecream_verify {
                    let command = self
                        .global
                        .subst(verify, None)
                        .map_err(ExportError::subst("icecream verification"))?;
                    features::add_icecream_verify(&mut self.edges, &escape_value(&command));
                }
            }
            let cc = self.global.where_is("$CC", self.locator).ok_or_else(|| {
                ExportError::MissingTool {
                    tool: String::from("$CC"),
                    node: String::from("distributed compilation"),
                }
            })?;
            let cxx = self.global.where_is("$CXX", self.locator);
            let setup = features::Icecream {
                toolchain: doc.toolchain,
                os: doc.target_os,
                icecc: &ice.icecc,
                icerun: &ice.icerun,
                ccache_version: ice.ccache_version.as_ref(),
                cc: &cc,
                cxx: cxx.as_deref(),
                create_env: doc.project.icecc_create_env.as_deref(),
                version_file: ice.version_file.as_deref(),
                timestamp_file: timestamps.map(|stamps| stamps.now_file.as_str()),
            };
            features::apply_icecream(&mut self.edges, &mut self.tools, &setup)?;
        }
        if opts.pch {
            let layout = doc.project.pch.as_ref().ok_or_else(|| ExportError::Configuration {
                message: String::from("pre-compiled headers need project.pch in the graph"),
            })?;
            features::apply_pch(
                &mut self.edges,
                &mut self.tools,
                &mut self.interner,
                layout,
                doc.toolchain,
            );
        }
        Ok(())
    }

    fn is_skipped(&self, node: &BuildNode) -> bool {
        let hooks = &self.doc.project;
        let primary = node.primary_target();
        let skipped_function = match &node.action {
            ActionSpec::Function { name } => hooks
                .skip_functions
                .iter()
                .any(|function| name.starts_with(&format!("{function}("))),
            _ => false,
        };
        node.targets.is_empty()
            || skipped_function
            || hooks
                .skip_prefixes
                .iter()
                .any(|prefix| primary.starts_with(prefix.as_str()))
            || node
                .targets
                .iter()
                .any(|target| target.contains("sconf_temp/conftest") || target.ends_with(".ninja"))
    }
}

/// Quote `text` for a POSIX shell.
fn shell_quote(text: &str) -> String {
    let bytes: Vec<u8> = text.quoted(Sh);
    String::from_utf8(bytes)
        .unwrap_or_else(|err| String::from_utf8_lossy(&err.into_bytes()).into_owned())
}

fn check_unique_outputs(edges: &[Edge]) -> Result<(), ExportError> {
    let mut seen = BTreeSet::new();
    for edge in edges {
        if !seen.insert(edge.primary()) {
            return Err(ExportError::DuplicateOutput {
                output: edge.primary().to_owned(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests;
