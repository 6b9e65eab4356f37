//! Optional export passes layered over the walked graph.
//!
//! Each pass edits the edge list or the toolchain templates after the node
//! walk: compiler upgrade detection, the error-code check, the local object
//! cache, distributed compilation and pre-compiled headers.

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use semver::Version;

use super::classify::Tool;
use super::error::ExportError;
use super::intern::Interner;
use super::model::Edge;
use super::rewrite::{RuleTable, make_command};
use super::rules::{COMPILER_TIMESTAMPS, EXEC, INSTALL, MAKE_ICECC_ENV};
use crate::graph::{PchLayout, TargetOs, Toolchain};

/// Directory holding the compiler timestamp markers.
pub const TIMESTAMP_DIR: &str = "build/compiler_timestamps";
/// Order-only target aggregating generated headers.
pub const GENERATED_HEADERS: &str = "_generated_headers";
/// Phony target that is always out of date.
pub const ALWAYS_BUILD: &str = "_ALWAYS_BUILD";
/// Target of the distributed compile verification edge.
pub const VERIFY_ICECREAM: &str = "_verify_icecream_setup";

fn is_compile_edge(edge: &Edge) -> bool {
    Tool::from_name(&edge.rule).is_some_and(Tool::is_compile)
}

/// Marker files tracking the compiler's modification time.
///
/// Package managers back-date installed files, so depending on the compiler
/// binary alone misses upgrades. The `then` marker mirrors the compiler's
/// mtime and the `now` marker records the last refresh; every compile
/// depends on `now`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerTimestamps {
    /// Resolved compiler path.
    pub compiler: Utf8PathBuf,
    /// Marker carrying the compiler's rounded mtime.
    pub then_file: String,
    /// Marker touched whenever the compiler changed.
    pub now_file: String,
}

impl CompilerTimestamps {
    /// Marker locations for `compiler`.
    #[must_use]
    pub fn for_compiler(compiler: &Utf8Path) -> Self {
        let escaped = compiler
            .as_str()
            .replace(|c| matches!(c, '/' | '\\' | ':'), "_");
        Self {
            compiler: compiler.to_owned(),
            then_file: format!("{TIMESTAMP_DIR}/{escaped}.mtime"),
            now_file: format!("{TIMESTAMP_DIR}/{escaped}.last_update"),
        }
    }
}

/// Add the timestamp edge and make every compile depend on the `now` marker.
pub fn add_compiler_timestamps(edges: &mut Vec<Edge>, stamps: &CompilerTimestamps) {
    edges.push(
        Edge::new(
            COMPILER_TIMESTAMPS,
            vec![stamps.then_file.clone(), stamps.now_file.clone()],
        )
        .inputs(vec![stamps.compiler.to_string()]),
    );
    for edge in edges.iter_mut().filter(|edge| is_compile_edge(edge)) {
        edge.implicit.push(stamps.now_file.clone());
    }
}

/// Run `check` on every build, order-only before links and archives.
///
/// Returns the marker file the check writes.
pub fn add_error_code_check(
    edges: &mut Vec<Edge>,
    check: &str,
    ninja_file: &str,
    os: TargetOs,
) -> String {
    let marker = format!("{TIMESTAMP_DIR}/error_code_check.timestamp");
    let command = make_command(&format!("{check}\n( echo \"\" > {marker} )"), os);
    edges.push(
        Edge::new(EXEC, vec![marker.clone()])
            .implicit(vec![ninja_file.to_owned()])
            .var("command", command)
            .var(
                "description",
                "Checking error codes and waiting for next compile to finish",
            )
            .var("deps", "msvc")
            .var("msvc_deps_prefix", "scanning file: "),
    );
    for edge in edges.iter_mut().filter(|edge| {
        matches!(
            Tool::from_name(&edge.rule),
            Some(Tool::Link | Tool::ShLink | Tool::Ar)
        )
    }) {
        edge.order_only.push(marker.clone());
    }
    marker
}

/// Verify the distributed compile setup before any compile runs.
pub fn add_icecream_verify(edges: &mut Vec<Edge>, command: &str) {
    edges.push(
        Edge::new(EXEC, vec![VERIFY_ICECREAM.to_owned()])
            .inputs(vec![ALWAYS_BUILD.to_owned()])
            .var("command", command)
            .var("description", "Checking for a proper icecream setup"),
    );
    for edge in edges.iter_mut().filter(|edge| is_compile_edge(edge)) {
        edge.order_only.push(VERIFY_ICECREAM.to_owned());
    }
}

/// Prefix compile templates with the cache program.
pub fn apply_ccache(tools: &mut RuleTable, ccache: &str) {
    for tool in Tool::ALL.into_iter().filter(|tool| tool.is_compile()) {
        tools.decorate(tool, |command| format!("{ccache} {command}"));
    }
}

/// Distributed compilation setup.
#[derive(Debug, Clone, Copy)]
pub struct Icecream<'a> {
    /// Compiler family.
    pub toolchain: Toolchain,
    /// Target operating system.
    pub os: TargetOs,
    /// `icecc` wrapper used as the cache prefix.
    pub icecc: &'a str,
    /// `icerun` wrapper for local-only jobs.
    pub icerun: &'a str,
    /// Version of the local object cache.
    pub ccache_version: Option<&'a Version>,
    /// Resolved C compiler.
    pub cc: &'a Utf8Path,
    /// Resolved C++ compiler.
    pub cxx: Option<&'a Utf8Path>,
    /// Script packaging a compiler.
    pub create_env: Option<&'a str>,
    /// Pre-built compiler package, required on macOS.
    pub version_file: Option<&'a str>,
    /// `now` marker of the compiler upgrade check.
    pub timestamp_file: Option<&'a str>,
}

/// Route compiles through the distributed compiler and links through
/// `icerun`.
///
/// # Errors
///
/// Returns [`ExportError::Configuration`] when a compiler package is needed
/// but neither a package nor a packaging script is configured.
pub fn apply_icecream(
    edges: &mut Vec<Edge>,
    tools: &mut RuleTable,
    setup: &Icecream<'_>,
) -> Result<(), ExportError> {
    let mut package = format!("build/icecc_envs/{}.tar.gz", setup.cc.as_str().replace('/', "_"));
    let mut env_flags = vec![format!("CCACHE_PREFIX={}", setup.icecc)];
    let mut compile_flags: Vec<&str> = Vec::new();

    let create_args = if setup.toolchain == Toolchain::Clang {
        env_flags.push(String::from("ICECC_CLANG_REMOTE_CPP=1"));
        if setup
            .ccache_version
            .is_some_and(|version| *version >= Version::new(3, 4, 1))
        {
            env_flags.push(String::from("CCACHE_NOCPP2=1"));
            compile_flags.push("-frewrite-includes");
        }
        if setup.os == TargetOs::Darwin {
            let file = setup.version_file.ok_or_else(|| ExportError::Configuration {
                message: String::from(
                    "distributed compilation on macOS needs a compiler package; pass --icecc-version-file",
                ),
            })?;
            file.clone_into(&mut package);
            env_flags.push(format!("ICECC_VERSION=x86_64:{package}"));
            None
        } else {
            env_flags.push(format!("ICECC_VERSION=$$(realpath \"{package}\")"));
            Some(format!("--clang {} /bin/true", real_path(setup.cc)))
        }
    } else {
        env_flags.push(format!("ICECC_VERSION=$$(realpath \"{package}\")"));
        env_flags.push(String::from("CCACHE_NOCPP2=1"));
        compile_flags.push("-fdirectives-only");
        let cxx = setup.cxx.map(real_path).unwrap_or_default();
        Some(format!("--gcc {} {cxx}", real_path(setup.cc)))
    };

    if let Some(args) = create_args {
        let script = setup.create_env.ok_or_else(|| ExportError::Configuration {
            message: String::from("distributed compilation needs project.icecc_create_env"),
        })?;
        let mut implicit = vec![setup.cc.to_string()];
        if setup.toolchain != Toolchain::Clang {
            implicit.extend(setup.cxx.map(Utf8Path::to_string));
        }
        implicit.extend(setup.timestamp_file.map(str::to_owned));
        edges.push(
            Edge::new(MAKE_ICECC_ENV, vec![package.clone()])
                .inputs(vec![script.to_owned()])
                .implicit(implicit)
                .var("cmd", format!("{script} {args} {package}")),
        );
    }

    let prefix = env_flags.join(" ");
    let suffix = compile_flags.join(" ");
    for tool in Tool::ALL.into_iter().filter(|tool| tool.is_compile()) {
        tools.decorate(tool, |command| {
            [prefix.as_str(), command, suffix.as_str()]
                .into_iter()
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        });
    }
    for edge in edges.iter_mut().filter(|edge| is_compile_edge(edge)) {
        edge.order_only.push(package.clone());
    }
    for tool in [Tool::Link, Tool::ShLink] {
        tools.decorate(tool, |command| format!("{} {command}", setup.icerun));
    }
    Ok(())
}

fn real_path(path: &Utf8Path) -> String {
    path.canonicalize_utf8()
        .map_or_else(|_| path.to_string(), |real| real.to_string())
}

/// Compile pre-compiled headers once and use them for eligible compiles.
pub fn apply_pch(
    edges: &mut Vec<Edge>,
    tools: &mut RuleTable,
    interner: &mut Interner,
    layout: &PchLayout,
    toolchain: Toolchain,
) {
    let msvc = toolchain == Toolchain::Msvc;
    let dir = if layout.dir.ends_with('/') {
        layout.dir.clone()
    } else {
        format!("{}/", layout.dir)
    };
    let prefix = &layout.include_prefix;
    let pch_tool = if tools.contains(Tool::ShCxx) && !msvc {
        Tool::ShCxx
    } else {
        Tool::Cxx
    };
    let mut seed_vars: IndexMap<String, String> = IndexMap::new();

    for edge in edges.iter_mut() {
        let tool = Tool::from_name(&edge.rule);
        if matches!(tool, Some(Tool::Cxx | Tool::ShCxx)) {
            let Some(input) = edge.inputs.first() else {
                continue;
            };
            if !input.starts_with(&layout.source_prefix) {
                continue;
            }
            if *input == layout.flags_source {
                seed_vars = edge.variables.clone();
            }
            let is_test = input.contains("test");
            if (is_test && tool == Some(Tool::ShCxx)) || (!is_test && tool != Some(pch_tool)) {
                continue;
            }
            let header = if is_test {
                &layout.test_header
            } else {
                &layout.header
            };
            if msvc {
                edge.variables.insert(
                    String::from("pch_flags"),
                    format!("/Fp{dir}{header}.$pch_suffix /Yu{prefix}{header} /FI{prefix}{header}"),
                );
                edge.implicit.push(format!("{dir}{header}.obj"));
            } else {
                edge.variables
                    .insert(String::from("pch_flags"), format!("-include {dir}{header}"));
                edge.implicit.push(format!("{dir}{header}.$pch_suffix"));
            }
        } else if tool == Some(Tool::Link) && msvc {
            edge.inputs.push(format!("{dir}{}.obj", layout.header));
            edge.inputs.push(format!("{dir}{}.obj", layout.test_header));
        }
    }

    interner.set_var("pch_flags", "");
    interner.set_var(
        "pch_suffix",
        if toolchain == Toolchain::Gcc { "gch" } else { "pch" },
    );

    if msvc {
        tools.decorate(pch_tool, |command| format!("{command} $pch_flags"));
    } else {
        for tool in [Tool::Cxx, Tool::ShCxx] {
            tools.decorate(tool, |command| command.replace("$out", "$out $pch_flags"));
        }
    }

    for (header, tool) in [(&layout.header, pch_tool), (&layout.test_header, Tool::Cxx)] {
        let installed = format!("{dir}{header}");
        edges.push(
            Edge::new(INSTALL, vec![installed.clone()])
                .inputs(vec![format!("{}/{header}", layout.headers_dir.trim_end_matches('/'))]),
        );
        let mut vars = seed_vars.clone();
        vars.insert(
            String::from("description"),
            format!("PCH_{} {header}.$pch_suffix", tool.name()),
        );
        let output = if msvc {
            vars.insert(
                String::from("_MSVC_OUTPUT_FLAG"),
                format!("/Fo{dir}{header}.obj"),
            );
            vars.insert(
                String::from("pch_flags"),
                format!("/Fp{dir}{header}.pch /Yc{prefix}{header} /FI{prefix}{header}"),
            );
            format!("{installed}.obj")
        } else {
            vars.insert(String::from("pch_flags"), String::from("-x c++-header"));
            format!("{installed}.$pch_suffix")
        };
        let mut edge = Edge::new(tool.name(), vec![output])
            .inputs(vec![installed])
            .order_only(vec![GENERATED_HEADERS.to_owned()]);
        edge.variables = vars;
        edges.push(edge);
    }
}
