//! CLI execution and command dispatch logic.
//!
//! This module keeps `main` minimal by providing a single entry point that
//! handles command execution: exporting the build graph to a Ninja file, or
//! running one of the helper programs that file invokes.

mod error;
mod output;

pub use error::RunnerError;

use crate::cli::{Cli, Commands, HelperCommand};
use crate::export::{self, CompilerTimestamps, ExportOptions, LibdepsBinding};
use crate::graph::{GraphDocument, ToolLocator, WhichResolver};
use crate::probe::{self, ProbeReport, ProbeRequest};
use crate::{helpers, ninja_gen};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::env;
use std::ffi::OsString;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{debug, info, warn};

/// Ninja executables searched for when [`NINJA_ENV`] is unset.
pub const NINJA_PROGRAMS: [&str; 2] = ["ninja", "ninja-build"];
/// Environment variable override for the Ninja executable.
pub use ninja_env::NINJA_ENV;

/// Name the file refers to itself by when it is written to stdout.
const STDOUT_NINJA_FILE: &str = "build.ninja";

/// Execute the parsed [`Cli`] command.
///
/// # Errors
///
/// Returns an error if the graph cannot be loaded or exported, a helper
/// fails, or an output file cannot be written.
pub fn run(cli: &Cli) -> Result<()> {
    if let Some(dir) = &cli.directory {
        env::set_current_dir(dir)
            .with_context(|| format!("changing directory to {}", dir.display()))?;
        debug!(directory = %dir.display(), "changed working directory");
    }
    let command = cli.command.clone().unwrap_or_else(|| Commands::Export {
        output: PathBuf::from(STDOUT_NINJA_FILE),
    });
    match command {
        Commands::Export { output } => handle_export(cli, &output),
        Commands::Helper(helper) => run_helper(&helper),
    }
}

/// Load, probe, export and write.
fn handle_export(cli: &Cli, output: &Path) -> Result<()> {
    let graph_path = utf8(&cli.graph)?;
    if !graph_path.is_file() {
        return Err(RunnerError::GraphNotFound { path: graph_path }.into());
    }
    let doc = GraphDocument::from_path(&graph_path)
        .with_context(|| format!("loading build graph {graph_path}"))?;
    info!(
        path = %graph_path,
        nodes = doc.nodes.len(),
        shim = export::SHIM_VERSION,
        "loaded build graph"
    );

    let locator = WhichResolver::from_process_env(doc.tools.clone());
    let report = probe::probe(&ProbeRequest {
        env: doc.environment(),
        toolchain: doc.toolchain,
        locator: &locator,
        use_cache: !cli.no_cache,
        pch: cli.pch,
        icecream: cli.icecream,
        timeout: probe::DEFAULT_TIMEOUT,
    })
    .context("probing the compiler cache")?;

    let to_stdout = output::is_stdout_path(output);
    let ninja_file = if to_stdout {
        String::from(STDOUT_NINJA_FILE)
    } else {
        utf8(output)?.into_string()
    };
    let opts = export_options(cli, ninja_file, report, &locator)?;
    let exported = export::export(&doc, &opts, &locator, &LibdepsBinding)
        .context("exporting the build graph")?;
    if !exported.fallbacks.is_empty() {
        info!(
            count = exported.fallbacks.len(),
            "targets left to the upstream tool"
        );
    }
    if let Some(stamps) = &exported.timestamps {
        refresh_timestamps(stamps)?;
    }

    let ninja = ninja_gen::generate(&exported.file);
    if to_stdout {
        return output::write_stdout(&ninja);
    }
    let regen = &exported.file.regenerator;
    output::write_atomically(Utf8Path::new(&regen.depfile), &regen.depfile_contents())?;
    let path = Utf8Path::new(&opts.ninja_file);
    output::write_atomically(path, &ninja)?;
    if exported.file.shebang.is_some() {
        output::make_executable(path)?;
    }
    info!(
        %path,
        edges = exported.file.edges.len(),
        rules = exported.file.rules.len(),
        "wrote Ninja file"
    );
    Ok(())
}

/// Assemble [`ExportOptions`] from the CLI and the probe findings.
fn export_options(
    cli: &Cli,
    ninja_file: String,
    report: ProbeReport,
    locator: &dyn ToolLocator,
) -> Result<ExportOptions> {
    let helper = env::current_exe().context("locating the running executable")?;
    let mut opts = ExportOptions::new(ninja_file, utf8(&helper)?);
    opts.ninja = resolve_ninja_program_with(|key| env::var_os(key), locator);
    if opts.ninja.is_none() {
        warn!("no Ninja executable found; the file will not carry a shebang line");
    }
    opts.builddir.clone_from(&cli.ninja_builddir);
    opts.link_pool_depth = cli.link_pool_depth;
    opts.local_pool_depth = thread::available_parallelism().map_or(1, NonZeroUsize::get);
    opts.pch = cli.pch;
    opts.ccache = report.ccache.map(Utf8PathBuf::into_string);
    opts.icecream = report.icecream.map(|mut icecream| {
        icecream.version_file.clone_from(&cli.icecc_version_file);
        icecream
    });
    Ok(opts)
}

/// Resolve the Ninja executable: the [`NINJA_ENV`] override when set,
/// otherwise the first of [`NINJA_PROGRAMS`] found by `locator`.
fn resolve_ninja_program_with<F>(mut read_env: F, locator: &dyn ToolLocator) -> Option<Utf8PathBuf>
where
    F: FnMut(&str) -> Option<OsString>,
{
    if let Some(value) = read_env(NINJA_ENV).filter(|value| !value.is_empty()) {
        let program = Utf8PathBuf::from_path_buf(PathBuf::from(value)).ok()?;
        return locator.locate(program.as_str()).or(Some(program));
    }
    NINJA_PROGRAMS
        .into_iter()
        .find_map(|program| locator.locate(program))
}

/// Bring the compiler markers up to date so the first build after an
/// export does not recompile everything.
fn refresh_timestamps(stamps: &CompilerTimestamps) -> Result<()> {
    let refreshed = helpers::touch_compiler_timestamps(
        &stamps.compiler,
        Utf8Path::new(&stamps.then_file),
        Utf8Path::new(&stamps.now_file),
    )
    .with_context(|| format!("refreshing compiler markers for {}", stamps.compiler))?;
    debug!(compiler = %stamps.compiler, refreshed, "compiler markers checked");
    Ok(())
}

/// Dispatch a helper program.
fn run_helper(helper: &HelperCommand) -> Result<()> {
    match helper {
        HelperCommand::Subst {
            input,
            output,
            payload,
        } => {
            helpers::subst_file(&utf8(input)?, &utf8(output)?, &utf8(payload)?)
                .context("substituting file contents")?;
        }
        HelperCommand::TestList { output, payload } => {
            helpers::write_test_list(&utf8(output)?, &utf8(payload)?)
                .context("writing test list")?;
        }
        HelperCommand::SplitLines { rsp } => {
            helpers::split_lines(&utf8(rsp)?).context("splitting response file")?;
        }
        HelperCommand::CompilerTimestamps {
            compiler,
            then,
            now,
        } => {
            helpers::touch_compiler_timestamps(&utf8(compiler)?, &utf8(then)?, &utf8(now)?)
                .context("refreshing compiler markers")?;
        }
    }
    Ok(())
}

fn utf8(path: &Path) -> Result<Utf8PathBuf> {
    Utf8PathBuf::from_path_buf(path.to_path_buf())
        .map_err(|path| RunnerError::NonUtf8Path { path }.into())
}
