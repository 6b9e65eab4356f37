//! Command line interface definition using clap.
//!
//! This module defines the [`Cli`] structure and its subcommands, and merges
//! configuration files and `NINJAFY_*` environment variables underneath the
//! flags given on the command line.

use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, Subcommand};
use ortho_config::declarative::LayerComposition;
use ortho_config::figment::{Figment, providers::Env};
use ortho_config::uncased::Uncased;
use ortho_config::{
    ConfigDiscovery, MergeComposer, OrthoConfig, OrthoMergeExt, OrthoResult, sanitize_value,
};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

mod parsing;

use parsing::parse_pool_depth;

/// Largest link pool depth accepted by the CLI.
const MAX_POOL_DEPTH: usize = 256;
/// Link pool depth used when none is configured.
pub const DEFAULT_LINK_POOL_DEPTH: usize = 4;
const CONFIG_ENV_VAR: &str = "NINJAFY_CONFIG_PATH";
const ENV_PREFIX: &str = "NINJAFY_";

/// Fields whose clap defaults must not mask configuration files.
const DEFAULTED_FIELDS: [&str; 6] = [
    "graph",
    "verbose",
    "pch",
    "icecream",
    "no_cache",
    "link_pool_depth",
];

/// Export an SCons build graph as a self-regenerating Ninja file.
#[derive(Debug, Parser, Serialize, Deserialize, OrthoConfig)]
#[command(author, version, about, long_about = None)]
#[ortho_config(prefix = "NINJAFY")]
pub struct Cli {
    /// Path to the serialised build graph (JSON, or YAML by extension).
    #[arg(short, long, value_name = "FILE", default_value = "build-graph.json")]
    #[ortho_config(default = default_graph_path())]
    pub graph: PathBuf,

    /// Run as if started in this directory.
    ///
    /// This affects graph lookup, output paths, and config discovery.
    #[arg(short = 'C', long, value_name = "DIR")]
    pub directory: Option<PathBuf>,

    /// Enable verbose diagnostic logging.
    #[arg(short, long)]
    #[ortho_config(default = false)]
    pub verbose: bool,

    /// Compile through pre-compiled headers.
    #[arg(long)]
    #[ortho_config(default = false)]
    pub pch: bool,

    /// Distribute compiles with icecream.
    #[arg(long)]
    #[ortho_config(default = false)]
    pub icecream: bool,

    /// Do not wrap compiles with the local object cache.
    #[arg(long)]
    #[ortho_config(default = false)]
    pub no_cache: bool,

    /// Number of concurrent MSVC links.
    #[arg(long, value_name = "N", default_value_t = DEFAULT_LINK_POOL_DEPTH, value_parser = parse_pool_depth)]
    #[ortho_config(default = DEFAULT_LINK_POOL_DEPTH)]
    pub link_pool_depth: usize,

    /// Directory where Ninja keeps its log and dependency database.
    #[arg(long, value_name = "DIR")]
    pub ninja_builddir: Option<String>,

    /// Pre-built icecream compiler package to ship to remote hosts.
    #[arg(long, value_name = "FILE")]
    pub icecc_version_file: Option<String>,

    /// Optional subcommand to execute; defaults to `export` when omitted.
    ///
    /// `OrthoConfig` merging ignores this field; CLI parsing supplies it.
    #[serde(skip)]
    #[command(subcommand)]
    #[ortho_config(skip_cli)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Apply the default command if none was specified.
    #[must_use]
    pub fn with_default_command(mut self) -> Self {
        if self.command.is_none() {
            self.command = Some(Commands::Export {
                output: default_output_path(),
            });
        }
        self
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            graph: default_graph_path(),
            directory: None,
            verbose: false,
            pch: false,
            icecream: false,
            no_cache: false,
            link_pool_depth: DEFAULT_LINK_POOL_DEPTH,
            ninja_builddir: None,
            icecc_version_file: None,
            command: None,
        }
        .with_default_command()
    }
}

/// Available top-level commands.
#[derive(Debug, Subcommand, PartialEq, Eq, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Commands {
    /// Write the Ninja file for the build graph.
    Export {
        /// Output path for the generated Ninja file.
        ///
        /// Use `-` to write to stdout.
        #[arg(value_name = "FILE", default_value = "build.ninja")]
        output: PathBuf,
    },

    /// Run one of the helper programs invoked from the generated file.
    #[command(subcommand)]
    Helper(HelperCommand),
}

/// Helper programs referenced by `$HELPER` in the generated file.
#[derive(Debug, Subcommand, PartialEq, Eq, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HelperCommand {
    /// Apply regular-expression substitutions to a file.
    Subst {
        /// File to read.
        input: PathBuf,
        /// File to write.
        output: PathBuf,
        /// JSON payload holding `do_chmod` and `subs`.
        payload: PathBuf,
    },
    /// Write a newline-separated list taken from a JSON array.
    TestList {
        /// File to write.
        output: PathBuf,
        /// JSON array of entries.
        payload: PathBuf,
    },
    /// Rewrite a response file with one argument per line.
    SplitLines {
        /// Response file, rewritten in place.
        rsp: PathBuf,
    },
    /// Refresh the compiler upgrade markers.
    CompilerTimestamps {
        /// Compiler binary.
        compiler: PathBuf,
        /// Marker carrying the compiler's modification time.
        then: PathBuf,
        /// Marker touched when the compiler changed.
        now: PathBuf,
    },
}

/// Return the default graph filename when none is provided.
fn default_graph_path() -> PathBuf {
    PathBuf::from("build-graph.json")
}

fn default_output_path() -> PathBuf {
    PathBuf::from("build.ninja")
}

/// Parse CLI arguments.
///
/// Returns both the parsed CLI struct and the `ArgMatches` required for
/// configuration merging.
///
/// # Errors
///
/// Returns a `clap::Error` when parsing fails.
pub fn parse_from<I, T>(iter: I) -> Result<(Cli, ArgMatches), clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let mut command = Cli::command();
    let matches = command.try_get_matches_from_mut(iter)?;
    // Clone matches before from_arg_matches_mut consumes the values.
    let matches_for_merge = matches.clone();
    let mut matches_for_parse = matches;
    let cli = Cli::from_arg_matches_mut(&mut matches_for_parse)
        .map_err(|clap_err| clap_err.with_cmd(&command))?;
    Ok((cli, matches_for_merge))
}

/// Return the prefixed environment provider for CLI configuration.
fn env_provider() -> Env {
    Env::prefixed(ENV_PREFIX)
}

/// Build configuration discovery rooted in the optional working directory.
fn config_discovery(directory: Option<&PathBuf>) -> ConfigDiscovery {
    let mut builder = ConfigDiscovery::builder("ninjafy").env_var(CONFIG_ENV_VAR);
    if let Some(dir) = directory {
        builder = builder.clear_project_roots().add_project_root(dir);
    }
    builder.build()
}

/// Return `true` when no CLI overrides were supplied.
///
/// The merge pipeline treats an empty JSON object as "no overrides".
fn is_empty_value(value: &serde_json::Value) -> bool {
    matches!(value, serde_json::Value::Object(map) if map.is_empty())
}

fn cli_overrides_from_matches(cli: &Cli, matches: &ArgMatches) -> OrthoResult<serde_json::Value> {
    let serde_json::Value::Object(mut map) = sanitize_value(cli)? else {
        return Err(Arc::new(ortho_config::OrthoError::Validation {
            key: String::from("cli"),
            message: String::from("expected parsed CLI values to serialize to an object"),
        }));
    };

    map.remove("command");
    for field in DEFAULTED_FIELDS {
        if matches.value_source(field) != Some(ValueSource::CommandLine) {
            map.remove(field);
        }
    }

    Ok(serde_json::Value::Object(map))
}

/// Merge configuration layers over the parsed CLI values.
///
/// Precedence, lowest first: defaults, discovered configuration files,
/// `NINJAFY_*` environment variables, explicit command-line flags.
///
/// # Errors
///
/// Returns an [`ortho_config::OrthoError`] if layer composition or merging
/// fails.
pub fn merge_with_config(cli: &Cli, matches: &ArgMatches) -> OrthoResult<Cli> {
    let command = cli.command.clone();
    let mut errors = Vec::new();
    let mut composer = MergeComposer::with_capacity(4);

    match sanitize_value(&Cli::default()) {
        Ok(value) => composer.push_defaults(value),
        Err(err) => errors.push(err),
    }

    let discovery = config_discovery(cli.directory.as_ref());
    let mut file_layers = discovery.compose_layers();
    errors.append(&mut file_layers.required_errors);
    if file_layers.value.is_empty() {
        errors.append(&mut file_layers.optional_errors);
    }
    for layer in file_layers.value {
        composer.push_layer(layer);
    }

    let env_provider = env_provider()
        .map(|key| Uncased::new(key.as_str().to_ascii_uppercase()))
        .split("__");
    match Figment::from(env_provider)
        .extract::<serde_json::Value>()
        .into_ortho_merge()
    {
        Ok(value) => composer.push_environment(value),
        Err(err) => errors.push(err),
    }

    match cli_overrides_from_matches(cli, matches) {
        Ok(value) if !is_empty_value(&value) => composer.push_cli(value),
        Ok(_) => {}
        Err(err) => errors.push(err),
    }

    let composition = LayerComposition::new(composer.layers(), errors);
    let mut merged = composition.into_merge_result(Cli::merge_from_layers)?;
    merged.command = command;
    Ok(merged)
}
