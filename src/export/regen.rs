//! Dependencies of the self-regeneration edge.
//!
//! The Ninja file must be regenerated whenever anything that influenced the
//! export changes: the upstream configuration scripts, the exporter binary,
//! the tools it resolved and, unless the error-code check covers it, the
//! checked-out revision.

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use std::collections::BTreeSet;
use std::env;
use tracing::debug;
use walkdir::WalkDir;

use crate::graph::{GlobSpec, Upstream};

/// Everything that may contribute regeneration dependencies.
#[derive(Debug, Clone, Copy)]
pub struct RegenSources<'a> {
    /// Upstream tool description.
    pub upstream: &'a Upstream,
    /// The exporter binary.
    pub helper: &'a Utf8Path,
    /// Resolved toolchain programs.
    pub tool_paths: &'a BTreeSet<String>,
    /// `now` marker of the compiler upgrade check.
    pub timestamp_file: Option<&'a str>,
    /// Resource scripts whose dependencies only the upstream tool knows.
    pub rc_files: &'a [String],
    /// Whether to depend on the checked-out revision.
    pub track_vcs: bool,
}

/// Collect candidate paths. Missing files are filtered later.
#[must_use]
pub fn candidates(sources: &RegenSources<'_>) -> Vec<String> {
    let mut found: Vec<String> = sources.upstream.config_files.clone();
    for spec in &sources.upstream.config_globs {
        found.extend(rglob(spec));
    }
    found.push(sources.helper.to_string());
    found.extend(sources.tool_paths.iter().cloned());
    found.extend(sources.timestamp_file.map(str::to_owned));
    found.extend(sources.rc_files.iter().cloned());
    if sources.track_vcs {
        found.extend(vcs_heads());
    }
    found
}

/// Files below `spec.root` whose name matches `spec.pattern`.
#[must_use]
pub fn rglob(spec: &GlobSpec) -> Vec<String> {
    let Ok(pattern) = Pattern::new(&spec.pattern) else {
        debug!(pattern = %spec.pattern, "ignoring invalid configuration glob");
        return Vec::new();
    };
    let root = expand_home(&spec.root);
    let mut found: Vec<String> = WalkDir::new(&root)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| pattern.matches(name))
        })
        .filter_map(|entry| Utf8PathBuf::from_path_buf(entry.into_path()).ok())
        .map(Utf8PathBuf::into_string)
        .collect();
    found.sort();
    found
}

fn expand_home(root: &str) -> Utf8PathBuf {
    match (root.strip_prefix("~/"), env::var("HOME")) {
        (Some(rest), Ok(home)) => Utf8Path::new(&home).join(rest),
        _ => Utf8PathBuf::from(root),
    }
}

/// The current branch pointer and every local branch head.
fn vcs_heads() -> Vec<String> {
    let mut heads = vec![String::from(".git/HEAD")];
    if let Ok(paths) = glob::glob(".git/refs/heads/*") {
        heads.extend(
            paths
                .filter_map(Result::ok)
                .filter_map(|path| path.to_str().map(str::to_owned)),
        );
    }
    heads
}

/// Keep existing regular files, escape spaces for the depfile and return
/// them sorted and deduplicated.
#[must_use]
pub fn filter_dependencies(candidates: impl IntoIterator<Item = String>) -> Vec<String> {
    candidates
        .into_iter()
        .filter(|dep| !dep.is_empty() && Utf8Path::new(dep).is_file())
        .map(|dep| dep.replace(' ', "\\ "))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
