//! Convenience targets: aliases and `+name` run shortcuts.
//!
//! A shortcut name claimed by more than one test is never bound to any of
//! them. Once suppressed, a name stays suppressed for the rest of the export.

use camino::Utf8Path;
use indexmap::IndexMap;
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

use super::error::ExportError;
use super::model::Edge;
use super::rules::{INSTALL, RUN_TEST};
use crate::graph::AliasSpec;

/// Run shortcuts collected during the export.
#[derive(Debug, Default, Clone)]
pub struct Shortcuts {
    pending: IndexMap<String, Edge>,
    suppressed: BTreeSet<String>,
}

impl Shortcuts {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `name` for an explicit run edge.
    ///
    /// Explicit run edges take precedence over derived shortcuts.
    pub fn reserve(&mut self, name: &str) {
        self.pending.shift_remove(name);
        self.suppressed.insert(name.to_owned());
    }

    /// Offer a derived shortcut running `inputs`.
    pub fn offer(&mut self, name: String, inputs: &[String]) {
        if self.suppressed.contains(&name) {
            return;
        }
        if self.pending.shift_remove(&name).is_some() {
            info!(shortcut = %name, "shortcut is ambiguous; not emitting it");
            self.suppressed.insert(name);
            return;
        }
        let edge = Edge::new(RUN_TEST, vec![name.clone()]).inputs(inputs.to_vec());
        self.pending.insert(name, edge);
    }

    /// Whether `name` has been suppressed.
    #[must_use]
    pub fn is_suppressed(&self, name: &str) -> bool {
        self.suppressed.contains(name)
    }

    /// Take the surviving shortcut edges in discovery order.
    pub fn drain(&mut self) -> Vec<Edge> {
        self.pending.drain(..).map(|(_, edge)| edge).collect()
    }

    /// Names that were suppressed.
    #[must_use]
    pub fn into_suppressed(self) -> BTreeSet<String> {
        self.suppressed
    }
}

/// Shortcut name for a test object, e.g. `+foo_test` for
/// `build/obj/foo_test.o`.
#[must_use]
pub fn shortcut_name(object: &str, windows: bool) -> Option<String> {
    let file = object.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(object);
    let stem = file.split_once('.').map_or(file, |(stem, _)| stem);
    if !stem.ends_with("_test") {
        return None;
    }
    let suffix = if windows { ".exe" } else { "" };
    Some(format!("+{stem}{suffix}"))
}

/// `+basename` run edges for installed tests.
///
/// Nothing is derived when any edge already produces a `+` target, since
/// those come from the upstream tool's own run targets.
pub fn installed_test_edges(edges: &[Edge], test_dirs: &[String], shortcuts: &mut Shortcuts) {
    if edges
        .iter()
        .any(|edge| edge.outputs.iter().any(|out| out.starts_with('+')))
    {
        return;
    }
    for edge in edges.iter().filter(|edge| edge.rule == INSTALL) {
        let is_test = test_dirs
            .iter()
            .any(|dir| Utf8Path::new(edge.primary()).starts_with(dir));
        let Some(input) = edge.inputs.first() else {
            continue;
        };
        if !is_test {
            continue;
        }
        let Some(base) = Utf8Path::new(input).file_name() else {
            continue;
        };
        shortcuts.offer(format!("+{base}"), std::slice::from_ref(input));
    }
}

/// Alias table of the emitted file.
///
/// Aliases that name a built target are skipped. Aliases with a builder are
/// only tolerated when listed in `compound`.
///
/// # Errors
///
/// Returns [`ExportError::StructuralMismatch`] for an alias with a builder
/// that is not listed in `compound`.
pub fn collect_aliases(
    aliases: &[AliasSpec],
    built_targets: &BTreeSet<String>,
    compound: &[String],
) -> Result<BTreeMap<String, Vec<String>>, ExportError> {
    let mut table = BTreeMap::new();
    for alias in aliases {
        if built_targets.contains(&alias.name) {
            continue;
        }
        if !alias.pure {
            if compound.contains(&alias.name) {
                continue;
            }
            return Err(ExportError::mismatch(
                &alias.name,
                "",
                "alias wraps a builder and is not a known compound alias",
            ));
        }
        let sources: Vec<String> = alias
            .sources
            .iter()
            .filter(|source| **source != alias.name)
            .cloned()
            .collect();
        table.insert(alias.name.clone(), sources);
    }
    Ok(table)
}
