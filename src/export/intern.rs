//! Content-addressed interning of per-edge variable values.
//!
//! Every variable referenced by a tool command is bound once globally to
//! the value it has in the global environment. Edges whose value differs
//! get an override named `NAME_<n>`; identical values share the same
//! override. When a value extends the global default, the default is
//! written as `${NAME}` followed by the extra text.

use indexmap::IndexMap;
use std::collections::BTreeMap;

/// Interned variables and overrides.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Interner {
    vars: BTreeMap<String, String>,
    overrides: BTreeMap<String, IndexMap<String, usize>>,
}

impl Interner {
    /// Create an empty interner.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the global default of `name` on first use.
    ///
    /// # Errors
    ///
    /// Propagates the error of `compute`.
    pub fn ensure_default<E>(
        &mut self,
        name: &str,
        compute: impl FnOnce() -> Result<String, E>,
    ) -> Result<(), E> {
        if !self.vars.contains_key(name) {
            let value = compute()?;
            self.vars.insert(name.to_owned(), value);
        }
        Ok(())
    }

    /// Intern `value` for `name`.
    ///
    /// Returns `None` when the value equals the global default, otherwise
    /// the reference to bind on the edge, e.g. `$CXXFLAGS_0`.
    pub fn intern(&mut self, name: &str, value: &str) -> Option<String> {
        let default = self.vars.get(name).map_or("", String::as_str);
        if value == default {
            return None;
        }
        let compressed = match value.strip_prefix(default) {
            Some(rest) if !default.is_empty() => format!("${{{name}}}{rest}"),
            _ => value.to_owned(),
        };
        let slots = self.overrides.entry(name.to_owned()).or_default();
        let next = slots.len();
        let index = *slots.entry(compressed).or_insert(next);
        Some(format!("${name}_{index}"))
    }

    /// Global bindings.
    #[must_use]
    pub const fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// Bind a global variable directly.
    pub fn set_var(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    /// Split into global bindings and per-name override lists indexed by
    /// their numeric suffix.
    #[must_use]
    pub fn into_parts(self) -> (BTreeMap<String, String>, BTreeMap<String, Vec<String>>) {
        let overrides = self
            .overrides
            .into_iter()
            .map(|(name, slots)| (name, slots.into_keys().collect()))
            .collect();
        (self.vars, overrides)
    }
}
