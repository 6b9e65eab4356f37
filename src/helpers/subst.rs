//! Template substitution.

use camino::Utf8Path;
use regex::{NoExpand, Regex};
use serde::Deserialize;
use serde_json::Value;
use std::fs;

use super::{HelperError, update_if_changed};

/// Substitution dictionary as written by the exporter.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Substitutions {
    /// Pattern to replacement map, applied in document order.
    Map(indexmap::IndexMap<String, Value>),
    /// Ordered `[pattern, replacement]` pairs.
    Pairs(Vec<(String, Value)>),
}

impl Substitutions {
    fn into_pairs(self) -> Vec<(String, Value)> {
        match self {
            Self::Map(map) => map.into_iter().collect(),
            Self::Pairs(pairs) => pairs,
        }
    }
}

/// Response file contents of a substitution edge.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubstPayload {
    /// Make the output executable.
    pub do_chmod: bool,
    /// Substitutions to apply.
    pub subs: Substitutions,
}

fn replacement_text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

/// Apply the substitutions in `payload` to `input` and write `output`.
///
/// Keys are regular expressions and replacements are literal. The output is
/// only rewritten when its contents change, unless it must be made
/// executable.
///
/// # Errors
///
/// Returns [`HelperError`] for unreadable files, a malformed payload or an
/// invalid pattern.
pub fn subst_file(input: &Utf8Path, output: &Utf8Path, payload: &Utf8Path) -> Result<(), HelperError> {
    let mut contents = fs::read_to_string(input).map_err(HelperError::io(input))?;
    let raw = fs::read_to_string(payload).map_err(HelperError::io(payload))?;
    let SubstPayload { do_chmod, subs } =
        serde_json::from_str(&raw).map_err(|source| HelperError::Payload {
            path: payload.to_owned(),
            source,
        })?;

    for (pattern, value) in subs.into_pairs() {
        let regex = Regex::new(&pattern).map_err(|source| HelperError::Pattern {
            pattern: pattern.clone(),
            source,
        })?;
        let replacement = replacement_text(value);
        contents = regex
            .replace_all(&contents, NoExpand(&replacement))
            .into_owned();
    }

    if do_chmod {
        fs::write(output, &contents).map_err(HelperError::io(output))?;
        make_executable(output)
    } else {
        update_if_changed(output, &contents).map(|_| ())
    }
}

#[cfg(unix)]
fn make_executable(path: &Utf8Path) -> Result<(), HelperError> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = fs::metadata(path)
        .map_err(HelperError::io(path))?
        .permissions();
    permissions.set_mode(permissions.mode() | 0o111);
    fs::set_permissions(path, permissions).map_err(HelperError::io(path))
}

#[cfg(not(unix))]
const fn make_executable(_path: &Utf8Path) -> Result<(), HelperError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use rstest::rstest;
    use tempfile::TempDir;

    fn setup(template: &str, payload: &str) -> (TempDir, Utf8PathBuf) {
        let dir = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 path");
        fs::write(root.join("in.txt"), template).expect("write template");
        fs::write(root.join("out.rsp"), payload).expect("write payload");
        (dir, root)
    }

    #[rstest]
    #[case(r#"{"do_chmod": false, "subs": {"@VERSION@": "1.2.3", "@N@": 4}}"#)]
    #[case(r#"{"do_chmod": false, "subs": [["@VERSION@", "1.2.3"], ["@N@", 4]]}"#)]
    fn applies_map_and_pair_substitutions(#[case] payload: &str) {
        let (_dir, root) = setup("v@VERSION@ n@N@ $1\n", payload);
        let output = root.join("out.txt");
        subst_file(&root.join("in.txt"), &output, &root.join("out.rsp")).expect("subst");
        assert_eq!(fs::read_to_string(&output).expect("read"), "v1.2.3 n4 $1\n");
    }

    #[rstest]
    fn replacements_are_literal() {
        let (_dir, root) = setup("name=@X@\n", r#"{"do_chmod": false, "subs": {"@X@": "$0 and \\1"}}"#);
        let output = root.join("out.txt");
        subst_file(&root.join("in.txt"), &output, &root.join("out.rsp")).expect("subst");
        assert_eq!(fs::read_to_string(&output).expect("read"), "name=$0 and \\1\n");
    }

    #[cfg(unix)]
    #[rstest]
    fn chmod_marks_the_output_executable() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, root) = setup("#!/bin/sh\n", r#"{"do_chmod": true, "subs": {}}"#);
        let output = root.join("run.sh");
        subst_file(&root.join("in.txt"), &output, &root.join("out.rsp")).expect("subst");
        let mode = fs::metadata(&output).expect("stat").permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    #[rstest]
    fn invalid_patterns_are_reported() {
        let (_dir, root) = setup("x", r#"{"do_chmod": false, "subs": {"(": "y"}}"#);
        let err = subst_file(&root.join("in.txt"), &root.join("out.txt"), &root.join("out.rsp"))
            .expect_err("bad regex");
        assert!(matches!(err, HelperError::Pattern { ref pattern, .. } if pattern == "("));
    }
}
