//! Command rewriting.
//!
//! Tool commands are turned into rule templates by replacing the upstream
//! node placeholders with `$in` and `$out`. Every other `$NAME` word stays
//! a Ninja variable whose value is bound per edge.

use std::collections::BTreeMap;

use super::classify::Tool;
use super::error::ExportError;
use crate::graph::TargetOs;

/// Placeholder replacements, applied in order. A placeholder only matches
/// as a whole word: `$TARGETS` and `$TARGET.dir` are left for the leftover
/// check to reject.
const PLACEHOLDERS: [(&str, &str); 7] = [
    ("$TARGET.windows", "$out"),
    ("$TARGET", "$out"),
    ("$CHANGED_SOURCES", "$in"),
    ("$SOURCES.windows", "$in"),
    ("$_SHLINK_TARGETS", "$out"),
    ("$_SHLINK_SOURCES", "$in"),
    ("$SOURCES", "$in"),
];

/// Variables whose value differs on nearly every edge and is never interned.
pub const PER_EDGE_VARIABLES: [&str; 3] = ["_LIBFLAGS", "_PDB", "_MSVC_OUTPUT_FLAG"];

/// Join a multi-line command into a single shell line.
#[must_use]
pub fn make_command(command: &str, os: TargetOs) -> String {
    if !command.contains('\n') {
        return command.to_owned();
    }
    let joined = command.split('\n').collect::<Vec<_>>().join(" && ");
    if os.is_windows() {
        format!("cmd /c {joined}")
    } else {
        joined
    }
}

/// Rewrite a tool command into a rule template.
///
/// # Errors
///
/// Returns [`ExportError::UnresolvedPlaceholder`] when a target or source
/// placeholder survives the rewrite.
pub fn to_template(node: &str, command: &str, os: TargetOs) -> Result<String, ExportError> {
    let replaced = PLACEHOLDERS
        .iter()
        .fold(command.to_owned(), |acc, (from, to)| {
            replace_placeholder(&acc, from, to)
        });
    let template = make_command(&replaced, os);
    if let Some(word) = template
        .split_whitespace()
        .find(|word| word.contains("TARGET") || word.contains("SOURCE"))
    {
        return Err(ExportError::UnresolvedPlaceholder {
            node: node.to_owned(),
            placeholder: word.to_owned(),
            command: template.clone(),
        });
    }
    Ok(template)
}

fn replace_placeholder(text: &str, from: &str, to: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some((head, after)) = rest.split_once(from) {
        out.push_str(head);
        let continues = after
            .chars()
            .next()
            .is_some_and(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '.');
        out.push_str(if continues { from } else { to });
        rest = after;
    }
    out.push_str(rest);
    out
}

/// Split a command into words, honouring the quoting rules of the target.
///
/// # Errors
///
/// Returns [`ExportError::StructuralMismatch`] for unbalanced quotes.
pub fn split_words(node: &str, command: &str, os: TargetOs) -> Result<Vec<String>, ExportError> {
    if os.is_windows() {
        return Ok(split_non_posix(command));
    }
    shlex::split(command)
        .ok_or_else(|| ExportError::mismatch(node, command, "unbalanced quotes in command"))
}

/// Split on whitespace without interpreting escapes; quoted words keep
/// their quotes.
#[must_use]
pub fn split_non_posix(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&first) = chars.peek() {
        if first.is_whitespace() {
            chars.next();
            continue;
        }
        let mut word = String::new();
        if first == '"' || first == '\'' {
            word.push(first);
            chars.next();
            for ch in chars.by_ref() {
                word.push(ch);
                if ch == first {
                    break;
                }
            }
        } else {
            while let Some(ch) = chars.next_if(|ch| !ch.is_whitespace()) {
                word.push(ch);
            }
        }
        words.push(word);
    }
    words
}

/// Variable words of a template: every word starting with `$` other than
/// `$in` and `$out`, paired with its bare name.
///
/// # Errors
///
/// Returns [`ExportError::UnresolvedPlaceholder`] for node placeholders and
/// for words that are not plain variable references.
pub fn variable_words(
    node: &str,
    template: &str,
    words: &[String],
) -> Result<Vec<(String, String)>, ExportError> {
    let mut found = Vec::new();
    for word in words {
        if !word.starts_with('$') || word == "$in" || word == "$out" {
            continue;
        }
        let name = word.trim_matches(|c| matches!(c, '$' | '{' | '}'));
        let plain = name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_');
        if name.starts_with("TARGET") || name.starts_with("SOURCE") || !plain {
            return Err(ExportError::UnresolvedPlaceholder {
                node: node.to_owned(),
                placeholder: word.clone(),
                command: template.to_owned(),
            });
        }
        found.push((word.clone(), name.to_owned()));
    }
    Ok(found)
}

/// Double every `$` so Ninja reproduces the text literally.
#[must_use]
pub fn escape_value(text: &str) -> String {
    text.replace('$', "$$")
}

/// Escape a path for a `build` line.
#[must_use]
pub fn escape_path(path: &str) -> String {
    path.replace("$ ", "$$ ").replace(' ', "$ ").replace(':', "$:")
}

/// One command template per tool.
///
/// All edges of a tool share a rule, so every edge must rewrite to the same
/// template.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RuleTable {
    commands: BTreeMap<Tool, String>,
}

impl RuleTable {
    /// Record the template of `tool`.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::RuleConflict`] when `tool` was already
    /// registered with a different template.
    pub fn register(&mut self, tool: Tool, template: &str) -> Result<(), ExportError> {
        match self.commands.get(&tool) {
            Some(existing) if existing != template => Err(ExportError::RuleConflict {
                tool: tool.name().to_owned(),
                existing: existing.clone(),
                conflicting: template.to_owned(),
            }),
            Some(_) => Ok(()),
            None => {
                self.commands.insert(tool, template.to_owned());
                Ok(())
            }
        }
    }

    /// Template of `tool`, if any edge used it.
    #[must_use]
    pub fn get(&self, tool: Tool) -> Option<&str> {
        self.commands.get(&tool).map(String::as_str)
    }

    /// Whether any edge used `tool`.
    #[must_use]
    pub fn contains(&self, tool: Tool) -> bool {
        self.commands.contains_key(&tool)
    }

    /// Rewrite the template of `tool` in place, if registered.
    pub fn decorate(&mut self, tool: Tool, rewrite: impl FnOnce(&str) -> String) {
        if let Some(command) = self.commands.get_mut(&tool) {
            *command = rewrite(command);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("$CXX -o $TARGET -c $SOURCES", "$CXX -o $out -c $in")]
    #[case("$CC /Fo$TARGET.windows $SOURCES.windows", "$CC /Fo$out $in")]
    #[case("$SHLINK -o $_SHLINK_TARGETS $_SHLINK_SOURCES", "$SHLINK -o $out $in")]
    #[case("$AR rc $TARGET $CHANGED_SOURCES", "$AR rc $out $in")]
    #[case("$LINK /OUT:\"$TARGET\" $SOURCES", "$LINK /OUT:\"$out\" $in")]
    fn rewrites_placeholders(#[case] command: &str, #[case] expected: &str) {
        let template = to_template("out", command, TargetOs::Linux).expect("rewrite");
        assert_eq!(template, expected);
    }

    #[rstest]
    fn rejects_leftover_placeholders() {
        let err = to_template("out", "$CXX -o $TARGET -c $SOURCE", TargetOs::Linux)
            .expect_err("SOURCE is not handled");
        assert!(matches!(
            err,
            ExportError::UnresolvedPlaceholder { placeholder, .. } if placeholder == "$SOURCE"
        ));
    }

    #[rstest]
    #[case("$AR rc $TARGETS $SOURCES", "$TARGETS")]
    #[case("mkdir -p $TARGET.dir && $CXX -o $TARGET $SOURCES", "$TARGET.dir")]
    #[case("$CXX -o $TARGET -c $SOURCES.abspath", "$SOURCES.abspath")]
    #[case("$CC -o $TARGET_NAME $SOURCES", "$TARGET_NAME")]
    fn rejects_placeholders_with_suffixes(#[case] command: &str, #[case] word: &str) {
        let err = to_template("lib.a", command, TargetOs::Linux)
            .expect_err("suffixed placeholder must not be rewritten");
        assert!(matches!(
            err,
            ExportError::UnresolvedPlaceholder { placeholder, .. } if placeholder == word
        ));
    }

    #[rstest]
    fn joins_multi_line_commands() {
        assert_eq!(make_command("a\nb", TargetOs::Linux), "a && b");
        assert_eq!(make_command("a\nb", TargetOs::Windows), "cmd /c a && b");
        assert_eq!(make_command("a", TargetOs::Windows), "a");
    }

    #[rstest]
    fn conflicting_templates_are_fatal() {
        let mut table = RuleTable::default();
        table.register(Tool::Cxx, "$CXX -o $out -c $in").expect("first");
        table.register(Tool::Cxx, "$CXX -o $out -c $in").expect("same");
        let err = table
            .register(Tool::Cxx, "$CXX -c $in -o $out")
            .expect_err("conflict");
        assert!(matches!(err, ExportError::RuleConflict { tool, .. } if tool == "CXX"));
    }

    #[rstest]
    fn collects_variable_words() {
        let words: Vec<String> = ["$CXX", "-o", "$out", "${CXXFLAGS}", "$in", "-c"]
            .iter()
            .map(|w| (*w).to_owned())
            .collect();
        let vars = variable_words("a.o", "", &words).expect("words");
        assert_eq!(
            vars,
            vec![
                (String::from("$CXX"), String::from("CXX")),
                (String::from("${CXXFLAGS}"), String::from("CXXFLAGS")),
            ]
        );
    }

    #[rstest]
    fn rejects_sliced_variables() {
        let words = vec![String::from("${SOURCES[1:]}")];
        assert!(variable_words("a.o", "", &words).is_err());
    }

    #[rstest]
    #[case("a \"b c\" d", &["a", "\"b c\"", "d"])]
    #[case("/Fo\"x y\" z", &["/Fo\"x", "y\"", "z"])]
    #[case("  spaced   out ", &["spaced", "out"])]
    fn splits_without_posix_rules(#[case] text: &str, #[case] expected: &[&str]) {
        assert_eq!(split_non_posix(text), expected);
    }

    #[rstest]
    fn escapes_paths_and_values() {
        assert_eq!(escape_path("a b:c"), "a$ b$:c");
        assert_eq!(escape_path("x.$pch_suffix"), "x.$pch_suffix");
        assert_eq!(escape_value("echo $HOME"), "echo $$HOME");
    }
}
