//! Construction environments and variable substitution.

use camino::Utf8PathBuf;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::error::SubstError;
use super::expr::{Segment, VarRef, parse_command};
use super::locate::ToolLocator;
use super::TargetOs;

/// Maximum nesting of variable expansions.
const MAX_DEPTH: usize = 32;

/// Value bound to a construction variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    /// Boolean flag.
    Flag(bool),
    /// Integer setting.
    Number(i64),
    /// Text, possibly referring to other variables.
    Text(String),
    /// List rendered space separated.
    List(Vec<String>),
}

impl EnvValue {
    /// Python truthiness of the value.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Flag(flag) => *flag,
            Self::Number(number) => *number != 0,
            Self::Text(text) => !text.is_empty(),
            Self::List(items) => !items.is_empty(),
        }
    }

    /// Text of the value before substitution.
    #[must_use]
    pub fn raw(&self) -> String {
        match self {
            Self::Flag(true) => String::from("1"),
            Self::Flag(false) => String::new(),
            Self::Number(number) => number.to_string(),
            Self::Text(text) => text.clone(),
            Self::List(items) => items.join(" "),
        }
    }
}

/// Variable bindings in declaration order.
pub type Vars = IndexMap<String, EnvValue>;

/// Targets and sources of the node being substituted.
#[derive(Debug, Clone, Copy)]
pub struct Executor<'a> {
    /// Output paths.
    pub targets: &'a [String],
    /// Input paths.
    pub sources: &'a [String],
}

/// Layered view over the global environment and an optional node override.
#[derive(Debug, Clone, Copy)]
pub struct Environment<'a> {
    global: &'a Vars,
    local: Option<&'a Vars>,
    os: TargetOs,
}

impl<'a> Environment<'a> {
    /// Create an environment over global bindings.
    #[must_use]
    pub const fn new(global: &'a Vars, os: TargetOs) -> Self {
        Self {
            global,
            local: None,
            os,
        }
    }

    /// Layer node-local bindings over this environment.
    #[must_use]
    pub const fn with_local(self, local: &'a Vars) -> Self {
        Self {
            global: self.global,
            local: Some(local),
            os: self.os,
        }
    }

    /// Target operating system.
    #[must_use]
    pub const fn target_os(&self) -> TargetOs {
        self.os
    }

    /// Look up a binding, node-local first.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&'a EnvValue> {
        self.local
            .and_then(|local| local.get(name))
            .or_else(|| self.global.get(name))
    }

    /// Unsubstituted text of a binding.
    #[must_use]
    pub fn raw(&self, name: &str) -> Option<String> {
        self.get(name).map(EnvValue::raw)
    }

    /// Whether a binding exists and is truthy.
    #[must_use]
    pub fn is_truthy(&self, name: &str) -> bool {
        self.get(name).is_some_and(EnvValue::is_truthy)
    }

    /// Expand `text` the way the upstream tool renders command lines.
    ///
    /// Whitespace outside quotes collapses to single spaces and signature
    /// markers are dropped. Line breaks separating commands are kept.
    ///
    /// # Errors
    ///
    /// Returns a [`SubstError`] for calls, unsupported expressions, unknown
    /// attributes or runaway recursion.
    pub fn subst(&self, text: &str, executor: Option<&Executor<'_>>) -> Result<String, SubstError> {
        let mut out = String::with_capacity(text.len());
        self.expand_into(text, executor, 0, &mut out)?;
        Ok(collapse_whitespace(&out))
    }

    /// Resolve the program named by the first word of `expr`.
    #[must_use]
    pub fn where_is(&self, expr: &str, locator: &dyn ToolLocator) -> Option<Utf8PathBuf> {
        let expanded = self.subst(expr, None).ok()?;
        let program = expanded.split_whitespace().next()?;
        locator.locate(program)
    }

    fn expand_into(
        &self,
        text: &str,
        executor: Option<&Executor<'_>>,
        depth: usize,
        out: &mut String,
    ) -> Result<(), SubstError> {
        if depth > MAX_DEPTH {
            return Err(SubstError::RecursionLimit {
                text: text.to_owned(),
            });
        }
        for segment in parse_command(text) {
            match segment {
                Segment::Literal(literal) => out.push_str(literal),
                Segment::Dollar => out.push('$'),
                Segment::SignatureMark => {}
                Segment::Var(var) => self.expand_var(&var, executor, depth, out)?,
                Segment::Call(call) => {
                    return Err(SubstError::UnsupportedCall {
                        name: call.name.to_owned(),
                    });
                }
                Segment::Expr(expr) => {
                    return Err(SubstError::UnsupportedExpression {
                        expr: expr.to_owned(),
                    });
                }
            }
        }
        Ok(())
    }

    fn expand_var(
        &self,
        var: &VarRef<'_>,
        executor: Option<&Executor<'_>>,
        depth: usize,
        out: &mut String,
    ) -> Result<(), SubstError> {
        if let Some(paths) = node_paths(var.name, executor) {
            let selected = var.slice.map_or(paths, |slice| slice.apply(paths));
            let mut rendered = Vec::with_capacity(selected.len());
            for path in selected {
                rendered.push(apply_attrs(var, path, self.os)?);
            }
            out.push_str(&rendered.join(" "));
            return Ok(());
        }
        if let Some(attr) = var.attrs.first() {
            return Err(SubstError::UnknownAttribute {
                name: var.name.to_owned(),
                attr: (*attr).to_owned(),
            });
        }
        match self.get(var.name) {
            None => Ok(()),
            Some(EnvValue::Text(text)) => self.expand_into(text, executor, depth + 1, out),
            Some(EnvValue::List(items)) => {
                let selected = var.slice.map_or(items.as_slice(), |slice| slice.apply(items));
                for (idx, item) in selected.iter().enumerate() {
                    if idx > 0 {
                        out.push(' ');
                    }
                    self.expand_into(item, executor, depth + 1, out)?;
                }
                Ok(())
            }
            Some(other) => {
                out.push_str(&other.raw());
                Ok(())
            }
        }
    }
}

fn node_paths<'e>(name: &str, executor: Option<&Executor<'e>>) -> Option<&'e [String]> {
    let names = [
        "TARGET",
        "TARGETS",
        "SOURCE",
        "SOURCES",
        "CHANGED_SOURCES",
        "CHANGED_TARGETS",
        "UNCHANGED_SOURCES",
        "UNCHANGED_TARGETS",
    ];
    if !names.contains(&name) {
        return None;
    }
    let Some(exec) = executor else {
        return Some(&[]);
    };
    Some(match name {
        "TARGET" => exec.targets.get(..1).unwrap_or_default(),
        "TARGETS" | "CHANGED_TARGETS" => exec.targets,
        "SOURCE" => exec.sources.get(..1).unwrap_or_default(),
        "SOURCES" | "CHANGED_SOURCES" => exec.sources,
        _ => &[],
    })
}

fn apply_attrs(var: &VarRef<'_>, path: &str, os: TargetOs) -> Result<String, SubstError> {
    let mut value = path.to_owned();
    for attr in &var.attrs {
        value = match *attr {
            "windows" => {
                if os.is_windows() {
                    value.replace('/', "\\")
                } else {
                    value
                }
            }
            "posix" => value.replace('\\', "/"),
            "file" => camino::Utf8Path::new(&value)
                .file_name()
                .unwrap_or_default()
                .to_owned(),
            "dir" => camino::Utf8Path::new(&value)
                .parent()
                .map(|parent| parent.as_str())
                .filter(|parent| !parent.is_empty())
                .unwrap_or(".")
                .to_owned(),
            "abspath" | "srcpath" => value,
            other => {
                return Err(SubstError::UnknownAttribute {
                    name: var.name.to_owned(),
                    attr: other.to_owned(),
                });
            }
        };
    }
    Ok(value)
}

/// Collapse runs of blanks outside quotes and trim each line.
fn collapse_whitespace(text: &str) -> String {
    text.split('\n')
        .map(|line| {
            let mut out = String::with_capacity(line.len());
            let mut quote: Option<char> = None;
            let mut pending_space = false;
            for ch in line.chars() {
                if quote.is_none() && (ch == ' ' || ch == '\t') {
                    pending_space = !out.is_empty();
                    continue;
                }
                if pending_space {
                    out.push(' ');
                    pending_space = false;
                }
                match quote {
                    Some(open) if open == ch => quote = None,
                    None if ch == '"' || ch == '\'' => quote = Some(ch),
                    _ => {}
                }
                out.push(ch);
            }
            out
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn vars() -> Vars {
        let mut vars = Vars::new();
        vars.insert("CXX".into(), EnvValue::Text("g++".into()));
        vars.insert(
            "CXXCOM".into(),
            EnvValue::Text("$CXX -o $TARGET -c $CXXFLAGS $SOURCES".into()),
        );
        vars.insert(
            "CXXFLAGS".into(),
            EnvValue::List(vec!["-O2".into(), "$EXTRA".into()]),
        );
        vars.insert("EXTRA".into(), EnvValue::Text("-g".into()));
        vars.insert("LOOP".into(), EnvValue::Text("$LOOP".into()));
        vars.insert("GATE".into(), EnvValue::Flag(true));
        vars
    }

    #[rstest]
    fn expands_recursively_with_executor(vars: Vars) {
        let env = Environment::new(&vars, TargetOs::Linux);
        let targets = vec![String::from("a.o")];
        let sources = vec![String::from("a.cpp"), String::from("b.cpp")];
        let exec = Executor {
            targets: &targets,
            sources: &sources,
        };
        let text = env.subst("$CXXCOM", Some(&exec)).expect("subst");
        assert_eq!(text, "g++ -o a.o -c -O2 -g a.cpp b.cpp");
    }

    #[rstest]
    fn local_bindings_shadow_global(vars: Vars) {
        let mut local = Vars::new();
        local.insert("EXTRA".into(), EnvValue::Text("-DLOCAL".into()));
        let env = Environment::new(&vars, TargetOs::Linux).with_local(&local);
        assert_eq!(env.subst("$CXXFLAGS", None).expect("subst"), "-O2 -DLOCAL");
    }

    #[rstest]
    fn unknown_names_render_empty_and_spaces_collapse(vars: Vars) {
        let env = Environment::new(&vars, TargetOs::Linux);
        assert_eq!(
            env.subst("a  $MISSING   b 'x  y'", None).expect("subst"),
            "a b 'x  y'"
        );
    }

    #[rstest]
    fn detects_runaway_recursion(vars: Vars) {
        let env = Environment::new(&vars, TargetOs::Linux);
        assert!(matches!(
            env.subst("$LOOP", None),
            Err(SubstError::RecursionLimit { .. })
        ));
    }

    #[rstest]
    fn calls_are_not_evaluated(vars: Vars) {
        let env = Environment::new(&vars, TargetOs::Linux);
        assert_eq!(
            env.subst("${_concat(a, b)}", None),
            Err(SubstError::UnsupportedCall {
                name: String::from("_concat")
            })
        );
    }

    #[rstest]
    #[case(TargetOs::Windows, "$TARGET.windows", "out\\app.exe")]
    #[case(TargetOs::Linux, "$TARGET.windows", "out/app.exe")]
    #[case(TargetOs::Linux, "${TARGET.file}", "app.exe")]
    #[case(TargetOs::Linux, "${TARGET.dir}", "out")]
    #[case(TargetOs::Linux, "${SOURCES[1:]}", "b.o c.o")]
    fn renders_node_attributes(
        vars: Vars,
        #[case] os: TargetOs,
        #[case] text: &str,
        #[case] expected: &str,
    ) {
        let env = Environment::new(&vars, os);
        let targets = vec![String::from("out/app.exe")];
        let sources = vec![String::from("a.o"), String::from("b.o"), String::from("c.o")];
        let exec = Executor {
            targets: &targets,
            sources: &sources,
        };
        assert_eq!(env.subst(text, Some(&exec)).expect("subst"), expected);
    }

    #[rstest]
    fn truthiness_follows_python(vars: Vars) {
        let env = Environment::new(&vars, TargetOs::Linux);
        assert!(env.is_truthy("GATE"));
        assert!(env.is_truthy("CXX"));
        assert!(!env.is_truthy("MISSING"));
    }
}
