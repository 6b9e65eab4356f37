//! Library dependency resolution for link edges.
//!
//! The upstream tool resolves transitive library dependencies through one
//! of two callbacks and records both results on link nodes. Which one
//! applies is a per-node decision delegated to a [`LinkPolicy`].

use crate::graph::{BuildNode, Environment, Executor, SubstError};

/// Separator between the fixed parts of `_LIBFLAGS` and the library list.
const LIBDEPS_SPLIT: &str = " $_LIBDEPS ";

/// How libraries are linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    /// Objects of every dependency are passed directly to the linker.
    Object,
    /// Pre-built archives and shared libraries are linked.
    Library,
}

/// Chooses the [`LinkMode`] of a link node.
pub trait LinkPolicy {
    /// Link mode for a node with environment `env`.
    fn mode(&self, env: &Environment<'_>) -> LinkMode;
}

/// Object mode when `_LIBDEPS` is bound to exactly `$_LIBDEPS_OBJS`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibdepsBinding;

impl LinkPolicy for LibdepsBinding {
    fn mode(&self, env: &Environment<'_>) -> LinkMode {
        if env.raw("_LIBDEPS").as_deref() == Some("$_LIBDEPS_OBJS") {
            LinkMode::Object
        } else {
            LinkMode::Library
        }
    }
}

/// Library dependencies of `node` under `mode`.
#[must_use]
pub fn resolve(node: &BuildNode, mode: LinkMode) -> Vec<String> {
    node.libdeps.as_ref().map_or_else(Vec::new, |libdeps| match mode {
        LinkMode::Object => libdeps.objects.clone(),
        LinkMode::Library => libdeps.libraries.clone(),
    })
}

/// Expand `_LIBFLAGS` without routing the library list through the general
/// substitution.
///
/// Returns `None` when the binding does not have the expected
/// `prefix $_LIBDEPS suffix` shape; callers then substitute it normally.
///
/// # Errors
///
/// Propagates substitution failures of the prefix or suffix.
pub fn expand_libflags(
    env: &Environment<'_>,
    executor: &Executor<'_>,
    libdeps: &[String],
) -> Result<Option<String>, SubstError> {
    let Some(raw) = env.raw("_LIBFLAGS") else {
        return Ok(None);
    };
    let Some((pre, post)) = raw.split_once(LIBDEPS_SPLIT) else {
        return Ok(None);
    };
    let mut parts = Vec::with_capacity(libdeps.len() + 2);
    parts.push(env.subst(pre, Some(executor))?);
    parts.extend(libdeps.iter().map(|lib| format!("\"{lib}\"")));
    parts.push(env.subst(post, Some(executor))?);
    Ok(Some(parts.join(" ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EnvValue, Libdeps, TargetOs, Vars};
    use rstest::rstest;

    fn vars(pairs: &[(&str, &str)]) -> Vars {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), EnvValue::Text((*v).to_owned())))
            .collect()
    }

    #[rstest]
    #[case("$_LIBDEPS_OBJS", LinkMode::Object)]
    #[case("$_LIBDEPS_LIBS", LinkMode::Library)]
    fn policy_follows_the_libdeps_binding(#[case] binding: &str, #[case] expected: LinkMode) {
        let global = vars(&[("_LIBDEPS", binding)]);
        let env = Environment::new(&global, TargetOs::Linux);
        assert_eq!(LibdepsBinding.mode(&env), expected);
    }

    #[rstest]
    fn resolves_the_matching_list() {
        let node: BuildNode = serde_json::from_value(serde_json::json!({
            "targets": ["app"],
            "action": { "kind": "command", "command": "$LINK -o $TARGET $SOURCES" }
        }))
        .expect("node");
        assert!(resolve(&node, LinkMode::Object).is_empty());
        let with_deps = BuildNode {
            libdeps: Some(Libdeps {
                objects: vec![String::from("a.o")],
                libraries: vec![String::from("liba.a")],
            }),
            ..node
        };
        assert_eq!(resolve(&with_deps, LinkMode::Library), vec![String::from("liba.a")]);
    }

    #[rstest]
    fn splits_libflags_around_the_library_list() {
        let global = vars(&[
            ("_LIBFLAGS", "$LIBSTART $_LIBDEPS $LIBEND"),
            ("LIBSTART", "-Wl,--start-group"),
            ("LIBEND", "-Wl,--end-group"),
        ]);
        let env = Environment::new(&global, TargetOs::Linux);
        let targets = vec![String::from("app")];
        let sources = vec![String::from("main.o")];
        let executor = Executor {
            targets: &targets,
            sources: &sources,
        };
        let libs = vec![String::from("liba.a"), String::from("libb.a")];
        let flags = expand_libflags(&env, &executor, &libs).expect("expand");
        assert_eq!(
            flags.as_deref(),
            Some("-Wl,--start-group \"liba.a\" \"libb.a\" -Wl,--end-group")
        );
    }

    #[rstest]
    fn other_shapes_are_left_alone() {
        let global = vars(&[("_LIBFLAGS", "-lm")]);
        let env = Environment::new(&global, TargetOs::Linux);
        let executor = Executor {
            targets: &[],
            sources: &[],
        };
        assert_eq!(expand_libflags(&env, &executor, &[]).expect("expand"), None);
    }
}
