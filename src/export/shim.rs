//! Known compositions of upstream list actions.
//!
//! The upstream tool wraps some commands in list actions whose extra steps
//! either do nothing useful at build time or can be checked once during
//! export. The exact step strings and line counts below couple the exporter
//! to the upstream tool's internals; bump [`SHIM_VERSION`] whenever they
//! change so mismatched graph dumps are easy to spot in logs.

use crate::graph::Environment;

/// Revision of the composite shapes recognised here.
pub const SHIM_VERSION: u32 = 1;

/// Step appended to thin archive builds.
pub const NOOP_STEP: &str = "noop_action(target, source, env)";
/// Manifest embedding check appended to Windows program links.
pub const EMBED_MANIFEST_STEP: &str = "embedManifestExeCheck(target, source, env)";
/// Shared-object flag check leading shared library links.
pub const SHARED_FLAG_CHECK_STEP: &str = "SharedFlagChecker(target, source, env)";
/// Versioned symlink creation trailing shared library links.
pub const LIB_SYMLINKS_STEP: &str = "LibSymlinksActionFunction(target, source, env)";
/// Line counts of a shared library link (POSIX, Windows).
pub const SHARED_LINK_LINES: [usize; 2] = [3, 5];

/// Result of reducing a composite action to its real command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reduced {
    /// Command left after dropping the known extra steps.
    pub command: String,
    /// Whether the shared-object flag check must run during export.
    pub check_shared_flags: bool,
}

/// Reduce a composite action.
///
/// Returns the reason as `Err` when a shape that must match does not.
/// Compositions that are not special are joined line by line and left for
/// the caller to classify.
///
/// # Errors
///
/// Fails when a shared library link does not have the expected steps or
/// when a manifest check is stripped while manifests are embedded.
pub fn reduce_composite(steps: &[String], env: &Environment<'_>) -> Result<Reduced, String> {
    let joined = steps.join("\n");
    let lines: Vec<&str> = joined.split('\n').collect();
    let mut kept: Vec<&str> = steps.iter().map(String::as_str).collect();

    if steps.len() == 2 {
        match lines.get(1).copied() {
            Some(NOOP_STEP) => kept.truncate(1),
            Some(EMBED_MANIFEST_STEP) => {
                if env.is_truthy("WINDOWS_EMBED_MANIFEST") {
                    return Err(String::from(
                        "embedding manifests into programs is not supported",
                    ));
                }
                kept.truncate(1);
            }
            _ => {}
        }
    }

    if kept.len() > 1 && joined.contains("$SHLINK") {
        if !SHARED_LINK_LINES.contains(&lines.len()) {
            return Err(format!(
                "shared library link has {} lines, expected one of {SHARED_LINK_LINES:?}",
                lines.len()
            ));
        }
        if lines.first().copied() != Some(SHARED_FLAG_CHECK_STEP) {
            return Err(format!("shared library link must start with {SHARED_FLAG_CHECK_STEP}"));
        }
        let has_symlinks = [2, 4]
            .iter()
            .any(|&idx| lines.get(idx).copied() == Some(LIB_SYMLINKS_STEP));
        if !has_symlinks {
            return Err(format!("shared library link must include {LIB_SYMLINKS_STEP}"));
        }
        let Some(real) = steps.get(1) else {
            return Err(String::from("shared library link has no link step"));
        };
        return Ok(Reduced {
            command: real.clone(),
            check_shared_flags: true,
        });
    }

    Ok(Reduced {
        command: kept.join("\n"),
        check_shared_flags: false,
    })
}
