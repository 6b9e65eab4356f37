#![forbid(unsafe_code)]

//! Shared environment constants used across ninjafy crates (library, tests,
//! and helpers).

/// Environment variable naming the Ninja executable that the exported file is
/// written for.
///
/// When set, it takes precedence over a `PATH` lookup. The exporter uses the
/// resolved binary for the file's shebang line and for the compile-database
/// rule.
///
/// # Examples
///
/// ```
/// use ninja_env::NINJA_ENV;
/// assert_eq!(NINJA_ENV, "NINJAFY_NINJA");
/// ```
pub const NINJA_ENV: &str = "NINJAFY_NINJA";
