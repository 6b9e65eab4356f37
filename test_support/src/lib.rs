//! Test utilities shared by the integration tests.
//!
//! Provides build graph fixtures, fake executables standing in for the
//! compiler and Ninja, and a guard for environment changes.

pub mod env;
pub mod graph;

pub use env::ScopedEnv;
pub use graph::GraphFixture;

use std::fs;
use std::path::{Path, PathBuf};

/// Write an executable shell script `name` into `dir` that runs `body`.
///
/// # Panics
///
/// Panics when the script cannot be written.
pub fn fake_executable(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(&path).expect("meta").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("perms");
    }
    path
}
