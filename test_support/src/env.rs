//! Serialised, self-restoring changes to the process environment.
//!
//! `std::env::set_var` is `unsafe` in Rust 2024 because the environment is
//! process-global. [`ScopedEnv`] holds a global lock for its whole lifetime
//! and puts every variable it touched back on drop, so tests that mutate the
//! environment cannot observe each other.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::sync::{Mutex, MutexGuard};

static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Guard holding the global environment lock.
pub(crate) struct EnvLock {
    _guard: MutexGuard<'static, ()>,
}

impl fmt::Debug for EnvLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvLock").finish_non_exhaustive()
    }
}

impl EnvLock {
    /// Block until no other test is changing the environment.
    pub(crate) fn acquire() -> Self {
        let guard = ENV_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Self { _guard: guard }
    }
}

/// Environment changes undone when the value is dropped.
#[derive(Debug)]
pub struct ScopedEnv {
    saved: Vec<(String, Option<OsString>)>,
    _lock: EnvLock,
}

impl ScopedEnv {
    /// Take the environment lock without changing anything yet.
    pub fn new() -> Self {
        Self {
            saved: Vec::new(),
            _lock: EnvLock::acquire(),
        }
    }

    fn remember(&mut self, name: &str) {
        if self.saved.iter().all(|(saved, _)| saved != name) {
            self.saved.push((name.to_owned(), std::env::var_os(name)));
        }
    }

    /// Set `name` to `value` until the guard is dropped.
    pub fn set(mut self, name: &str, value: impl AsRef<OsStr>) -> Self {
        self.remember(name);
        // SAFETY: the lock held by `self` serialises environment mutation.
        unsafe { std::env::set_var(name, value) };
        self
    }

    /// Unset `name` until the guard is dropped.
    pub fn remove(mut self, name: &str) -> Self {
        self.remember(name);
        // SAFETY: the lock held by `self` serialises environment mutation.
        unsafe { std::env::remove_var(name) };
        self
    }
}

impl Default for ScopedEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ScopedEnv {
    fn drop(&mut self) {
        for (name, previous) in self.saved.drain(..).rev() {
            // SAFETY: the lock is still held; it is released after this body.
            unsafe {
                match previous {
                    Some(value) => std::env::set_var(&name, value),
                    None => std::env::remove_var(&name),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restores_previous_values() {
        let name = "NINJAFY_TEST_SUPPORT_SCOPED";
        {
            let _env = ScopedEnv::new().set(name, "outer");
        }
        assert!(std::env::var_os(name).is_none());
        {
            let _env = ScopedEnv::new().set(name, "one").set(name, "two");
            assert_eq!(std::env::var(name).as_deref(), Ok("two"));
        }
        assert!(std::env::var_os(name).is_none());
    }
}
