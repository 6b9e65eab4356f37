//! Resolution of program names to executable paths.
//!
//! Lookups go through the [`ToolLocator`] seam so the exporter can be driven
//! by pinned locations in tests and by a `PATH` search in production.

use std::{
    collections::BTreeMap,
    env,
    num::NonZeroUsize,
    sync::{Mutex, MutexGuard},
};

use camino::{Utf8Path, Utf8PathBuf};
use lru::LruCache;

/// Number of lookups remembered by [`WhichResolver`].
const CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(64) {
    Some(capacity) => capacity,
    None => NonZeroUsize::MIN,
};

/// Directories that are often missing from a scrubbed `PATH`.
const FALLBACK_DIRS: [&str; 3] = ["/usr/local/bin", "/opt/local/bin", "/usr/lib/icecream/bin"];

/// Resolve a program name to an executable path.
pub trait ToolLocator {
    /// Return the path of `program`, or `None` when it cannot be found.
    fn locate(&self, program: &str) -> Option<Utf8PathBuf>;
}

/// `PATH`-style resolver with pinned entries and an LRU cache.
#[derive(Debug)]
pub struct WhichResolver {
    pinned: BTreeMap<String, Utf8PathBuf>,
    search_dirs: Vec<Utf8PathBuf>,
    cache: Mutex<LruCache<String, Option<Utf8PathBuf>>>,
}

impl WhichResolver {
    /// Create a resolver searching `search_dirs` after the pinned entries.
    #[must_use]
    pub fn new(pinned: BTreeMap<String, Utf8PathBuf>, search_dirs: Vec<Utf8PathBuf>) -> Self {
        Self {
            pinned,
            search_dirs,
            cache: Mutex::new(LruCache::new(CACHE_CAPACITY)),
        }
    }

    /// Create a resolver over the process `PATH` plus the usual extra
    /// directories (`/usr/local/bin`, `~/bin`, `/opt/local/bin` and the
    /// icecream wrapper directory).
    #[must_use]
    pub fn from_process_env(pinned: BTreeMap<String, Utf8PathBuf>) -> Self {
        let mut dirs: Vec<Utf8PathBuf> = env::var_os("PATH")
            .map(|raw| {
                env::split_paths(&raw)
                    .filter_map(|dir| Utf8PathBuf::from_path_buf(dir).ok())
                    .filter(|dir| !dir.as_str().is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let home_bin = env::var("HOME")
            .ok()
            .map(|home| Utf8PathBuf::from(home).join("bin"));
        let extras = FALLBACK_DIRS
            .iter()
            .map(Utf8PathBuf::from)
            .chain(home_bin);
        for extra in extras {
            if !dirs.contains(&extra) {
                dirs.push(extra);
            }
        }
        Self::new(pinned, dirs)
    }

    fn lock_cache(&self) -> MutexGuard<'_, LruCache<String, Option<Utf8PathBuf>>> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn search(&self, program: &str) -> Option<Utf8PathBuf> {
        if let Some(pinned) = self.pinned.get(program) {
            return Some(pinned.clone());
        }
        if program.contains('/') || program.contains('\\') {
            let direct = Utf8Path::new(program);
            return is_executable(direct).then(|| direct.to_owned());
        }
        self.search_dirs
            .iter()
            .flat_map(|dir| candidates(dir, program))
            .find(|candidate| is_executable(candidate))
    }
}

impl ToolLocator for WhichResolver {
    fn locate(&self, program: &str) -> Option<Utf8PathBuf> {
        if let Some(cached) = self.lock_cache().get(program) {
            return cached.clone();
        }
        let found = self.search(program);
        self.lock_cache().put(program.to_owned(), found.clone());
        found
    }
}

#[cfg(windows)]
fn candidates(dir: &Utf8Path, program: &str) -> Vec<Utf8PathBuf> {
    if Utf8Path::new(program).extension().is_some() {
        return vec![dir.join(program)];
    }
    [".exe", ".bat", ".cmd"]
        .iter()
        .map(|ext| dir.join(format!("{program}{ext}")))
        .collect()
}

#[cfg(not(windows))]
fn candidates(dir: &Utf8Path, program: &str) -> Vec<Utf8PathBuf> {
    vec![dir.join(program)]
}

#[cfg(unix)]
fn is_executable(path: &Utf8Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Utf8Path) -> bool {
    path.is_file()
}
