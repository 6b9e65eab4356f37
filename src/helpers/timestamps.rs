//! Compiler upgrade markers.

use camino::Utf8Path;
use std::fs::{self, File, FileTimes};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::HelperError;

/// Round `time` up to the next whole second.
///
/// Markers may live on a file system with coarser timestamps than the
/// compiler's, so comparisons use whole seconds.
fn ceil_seconds(time: SystemTime) -> SystemTime {
    let since = time.duration_since(UNIX_EPOCH).unwrap_or_default();
    let seconds = if since.subsec_nanos() == 0 {
        since.as_secs()
    } else {
        since.as_secs().saturating_add(1)
    };
    UNIX_EPOCH + Duration::from_secs(seconds)
}

fn ensure_file(path: &Utf8Path) -> Result<File, HelperError> {
    if let Some(parent) = path.parent().filter(|dir| !dir.as_str().is_empty()) {
        fs::create_dir_all(parent).map_err(HelperError::io(parent))?;
    }
    File::options()
        .create(true)
        .append(true)
        .open(path)
        .map_err(HelperError::io(path))
}

/// Refresh the markers tracking `compiler`.
///
/// `then` carries the compiler's rounded modification time and `now` the
/// time of the last refresh. Nothing is touched while `then` still matches
/// the compiler, so compiles only rebuild after an upgrade.
///
/// Returns whether the markers were refreshed.
///
/// # Errors
///
/// Returns [`HelperError::Io`] when the compiler cannot be inspected or a
/// marker cannot be written.
pub fn touch_compiler_timestamps(
    compiler: &Utf8Path,
    then: &Utf8Path,
    now: &Utf8Path,
) -> Result<bool, HelperError> {
    let meta = fs::metadata(compiler).map_err(HelperError::io(compiler))?;
    let mtime = ceil_seconds(meta.modified().map_err(HelperError::io(compiler))?);
    let atime = meta.accessed().map_or(mtime, ceil_seconds);

    let current = fs::metadata(then).and_then(|marker| marker.modified()).ok();
    if now.exists() && current == Some(mtime) {
        return Ok(false);
    }

    ensure_file(now)?
        .set_modified(SystemTime::now())
        .map_err(HelperError::io(now))?;
    ensure_file(then)?
        .set_times(FileTimes::new().set_accessed(atime).set_modified(mtime))
        .map_err(HelperError::io(then))?;
    Ok(true)
}
