//! File writing for the exported Ninja file and its companion depfile.
//!
//! Files are replaced atomically: the contents go to a temporary file in the
//! destination directory, which is flushed, synced and then renamed over the
//! destination. Ninja never observes a half-written file.

use anyhow::{Context, Result as AnyResult};
use camino::Utf8Path;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tempfile::Builder;
use tracing::debug;

/// Return `true` when `path` is the CLI sentinel indicating "write to stdout".
#[must_use]
pub fn is_stdout_path(path: &Path) -> bool {
    path.as_os_str() == "-"
}

/// Atomically replace `path` with `content`.
pub fn write_atomically(path: &Utf8Path, content: &str) -> AnyResult<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    fs::create_dir_all(parent)
        .with_context(|| format!("creating parent directory {parent}"))?;
    let mut tmp = Builder::new()
        .prefix(".ninjafy.")
        .tempfile_in(parent)
        .with_context(|| format!("creating temporary file in {parent}"))?;
    {
        let handle = tmp.as_file_mut();
        handle
            .write_all(content.as_bytes())
            .with_context(|| format!("writing {path}"))?;
        handle.flush().with_context(|| format!("flushing {path}"))?;
        handle.sync_all().with_context(|| format!("syncing {path}"))?;
    }
    tmp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("replacing {path}"))?;
    debug!(%path, bytes = content.len(), "wrote file");
    Ok(())
}

/// Mark `path` executable so the shebang line can run it.
#[cfg(unix)]
pub fn make_executable(path: &Utf8Path) -> AnyResult<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = fs::metadata(path)
        .with_context(|| format!("reading permissions of {path}"))?
        .permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).with_context(|| format!("marking {path} executable"))
}

/// Shebang lines are not honoured here.
#[cfg(not(unix))]
pub const fn make_executable(_path: &Utf8Path) -> AnyResult<()> {
    Ok(())
}

fn is_broken_pipe(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::BrokenPipe
}

fn write_all_ignoring_broken_pipe(writer: &mut impl Write, buf: &[u8]) -> io::Result<()> {
    match writer.write_all(buf) {
        Ok(()) => Ok(()),
        Err(err) if is_broken_pipe(&err) => Ok(()),
        Err(err) => Err(err),
    }
}

fn flush_ignoring_broken_pipe(writer: &mut impl Write) -> io::Result<()> {
    match writer.flush() {
        Ok(()) => Ok(()),
        Err(err) if is_broken_pipe(&err) => Ok(()),
        Err(err) => Err(err),
    }
}

/// Write `content` to stdout; a closed pipe is not an error.
pub fn write_stdout(content: &str) -> AnyResult<()> {
    let mut stdout = io::stdout().lock();
    write_all_ignoring_broken_pipe(&mut stdout, content.as_bytes())
        .context("writing the Ninja file to stdout")?;
    flush_ignoring_broken_pipe(&mut stdout).context("flushing stdout")?;
    Ok(())
}
