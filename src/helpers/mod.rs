//! Helper programs invoked by the emitted build file.
//!
//! Ninja runs these through `$HELPER`, the exporter binary followed by the
//! `helper` subcommand. Argument contracts are fixed: the exported file
//! passes paths positionally.

mod error;
mod subst;
mod timestamps;

pub use error::HelperError;
pub use subst::{SubstPayload, Substitutions, subst_file};
pub use timestamps::touch_compiler_timestamps;

use camino::Utf8Path;
use std::fs;
use tracing::debug;

use crate::export::split_non_posix;

/// Write `contents` to `path` unless it already holds exactly that.
///
/// Returns whether the file was written.
///
/// # Errors
///
/// Returns [`HelperError::Io`] when the file cannot be written.
pub fn update_if_changed(path: &Utf8Path, contents: &str) -> Result<bool, HelperError> {
    if fs::read_to_string(path).is_ok_and(|current| current == contents) {
        debug!(path = %path, "contents unchanged; leaving file alone");
        return Ok(false);
    }
    fs::write(path, contents).map_err(HelperError::io(path))?;
    Ok(true)
}

/// Write the JSON string list in `payload` to `output`, one entry per line.
///
/// # Errors
///
/// Returns [`HelperError::Payload`] for a malformed list and
/// [`HelperError::Io`] when a file cannot be accessed.
pub fn write_test_list(output: &Utf8Path, payload: &Utf8Path) -> Result<(), HelperError> {
    let text = fs::read_to_string(payload).map_err(HelperError::io(payload))?;
    let items: Vec<String> =
        serde_json::from_str(&text).map_err(|source| HelperError::Payload {
            path: payload.to_owned(),
            source,
        })?;
    let mut contents = items.join("\n");
    contents.push('\n');
    update_if_changed(output, &contents)?;
    Ok(())
}

/// Rewrite a response file with one argument per line.
///
/// Quoted arguments keep their quotes, as the MSVC tools expect.
///
/// # Errors
///
/// Returns [`HelperError::Io`] when the file cannot be read or written.
pub fn split_lines(rsp: &Utf8Path) -> Result<(), HelperError> {
    let text = fs::read_to_string(rsp).map_err(HelperError::io(rsp))?;
    let contents: String = split_non_posix(&text)
        .into_iter()
        .map(|arg| arg + "\n")
        .collect();
    fs::write(rsp, contents).map_err(HelperError::io(rsp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use rstest::rstest;
    use tempfile::TempDir;

    fn workspace() -> (TempDir, Utf8PathBuf) {
        let dir = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 path");
        (dir, root)
    }

    #[rstest]
    fn test_lists_are_newline_terminated() {
        let (_dir, root) = workspace();
        let payload = root.join("tests.txt.rsp");
        fs::write(&payload, r#"["build/a_test", "build/b_test"]"#).expect("write");
        let output = root.join("tests.txt");
        write_test_list(&output, &payload).expect("list");
        assert_eq!(
            fs::read_to_string(&output).expect("read"),
            "build/a_test\nbuild/b_test\n"
        );
    }

    #[rstest]
    fn unchanged_files_are_not_rewritten() {
        let (_dir, root) = workspace();
        let path = root.join("out.txt");
        assert!(update_if_changed(&path, "same\n").expect("first write"));
        assert!(!update_if_changed(&path, "same\n").expect("second write"));
        assert!(update_if_changed(&path, "other\n").expect("third write"));
    }

    #[rstest]
    fn response_files_are_split_one_argument_per_line() {
        let (_dir, root) = workspace();
        let rsp = root.join("app.exe.rsp");
        fs::write(&rsp, "/nologo  /OUT:app.exe \"C:\\Program Files\\x.lib\" a.obj").expect("write");
        split_lines(&rsp).expect("split");
        assert_eq!(
            fs::read_to_string(&rsp).expect("read"),
            "/nologo\n/OUT:app.exe\n\"C:\\Program Files\\x.lib\"\na.obj\n"
        );
    }

    #[rstest]
    fn malformed_lists_are_reported() {
        let (_dir, root) = workspace();
        let payload = root.join("bad.rsp");
        fs::write(&payload, "{not json").expect("write");
        let err = write_test_list(&root.join("tests.txt"), &payload).expect_err("bad payload");
        assert!(matches!(err, HelperError::Payload { .. }));
    }
}
