//! The helper programs invoked from generated files.

use anyhow::{Context, Result, ensure};
use assert_cmd::Command;
use predicates::prelude::*;
use rstest::{fixture, rstest};
use std::fs;
use tempfile::TempDir;

#[fixture]
fn workspace() -> TempDir {
    TempDir::new().expect("temp dir")
}

fn helper(dir: &TempDir) -> Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("ninjafy");
    cmd.current_dir(dir.path())
        .env_remove("NINJAFY_CONFIG_PATH")
        .arg("helper");
    cmd
}

#[rstest]
fn subst_replaces_patterns_literally(workspace: TempDir) -> Result<()> {
    fs::write(workspace.path().join("config.h.in"), "#define VERSION @VERSION@\n")?;
    fs::write(
        workspace.path().join("config.h.rsp"),
        r#"{"do_chmod":false,"subs":[["@VERSION@","$1.0"]]}"#,
    )?;
    helper(&workspace)
        .args(["subst", "config.h.in", "config.h", "config.h.rsp"])
        .assert()
        .success();
    let written = fs::read_to_string(workspace.path().join("config.h"))?;
    ensure!(written == "#define VERSION $1.0\n", "unexpected output {written:?}");
    Ok(())
}

#[cfg(unix)]
#[rstest]
fn subst_can_mark_scripts_executable(workspace: TempDir) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::write(workspace.path().join("run.sh.in"), "#!/bin/sh\nexec %BIN%\n")?;
    fs::write(
        workspace.path().join("run.rsp"),
        r#"{"do_chmod":true,"subs":{"%BIN%":"build/app"}}"#,
    )?;
    helper(&workspace)
        .args(["subst", "run.sh.in", "run.sh", "run.rsp"])
        .assert()
        .success();
    let script = workspace.path().join("run.sh");
    ensure!(fs::read_to_string(&script)? == "#!/bin/sh\nexec build/app\n");
    let mode = fs::metadata(&script)?.permissions().mode();
    ensure!(mode & 0o100 != 0, "script is not executable: {mode:o}");
    Ok(())
}

#[rstest]
fn subst_rejects_malformed_payloads(workspace: TempDir) -> Result<()> {
    fs::write(workspace.path().join("in"), "text")?;
    fs::write(workspace.path().join("bad.rsp"), "not json")?;
    helper(&workspace)
        .args(["subst", "in", "out", "bad.rsp"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("malformed payload"));
    ensure!(!workspace.path().join("out").exists());
    Ok(())
}

#[rstest]
fn test_list_writes_one_entry_per_line(workspace: TempDir) -> Result<()> {
    fs::write(
        workspace.path().join("list.rsp"),
        r#"["build/unittests/a_test","build/unittests/b_test"]"#,
    )?;
    helper(&workspace)
        .args(["test-list", "unittests.txt", "list.rsp"])
        .assert()
        .success();
    let written = fs::read_to_string(workspace.path().join("unittests.txt"))
        .context("read test list")?;
    ensure!(written == "build/unittests/a_test\nbuild/unittests/b_test\n");
    Ok(())
}

#[rstest]
fn split_lines_rewrites_response_file(workspace: TempDir) -> Result<()> {
    let rsp = workspace.path().join("app.exe.rsp");
    fs::write(&rsp, "a.obj \"my lib.lib\" /nologo")?;
    helper(&workspace)
        .args(["split-lines", "app.exe.rsp"])
        .assert()
        .success();
    ensure!(fs::read_to_string(&rsp)? == "a.obj\n\"my lib.lib\"\n/nologo\n");
    Ok(())
}

#[rstest]
fn compiler_timestamps_are_idempotent(workspace: TempDir) -> Result<()> {
    fs::write(workspace.path().join("cc"), "compiler")?;
    let args = [
        "compiler-timestamps",
        "cc",
        "stamps/cc.mtime",
        "stamps/cc.last_update",
    ];
    helper(&workspace).args(args).assert().success();
    let now = workspace.path().join("stamps/cc.last_update");
    let first = fs::metadata(&now)?.modified()?;
    helper(&workspace).args(args).assert().success();
    let second = fs::metadata(&now)?.modified()?;
    ensure!(first == second, "unchanged compiler refreshed the marker");
    ensure!(workspace.path().join("stamps/cc.mtime").is_file());
    Ok(())
}

#[rstest]
fn unknown_helpers_are_rejected(workspace: TempDir) {
    helper(&workspace)
        .arg("fetch")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}
