//! Configuration-time diagnostics.
//!
//! Before exporting, the local object cache and the distributed compiler
//! are asked for their settings and versions once. Misconfigurations that
//! would only surface as confusing build failures are reported here.

mod error;

pub use error::ProbeError;

use camino::{Utf8Path, Utf8PathBuf};
use semver::{Prerelease, Version};
use std::io::{self, Read};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

use crate::export::IcecreamOptions;
use crate::graph::{Environment, TargetOs, ToolLocator, Toolchain};

/// Default time allowed for each probe command.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const COMPILE_FLAG_VARS: [&str; 3] = ["CCFLAGS", "CFLAGS", "CXXFLAGS"];

/// What to probe.
#[derive(Clone, Copy)]
pub struct ProbeRequest<'a> {
    /// Global environment of the graph.
    pub env: Environment<'a>,
    /// Compiler family.
    pub toolchain: Toolchain,
    /// Program lookup.
    pub locator: &'a dyn ToolLocator,
    /// Whether the object cache may be used.
    pub use_cache: bool,
    /// Whether pre-compiled headers are requested.
    pub pch: bool,
    /// Whether distributed compilation is requested.
    pub icecream: bool,
    /// Time allowed for each command.
    pub timeout: Duration,
}

/// Findings of [`probe`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    /// Object cache program.
    pub ccache: Option<Utf8PathBuf>,
    /// Object cache version.
    pub ccache_version: Option<Version>,
    /// Distributed compilation wrappers.
    pub icecream: Option<IcecreamOptions>,
}

/// Probe the object cache and the distributed compiler.
///
/// Only GCC-style toolchains use either; MSVC builds get an empty report.
///
/// # Errors
///
/// Returns a [`ProbeError`] when a requested program is missing, too old
/// or misconfigured.
pub fn probe(request: &ProbeRequest<'_>) -> Result<ProbeReport, ProbeError> {
    let mut report = ProbeReport::default();
    if !request.toolchain.is_gcc_like() {
        return Ok(report);
    }
    let split_dwarf = COMPILE_FLAG_VARS.iter().any(|name| {
        request
            .env
            .raw(name)
            .is_some_and(|flags| flags.contains("-gsplit-dwarf"))
    });
    if split_dwarf && request.env.target_os() != TargetOs::Linux {
        return Err(ProbeError::Unsupported {
            message: String::from("-gsplit-dwarf is only supported on Linux"),
        });
    }

    if request.use_cache && !request.pch {
        if let Some(ccache) = request.locator.locate("ccache") {
            let version = check_ccache(&ccache, request.timeout)?;
            if split_dwarf && version < Version::new(3, 2, 3) {
                return Err(ProbeError::TooOld {
                    program: String::from("ccache (with -gsplit-dwarf)"),
                    found: version,
                    minimum: Version::new(3, 2, 3),
                });
            }
            report.ccache = Some(ccache);
            report.ccache_version = Some(version);
        }
    }

    if request.icecream {
        report.icecream = Some(check_icecream(request, report.ccache.is_some())?);
    }
    Ok(report)
}

fn check_ccache(ccache: &Utf8Path, timeout: Duration) -> Result<Version, ProbeError> {
    let settings = capture(ccache, "-p", timeout)?;
    if settings.contains("max_size = 5.0G") {
        warn!("ccache is using the default 5GB cache size; raise it with `ccache -o max_size=20G`");
    }
    if settings.contains("run_second_cpp = false") {
        return Err(ProbeError::SecondCppDisabled);
    }
    let output = capture(ccache, "--version", timeout)?;
    let first_line = output.lines().next().unwrap_or_default();
    let raw = first_line
        .split_whitespace()
        .last()
        .and_then(|word| word.split('+').next())
        .unwrap_or_default();
    let version = parse_loose(raw).ok_or_else(|| ProbeError::UnreadableVersion {
        program: ccache.to_owned(),
        output: first_line.to_owned(),
    })?;
    debug!(%version, "found ccache");
    Ok(version)
}

fn check_icecream(
    request: &ProbeRequest<'_>,
    have_cache: bool,
) -> Result<IcecreamOptions, ProbeError> {
    if request.pch {
        return Err(ProbeError::Unsupported {
            message: String::from("icecream is not supported with pre-compiled headers"),
        });
    }
    if !matches!(request.env.target_os(), TargetOs::Linux | TargetOs::Darwin) {
        return Err(ProbeError::Unsupported {
            message: String::from("icecream is only supported on Linux and macOS"),
        });
    }
    if !have_cache {
        return Err(ProbeError::Missing {
            program: String::from("ccache (required by icecream)"),
        });
    }
    let find = |program: &str| {
        request
            .locator
            .locate(program)
            .ok_or_else(|| ProbeError::Missing {
                program: program.to_owned(),
            })
    };
    let icecc = find("icecc")?;
    let icerun = find("icerun")?;

    let output = capture(&icecc, "--version", request.timeout)?;
    let word = output.split_whitespace().nth(1).unwrap_or_default();
    let found = parse_loose(word).ok_or_else(|| ProbeError::UnreadableVersion {
        program: icecc.clone(),
        output: output.lines().next().unwrap_or_default().to_owned(),
    })?;
    let minimum = minimum_icecc();
    if found < minimum {
        return Err(ProbeError::TooOld {
            program: String::from("icecc"),
            found,
            minimum,
        });
    }

    let local_only = request.env.raw("CCFLAGS").is_some_and(|flags| {
        flags
            .split_whitespace()
            .any(|flag| flag.starts_with("-fsanitize-blacklist"))
    });
    let wrapper = if local_only {
        warn!("-fsanitize-blacklist only works on local builds; disabling remote execution");
        icerun.clone()
    } else {
        icecc
    };
    Ok(IcecreamOptions {
        icecc: wrapper.into_string(),
        icerun: icerun.into_string(),
        ccache_version: None,
        version_file: None,
    })
}

fn minimum_icecc() -> Version {
    let mut version = Version::new(1, 1, 0);
    version.pre = Prerelease::new("rc2").unwrap_or(Prerelease::EMPTY);
    version
}

/// Parse versions such as `4.9`, `3.7.7` or `1.1rc2`.
///
/// Missing components default to zero; trailing text becomes the
/// pre-release tag.
#[must_use]
pub fn parse_loose(text: &str) -> Option<Version> {
    let end = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (numeric, rest) = text.split_at(end);
    let mut parts = numeric
        .split('.')
        .filter(|part| !part.is_empty())
        .map(str::parse::<u64>);
    let major = parts.next()?.ok()?;
    let minor = parts.next().transpose().ok()?.unwrap_or(0);
    let patch = parts.next().transpose().ok()?.unwrap_or(0);
    let mut version = Version::new(major, minor, patch);
    let pre = rest.trim_start_matches('-');
    if !pre.is_empty() {
        version.pre = Prerelease::new(pre).ok()?;
    }
    Some(version)
}

/// Run `program arg` and return its standard output.
fn capture(program: &Utf8Path, arg: &str, timeout: Duration) -> Result<String, ProbeError> {
    let mut child = Command::new(program)
        .arg(arg)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| ProbeError::Spawn {
            program: program.to_owned(),
            source,
        })?;
    let reader = child.stdout.take().map(|mut stdout| {
        thread::spawn(move || {
            let mut text = String::new();
            stdout.read_to_string(&mut text).map(|_| text)
        })
    });
    let status = wait(&mut child, program, timeout)?;
    let output = match reader.map(thread::JoinHandle::join) {
        Some(Ok(Ok(text))) => text,
        Some(Ok(Err(source))) => {
            return Err(ProbeError::Spawn {
                program: program.to_owned(),
                source,
            });
        }
        Some(Err(_)) | None => String::new(),
    };
    if !status.success() {
        return Err(ProbeError::Failed {
            program: program.to_owned(),
            status: status.code(),
        });
    }
    Ok(output)
}

fn wait(
    child: &mut Child,
    program: &Utf8Path,
    timeout: Duration,
) -> Result<std::process::ExitStatus, ProbeError> {
    let spawn_error = |source| ProbeError::Spawn {
        program: program.to_owned(),
        source,
    };
    if let Some(status) = child.wait_timeout(timeout).map_err(spawn_error)? {
        return Ok(status);
    }
    if let Err(err) = child.kill()
        && err.kind() != io::ErrorKind::InvalidInput
    {
        return Err(spawn_error(err));
    }
    if let Err(err) = child.wait() {
        warn!(program = %program, "failed to reap timed-out probe: {err}");
    }
    Err(ProbeError::Timeout {
        program: program.to_owned(),
        seconds: timeout.as_secs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("4.9.1", Some(Version::new(4, 9, 1)))]
    #[case("4.9", Some(Version::new(4, 9, 0)))]
    #[case("1.1rc2", Some(minimum_icecc()))]
    #[case("v1", None)]
    #[case("", None)]
    fn parses_loose_versions(#[case] text: &str, #[case] expected: Option<Version>) {
        assert_eq!(parse_loose(text), expected);
    }

    #[rstest]
    #[case("1.0", true)]
    #[case("1.1rc1", true)]
    #[case("1.1rc2", false)]
    #[case("1.1", false)]
    #[case("1.3.1", false)]
    fn icecc_minimum_is_one_one_rc_two(#[case] text: &str, #[case] too_old: bool) {
        let found = parse_loose(text).expect("version");
        assert_eq!(found < minimum_icecc(), too_old);
    }
}
