//! Configuration-time probe failures.

use camino::Utf8PathBuf;
use miette::Diagnostic;
use semver::Version;
use thiserror::Error;

/// Errors raised while checking the compiler cache and distributed
/// compiler before an export.
#[derive(Debug, Error, Diagnostic)]
pub enum ProbeError {
    /// A program could not be started.
    #[error("failed to run {program}")]
    #[diagnostic(code(ninjafy::probe::spawn))]
    Spawn {
        /// Program path.
        program: Utf8PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
    /// A program did not finish in time.
    #[error("{program} did not finish within {seconds}s")]
    #[diagnostic(code(ninjafy::probe::timeout))]
    Timeout {
        /// Program path.
        program: Utf8PathBuf,
        /// Time allowed.
        seconds: u64,
    },
    /// A program exited unsuccessfully.
    #[error("{program} exited with status {status:?}")]
    #[diagnostic(code(ninjafy::probe::failed))]
    Failed {
        /// Program path.
        program: Utf8PathBuf,
        /// Exit code, if any.
        status: Option<i32>,
    },
    /// A program's version could not be read.
    #[error("cannot read a version from the output of {program}: {output}")]
    #[diagnostic(code(ninjafy::probe::version))]
    UnreadableVersion {
        /// Program path.
        program: Utf8PathBuf,
        /// First line of output.
        output: String,
    },
    /// A program is older than required.
    #[error("{program} {found} is too old; at least {minimum} is required")]
    #[diagnostic(code(ninjafy::probe::too_old))]
    TooOld {
        /// Program name.
        program: String,
        /// Version found.
        found: Version,
        /// Oldest supported version.
        minimum: Version,
    },
    /// The object cache is configured in a way the build cannot use.
    #[error("ccache has run_second_cpp disabled")]
    #[diagnostic(
        code(ninjafy::probe::ccache_setting),
        help("run `ccache -o run_second_cpp=true`")
    )]
    SecondCppDisabled,
    /// A required program was not found.
    #[error("cannot find {program}")]
    #[diagnostic(code(ninjafy::probe::missing))]
    Missing {
        /// Program name.
        program: String,
    },
    /// The requested combination of features is not supported.
    #[error("{message}")]
    #[diagnostic(code(ninjafy::probe::unsupported))]
    Unsupported {
        /// Description of the problem.
        message: String,
    },
}
