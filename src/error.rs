use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigError;
use crate::output::SuspiciousOutput;

/// Failure to bring up a working mount. Fatal to the scenario, never retried.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Failed to spawn file system process {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: io::Error,
    },

    #[error("File system process terminated prematurely ({status})")]
    PrematureExit { status: String },

    #[error("Mountpoint {path:?} failed to come up within {after:?}")]
    MountTimeout { path: PathBuf, after: Duration },

    #[error("Failed to prepare identity mapping files in {dir:?}: {source}")]
    NameMap {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to poll file system process: {0}")]
    Poll(#[source] io::Error),
}

/// Failure of the clean unmount path.
#[derive(Error, Debug)]
pub enum TeardownError {
    #[error("Failed to run unmount command {command:?}: {source}")]
    UnmountSpawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("Unmount command {command:?} exited with {status}")]
    UnmountFailed { command: String, status: String },

    #[error("{path:?} is still a mountpoint after unmount")]
    StillMounted { path: PathBuf },

    #[error("Mount process did not terminate within {after:?}")]
    DidNotTerminate { after: Duration },

    #[error("File system process terminated abnormally ({status})")]
    Abnormal { code: Option<i32>, status: String },

    #[error("Failed to wait for file system process: {0}")]
    Wait(#[source] io::Error),
}

/// A filesystem call through the mountpoint did not behave as POSIX says it should.
#[derive(Error, Debug)]
pub enum ScenarioFailure {
    #[error("{call}: expected {expected}, observed {observed}")]
    Mismatch {
        call: String,
        expected: String,
        observed: String,
    },

    #[error("{call} failed: {source}")]
    Call {
        call: String,
        #[source]
        source: io::Error,
    },

    #[error("{0}")]
    Skip(String),

    #[error("scenario panicked: {0}")]
    Panicked(String),
}

impl ScenarioFailure {
    /// Attach a call description to an I/O error
    pub fn call(call: impl Into<String>, source: io::Error) -> Self {
        ScenarioFailure::Call {
            call: call.into(),
            source,
        }
    }

    pub fn mismatch(
        call: impl Into<String>,
        expected: impl std::fmt::Debug,
        observed: impl std::fmt::Debug,
    ) -> Self {
        ScenarioFailure::Mismatch {
            call: call.into(),
            expected: format!("{:?}", expected),
            observed: format!("{:?}", observed),
        }
    }
}

/// Reporting bucket for a harness error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorCategory {
    Config,
    Setup,
    Teardown,
    Assertion,
    Surveillance,
    Infrastructure,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCategory::Config => "config",
            ErrorCategory::Setup => "setup",
            ErrorCategory::Teardown => "teardown",
            ErrorCategory::Assertion => "assertion",
            ErrorCategory::Surveillance => "surveillance",
            ErrorCategory::Infrastructure => "infrastructure",
        };
        f.write_str(name)
    }
}

/// Main error type for harness operations
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Setup failed: {0}")]
    Setup(#[from] SetupError),

    #[error("Teardown failed: {0}")]
    Teardown(#[from] TeardownError),

    #[error("Assertion failed: {0}")]
    Assertion(#[from] ScenarioFailure),

    #[error("Suspicious output: {0}")]
    Surveillance(#[from] SuspiciousOutput),

    #[error("Unusable environment: {0}")]
    Infrastructure(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl HarnessError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            HarnessError::Config(_) => ErrorCategory::Config,
            HarnessError::Setup(_) => ErrorCategory::Setup,
            HarnessError::Teardown(TeardownError::UnmountSpawn { .. })
            | HarnessError::Teardown(TeardownError::UnmountFailed { .. }) => {
                ErrorCategory::Infrastructure
            }
            HarnessError::Teardown(_) => ErrorCategory::Teardown,
            HarnessError::Assertion(_) => ErrorCategory::Assertion,
            HarnessError::Surveillance(_) => ErrorCategory::Surveillance,
            HarnessError::Infrastructure(_) | HarnessError::Io(_) => {
                ErrorCategory::Infrastructure
            }
        }
    }

    /// Whether this error means "skip" rather than "fail"
    pub fn is_skip(&self) -> bool {
        matches!(self, HarnessError::Assertion(ScenarioFailure::Skip(_)))
            || self.category() == ErrorCategory::Infrastructure
    }
}

/// Result type alias for harness operations
pub type Result<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Stream;

    #[test]
    fn test_categories() {
        let err: HarnessError = SetupError::MountTimeout {
            path: PathBuf::from("/mnt"),
            after: Duration::from_secs(30),
        }
        .into();
        assert_eq!(err.category(), ErrorCategory::Setup);
        assert!(!err.is_skip());

        let err: HarnessError = TeardownError::Abnormal {
            code: Some(3),
            status: "exit status: 3".to_string(),
        }
        .into();
        assert_eq!(err.category(), ErrorCategory::Teardown);
        assert!(err.to_string().contains("exit status: 3"));

        let err: HarnessError = SuspiciousOutput {
            stream: Stream::Stderr,
            matched: "fault".to_string(),
        }
        .into();
        assert_eq!(err.category(), ErrorCategory::Surveillance);
    }

    #[test]
    fn test_unmount_tool_failure_is_infrastructure() {
        let err: HarnessError = TeardownError::UnmountSpawn {
            command: "fusermount3".to_string(),
            source: io::Error::from(io::ErrorKind::NotFound),
        }
        .into();
        assert_eq!(err.category(), ErrorCategory::Infrastructure);
        assert!(err.is_skip());
    }

    #[test]
    fn test_scenario_skip() {
        let err: HarnessError = ScenarioFailure::Skip("Root required".to_string()).into();
        assert_eq!(err.category(), ErrorCategory::Assertion);
        assert!(err.is_skip());

        let err: HarnessError = ScenarioFailure::mismatch("lstat(x).st_nlink", 2, 1).into();
        assert!(!err.is_skip());
        assert_eq!(
            err.to_string(),
            "Assertion failed: lstat(x).st_nlink: expected 2, observed 1"
        );
    }
}
