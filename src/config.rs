//! Configuration parsing and structures

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::env::{substitute_env_vars, valgrind_requested, SSHFS_BINARY_VAR};
use crate::matrix::{Axis, ConfigMatrix};
use crate::output::FalsePositiveRule;

/// Argv prefix used when running the service under valgrind
pub const VALGRIND_WRAPPER: [&str; 3] = ["valgrind", "-q", "--"];

/// Default false positive: ssh announcing a freshly learned host key
pub const KNOWN_HOSTS_WARNING: &str =
    r"Warning: Permanently added .* to the list of known hosts\.";

/// Full harness configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// How to launch and unmount the service under test
    pub service: ServiceConfig,

    /// Deadlines and poll intervals
    pub timeouts: TimeoutConfig,

    /// Axes to sweep, in the order they vary (first slowest)
    pub matrix: Vec<Axis>,

    /// Output rules registered at the start of every scenario
    pub false_positives: Vec<FalsePositiveConfig>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            service: ServiceConfig::default(),
            timeouts: TimeoutConfig::default(),
            matrix: ConfigMatrix::default_axes(),
            false_positives: vec![FalsePositiveConfig {
                pattern: KNOWN_HOSTS_WARNING.to_string(),
                count: 0,
                literal: false,
                case_insensitive: false,
            }],
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Service launch configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Path to the sshfs binary
    pub binary: PathBuf,

    /// Host part of the remote source specification (`<host>:<src_dir>`)
    pub host: String,

    /// Argv prefix, e.g. `[valgrind, -q, --]`
    pub wrapper: Vec<String>,

    /// Lazy unmount command; the mountpoint is appended as last argument
    pub unmount_command: Vec<String>,

    /// Extra environment for the service process
    pub env: BTreeMap<String, String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("build/sshfs"),
            host: "localhost".to_string(),
            wrapper: Vec::new(),
            unmount_command: vec![
                "fusermount3".to_string(),
                "-z".to_string(),
                "-u".to_string(),
            ],
            env: BTreeMap::new(),
        }
    }
}

/// Deadlines and intervals used by the service lifecycle
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline for the mountpoint to become active
    #[serde(with = "humantime_serde")]
    pub mount: Duration,

    /// Interval between readiness checks
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Deadline for the process to exit after a clean unmount
    #[serde(with = "humantime_serde")]
    pub stop: Duration,

    /// Wait between SIGTERM and SIGKILL on the exceptional path
    #[serde(with = "humantime_serde")]
    pub kill_grace: Duration,

    /// Delay after a failed scenario before cleanup, to let late output arrive
    #[serde(with = "humantime_serde")]
    pub failure_grace: Duration,

    /// Upper bound for draining captured output once the process is gone
    #[serde(with = "humantime_serde")]
    pub output_drain: Duration,

    /// Deadline for the passwordless ssh probe
    #[serde(with = "humantime_serde")]
    pub ssh_probe: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            mount: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
            stop: Duration::from_secs(30),
            kill_grace: Duration::from_secs(1),
            failure_grace: Duration::from_secs(1),
            output_drain: Duration::from_secs(5),
            ssh_probe: Duration::from_secs(10),
        }
    }
}

/// A false-positive rule as written in the config file
#[derive(Debug, Clone, Deserialize)]
pub struct FalsePositiveConfig {
    pub pattern: String,

    /// Maximum number of matches to suppress; 0 means unlimited
    #[serde(default)]
    pub count: usize,

    /// Treat `pattern` as plain text rather than a regex
    #[serde(default)]
    pub literal: bool,

    #[serde(default)]
    pub case_insensitive: bool,
}

impl HarnessConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;

        Self::from_str(&content)
    }

    /// Parse configuration from a YAML string, substituting `${VAR}` references
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let content = substitute_env_vars(content)?;
        let mut config: HarnessConfig =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Built-in configuration with environment overrides applied
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// `SSHFS_BINARY` replaces the binary path; `TEST_WITH_VALGRIND` supplies a
    /// wrapper when none is configured
    pub fn apply_env_overrides(&mut self) {
        if let Ok(binary) = std::env::var(SSHFS_BINARY_VAR) {
            if !binary.is_empty() {
                self.service.binary = PathBuf::from(binary);
            }
        }
        if self.service.wrapper.is_empty() && valgrind_requested() {
            self.service.wrapper = VALGRIND_WRAPPER.iter().map(|s| s.to_string()).collect();
        }
    }

    /// The configured matrix, validated
    pub fn matrix(&self) -> Result<ConfigMatrix, ConfigError> {
        let matrix = ConfigMatrix::new(self.matrix.clone())?;
        matrix.validate()?;
        Ok(matrix)
    }

    /// Compile the configured false-positive rules
    pub fn false_positive_rules(&self) -> Result<Vec<FalsePositiveRule>, ConfigError> {
        self.false_positives
            .iter()
            .map(FalsePositiveRule::from_config)
            .collect()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.matrix()?;
        self.false_positive_rules()?;

        if self.service.unmount_command.is_empty() {
            return Err(ConfigError::ValidationError(
                "service.unmount_command cannot be empty".to_string(),
            ));
        }

        if self.service.host.is_empty() {
            return Err(ConfigError::ValidationError(
                "service.host cannot be empty".to_string(),
            ));
        }

        if self.timeouts.poll_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "timeouts.poll_interval must be positive".to_string(),
            ));
        }

        if self.timeouts.poll_interval > self.timeouts.mount {
            return Err(ConfigError::ValidationError(format!(
                "timeouts.poll_interval ({:?}) exceeds timeouts.mount ({:?})",
                self.timeouts.poll_interval, self.timeouts.mount
            )));
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),

    #[error("Axis {0:?} appears more than once")]
    DuplicateAxis(String),

    #[error("Axis {0:?} has no values")]
    EmptyAxis(String),

    #[error("Unknown axis {0:?}")]
    UnknownAxis(String),

    #[error("Invalid value {value:?} for axis {axis:?}: expected {expected}")]
    InvalidAxisValue {
        axis: String,
        value: String,
        expected: &'static str,
    },

    #[error("Invalid output pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },
}
