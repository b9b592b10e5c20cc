//! Environment handling
//!
//! `${VAR_NAME}` substitution for configuration text, and the environment
//! switches the harness honours (`SSHFS_BINARY`, `TEST_WITH_VALGRIND`).

use once_cell::sync::Lazy;
use regex::Regex;
use std::env;

use crate::config::ConfigError;

/// Overrides `service.binary`
pub const SSHFS_BINARY_VAR: &str = "SSHFS_BINARY";

/// Runs the service under valgrind unless set to `no`, `false` or `0`
pub const VALGRIND_VAR: &str = "TEST_WITH_VALGRIND";

/// Variable set on the service process so GLib aborts on its own warnings
pub const GLIB_DEBUG_VAR: &str = "G_DEBUG";
pub const GLIB_DEBUG_FATAL_WARNINGS: &str = "fatal-warnings";

/// Regex pattern for matching environment variable references: ${VAR_NAME}
static ENV_VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

/// Substitute environment variable references in a string.
///
/// Returns an error listing all missing variables if any are not set.
pub fn substitute_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut missing_vars: Vec<String> = Vec::new();

    let result = ENV_VAR_PATTERN.replace_all(input, |caps: &regex::Captures<'_>| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                if !missing_vars.iter().any(|v| v == var_name) {
                    missing_vars.push(var_name.to_string());
                }
                caps[0].to_string()
            }
        }
    });

    if !missing_vars.is_empty() {
        return Err(ConfigError::ValidationError(format!(
            "Missing environment variables: {}",
            missing_vars.join(", ")
        )));
    }

    Ok(result.into_owned())
}

/// Interpret a `TEST_WITH_VALGRIND` value
pub fn is_truthy(value: &str) -> bool {
    !matches!(value.trim().to_lowercase().as_str(), "no" | "false" | "0")
}

/// Whether the service should run under valgrind
pub fn valgrind_requested() -> bool {
    env::var(VALGRIND_VAR)
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}
