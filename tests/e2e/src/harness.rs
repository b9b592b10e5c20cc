//! Test harness for e2e tests
//!
//! Wraps a [`Runner`] built from the environment and serializes runs, so
//! scenarios from parallel test threads never share a mount.
//!
//! ## Usage
//! ```ignore
//! let Some(harness) = E2eHarness::shared().await else {
//!     return Ok(()); // environment cannot host sshfs
//! };
//! harness.assert_passes("mkdir").await?;
//! ```

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use tokio::sync::{Mutex, OnceCell};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sshfs_harness::config::HarnessConfig;
use sshfs_harness::matrix::ConfigurationTuple;
use sshfs_harness::runner::{Outcome, Report, RunReport, Runner};
use sshfs_harness::scenario::{self, Scenario};

/// Points at a YAML file overriding the built-in configuration
pub const CONFIG_VAR: &str = "SSHFS_HARNESS_CONFIG";

/// Initialize logging for tests (call once per test run)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// Load the harness configuration from `SSHFS_HARNESS_CONFIG`, or defaults
pub fn load_config() -> Result<HarnessConfig> {
    match std::env::var_os(CONFIG_VAR) {
        Some(path) => {
            let path = PathBuf::from(path);
            HarnessConfig::from_file(&path)
                .with_context(|| format!("Failed to load harness config {:?}", path))
        }
        None => Ok(HarnessConfig::from_env()),
    }
}

static SHARED: OnceCell<Option<E2eHarness>> = OnceCell::const_new();

pub struct E2eHarness {
    runner: Runner,
    run_lock: Mutex<()>,
}

impl E2eHarness {
    /// Build a harness and run the environment checks. `Ok(None)` means the
    /// machine cannot host sshfs and the caller should skip.
    pub async fn new() -> Result<Option<Self>> {
        init_logging();

        let runner = Runner::new(load_config()?).context("Failed to set up runner")?;
        if let Err(e) = runner.preflight().await {
            warn!("Skipping sshfs tests: {}", e);
            eprintln!("SKIP: {}", e);
            return Ok(None);
        }

        info!(
            "E2E harness ready for {:?}",
            runner.config().service.binary
        );
        Ok(Some(Self {
            runner,
            run_lock: Mutex::new(()),
        }))
    }

    /// Process-wide harness, initialized on first use
    pub async fn shared() -> Option<&'static E2eHarness> {
        SHARED
            .get_or_init(|| async {
                match Self::new().await {
                    Ok(harness) => harness,
                    Err(e) => panic!("Failed to initialize e2e harness: {:#}", e),
                }
            })
            .await
            .as_ref()
    }

    pub fn runner(&self) -> &Runner {
        &self.runner
    }

    /// Run `name` over the whole matrix
    pub async fn run(&self, name: &str) -> Result<Report> {
        let scenario = lookup(name)?;
        let _guard = self.run_lock.lock().await;
        Ok(self.runner.run_all(&[scenario]).await)
    }

    /// Run `name` against a single configuration tuple
    pub async fn run_with(&self, name: &str, tuple: &ConfigurationTuple) -> Result<RunReport> {
        let scenario = lookup(name)?;
        let _guard = self.run_lock.lock().await;
        Ok(self.runner.run_one(scenario, tuple).await)
    }

    /// Run `name` over the whole matrix and fail on any failed run
    pub async fn assert_passes(&self, name: &str) -> Result<()> {
        let report = self.run(name).await?;
        if !report.is_success() {
            let failures: Vec<String> = report
                .runs
                .iter()
                .filter(|r| matches!(r.outcome, Outcome::Failed(_)))
                .map(|r| r.to_string())
                .collect();
            bail!("{}\n{}", report, failures.join("\n"));
        }
        Ok(())
    }
}

fn lookup(name: &str) -> Result<&'static Scenario> {
    scenario::find(name).with_context(|| format!("No scenario named {:?}", name))
}
