//! Sequential sweep of scenarios over the configuration matrix
//!
//! Every run gets fresh directories, a fresh service, and a fresh copy of the
//! configured false-positive rules. Runs never overlap.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::HarnessConfig;
use crate::error::{ErrorCategory, HarnessError, Result, ScenarioFailure};
use crate::matrix::{ConfigMatrix, ConfigurationTuple, AXIS_NAMEMAP};
use crate::mount::{MountDirs, ServiceLauncher};
use crate::output::{FalsePositiveRule, OutputCapture, OutputSurveillance};
use crate::preflight;
use crate::scenario::{DataFile, Scenario, ScenarioContext};

/// Result of a single scenario run
#[derive(Debug)]
pub enum Outcome {
    Passed,
    Skipped(String),
    Failed(Vec<HarnessError>),
}

impl Outcome {
    /// Fold collected errors: nothing is a pass, only skip-worthy errors are a skip
    fn from_errors(errors: Vec<HarnessError>) -> Self {
        if errors.is_empty() {
            Outcome::Passed
        } else if errors.iter().all(HarnessError::is_skip) {
            let reasons: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            Outcome::Skipped(reasons.join("; "))
        } else {
            Outcome::Failed(errors.into_iter().filter(|e| !e.is_skip()).collect())
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub id: String,
    pub outcome: Outcome,
    pub elapsed: Duration,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Outcome::Passed => write!(f, "PASS {} ({:.1?})", self.id, self.elapsed),
            Outcome::Skipped(reason) => write!(f, "SKIP {}: {}", self.id, reason),
            Outcome::Failed(errors) => {
                write!(f, "FAIL {}", self.id)?;
                for e in errors {
                    write!(f, "\n    [{}] {}", e.category(), e)?;
                }
                Ok(())
            }
        }
    }
}

/// Collected results of a sweep
#[derive(Debug, Default)]
pub struct Report {
    pub runs: Vec<RunReport>,
    /// Planned runs not started because of an interrupt
    pub not_run: usize,
}

impl Report {
    pub fn passed(&self) -> usize {
        self.runs
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Passed))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.runs
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Skipped(_)))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.runs.iter().filter(|r| r.outcome.is_failure()).count()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.not_run == 0
    }

    /// Failure counts per category; a run counts once per category it hit
    pub fn failures_by_category(&self) -> BTreeMap<ErrorCategory, usize> {
        let mut counts = BTreeMap::new();
        for run in &self.runs {
            if let Outcome::Failed(errors) = &run.outcome {
                let mut categories: Vec<_> = errors.iter().map(|e| e.category()).collect();
                categories.sort();
                categories.dedup();
                for category in categories {
                    *counts.entry(category).or_insert(0) += 1;
                }
            }
        }
        counts
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} passed, {} failed, {} skipped",
            self.passed(),
            self.failed(),
            self.skipped()
        )?;
        if self.not_run > 0 {
            write!(f, ", {} not run (interrupted)", self.not_run)?;
        }
        for (category, count) in self.failures_by_category() {
            write!(f, "\n  {} failures: {}", category, count)?;
        }
        Ok(())
    }
}

/// Drives scenarios against freshly started services
pub struct Runner {
    config: HarnessConfig,
    matrix: ConfigMatrix,
    rules: Vec<FalsePositiveRule>,
    launcher: ServiceLauncher,
    data: Arc<DataFile>,
    interrupted: Arc<AtomicBool>,
}

impl Runner {
    pub fn new(config: HarnessConfig) -> Result<Self> {
        config.validate()?;
        let matrix = config.matrix()?;
        let rules = config.false_positive_rules()?;
        let launcher = ServiceLauncher::new(&config);
        let data = Arc::new(DataFile::generate()?);

        Ok(Self {
            config,
            matrix,
            rules,
            launcher,
            data,
            interrupted: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Replace the service launcher
    pub fn with_launcher(mut self, launcher: ServiceLauncher) -> Self {
        self.launcher = launcher;
        self
    }

    /// Setting this flag stops the sweep after the current run
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Every (scenario, tuple) pair, scenario-major. The scenario's mapping
    /// mode is pinned as an extra axis.
    pub fn plan<'a>(&self, scenarios: &[&'a Scenario]) -> Vec<(&'a Scenario, ConfigurationTuple)> {
        scenarios
            .iter()
            .flat_map(|scenario| {
                self.matrix
                    .with_fixed(AXIS_NAMEMAP, scenario.namemap.as_str().into())
                    .tuples()
                    .into_iter()
                    .map(move |tuple| (*scenario, tuple))
            })
            .collect()
    }

    /// Environment checks; an error here means the whole sweep should be skipped
    pub async fn preflight(&self) -> Result<()> {
        preflight::fuse_available()?;
        preflight::ssh_available(&self.config.service.host, self.config.timeouts.ssh_probe).await
    }

    /// Run every planned pair in order
    pub async fn run_all(&self, scenarios: &[&Scenario]) -> Report {
        let plan = self.plan(scenarios);
        let total = plan.len();
        let mut report = Report::default();

        for (i, (scenario, tuple)) in plan.into_iter().enumerate() {
            if self.interrupted.load(Ordering::SeqCst) {
                warn!("Interrupted, skipping the remaining {} runs", total - i);
                report.not_run = total - i;
                break;
            }
            let run = self.run_one(scenario, &tuple).await;
            println!("{}", run);
            report.runs.push(run);
        }
        report
    }

    /// One scenario against one freshly started service
    pub async fn run_one(&self, scenario: &Scenario, tuple: &ConfigurationTuple) -> RunReport {
        let id = scenario.test_id(tuple);
        let started = Instant::now();
        info!("Running {}", id);

        let outcome = if scenario.requires_root && !preflight::running_as_root() {
            Outcome::Skipped("Root required".to_string())
        } else {
            Outcome::from_errors(self.execute(scenario, tuple).await)
        };

        match &outcome {
            Outcome::Failed(errors) => error!("{} failed with {} error(s)", id, errors.len()),
            Outcome::Skipped(reason) => info!("{} skipped: {}", id, reason),
            Outcome::Passed => info!("{} passed", id),
        }

        RunReport {
            id,
            outcome,
            elapsed: started.elapsed(),
        }
    }

    async fn execute(&self, scenario: &Scenario, tuple: &ConfigurationTuple) -> Vec<HarnessError> {
        let timeouts = self.launcher.timeouts().clone();
        let mut errors = Vec::new();

        let root = match tempfile::Builder::new().prefix("sshfs-test-").tempdir() {
            Ok(root) => root,
            Err(e) => return vec![e.into()],
        };
        let dirs = match MountDirs::create_in(root.path()) {
            Ok(dirs) => dirs,
            Err(e) => return vec![e.into()],
        };

        let mut capture = OutputCapture::new();
        // Shared with the scenario so its rules outlive a panic
        let surveillance = Arc::new(Mutex::new(OutputSurveillance::with_rules(
            self.rules.clone(),
        )));

        let mut handle = match self.launcher.start(tuple, &dirs, &mut capture).await {
            Ok(handle) => handle,
            Err(e) => {
                errors.push(e);
                let output = capture.finish(timeouts.output_drain).await;
                let verdict = surveillance.lock().check(&output);
                if let Err(e) = verdict {
                    errors.push(e.into());
                }
                return errors;
            }
        };

        let ctx = ScenarioContext::new(
            dirs.src.clone(),
            dirs.mnt.clone(),
            handle.cache_timeout(),
            Arc::clone(&self.data),
            Arc::clone(&surveillance),
        );
        let run = scenario.run;
        let joined = tokio::task::spawn_blocking(move || {
            let mut ctx = ctx;
            run(&mut ctx)
        })
        .await;

        let result = match joined {
            Ok(result) => result,
            Err(e) => Err(ScenarioFailure::Panicked(panic_message(e))),
        };

        match result {
            Ok(()) => {
                if let Err(e) = handle.stop().await {
                    errors.push(e.into());
                }
            }
            Err(failure) => {
                errors.push(failure.into());
                // Let in-flight diagnostics reach the capture before killing
                sleep(timeouts.failure_grace).await;
                handle.cleanup().await;
            }
        }

        let output = capture.finish(timeouts.output_drain).await;
        let verdict = surveillance.lock().check(&output);
        if let Err(e) = verdict {
            errors.push(e.into());
        }
        errors
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
