//! sshfs-harness: integration-test harness for a mounted sshfs file system
//!
//! The harness launches sshfs as an external process for every point of a
//! configuration matrix, runs POSIX correctness scenarios through the
//! resulting mountpoint, and fails a run when the service exits abnormally or
//! complains on its diagnostic streams.
//!
//! # Architecture
//!
//! - **Matrix**: Cartesian product of option axes, each tuple mapped to sshfs
//!   command-line options.
//! - **Mount**: Service lifecycle. Launch, readiness poll, clean unmount, and
//!   forced cleanup.
//! - **Output**: Captures the service's stdout/stderr and classifies it
//!   against severity keywords minus registered false positives.
//! - **Scenario**: The correctness checks, run against a source/mount pair.
//! - **Runner**: Sequential sweep of scenarios over the matrix.
//!
//! # Example
//!
//! ```no_run
//! use sshfs_harness::config::HarnessConfig;
//! use sshfs_harness::runner::Runner;
//! use sshfs_harness::scenario;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let runner = Runner::new(HarnessConfig::from_env())?;
//! runner.preflight().await?;
//!
//! let mkdir = scenario::find("mkdir").unwrap();
//! let report = runner.run_all(&[mkdir]).await;
//! println!("{}", report);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod env;
pub mod error;
pub mod matrix;
pub mod mount;
pub mod names;
pub mod output;
pub mod preflight;
pub mod runner;
pub mod scenario;

pub use error::{HarnessError, Result};

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `RUST_LOG` wins over `level`.
/// Safe to call more than once.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
