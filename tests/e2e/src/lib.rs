//! E2E test harness for sshfs
//!
//! Runs the scenario catalogue against a real sshfs binary over passwordless
//! ssh to the configured host. Tests skip when the machine lacks FUSE or ssh
//! access instead of failing.
//!
//! ## Quick Start
//! ```ignore
//! use sshfs_e2e::E2eHarness;
//!
//! #[tokio::test]
//! async fn my_test() -> anyhow::Result<()> {
//!     let Some(harness) = E2eHarness::shared().await else {
//!         return Ok(());
//!     };
//!     harness.assert_passes("rename").await
//! }
//! ```

pub mod harness;

pub use harness::{init_logging, load_config, E2eHarness, CONFIG_VAR};
