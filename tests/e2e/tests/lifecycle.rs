//! Service lifecycle tests against the real sshfs binary

mod common;

use anyhow::{Context, Result};
use common::*;
use std::time::Duration;
use tempfile::TempDir;

use sshfs_harness::matrix::{Axis, ConfigMatrix};
use sshfs_harness::mount::{is_mountpoint, MountDirs, ServiceLauncher, ServiceState};
use sshfs_harness::output::{OutputCapture, OutputSurveillance};
use sshfs_harness::runner::Outcome;

/// Start, stop twice, and check the mount is really gone
#[tokio::test]
async fn test_start_stop_is_idempotent() -> Result<()> {
    let Some(harness) = harness().await else {
        return Ok(());
    };
    let config = harness.runner().config();
    let launcher = ServiceLauncher::new(config);

    let root = TempDir::new()?;
    let dirs = MountDirs::create_in(root.path())?;
    let tuple = ConfigMatrix::default().tuples().remove(0);
    let mut capture = OutputCapture::new();

    let mut handle = launcher.start(&tuple, &dirs, &mut capture).await?;
    assert_eq!(handle.state(), ServiceState::Active);
    assert!(is_mountpoint(&dirs.mnt));

    handle.stop().await?;
    assert_eq!(handle.state(), ServiceState::Stopped);
    assert!(!is_mountpoint(&dirs.mnt));
    handle.stop().await?;

    let output = capture.finish(Duration::from_secs(5)).await;
    let surveillance = OutputSurveillance::with_rules(config.false_positive_rules()?);
    surveillance.check(&output)?;
    Ok(())
}

/// Forced cleanup leaves neither a mount nor a process behind
#[tokio::test]
async fn test_cleanup_reclaims_mount() -> Result<()> {
    let Some(harness) = harness().await else {
        return Ok(());
    };
    let launcher = ServiceLauncher::new(harness.runner().config());

    let root = TempDir::new()?;
    let dirs = MountDirs::create_in(root.path())?;
    let tuple = ConfigMatrix::default().tuples().remove(0);
    let mut capture = OutputCapture::new();

    let mut handle = launcher.start(&tuple, &dirs, &mut capture).await?;
    handle.cleanup().await;
    assert_eq!(handle.state(), ServiceState::Killed);
    assert!(!handle.is_running());
    assert!(!is_mountpoint(&dirs.mnt));
    Ok(())
}

/// No cache, synchronous readdir, one connection, no debug output
#[tokio::test]
async fn test_mkdir_rmdir_single_configuration() -> Result<()> {
    let Some(harness) = harness().await else {
        return Ok(());
    };
    let matrix = ConfigMatrix::new(vec![
        Axis::new("cache_timeout", [0u64]),
        Axis::new("sync_rd", [true]),
        Axis::new("multiconn", [false]),
        Axis::new("debug", [false]),
        Axis::new("namemap", ["none"]),
    ])?;
    let tuple = matrix.tuples().into_iter().next().context("empty matrix")?;

    let run = harness.run_with("mkdir_rmdir", &tuple).await?;
    assert!(
        matches!(run.outcome, Outcome::Passed),
        "unexpected outcome: {}",
        run
    );
    Ok(())
}
