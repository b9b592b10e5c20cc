//! Common test utilities and fixtures

pub use sshfs_e2e::*;

/// Shared harness, or `None` when sshfs cannot run here
pub async fn harness() -> Option<&'static E2eHarness> {
    E2eHarness::shared().await
}

/// Run a scenario over the full matrix, skipping quietly on unusable machines
pub async fn check(name: &str) -> anyhow::Result<()> {
    match harness().await {
        Some(h) => h.assert_passes(name).await,
        None => Ok(()),
    }
}
