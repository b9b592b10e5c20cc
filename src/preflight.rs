//! Environment checks run before any scenario
//!
//! A failed check means the machine cannot host the sweep at all, so callers
//! skip instead of failing.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use nix::unistd::Uid;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::error::{HarnessError, Result};

/// Helper used to unmount FUSE file systems as a regular user
pub const FUSERMOUNT: &str = "fusermount3";

/// FUSE control device
pub const FUSE_DEVICE: &str = "/dev/fuse";

/// Locate `program` on `PATH`
pub fn find_in_path(program: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Check that this process can mount FUSE file systems
pub fn fuse_available() -> Result<()> {
    let fusermount = find_in_path(FUSERMOUNT).ok_or_else(|| {
        HarnessError::Infrastructure(format!("{} not found on PATH", FUSERMOUNT))
    })?;
    check_fuse_device(Path::new(FUSE_DEVICE))?;
    check_can_mount(&fusermount)?;
    info!("FUSE available via {:?}", fusermount);
    Ok(())
}

fn check_fuse_device(device: &Path) -> Result<()> {
    if !device.exists() {
        return Err(HarnessError::Infrastructure(format!(
            "{} does not exist",
            device.display()
        )));
    }
    std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(device)
        .map_err(|e| {
            HarnessError::Infrastructure(format!(
                "{} is not accessible for reading and writing: {}",
                device.display(),
                e
            ))
        })?;
    Ok(())
}

/// Root can mount directly; anyone else needs a setuid mount helper
fn check_can_mount(fusermount: &Path) -> Result<()> {
    if running_as_root() {
        return Ok(());
    }
    let mode = std::fs::metadata(fusermount)?.permissions().mode();
    if mode & libc::S_ISUID as u32 == 0 {
        return Err(HarnessError::Infrastructure(format!(
            "{} is not setuid and the harness is not running as root",
            fusermount.display()
        )));
    }
    Ok(())
}

/// Check that `host` accepts passwordless ssh logins
pub async fn ssh_available(host: &str, deadline: Duration) -> Result<()> {
    let probe = Command::new("ssh")
        .args([
            "-o",
            "KbdInteractiveAuthentication=no",
            "-o",
            "ChallengeResponseAuthentication=no",
            "-o",
            "PasswordAuthentication=no",
        ])
        .arg(host)
        .args(["--", "true"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();

    let status = match timeout(deadline, probe).await {
        Ok(status) => status.map_err(|e| {
            HarnessError::Infrastructure(format!("Failed to run ssh: {}", e))
        })?,
        Err(_) => {
            return Err(HarnessError::Infrastructure(format!(
                "ssh to {} did not complete within {:?}",
                host, deadline
            )))
        }
    };

    if !status.success() {
        return Err(HarnessError::Infrastructure(format!(
            "Passwordless ssh to {} failed ({})",
            host, status
        )));
    }
    debug!("ssh to {} works", host);
    Ok(())
}

/// Whether the harness runs with root privileges
pub fn running_as_root() -> bool {
    Uid::effective().is_root()
}
