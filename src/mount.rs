//! Service lifecycle
//!
//! Launches sshfs against a source/mountpoint pair, waits for the mount to
//! come up, and tears it down either cleanly (unmount, then check the exit
//! code) or forcefully (lazy unmount, SIGTERM, SIGKILL).

use std::path::{Path, PathBuf};
use std::process::Stdio;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::{HarnessConfig, ServiceConfig, TimeoutConfig};
use crate::env::{GLIB_DEBUG_FATAL_WARNINGS, GLIB_DEBUG_VAR};
use crate::error::{Result, SetupError, TeardownError};
use crate::matrix::{ConfigurationTuple, ServiceOptions};
use crate::output::OutputCapture;

/// Kernel-side cache options passed on every mount
pub const BASELINE_OPTIONS: [&str; 4] = ["-o", "entry_timeout=0", "-o", "attr_timeout=0"];

/// Check whether `path` is an active mountpoint
pub type ReadinessProbe = fn(&Path) -> bool;

/// The directory triple one service instance works on
#[derive(Debug, Clone)]
pub struct MountDirs {
    /// Directory exported by the remote end
    pub src: PathBuf,
    /// Where sshfs mounts it
    pub mnt: PathBuf,
    /// Scratch space for identity-mapping files
    pub conf: PathBuf,
}

impl MountDirs {
    /// Create empty `src`, `mnt` and `conf` directories under `root`
    pub fn create_in(root: &Path) -> std::io::Result<Self> {
        let dirs = Self {
            src: root.join("src"),
            mnt: root.join("mnt"),
            conf: root.join("conf"),
        };
        std::fs::create_dir_all(&dirs.src)?;
        std::fs::create_dir_all(&dirs.mnt)?;
        std::fs::create_dir_all(&dirs.conf)?;
        Ok(dirs)
    }
}

/// Lifecycle state of a [`ServiceHandle`]. `Stopped` and `Killed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Starting,
    Active,
    Stopped,
    Killed,
}

impl ServiceState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServiceState::Stopped | ServiceState::Killed)
    }
}

/// Launches service instances with a fixed service/timeout configuration
#[derive(Clone)]
pub struct ServiceLauncher {
    service: ServiceConfig,
    timeouts: TimeoutConfig,
    probe: ReadinessProbe,
}

impl ServiceLauncher {
    pub fn new(config: &HarnessConfig) -> Self {
        Self {
            service: config.service.clone(),
            timeouts: config.timeouts.clone(),
            probe: is_mountpoint,
        }
    }

    /// Replace the mountpoint check
    pub fn with_probe(mut self, probe: ReadinessProbe) -> Self {
        self.probe = probe;
        self
    }

    pub fn timeouts(&self) -> &TimeoutConfig {
        &self.timeouts
    }

    /// Full argv for one service instance
    pub fn command_line(
        &self,
        tuple: &ConfigurationTuple,
        dirs: &MountDirs,
    ) -> std::result::Result<Vec<String>, crate::config::ConfigError> {
        let mut argv: Vec<String> = self.service.wrapper.clone();
        argv.push(self.service.binary.display().to_string());
        argv.push("-f".to_string());
        argv.push(format!("{}:{}", self.service.host, dirs.src.display()));
        argv.push(dirs.mnt.display().to_string());
        argv.extend(tuple.to_args(&dirs.conf)?);
        argv.extend(BASELINE_OPTIONS.iter().map(|s| s.to_string()));
        Ok(argv)
    }

    /// Launch the service and wait until the mountpoint is active.
    ///
    /// The child's output is attached to `capture` before anything else, so a
    /// premature exit still leaves its diagnostics in the capture. On any
    /// readiness failure the process is reclaimed through the exceptional path
    /// before the error is returned.
    pub async fn start(
        &self,
        tuple: &ConfigurationTuple,
        dirs: &MountDirs,
        capture: &mut OutputCapture,
    ) -> Result<ServiceHandle> {
        let options = ServiceOptions::try_from(tuple)?;
        options
            .namemap
            .write_mapping_files(&dirs.conf)
            .map_err(|source| SetupError::NameMap {
                dir: dirs.conf.clone(),
                source,
            })?;

        let argv = self.command_line(tuple, dirs)?;
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| SetupError::Spawn {
                binary: String::new(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
            })?;

        debug!("Launching: {}", argv.join(" "));
        let mut child = Command::new(program)
            .args(args)
            .envs(&self.service.env)
            .env(GLIB_DEBUG_VAR, GLIB_DEBUG_FATAL_WARNINGS)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SetupError::Spawn {
                binary: program.clone(),
                source,
            })?;
        capture.attach(&mut child);

        info!(
            "Started {} (PID {}) for [{}]",
            self.service.binary.display(),
            child.id().unwrap_or_default(),
            tuple
        );

        let mut handle = ServiceHandle {
            child,
            src: dirs.src.clone(),
            mnt: dirs.mnt.clone(),
            cache_timeout: options.cache_timeout,
            state: ServiceState::Starting,
            unmount_command: self.service.unmount_command.clone(),
            timeouts: self.timeouts.clone(),
            probe: self.probe,
        };

        if let Err(e) = handle.wait_ready().await {
            handle.cleanup().await;
            return Err(e.into());
        }

        handle.state = ServiceState::Active;
        info!("Mountpoint {:?} is active", handle.mnt);
        Ok(handle)
    }
}

/// Exclusive owner of one running service process and its directory pair
pub struct ServiceHandle {
    child: Child,
    src: PathBuf,
    mnt: PathBuf,
    cache_timeout: u64,
    state: ServiceState,
    unmount_command: Vec<String>,
    timeouts: TimeoutConfig,
    probe: ReadinessProbe,
}

impl ServiceHandle {
    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn source_dir(&self) -> &Path {
        &self.src
    }

    pub fn mountpoint(&self) -> &Path {
        &self.mnt
    }

    /// Directory cache timeout in seconds (0 when caching is off)
    pub fn cache_timeout(&self) -> u64 {
        self.cache_timeout
    }

    /// PID of the service, while it has not been reaped
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Whether the process has not exited yet
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Poll until the mountpoint is active, the process exits, or the deadline passes
    async fn wait_ready(&mut self) -> std::result::Result<(), SetupError> {
        let deadline = Instant::now() + self.timeouts.mount;
        loop {
            if (self.probe)(&self.mnt) {
                return Ok(());
            }

            if let Some(status) = self.child.try_wait().map_err(SetupError::Poll)? {
                warn!("File system process exited before {:?} came up", self.mnt);
                return Err(SetupError::PrematureExit {
                    status: status.to_string(),
                });
            }

            if Instant::now() >= deadline {
                return Err(SetupError::MountTimeout {
                    path: self.mnt.clone(),
                    after: self.timeouts.mount,
                });
            }

            sleep(self.timeouts.poll_interval).await;
        }
    }

    /// Clean teardown: unmount, then require a zero exit within the stop deadline.
    ///
    /// A no-op once the handle is torn down. On failure the exceptional path
    /// runs before the error is returned, so the handle always ends terminal.
    pub async fn stop(&mut self) -> std::result::Result<(), TeardownError> {
        if self.state.is_terminal() {
            debug!("Teardown of {:?} already done", self.mnt);
            return Ok(());
        }

        match self.stop_inner().await {
            Ok(()) => {
                self.state = ServiceState::Stopped;
                info!("Unmounted {:?} cleanly", self.mnt);
                Ok(())
            }
            Err(e) => {
                warn!("Clean teardown of {:?} failed: {}", self.mnt, e);
                self.cleanup().await;
                Err(e)
            }
        }
    }

    async fn stop_inner(&mut self) -> std::result::Result<(), TeardownError> {
        run_unmount(&self.unmount_command, &self.mnt, false).await?;

        if (self.probe)(&self.mnt) {
            return Err(TeardownError::StillMounted {
                path: self.mnt.clone(),
            });
        }

        let status = match timeout(self.timeouts.stop, self.child.wait()).await {
            Ok(status) => status.map_err(TeardownError::Wait)?,
            Err(_) => {
                return Err(TeardownError::DidNotTerminate {
                    after: self.timeouts.stop,
                })
            }
        };

        if !status.success() {
            return Err(TeardownError::Abnormal {
                code: status.code(),
                status: status.to_string(),
            });
        }
        Ok(())
    }

    /// Exceptional teardown. Never fails: lazy unmount (errors ignored), SIGTERM,
    /// and SIGKILL if the process outlives the kill grace period.
    pub async fn cleanup(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.state = ServiceState::Killed;

        if let Err(e) = run_unmount(&self.unmount_command, &self.mnt, true).await {
            debug!("Ignoring unmount failure during cleanup: {}", e);
        }

        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!("File system process already exited ({})", status);
                return;
            }
            Ok(None) => {}
            Err(e) => debug!("Failed to poll file system process: {}", e),
        }

        if let Some(pid) = self.pid() {
            if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                debug!("Failed to send SIGTERM to {}: {}", pid, e);
            }
        }

        if timeout(self.timeouts.kill_grace, self.child.wait())
            .await
            .is_err()
        {
            warn!(
                "File system process survived SIGTERM for {:?}, sending SIGKILL",
                self.timeouts.kill_grace
            );
            if let Err(e) = self.child.kill().await {
                warn!("Failed to kill file system process: {}", e);
            }
        }
        info!("Reclaimed mount {:?}", self.mnt);
    }
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        if !self.state.is_terminal() {
            // Best-effort cleanup in drop; kill_on_drop handles the process
            let _ = self.child.start_kill();
            if let Some((program, args)) = self.unmount_command.split_first() {
                let _ = std::process::Command::new(program)
                    .args(args)
                    .arg(&self.mnt)
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status();
            }
        }
    }
}

/// Run the unmount command with the mountpoint appended
async fn run_unmount(
    command: &[String],
    path: &Path,
    quiet: bool,
) -> std::result::Result<(), TeardownError> {
    let shown = command.join(" ");
    let (program, args) = command
        .split_first()
        .ok_or_else(|| TeardownError::UnmountSpawn {
            command: shown.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
        })?;

    debug!("Unmounting {:?} with {:?}", path, shown);
    let mut cmd = Command::new(program);
    cmd.args(args).arg(path).stdin(Stdio::null());
    if quiet {
        cmd.stdout(Stdio::null()).stderr(Stdio::null());
    }

    let status = cmd
        .status()
        .await
        .map_err(|source| TeardownError::UnmountSpawn {
            command: shown.clone(),
            source,
        })?;

    if !status.success() {
        return Err(TeardownError::UnmountFailed {
            command: shown,
            status: status.to_string(),
        });
    }
    Ok(())
}

/// Check if a path is a mountpoint: it sits on a different device than its
/// parent, or is its own parent
pub fn is_mountpoint(path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    let path_meta = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) => {
            debug!("Failed to stat mount path {:?}: {}", path, e);
            return false;
        }
    };

    if path_meta.file_type().is_symlink() {
        return false;
    }

    let parent = path.join("..");
    let parent_meta = match std::fs::metadata(&parent) {
        Ok(m) => m,
        Err(e) => {
            debug!("Failed to stat parent {:?}: {}", parent, e);
            return false;
        }
    };

    path_meta.dev() != parent_meta.dev() || path_meta.ino() == parent_meta.ino()
}
