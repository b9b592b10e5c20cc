//! Correctness scenarios run through a live mountpoint
//!
//! Each scenario is a plain function over a [`ScenarioContext`]. The context is
//! handed in explicitly and carries everything a scenario may touch: the
//! source/mount pair, the cache timeout, the shared data file, and the
//! false-positive registry for this run.

mod assertions;
mod attrs;
mod dirs;
mod files;
mod links;
mod ownership;

pub use assertions::*;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;
use tracing::debug;

use crate::error::ScenarioFailure;
use crate::matrix::{ConfigurationTuple, NameMapMode};
use crate::names;
use crate::output::OutputSurveillance;

/// Body of a scenario
pub type ScenarioFn = fn(&mut ScenarioContext) -> Result<(), ScenarioFailure>;

/// A named correctness check and the mount it needs
#[derive(Clone, Copy)]
pub struct Scenario {
    pub name: &'static str,
    /// Identity-mapping mode the service must be started with
    pub namemap: NameMapMode,
    /// Skipped unless the harness runs as root
    pub requires_root: bool,
    pub run: ScenarioFn,
}

impl Scenario {
    const fn new(name: &'static str, run: ScenarioFn) -> Self {
        Self {
            name,
            namemap: NameMapMode::None,
            requires_root: false,
            run,
        }
    }

    const fn with_namemap(mut self, namemap: NameMapMode) -> Self {
        self.namemap = namemap;
        self
    }

    const fn root_only(mut self) -> Self {
        self.requires_root = true;
        self
    }

    /// Stable identifier of one run, e.g. `mkdir[debug=false-cache_timeout=0]`
    pub fn test_id(&self, tuple: &ConfigurationTuple) -> String {
        format!("{}[{}]", self.name, tuple.id())
    }
}

impl std::fmt::Debug for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scenario")
            .field("name", &self.name)
            .field("namemap", &self.namemap)
            .field("requires_root", &self.requires_root)
            .finish()
    }
}

static CATALOGUE: [Scenario; 25] = [
    Scenario::new("utimens", attrs::utimens),
    Scenario::new("utimens_now", attrs::utimens_now),
    Scenario::new("statvfs", attrs::statvfs),
    Scenario::new("chmod", attrs::chmod),
    Scenario::new("create", files::create),
    Scenario::new("open_read", files::open_read),
    Scenario::new("open_write", files::open_write),
    Scenario::new("append", files::append),
    Scenario::new("seek", files::seek),
    Scenario::new("truncate_path", files::truncate_path),
    Scenario::new("truncate_fd", files::truncate_fd),
    Scenario::new("passthrough", files::passthrough),
    Scenario::new("mkdir", dirs::mkdir),
    Scenario::new("mkdir_rmdir", dirs::mkdir_rmdir),
    Scenario::new("readdir", dirs::readdir),
    Scenario::new("rmdir", dirs::rmdir),
    Scenario::new("rename", links::rename),
    Scenario::new("link", links::link),
    Scenario::new("symlink", links::symlink),
    Scenario::new("unlink", files::unlink),
    Scenario::new("open_unlink", files::open_unlink),
    Scenario::new("namemap_user", ownership::namemap_user)
        .with_namemap(NameMapMode::User)
        .root_only(),
    Scenario::new("namemap_file", ownership::namemap_file)
        .with_namemap(NameMapMode::File)
        .root_only(),
    Scenario::new("namemap_file_empty", ownership::namemap_file_empty)
        .with_namemap(NameMapMode::FileEmpty),
    Scenario::new("chown", ownership::chown)
        .with_namemap(NameMapMode::File)
        .root_only(),
];

/// Every scenario, in execution order
pub fn catalogue() -> &'static [Scenario] {
    &CATALOGUE
}

/// Look a scenario up by name
pub fn find(name: &str) -> Option<&'static Scenario> {
    CATALOGUE.iter().find(|s| s.name == name)
}

/// Session-wide payload: 2048 ASCII letters and digits from a fixed seed
pub struct DataFile {
    path: PathBuf,
    data: Vec<u8>,
    _dir: TempDir,
}

impl DataFile {
    pub const SEED: u64 = 12345;
    pub const LEN: usize = 2048;

    /// Generate the payload and write it to a fresh temporary file
    pub fn generate() -> std::io::Result<Self> {
        let data: Vec<u8> = StdRng::seed_from_u64(Self::SEED)
            .sample_iter(&Alphanumeric)
            .take(Self::LEN)
            .collect();

        let dir = tempfile::Builder::new().prefix("sshfs-data-").tempdir()?;
        let path = dir.path().join("data.txt");
        std::fs::write(&path, &data)?;
        debug!("Wrote {} byte data file to {:?}", data.len(), path);

        Ok(Self {
            path,
            data,
            _dir: dir,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Everything one scenario run may use
pub struct ScenarioContext {
    src_dir: PathBuf,
    mnt_dir: PathBuf,
    cache_timeout: u64,
    data: Arc<DataFile>,
    surveillance: Arc<Mutex<OutputSurveillance>>,
}

impl ScenarioContext {
    pub fn new(
        src_dir: PathBuf,
        mnt_dir: PathBuf,
        cache_timeout: u64,
        data: Arc<DataFile>,
        surveillance: Arc<Mutex<OutputSurveillance>>,
    ) -> Self {
        Self {
            src_dir,
            mnt_dir,
            cache_timeout,
            data,
            surveillance,
        }
    }

    /// Directory behind the mount, for passthrough checks
    pub fn src_dir(&self) -> &Path {
        &self.src_dir
    }

    pub fn mnt_dir(&self) -> &Path {
        &self.mnt_dir
    }

    pub fn cache_timeout(&self) -> u64 {
        self.cache_timeout
    }

    pub fn data(&self) -> &DataFile {
        &self.data
    }

    /// Next unique name from the process-wide sequence
    pub fn next_name(&self) -> String {
        names::next_name()
    }

    /// Sleep out the directory cache, plus `margin_secs`. No-op without caching.
    pub fn wait_for_cache(&self, margin_secs: u64) {
        if self.cache_timeout > 0 {
            let wait = Duration::from_secs(self.cache_timeout + margin_secs);
            debug!("Waiting {:?} for cached entries to expire", wait);
            sleep_at_least(wait);
        }
    }

    /// False-positive registry of this run. Rules registered here apply to
    /// this run only, and survive a panicking scenario.
    pub fn surveillance(&self) -> MutexGuard<'_, OutputSurveillance> {
        self.surveillance.lock()
    }
}

/// Sleep for at least `duration`, even if woken early
pub fn sleep_at_least(duration: Duration) {
    let end = std::time::Instant::now() + duration;
    let mut now = std::time::Instant::now();
    while now < end {
        std::thread::sleep(end - now);
        now = std::time::Instant::now();
    }
}
