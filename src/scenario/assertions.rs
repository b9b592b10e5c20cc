//! Filesystem checks for scenarios
//!
//! Unlike plain `assert!`, every check returns a [`ScenarioFailure`] naming the
//! offending call and both values, so the runner can report it and still tear
//! the mount down cleanly.

use std::fs::{self, Metadata};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use crate::error::ScenarioFailure;

pub type Check<T = ()> = Result<T, ScenarioFailure>;

/// Attach the failing call to an I/O result
pub trait CallExt<T> {
    fn call<F: FnOnce() -> String>(self, describe: F) -> Check<T>;
}

impl<T> CallExt<T> for io::Result<T> {
    fn call<F: FnOnce() -> String>(self, describe: F) -> Check<T> {
        self.map_err(|e| ScenarioFailure::call(describe(), e))
    }
}

impl<T> CallExt<T> for nix::Result<T> {
    fn call<F: FnOnce() -> String>(self, describe: F) -> Check<T> {
        self.map_err(|errno| ScenarioFailure::call(describe(), io::Error::from(errno)))
    }
}

/// Fail unless `expected == observed`
pub fn expect_eq<T: PartialEq + std::fmt::Debug>(
    call: impl Into<String>,
    expected: T,
    observed: T,
) -> Check {
    if expected == observed {
        Ok(())
    } else {
        Err(ScenarioFailure::mismatch(call, expected, observed))
    }
}

/// Fail unless `condition` holds
pub fn expect(call: impl Into<String>, expected: &str, condition: bool) -> Check {
    if condition {
        Ok(())
    } else {
        Err(ScenarioFailure::Mismatch {
            call: call.into(),
            expected: expected.to_string(),
            observed: "not so".to_string(),
        })
    }
}

pub fn lstat(path: &Path) -> Check<Metadata> {
    fs::symlink_metadata(path).call(|| format!("lstat({})", path.display()))
}

pub fn read_file(path: &Path) -> Check<Vec<u8>> {
    fs::read(path).call(|| format!("read({})", path.display()))
}

/// Open with `O_CREAT | O_RDWR` and close again
pub fn create_empty(path: &Path) -> Check {
    fs::OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path)
        .call(|| format!("open({}, O_CREAT | O_RDWR)", path.display()))?;
    Ok(())
}

/// Whether `dir` lists an entry called `name`
pub fn name_in_dir(name: &str, dir: &Path) -> Check<bool> {
    let entries = fs::read_dir(dir).call(|| format!("readdir({})", dir.display()))?;
    for entry in entries {
        let entry = entry.call(|| format!("readdir({})", dir.display()))?;
        if entry.file_name() == name {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Sorted entry names of `dir`
pub fn list_dir(dir: &Path) -> Check<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).call(|| format!("readdir({})", dir.display()))? {
        let entry = entry.call(|| format!("readdir({})", dir.display()))?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

pub fn assert_listed(name: &str, dir: &Path) -> Check {
    expect_eq(
        format!("{} listed in {}", name, dir.display()),
        true,
        name_in_dir(name, dir)?,
    )
}

pub fn assert_not_listed(name: &str, dir: &Path) -> Check {
    expect_eq(
        format!("{} listed in {}", name, dir.display()),
        false,
        name_in_dir(name, dir)?,
    )
}

/// `lstat` must fail with `ENOENT`
pub fn assert_not_found(path: &Path) -> Check {
    let call = format!("lstat({})", path.display());
    match fs::symlink_metadata(path) {
        Ok(_) => Err(ScenarioFailure::mismatch(call, "ENOENT", "success")),
        Err(e) if e.raw_os_error() == Some(libc::ENOENT) => Ok(()),
        Err(e) => Err(ScenarioFailure::mismatch(call, "ENOENT", e.to_string())),
    }
}

pub fn assert_file_content(path: &Path, expected: &[u8]) -> Check {
    let actual = read_file(path)?;
    if actual == expected {
        return Ok(());
    }
    Err(ScenarioFailure::Mismatch {
        call: format!("read({})", path.display()),
        expected: format!("{} bytes", expected.len()),
        observed: format!(
            "{} bytes, first difference at offset {}",
            actual.len(),
            first_difference(&actual, expected)
        ),
    })
}

/// Byte-wise comparison of two files
pub fn assert_files_equal(a: &Path, b: &Path) -> Check {
    let expected = read_file(b)?;
    assert_file_content(a, &expected)
}

fn first_difference(a: &[u8], b: &[u8]) -> usize {
    a.iter()
        .zip(b)
        .position(|(x, y)| x != y)
        .unwrap_or_else(|| a.len().min(b.len()))
}

/// A `stat` field that scenarios compare across calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attr {
    Mode,
    Dev,
    Ino,
    Nlink,
    Uid,
    Gid,
    Size,
    AtimeNs,
    MtimeNs,
    CtimeNs,
    /// Modification time truncated to whole seconds
    Mtime,
}

impl Attr {
    pub fn name(&self) -> &'static str {
        match self {
            Attr::Mode => "st_mode",
            Attr::Dev => "st_dev",
            Attr::Ino => "st_ino",
            Attr::Nlink => "st_nlink",
            Attr::Uid => "st_uid",
            Attr::Gid => "st_gid",
            Attr::Size => "st_size",
            Attr::AtimeNs => "st_atime_ns",
            Attr::MtimeNs => "st_mtime_ns",
            Attr::CtimeNs => "st_ctime_ns",
            Attr::Mtime => "st_mtime",
        }
    }

    pub fn value(&self, meta: &Metadata) -> i128 {
        match self {
            Attr::Mode => meta.mode() as i128,
            Attr::Dev => meta.dev() as i128,
            Attr::Ino => meta.ino() as i128,
            Attr::Nlink => meta.nlink() as i128,
            Attr::Uid => meta.uid() as i128,
            Attr::Gid => meta.gid() as i128,
            Attr::Size => meta.size() as i128,
            Attr::AtimeNs => nanos(meta.atime(), meta.atime_nsec()),
            Attr::MtimeNs => nanos(meta.mtime(), meta.mtime_nsec()),
            Attr::CtimeNs => nanos(meta.ctime(), meta.ctime_nsec()),
            Attr::Mtime => meta.mtime() as i128,
        }
    }
}

pub fn nanos(secs: i64, nsecs: i64) -> i128 {
    secs as i128 * 1_000_000_000 + nsecs as i128
}

/// Every attribute in `attrs` must agree between `before` and `after`
pub fn assert_same_attrs(what: &str, before: &Metadata, after: &Metadata, attrs: &[Attr]) -> Check {
    for attr in attrs {
        expect_eq(
            format!("{}.{}", what, attr.name()),
            attr.value(before),
            attr.value(after),
        )?;
    }
    Ok(())
}
