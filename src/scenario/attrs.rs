use std::fs;
use std::os::unix::fs::PermissionsExt;

use nix::sys::stat::{utimensat, UtimensatFlags};
use nix::sys::time::TimeSpec;

use super::assertions::*;
use super::ScenarioContext;

const NANOS_PER_SEC: i128 = 1_000_000_000;

fn timespec(ns: i128) -> TimeSpec {
    TimeSpec::new(
        ns.div_euclid(NANOS_PER_SEC) as i64,
        ns.rem_euclid(NANOS_PER_SEC) as i64,
    )
}

/// Explicit nanosecond timestamps survive a round trip
pub fn utimens(ctx: &mut ScenarioContext) -> Check {
    let path = ctx.mnt_dir().join(ctx.next_name());
    fs::create_dir(&path).call(|| format!("mkdir({})", path.display()))?;
    let before = lstat(&path)?;

    let atime_ns = Attr::AtimeNs.value(&before) + 42;
    let mtime_ns = Attr::MtimeNs.value(&before) - 42;
    utimensat(
        None,
        &path,
        &timespec(atime_ns),
        &timespec(mtime_ns),
        UtimensatFlags::FollowSymlink,
    )
    .call(|| format!("utimensat({})", path.display()))?;

    let after = lstat(&path)?;
    expect_eq("st_atime_ns", atime_ns, Attr::AtimeNs.value(&after))?;
    expect_eq("st_mtime_ns", mtime_ns, Attr::MtimeNs.value(&after))
}

/// `UTIME_NOW` yields non-zero timestamps
pub fn utimens_now(ctx: &mut ScenarioContext) -> Check {
    let path = ctx.mnt_dir().join(ctx.next_name());
    create_empty(&path)?;
    utimensat(
        None,
        &path,
        &TimeSpec::UTIME_NOW,
        &TimeSpec::UTIME_NOW,
        UtimensatFlags::FollowSymlink,
    )
    .call(|| format!("utimensat({}, UTIME_NOW)", path.display()))?;

    let meta = lstat(&path)?;
    expect("st_atime_ns", "non-zero", Attr::AtimeNs.value(&meta) != 0)?;
    expect("st_mtime_ns", "non-zero", Attr::MtimeNs.value(&meta) != 0)
}

pub fn statvfs(ctx: &mut ScenarioContext) -> Check {
    nix::sys::statvfs::statvfs(ctx.mnt_dir())
        .call(|| format!("statvfs({})", ctx.mnt_dir().display()))?;
    Ok(())
}

pub fn chmod(ctx: &mut ScenarioContext) -> Check {
    const MODE: u32 = 0o600;
    let path = ctx.mnt_dir().join(ctx.next_name());
    create_empty(&path)?;
    fs::set_permissions(&path, fs::Permissions::from_mode(MODE))
        .call(|| format!("chmod({}, {:o})", path.display(), MODE))?;

    let mode = lstat(&path)?.permissions().mode() & 0o777;
    expect_eq("st_mode & 0o777", format!("{:o}", MODE), format!("{:o}", mode))
}
