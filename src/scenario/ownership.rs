use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use nix::unistd::{Gid, Group, Uid, User};

use super::assertions::*;
use super::ScenarioContext;
use crate::error::ScenarioFailure;

/// Local account the identity-mapping file maps remote `root` to
const MAPPED_USER: &str = "foo_user";
const MAPPED_GROUP: &str = "bar_group";

fn owner_name(path: &Path) -> Check<String> {
    let uid = lstat(path)?.uid();
    let user = User::from_uid(Uid::from_raw(uid)).call(|| format!("getpwuid({})", uid))?;
    Ok(user.map(|u| u.name).unwrap_or_else(|| uid.to_string()))
}

fn group_name(path: &Path) -> Check<String> {
    let gid = lstat(path)?.gid();
    let group = Group::from_gid(Gid::from_raw(gid)).call(|| format!("getgrgid({})", gid))?;
    Ok(group.map(|g| g.name).unwrap_or_else(|| gid.to_string()))
}

fn lookup_user(name: &str) -> Check<User> {
    User::from_name(name)
        .call(|| format!("getpwnam({})", name))?
        .ok_or_else(|| ScenarioFailure::Skip(format!("User {} does not exist", name)))
}

/// Directory created behind the mount, returning its path under the mount
fn mkdir_behind_mount(ctx: &ScenarioContext) -> Check<std::path::PathBuf> {
    let name = ctx.next_name();
    let src = ctx.src_dir().join(&name);
    fs::create_dir(&src).call(|| format!("mkdir({})", src.display()))?;
    Ok(ctx.mnt_dir().join(name))
}

/// `namemap=user` presents remote files as owned by the mounting user
pub fn namemap_user(ctx: &mut ScenarioContext) -> Check {
    let path = mkdir_behind_mount(ctx)?;
    expect_eq("owner", "root".to_string(), owner_name(&path)?)?;
    expect_eq("group", "root".to_string(), group_name(&path)?)
}

/// `namemap=file` applies the user and group mapping files
pub fn namemap_file(ctx: &mut ScenarioContext) -> Check {
    lookup_user(MAPPED_USER)?;
    let path = mkdir_behind_mount(ctx)?;
    expect_eq("owner", MAPPED_USER.to_string(), owner_name(&path)?)?;
    expect_eq("group", MAPPED_GROUP.to_string(), group_name(&path)?)
}

/// Empty mapping files mount fine and leave ids untranslated
pub fn namemap_file_empty(ctx: &mut ScenarioContext) -> Check {
    let path = mkdir_behind_mount(ctx)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    assert_listed(&name, ctx.mnt_dir())?;

    let src_meta = lstat(&ctx.src_dir().join(&name))?;
    let mnt_meta = lstat(&path)?;
    expect("S_ISDIR(st_mode)", "directory", mnt_meta.file_type().is_dir())?;
    assert_same_attrs(&name, &src_meta, &mnt_meta, &[Attr::Uid, Attr::Gid])
}

/// Owner and group change independently under file-based mapping
pub fn chown(ctx: &mut ScenarioContext) -> Check {
    let mapped = lookup_user(MAPPED_USER)?;
    let path = ctx.mnt_dir().join(ctx.next_name());
    fs::create_dir(&path).call(|| format!("mkdir({})", path.display()))?;
    let gid = lstat(&path)?.gid();

    let uid_new = mapped.uid.as_raw();
    std::os::unix::fs::chown(&path, Some(uid_new), None)
        .call(|| format!("chown({}, {}, -1)", path.display(), uid_new))?;
    let meta = lstat(&path)?;
    expect_eq("st_uid", uid_new, meta.uid())?;
    expect_eq("st_gid", gid, meta.gid())?;

    let gid_new = mapped.gid.as_raw();
    std::os::unix::fs::chown(&path, None, Some(gid_new))
        .call(|| format!("chown({}, -1, {})", path.display(), gid_new))?;
    let meta = lstat(&path)?;
    expect_eq("st_uid", uid_new, meta.uid())?;
    expect_eq("st_gid", gid_new, meta.gid())
}
