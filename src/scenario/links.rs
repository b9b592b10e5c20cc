use std::fs;
use std::io::Write;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use super::assertions::*;
use super::ScenarioContext;

const SYMLINK_TARGET: &str = "/imaginary/dest";

/// Rename keeps the inode and its attributes; only ctime may move forward
pub fn rename(ctx: &mut ScenarioContext) -> Check {
    let path1 = ctx.mnt_dir().join(ctx.next_name());
    let name2 = ctx.next_name();
    let path2 = ctx.mnt_dir().join(&name2);

    let data = b"foo";
    fs::File::create(&path1)
        .and_then(|mut f| f.write_all(data))
        .call(|| format!("write({})", path1.display()))?;

    let before = lstat(&path1)?;
    fs::rename(&path1, &path2)
        .call(|| format!("rename({}, {})", path1.display(), path2.display()))?;
    ctx.wait_for_cache(0);
    let after = lstat(&path2)?;
    let contents = read_file(&path2)?;

    assert_same_attrs(
        "rename",
        &before,
        &after,
        &[
            Attr::Mode,
            Attr::Dev,
            Attr::Uid,
            Attr::Gid,
            Attr::Size,
            Attr::AtimeNs,
            Attr::MtimeNs,
            Attr::Ino,
        ],
    )?;
    expect(
        "rename.st_ctime_ns",
        "non-decreasing",
        Attr::CtimeNs.value(&after) >= Attr::CtimeNs.value(&before),
    )?;

    assert_listed(&name2, ctx.mnt_dir())?;
    assert_not_found(&path1)?;
    expect_eq("read(renamed)", &data[..], &contents[..])
}

/// Both names of a hard link share metadata; dropping one keeps the other
pub fn link(ctx: &mut ScenarioContext) -> Check {
    let path1 = ctx.mnt_dir().join(ctx.next_name());
    let name2 = ctx.next_name();
    let path2 = ctx.mnt_dir().join(&name2);
    fs::copy(ctx.data().path(), &path1).call(|| format!("copy to {}", path1.display()))?;
    assert_files_equal(&path1, ctx.data().path())?;
    expect_eq("st_nlink before link", 1, lstat(&path1)?.nlink())?;

    fs::hard_link(&path1, &path2)
        .call(|| format!("link({}, {})", path1.display(), path2.display()))?;

    // ctime changes with the link; let stale cached attributes expire
    ctx.wait_for_cache(0);

    let meta1 = lstat(&path1)?;
    expect_eq("st_nlink after link", 2, meta1.nlink())?;
    let meta2 = lstat(&path2)?;
    assert_same_attrs(
        "link",
        &meta1,
        &meta2,
        &[
            Attr::Mode,
            Attr::Dev,
            Attr::Uid,
            Attr::Gid,
            Attr::Size,
            Attr::AtimeNs,
            Attr::MtimeNs,
            Attr::CtimeNs,
        ],
    )?;

    assert_listed(&name2, ctx.mnt_dir())?;
    assert_files_equal(&path1, &path2)?;

    fs::remove_file(&path2).call(|| format!("unlink({})", path2.display()))?;
    assert_not_listed(&name2, ctx.mnt_dir())?;
    assert_not_found(&path2)?;
    expect_eq("st_nlink after unlink", 1, lstat(&path1)?.nlink())?;
    assert_files_equal(&path1, ctx.data().path())?;

    fs::remove_file(&path1).call(|| format!("unlink({})", path1.display()))
}

pub fn symlink(ctx: &mut ScenarioContext) -> Check {
    let name = ctx.next_name();
    let path = ctx.mnt_dir().join(&name);
    std::os::unix::fs::symlink(SYMLINK_TARGET, &path)
        .call(|| format!("symlink({}, {})", SYMLINK_TARGET, path.display()))?;

    let meta = lstat(&path)?;
    expect("S_ISLNK(st_mode)", "symlink", meta.file_type().is_symlink())?;
    let target = fs::read_link(&path).call(|| format!("readlink({})", path.display()))?;
    expect_eq("readlink", Path::new(SYMLINK_TARGET), target.as_path())?;
    expect_eq("st_nlink", 1, meta.nlink())?;
    assert_listed(&name, ctx.mnt_dir())
}
