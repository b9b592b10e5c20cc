use std::fs;
use std::os::unix::fs::MetadataExt;

use super::assertions::*;
use super::ScenarioContext;

pub fn mkdir(ctx: &mut ScenarioContext) -> Check {
    let name = ctx.next_name();
    let path = ctx.mnt_dir().join(&name);
    fs::create_dir(&path).call(|| format!("mkdir({})", path.display()))?;

    let meta = lstat(&path)?;
    expect("S_ISDIR(st_mode)", "directory", meta.file_type().is_dir())?;
    expect_eq("readdir(new dir)", Vec::<String>::new(), list_dir(&path)?)?;
    expect("st_nlink", "1 or 2", matches!(meta.nlink(), 1 | 2))?;
    assert_listed(&name, ctx.mnt_dir())
}

/// Create and remove a directory through the mount
pub fn mkdir_rmdir(ctx: &mut ScenarioContext) -> Check {
    let name = ctx.next_name();
    let path = ctx.mnt_dir().join(&name);
    fs::create_dir(&path).call(|| format!("mkdir({})", path.display()))?;
    assert_listed(&name, ctx.mnt_dir())?;
    let nlink = lstat(&path)?.nlink();
    expect("st_nlink", "1 or 2", matches!(nlink, 1 | 2))?;

    fs::remove_dir(&path).call(|| format!("rmdir({})", path.display()))?;

    assert_not_listed(&name, ctx.mnt_dir())?;
    assert_not_listed(&name, ctx.src_dir())
}

/// A tree built behind the mount lists correctly through it
pub fn readdir(ctx: &mut ScenarioContext) -> Check {
    let newdir = ctx.next_name();
    let src_newdir = ctx.src_dir().join(&newdir);
    let mnt_newdir = ctx.mnt_dir().join(&newdir);
    let file_name = ctx.next_name();
    let subdir_name = ctx.next_name();
    let file = src_newdir.join(&file_name);
    let subdir = src_newdir.join(&subdir_name);
    let subfile = subdir.join(ctx.next_name());

    fs::create_dir(&src_newdir).call(|| format!("mkdir({})", src_newdir.display()))?;
    fs::copy(ctx.data().path(), &file).call(|| format!("copy to {}", file.display()))?;
    fs::create_dir(&subdir).call(|| format!("mkdir({})", subdir.display()))?;
    fs::copy(ctx.data().path(), &subfile).call(|| format!("copy to {}", subfile.display()))?;

    let mut expected = vec![file_name, subdir_name];
    expected.sort();
    expect_eq(
        format!("readdir({})", mnt_newdir.display()),
        expected,
        list_dir(&mnt_newdir)?,
    )?;

    fs::remove_file(&file).call(|| format!("unlink({})", file.display()))?;
    fs::remove_file(&subfile).call(|| format!("unlink({})", subfile.display()))?;
    fs::remove_dir(&subdir).call(|| format!("rmdir({})", subdir.display()))?;
    fs::remove_dir(&src_newdir).call(|| format!("rmdir({})", src_newdir.display()))
}

/// A directory created behind the mount is removed through it
pub fn rmdir(ctx: &mut ScenarioContext) -> Check {
    let name = ctx.next_name();
    let path = ctx.mnt_dir().join(&name);
    let src = ctx.src_dir().join(&name);
    fs::create_dir(&src).call(|| format!("mkdir({})", src.display()))?;
    ctx.wait_for_cache(1);
    assert_listed(&name, ctx.mnt_dir())?;

    fs::remove_dir(&path).call(|| format!("rmdir({})", path.display()))?;

    assert_not_found(&path)?;
    assert_not_listed(&name, ctx.mnt_dir())?;
    assert_not_listed(&name, ctx.src_dir())
}
