use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::MetadataExt;

use nix::unistd::{getgid, getuid};

use super::assertions::*;
use super::ScenarioContext;

const GROW: u64 = 1024;

pub fn create(ctx: &mut ScenarioContext) -> Check {
    let name = ctx.next_name();
    let path = ctx.mnt_dir().join(&name);
    assert_not_found(&path)?;
    assert_not_listed(&name, ctx.mnt_dir())?;

    create_empty(&path)?;

    assert_listed(&name, ctx.mnt_dir())?;
    let meta = lstat(&path)?;
    expect("S_ISREG(st_mode)", "regular file", meta.file_type().is_file())?;
    expect_eq("st_nlink", 1, meta.nlink())?;
    expect_eq("st_size", 0, meta.size())?;
    expect_eq("st_uid", getuid().as_raw(), meta.uid())?;
    expect_eq("st_gid", getgid().as_raw(), meta.gid())
}

/// Written behind the mount, read through it
pub fn open_read(ctx: &mut ScenarioContext) -> Check {
    let name = ctx.next_name();
    let src = ctx.src_dir().join(&name);
    fs::copy(ctx.data().path(), &src).call(|| format!("copy to {}", src.display()))?;

    assert_file_content(&ctx.mnt_dir().join(&name), ctx.data().data())
}

/// Created behind the mount, written through it
pub fn open_write(ctx: &mut ScenarioContext) -> Check {
    let name = ctx.next_name();
    create_empty(&ctx.src_dir().join(&name))?;

    let path = ctx.mnt_dir().join(&name);
    fs::write(&path, ctx.data().data()).call(|| format!("write({})", path.display()))?;
    assert_file_content(&path, ctx.data().data())
}

pub fn append(ctx: &mut ScenarioContext) -> Check {
    let name = ctx.next_name();
    create_empty(&ctx.src_dir().join(&name))?;
    let path = ctx.mnt_dir().join(&name);

    OpenOptions::new()
        .write(true)
        .open(&path)
        .and_then(|mut f| f.write_all(b"foo\n"))
        .call(|| format!("write({}, O_WRONLY)", path.display()))?;
    OpenOptions::new()
        .append(true)
        .open(&path)
        .and_then(|mut f| f.write_all(b"bar\n"))
        .call(|| format!("write({}, O_WRONLY | O_APPEND)", path.display()))?;

    assert_file_content(&path, b"foo\nbar\n")
}

pub fn seek(ctx: &mut ScenarioContext) -> Check {
    let name = ctx.next_name();
    create_empty(&ctx.src_dir().join(&name))?;
    let path = ctx.mnt_dir().join(&name);

    let write_at = |offset: u64, data: &[u8]| -> Check {
        let mut file = OpenOptions::new()
            .write(true)
            .open(&path)
            .call(|| format!("open({}, O_WRONLY)", path.display()))?;
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| file.write_all(data))
            .call(|| format!("pwrite({}, offset {})", path.display(), offset))
    };
    write_at(1, b"foobar\n")?;
    write_at(4, b"com")?;

    assert_file_content(&path, b"\0foocom\n")
}

/// Grow and shrink by path
pub fn truncate_path(ctx: &mut ScenarioContext) -> Check {
    let data = ctx.data().data().to_vec();
    let path = ctx.mnt_dir().join(ctx.next_name());
    fs::write(&path, &data).call(|| format!("write({})", path.display()))?;

    let size = lstat(&path)?.size();
    expect_eq("st_size", data.len() as u64, size)?;

    nix::unistd::truncate(&path, (size + GROW) as i64)
        .call(|| format!("truncate({}, {})", path.display(), size + GROW))?;
    expect_eq("st_size after grow", size + GROW, lstat(&path)?.size())?;
    let mut grown = data.clone();
    grown.resize(data.len() + GROW as usize, 0);
    assert_file_content(&path, &grown)?;

    nix::unistd::truncate(&path, (size - GROW) as i64)
        .call(|| format!("truncate({}, {})", path.display(), size - GROW))?;
    expect_eq("st_size after shrink", size - GROW, lstat(&path)?.size())?;
    assert_file_content(&path, &data[..(size - GROW) as usize])?;

    fs::remove_file(&path).call(|| format!("unlink({})", path.display()))
}

/// Grow and shrink through an open descriptor
pub fn truncate_fd(ctx: &mut ScenarioContext) -> Check {
    let data = ctx.data().data();
    let mut tmp = tempfile::NamedTempFile::new_in(ctx.mnt_dir())
        .call(|| format!("mkstemp in {}", ctx.mnt_dir().display()))?;
    let file = tmp.as_file_mut();
    file.write_all(data).call(|| "write(tmpfile)".to_string())?;

    let size = file.metadata().call(|| "fstat(tmpfile)".to_string())?.len();
    expect_eq("st_size", data.len() as u64, size)?;

    file.set_len(size + GROW)
        .call(|| format!("ftruncate(tmpfile, {})", size + GROW))?;
    expect_eq(
        "st_size after grow",
        size + GROW,
        file.metadata().call(|| "fstat(tmpfile)".to_string())?.len(),
    )?;
    let mut contents = Vec::new();
    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.read_to_end(&mut contents))
        .call(|| "read(tmpfile)".to_string())?;
    expect_eq("read length", data.len() + GROW as usize, contents.len())?;
    expect_eq("grown prefix", data, &contents[..data.len()])?;
    expect(
        "grown tail",
        "1024 zero bytes",
        contents[data.len()..].iter().all(|&b| b == 0),
    )?;

    file.set_len(size - GROW)
        .call(|| format!("ftruncate(tmpfile, {})", size - GROW))?;
    expect_eq(
        "st_size after shrink",
        size - GROW,
        file.metadata().call(|| "fstat(tmpfile)".to_string())?.len(),
    )?;
    contents.clear();
    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.read_to_end(&mut contents))
        .call(|| "read(tmpfile)".to_string())?;
    expect_eq("shrunk content", &data[..(size - GROW) as usize], &contents[..])
}

/// Files written on either side show up on the other
pub fn passthrough(ctx: &mut ScenarioContext) -> Check {
    const PASSTHROUGH_ATTRS: [Attr; 6] = [
        Attr::Mode,
        Attr::Nlink,
        Attr::Uid,
        Attr::Gid,
        Attr::Size,
        Attr::Mtime,
    ];

    for write_through_mount in [false, true] {
        let name = ctx.next_name();
        let src = ctx.src_dir().join(&name);
        let mnt = ctx.mnt_dir().join(&name);
        assert_not_listed(&name, ctx.src_dir())?;
        assert_not_listed(&name, ctx.mnt_dir())?;

        let target = if write_through_mount { &mnt } else { &src };
        fs::write(target, "Hello, world").call(|| format!("write({})", target.display()))?;

        assert_listed(&name, ctx.src_dir())?;
        ctx.wait_for_cache(1);
        assert_listed(&name, ctx.mnt_dir())?;
        assert_same_attrs(&name, &lstat(&src)?, &lstat(&mnt)?, &PASSTHROUGH_ATTRS)?;
    }
    Ok(())
}

pub fn unlink(ctx: &mut ScenarioContext) -> Check {
    let name = ctx.next_name();
    let path = ctx.mnt_dir().join(&name);
    let src = ctx.src_dir().join(&name);
    fs::write(&src, b"hello").call(|| format!("write({})", src.display()))?;
    ctx.wait_for_cache(1);
    assert_listed(&name, ctx.mnt_dir())?;

    fs::remove_file(&path).call(|| format!("unlink({})", path.display()))?;

    assert_not_found(&path)?;
    assert_not_listed(&name, ctx.mnt_dir())?;
    assert_not_listed(&name, ctx.src_dir())
}

/// An unlinked file stays usable through its open descriptor
pub fn open_unlink(ctx: &mut ScenarioContext) -> Check {
    let name = ctx.next_name();
    let path = ctx.mnt_dir().join(&name);
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)
        .call(|| format!("open({}, O_CREAT | O_RDWR | O_TRUNC)", path.display()))?;
    file.write_all(b"foo").call(|| "write(fd)".to_string())?;

    fs::remove_file(&path).call(|| format!("unlink({})", path.display()))?;
    assert_not_found(&path)?;
    assert_not_listed(&name, ctx.mnt_dir())?;

    file.write_all(b"bar").call(|| "write(fd)".to_string())?;
    let mut contents = Vec::new();
    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.read_to_end(&mut contents))
        .call(|| "read(fd)".to_string())?;
    expect_eq("read(fd)", &b"foobar"[..], &contents[..])
}
