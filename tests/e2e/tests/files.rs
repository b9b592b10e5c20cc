//! File content tests
//!
//! Create, read, write, append, seek and truncate through the mountpoint,
//! plus visibility of files written on either side of the mount.

mod common;

use anyhow::Result;
use common::*;
use test_case::test_case;

#[test_case("create"; "create through mount")]
#[test_case("open_read"; "read file written behind mount")]
#[test_case("open_write"; "write file created behind mount")]
#[test_case("append"; "append mode")]
#[test_case("seek"; "write at offsets")]
#[tokio::test]
async fn test_file_io(name: &str) -> Result<()> {
    check(name).await
}

#[test_case("truncate_path"; "by path")]
#[test_case("truncate_fd"; "by descriptor")]
#[tokio::test]
async fn test_truncate(name: &str) -> Result<()> {
    check(name).await
}

#[tokio::test]
async fn test_passthrough() -> Result<()> {
    check("passthrough").await
}

#[tokio::test]
async fn test_unlink() -> Result<()> {
    check("unlink").await
}

#[tokio::test]
async fn test_open_unlink() -> Result<()> {
    check("open_unlink").await
}
