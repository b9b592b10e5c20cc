//! Rename, hard link and symlink tests

mod common;

use anyhow::Result;
use common::*;

#[tokio::test]
async fn test_rename() -> Result<()> {
    check("rename").await
}

#[tokio::test]
async fn test_link() -> Result<()> {
    check("link").await
}

#[tokio::test]
async fn test_symlink() -> Result<()> {
    check("symlink").await
}
