//! Directory tests

mod common;

use anyhow::Result;
use common::*;

#[tokio::test]
async fn test_mkdir() -> Result<()> {
    check("mkdir").await
}

#[tokio::test]
async fn test_mkdir_rmdir() -> Result<()> {
    check("mkdir_rmdir").await
}

#[tokio::test]
async fn test_readdir() -> Result<()> {
    check("readdir").await
}

#[tokio::test]
async fn test_rmdir() -> Result<()> {
    check("rmdir").await
}
