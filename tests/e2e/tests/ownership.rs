//! Identity mapping and ownership tests
//!
//! Most of these need root; the runner reports them as skipped otherwise.

mod common;

use anyhow::Result;
use common::*;

#[tokio::test]
async fn test_namemap_user() -> Result<()> {
    check("namemap_user").await
}

#[tokio::test]
async fn test_namemap_file() -> Result<()> {
    check("namemap_file").await
}

#[tokio::test]
async fn test_namemap_file_empty() -> Result<()> {
    check("namemap_file_empty").await
}

#[tokio::test]
async fn test_chown() -> Result<()> {
    check("chown").await
}
