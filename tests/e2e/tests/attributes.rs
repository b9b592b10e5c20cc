//! Timestamp, mode and statvfs tests

mod common;

use anyhow::Result;
use common::*;
use test_case::test_case;

#[test_case("utimens"; "explicit nanoseconds")]
#[test_case("utimens_now"; "utime now")]
#[tokio::test]
async fn test_utimens(name: &str) -> Result<()> {
    check(name).await
}

#[tokio::test]
async fn test_statvfs() -> Result<()> {
    check("statvfs").await
}

#[tokio::test]
async fn test_chmod() -> Result<()> {
    check("chmod").await
}
