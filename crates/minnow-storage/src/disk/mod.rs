use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use minnow_common::error::{DiskError, MinnowError, Result};
use serde::{Deserialize, Serialize};

pub mod local;
pub mod path;
pub mod remote;
pub mod rpc;

pub use local::LocalDisk;
pub use path::PathStyle;
pub use remote::RemoteDisk;

/// Internal volume holding temporary writes, multipart sessions and bucket
/// configuration. Never exposed as a bucket.
pub const SYS_VOLUME: &str = ".minnow.sys";
pub const TMP_DIR: &str = "tmp";
pub const MULTIPART_DIR: &str = "multipart";
pub const BUCKET_META_DIR: &str = "buckets";

pub type DiskResult<T> = std::result::Result<T, DiskError>;
pub type DiskStore = Arc<dyn StorageApi>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeInfo {
    pub name: String,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub is_dir: bool,
}

/// One disk of an erasure set: a namespace of volumes holding files.
///
/// Paths are `/`-separated and relative to the volume. Every implementation
/// reports failures as [`DiskError`] so callers can reduce errors from
/// several disks into one decision.
#[async_trait]
pub trait StorageApi: Send + Sync + std::fmt::Debug {
    fn endpoint(&self) -> &str;
    async fn is_online(&self) -> bool;

    async fn make_volume(&self, volume: &str) -> DiskResult<()>;
    async fn delete_volume(&self, volume: &str) -> DiskResult<()>;
    async fn list_volumes(&self) -> DiskResult<Vec<VolumeInfo>>;
    async fn stat_volume(&self, volume: &str) -> DiskResult<VolumeInfo>;

    async fn stat_file(&self, volume: &str, path: &str) -> DiskResult<FileStat>;
    /// Creates the file and its parents when missing. Data is synced before
    /// returning.
    async fn append_file(&self, volume: &str, path: &str, data: &[u8]) -> DiskResult<()>;
    async fn read_file(&self, volume: &str, path: &str, offset: u64, length: u64)
    -> DiskResult<Bytes>;
    async fn read_all(&self, volume: &str, path: &str) -> DiskResult<Bytes>;
    /// Replaces the file atomically.
    async fn write_all(&self, volume: &str, path: &str, data: &[u8]) -> DiskResult<()>;
    async fn rename_file(
        &self,
        src_volume: &str,
        src_path: &str,
        dst_volume: &str,
        dst_path: &str,
    ) -> DiskResult<()>;
    /// Removes a file or a whole directory tree, then prunes empty parents.
    async fn delete_file(&self, volume: &str, path: &str) -> DiskResult<()>;
    /// Immediate children; directories carry a trailing `/`.
    async fn list_dir(&self, volume: &str, path: &str) -> DiskResult<Vec<String>>;

    async fn close(&self);
}

/// Builds the disk for an endpoint: `http(s)://` endpoints are served by a
/// remote node, anything else is a local directory.
pub async fn new_disk(endpoint: &str) -> Result<DiskStore> {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        let disk = RemoteDisk::new(endpoint)?;
        return Ok(Arc::new(disk));
    }

    let disk = LocalDisk::new(endpoint).await.map_err(|source| {
        tracing::error!(endpoint, error = %source, "failed to open local disk");
        MinnowError::InvalidArgument(format!("cannot open disk {endpoint}: {source}"))
    })?;
    Ok(Arc::new(disk))
}

/// Joins `/`-separated path fragments, skipping empty ones.
pub fn path_join(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|part| part.trim_matches('/'))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_join_skips_empty_fragments() {
        assert_eq!(path_join(&["tmp", "", "abc/", "/part.1"]), "tmp/abc/part.1");
        assert_eq!(path_join(&["", ""]), "");
    }

    #[tokio::test]
    async fn endpoints_pick_disk_variant() {
        let dir = tempfile::tempdir().unwrap();
        let local = new_disk(dir.path().to_str().unwrap()).await.unwrap();
        assert!(local.is_online().await);

        let remote = new_disk("http://127.0.0.1:1/export/disk1").await.unwrap();
        assert_eq!(remote.endpoint(), "http://127.0.0.1:1/export/disk1");
    }
}
