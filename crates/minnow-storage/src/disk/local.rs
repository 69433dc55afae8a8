use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use minnow_common::error::DiskError;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;
use uuid::Uuid;

use super::{DiskResult, FileStat, PathStyle, SYS_VOLUME, StorageApi, VolumeInfo};

/// A directory on the local filesystem acting as one disk.
#[derive(Debug, Clone)]
pub struct LocalDisk {
    root: PathBuf,
    endpoint: String,
    style: PathStyle,
}

impl LocalDisk {
    pub async fn new(root: impl Into<PathBuf>) -> DiskResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(map_io_error)?;
        fs::create_dir_all(root.join(SYS_VOLUME))
            .await
            .map_err(map_io_error)?;

        Ok(Self {
            endpoint: root.to_string_lossy().to_string(),
            root,
            style: PathStyle::native(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_path(&self, volume: &str, path: &str) -> DiskResult<PathBuf> {
        self.style.resolve(&self.root, volume, path)
    }

    /// Resolves the volume directory, telling a missing volume apart from a
    /// disk whose root has gone away.
    async fn volume_dir(&self, volume: &str) -> DiskResult<PathBuf> {
        let dir = self.file_path(volume, "")?;
        match fs::metadata(&dir).await {
            Ok(metadata) if metadata.is_dir() => Ok(dir),
            Ok(_) => Err(DiskError::VolumeNotFound),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(self.missing_volume().await),
            Err(err) => Err(map_io_error(err)),
        }
    }

    async fn missing_volume(&self) -> DiskError {
        if self.root_exists().await {
            DiskError::VolumeNotFound
        } else {
            DiskError::DiskUnavailable
        }
    }

    async fn root_exists(&self) -> bool {
        fs::metadata(&self.root)
            .await
            .map(|metadata| metadata.is_dir())
            .unwrap_or(false)
    }

    /// Removes empty directories from `path`'s parent up to the volume root.
    async fn prune_parents(&self, volume_dir: &Path, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == volume_dir || !dir.starts_with(volume_dir) {
                break;
            }
            if fs::remove_dir(dir).await.is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

#[async_trait]
impl StorageApi for LocalDisk {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn is_online(&self) -> bool {
        self.root_exists().await
    }

    async fn make_volume(&self, volume: &str) -> DiskResult<()> {
        let dir = self.file_path(volume, "")?;
        if !self.root_exists().await {
            return Err(DiskError::DiskUnavailable);
        }
        match fs::create_dir(&dir).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Err(DiskError::VolumeExists),
            Err(err) => Err(map_io_error(err)),
        }
    }

    async fn delete_volume(&self, volume: &str) -> DiskResult<()> {
        let dir = self.volume_dir(volume).await?;
        match fs::remove_dir(&dir).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => {
                Err(DiskError::VolumeNotEmpty)
            }
            Err(err) => Err(map_io_error(err)),
        }
    }

    async fn list_volumes(&self) -> DiskResult<Vec<VolumeInfo>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(DiskError::DiskUnavailable);
            }
            Err(err) => return Err(map_io_error(err)),
        };

        let mut volumes = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(map_io_error)? {
            let metadata = entry.metadata().await.map_err(map_io_error)?;
            if !metadata.is_dir() {
                continue;
            }
            volumes.push(VolumeInfo {
                name: entry.file_name().to_string_lossy().to_string(),
                created: created_time(&metadata),
            });
        }

        volumes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(volumes)
    }

    async fn stat_volume(&self, volume: &str) -> DiskResult<VolumeInfo> {
        let dir = self.volume_dir(volume).await?;
        let metadata = fs::metadata(&dir).await.map_err(map_io_error)?;
        Ok(VolumeInfo {
            name: volume.to_string(),
            created: created_time(&metadata),
        })
    }

    async fn stat_file(&self, volume: &str, path: &str) -> DiskResult<FileStat> {
        self.volume_dir(volume).await?;
        let full = self.file_path(volume, path)?;
        let metadata = fs::metadata(&full).await.map_err(map_io_error)?;
        Ok(FileStat {
            size: metadata.len(),
            modified: metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now()),
            is_dir: metadata.is_dir(),
        })
    }

    async fn append_file(&self, volume: &str, path: &str, data: &[u8]) -> DiskResult<()> {
        self.volume_dir(volume).await?;
        let full = self.file_path(volume, path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await.map_err(map_parent_error)?;
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&full)
            .await
            .map_err(map_io_error)?;
        file.write_all(data).await.map_err(map_io_error)?;
        file.sync_data().await.map_err(map_io_error)?;
        Ok(())
    }

    async fn read_file(
        &self,
        volume: &str,
        path: &str,
        offset: u64,
        length: u64,
    ) -> DiskResult<Bytes> {
        self.volume_dir(volume).await?;
        let full = self.file_path(volume, path)?;
        let mut file = fs::File::open(&full).await.map_err(map_io_error)?;
        let metadata = file.metadata().await.map_err(map_io_error)?;
        if !metadata.is_file() {
            return Err(DiskError::IsNotRegular);
        }
        if offset.saturating_add(length) > metadata.len() {
            debug!(
                path = %full.display(),
                offset,
                length,
                size = metadata.len(),
                "read past end of shard file"
            );
            return Err(DiskError::FileCorrupt);
        }

        let length = usize::try_from(length).map_err(|_| DiskError::FileCorrupt)?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(map_io_error)?;
        let mut buf = vec![0_u8; length];
        file.read_exact(&mut buf).await.map_err(map_io_error)?;
        Ok(Bytes::from(buf))
    }

    async fn read_all(&self, volume: &str, path: &str) -> DiskResult<Bytes> {
        self.volume_dir(volume).await?;
        let full = self.file_path(volume, path)?;
        let data = fs::read(&full).await.map_err(map_io_error)?;
        Ok(Bytes::from(data))
    }

    async fn write_all(&self, volume: &str, path: &str, data: &[u8]) -> DiskResult<()> {
        self.volume_dir(volume).await?;
        let full = self.file_path(volume, path)?;
        let parent = full.parent().ok_or(DiskError::AccessDenied)?;
        fs::create_dir_all(parent).await.map_err(map_parent_error)?;

        let tmp = parent.join(format!(".{}.tmp", Uuid::new_v4()));
        let result = async {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(data).await?;
            file.sync_data().await?;
            fs::rename(&tmp, &full).await
        }
        .await;

        if let Err(err) = result {
            let _ = fs::remove_file(&tmp).await;
            return Err(map_io_error(err));
        }
        Ok(())
    }

    async fn rename_file(
        &self,
        src_volume: &str,
        src_path: &str,
        dst_volume: &str,
        dst_path: &str,
    ) -> DiskResult<()> {
        let src_volume_dir = self.volume_dir(src_volume).await?;
        self.volume_dir(dst_volume).await?;
        let src = self.file_path(src_volume, src_path)?;
        let dst = self.file_path(dst_volume, dst_path)?;

        let src_meta = fs::metadata(&src).await.map_err(map_io_error)?;
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).await.map_err(map_parent_error)?;
        }
        if src_meta.is_dir() {
            match fs::metadata(&dst).await {
                Ok(dst_meta) if dst_meta.is_dir() => {
                    fs::remove_dir_all(&dst).await.map_err(map_io_error)?;
                }
                Ok(_) => return Err(DiskError::IsNotRegular),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(map_io_error(err)),
            }
        }

        fs::rename(&src, &dst).await.map_err(map_io_error)?;
        self.prune_parents(&src_volume_dir, &src).await;
        Ok(())
    }

    async fn delete_file(&self, volume: &str, path: &str) -> DiskResult<()> {
        let volume_dir = self.volume_dir(volume).await?;
        let full = self.file_path(volume, path)?;
        if full == volume_dir {
            return Err(DiskError::AccessDenied);
        }

        let metadata = fs::symlink_metadata(&full).await.map_err(map_io_error)?;
        if metadata.is_dir() {
            fs::remove_dir_all(&full).await.map_err(map_io_error)?;
        } else {
            fs::remove_file(&full).await.map_err(map_io_error)?;
        }
        self.prune_parents(&volume_dir, &full).await;
        Ok(())
    }

    async fn list_dir(&self, volume: &str, path: &str) -> DiskResult<Vec<String>> {
        self.volume_dir(volume).await?;
        let full = self.file_path(volume, path)?;
        let mut entries = fs::read_dir(&full).await.map_err(map_io_error)?;

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(map_io_error)? {
            let mut name = entry.file_name().to_string_lossy().to_string();
            let file_type = entry.file_type().await.map_err(map_io_error)?;
            if file_type.is_dir() {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    async fn close(&self) {}
}

fn map_io_error(err: std::io::Error) -> DiskError {
    match err.kind() {
        ErrorKind::NotFound => DiskError::FileNotFound,
        ErrorKind::NotADirectory => DiskError::PathIsNotDirectory,
        ErrorKind::IsADirectory => DiskError::IsNotRegular,
        ErrorKind::PermissionDenied => DiskError::AccessDenied,
        ErrorKind::StorageFull => DiskError::DiskFull,
        ErrorKind::UnexpectedEof => DiskError::FileCorrupt,
        _ => DiskError::Io(err.to_string()),
    }
}

/// `create_dir_all` reports a plain file in the way as `AlreadyExists`.
fn map_parent_error(err: std::io::Error) -> DiskError {
    match err.kind() {
        ErrorKind::AlreadyExists | ErrorKind::NotADirectory => DiskError::PathIsNotDirectory,
        _ => map_io_error(err),
    }
}

fn created_time(metadata: &std::fs::Metadata) -> DateTime<Utc> {
    metadata
        .created()
        .or_else(|_| metadata.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}
