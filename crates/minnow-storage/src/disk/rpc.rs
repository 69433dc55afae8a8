//! Wire format of the storage RPC used by [`RemoteDisk`](super::RemoteDisk).
//!
//! Each call is a `POST {node}/minnow/storage/v1/{method}?disk={path}` with a
//! MessagePack encoded [`DiskRequest`]; the reply body is a MessagePack
//! encoded `Result<DiskReply, DiskError>`.

use bytes::Bytes;
use minnow_common::error::DiskError;
use serde::{Deserialize, Serialize};

use super::{DiskResult, FileStat, StorageApi, VolumeInfo};

pub const RPC_PREFIX: &str = "/minnow/storage/v1";
pub const RPC_CONTENT_TYPE: &str = "application/msgpack";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum DiskRequest {
    IsOnline,
    MakeVolume {
        volume: String,
    },
    DeleteVolume {
        volume: String,
    },
    ListVolumes,
    StatVolume {
        volume: String,
    },
    StatFile {
        volume: String,
        path: String,
    },
    AppendFile {
        volume: String,
        path: String,
        data: Bytes,
    },
    ReadFile {
        volume: String,
        path: String,
        offset: u64,
        length: u64,
    },
    ReadAll {
        volume: String,
        path: String,
    },
    WriteAll {
        volume: String,
        path: String,
        data: Bytes,
    },
    RenameFile {
        src_volume: String,
        src_path: String,
        dst_volume: String,
        dst_path: String,
    },
    DeleteFile {
        volume: String,
        path: String,
    },
    ListDir {
        volume: String,
        path: String,
    },
}

impl DiskRequest {
    pub fn method(&self) -> &'static str {
        match self {
            Self::IsOnline => "is-online",
            Self::MakeVolume { .. } => "make-volume",
            Self::DeleteVolume { .. } => "delete-volume",
            Self::ListVolumes => "list-volumes",
            Self::StatVolume { .. } => "stat-volume",
            Self::StatFile { .. } => "stat-file",
            Self::AppendFile { .. } => "append-file",
            Self::ReadFile { .. } => "read-file",
            Self::ReadAll { .. } => "read-all",
            Self::WriteAll { .. } => "write-all",
            Self::RenameFile { .. } => "rename-file",
            Self::DeleteFile { .. } => "delete-file",
            Self::ListDir { .. } => "list-dir",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum DiskReply {
    Unit,
    Online(bool),
    Volumes(Vec<VolumeInfo>),
    Volume(VolumeInfo),
    Stat(FileStat),
    Data(Bytes),
    Entries(Vec<String>),
}

impl DiskReply {
    pub fn into_unit(self) -> DiskResult<()> {
        match self {
            Self::Unit => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    pub fn into_online(self) -> DiskResult<bool> {
        match self {
            Self::Online(online) => Ok(online),
            other => Err(unexpected(&other)),
        }
    }

    pub fn into_volumes(self) -> DiskResult<Vec<VolumeInfo>> {
        match self {
            Self::Volumes(volumes) => Ok(volumes),
            other => Err(unexpected(&other)),
        }
    }

    pub fn into_volume(self) -> DiskResult<VolumeInfo> {
        match self {
            Self::Volume(volume) => Ok(volume),
            other => Err(unexpected(&other)),
        }
    }

    pub fn into_stat(self) -> DiskResult<FileStat> {
        match self {
            Self::Stat(stat) => Ok(stat),
            other => Err(unexpected(&other)),
        }
    }

    pub fn into_data(self) -> DiskResult<Bytes> {
        match self {
            Self::Data(data) => Ok(data),
            other => Err(unexpected(&other)),
        }
    }

    pub fn into_entries(self) -> DiskResult<Vec<String>> {
        match self {
            Self::Entries(entries) => Ok(entries),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(reply: &DiskReply) -> DiskError {
    DiskError::Io(format!("unexpected storage rpc reply: {reply:?}"))
}

/// Runs one request against a disk exported by this node.
pub async fn dispatch(disk: &dyn StorageApi, request: DiskRequest) -> DiskResult<DiskReply> {
    let reply = match request {
        DiskRequest::IsOnline => DiskReply::Online(disk.is_online().await),
        DiskRequest::MakeVolume { volume } => {
            disk.make_volume(&volume).await?;
            DiskReply::Unit
        }
        DiskRequest::DeleteVolume { volume } => {
            disk.delete_volume(&volume).await?;
            DiskReply::Unit
        }
        DiskRequest::ListVolumes => DiskReply::Volumes(disk.list_volumes().await?),
        DiskRequest::StatVolume { volume } => DiskReply::Volume(disk.stat_volume(&volume).await?),
        DiskRequest::StatFile { volume, path } => {
            DiskReply::Stat(disk.stat_file(&volume, &path).await?)
        }
        DiskRequest::AppendFile { volume, path, data } => {
            disk.append_file(&volume, &path, &data).await?;
            DiskReply::Unit
        }
        DiskRequest::ReadFile {
            volume,
            path,
            offset,
            length,
        } => DiskReply::Data(disk.read_file(&volume, &path, offset, length).await?),
        DiskRequest::ReadAll { volume, path } => {
            DiskReply::Data(disk.read_all(&volume, &path).await?)
        }
        DiskRequest::WriteAll { volume, path, data } => {
            disk.write_all(&volume, &path, &data).await?;
            DiskReply::Unit
        }
        DiskRequest::RenameFile {
            src_volume,
            src_path,
            dst_volume,
            dst_path,
        } => {
            disk.rename_file(&src_volume, &src_path, &dst_volume, &dst_path)
                .await?;
            DiskReply::Unit
        }
        DiskRequest::DeleteFile { volume, path } => {
            disk.delete_file(&volume, &path).await?;
            DiskReply::Unit
        }
        DiskRequest::ListDir { volume, path } => {
            DiskReply::Entries(disk.list_dir(&volume, &path).await?)
        }
    };
    Ok(reply)
}

pub fn encode_request(request: &DiskRequest) -> DiskResult<Vec<u8>> {
    rmp_serde::to_vec_named(request)
        .map_err(|err| DiskError::Io(format!("failed to encode storage request: {err}")))
}

pub fn decode_request(body: &[u8]) -> DiskResult<DiskRequest> {
    rmp_serde::from_slice(body)
        .map_err(|err| DiskError::Io(format!("failed to decode storage request: {err}")))
}

pub fn encode_reply(reply: &DiskResult<DiskReply>) -> DiskResult<Vec<u8>> {
    rmp_serde::to_vec_named(reply)
        .map_err(|err| DiskError::Io(format!("failed to encode storage reply: {err}")))
}

pub fn decode_reply(body: &[u8]) -> DiskResult<DiskResult<DiskReply>> {
    rmp_serde::from_slice(body)
        .map_err(|err| DiskError::Io(format!("failed to decode storage reply: {err}")))
}
