use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use minnow_common::error::{DiskError, MinnowError, Result};
use reqwest::header::CONTENT_TYPE;
use tracing::warn;
use url::Url;

use super::rpc::{self, DiskReply, DiskRequest, RPC_CONTENT_TYPE, RPC_PREFIX};
use super::{DiskResult, FileStat, StorageApi, VolumeInfo};

const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// A disk exported by another node, reached through the storage RPC.
///
/// The endpoint is `http(s)://node:port/<path on that node>`; the path
/// selects which of the node's exported disks is addressed.
#[derive(Debug, Clone)]
pub struct RemoteDisk {
    endpoint: String,
    base: Url,
    disk_path: String,
    client: reqwest::Client,
}

impl RemoteDisk {
    pub fn new(endpoint: &str) -> Result<Self> {
        let url = Url::parse(endpoint).map_err(|err| {
            MinnowError::InvalidArgument(format!("invalid disk endpoint {endpoint}: {err}"))
        })?;
        if url.path().len() <= 1 {
            return Err(MinnowError::InvalidArgument(format!(
                "disk endpoint {endpoint} must name an exported path"
            )));
        }

        let mut base = url.clone();
        base.set_path("");
        base.set_query(None);

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_RPC_TIMEOUT)
            .build()
            .map_err(|err| MinnowError::InternalError(format!("failed to build rpc client: {err}")))?;

        Ok(Self {
            endpoint: endpoint.to_string(),
            base,
            disk_path: url.path().to_string(),
            client,
        })
    }

    pub fn disk_path(&self) -> &str {
        &self.disk_path
    }

    async fn call(&self, request: DiskRequest) -> DiskResult<DiskReply> {
        let method = request.method();
        let mut url = self.base.clone();
        url.set_path(&format!("{RPC_PREFIX}/{method}"));
        url.query_pairs_mut().append_pair("disk", &self.disk_path);

        let body = rpc::encode_request(&request)?;
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, RPC_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|err| {
                warn!(endpoint = %self.endpoint, method, error = %err, "storage rpc failed");
                DiskError::DiskUnavailable
            })?;

        if !response.status().is_success() {
            warn!(
                endpoint = %self.endpoint,
                method,
                status = %response.status(),
                "storage rpc returned an error status"
            );
            return Err(DiskError::DiskUnavailable);
        }

        let payload = response
            .bytes()
            .await
            .map_err(|_| DiskError::DiskUnavailable)?;
        rpc::decode_reply(&payload)?
    }
}

#[async_trait]
impl StorageApi for RemoteDisk {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn is_online(&self) -> bool {
        match self.call(DiskRequest::IsOnline).await {
            Ok(reply) => reply.into_online().unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn make_volume(&self, volume: &str) -> DiskResult<()> {
        self.call(DiskRequest::MakeVolume {
            volume: volume.to_string(),
        })
        .await?
        .into_unit()
    }

    async fn delete_volume(&self, volume: &str) -> DiskResult<()> {
        self.call(DiskRequest::DeleteVolume {
            volume: volume.to_string(),
        })
        .await?
        .into_unit()
    }

    async fn list_volumes(&self) -> DiskResult<Vec<VolumeInfo>> {
        self.call(DiskRequest::ListVolumes).await?.into_volumes()
    }

    async fn stat_volume(&self, volume: &str) -> DiskResult<VolumeInfo> {
        self.call(DiskRequest::StatVolume {
            volume: volume.to_string(),
        })
        .await?
        .into_volume()
    }

    async fn stat_file(&self, volume: &str, path: &str) -> DiskResult<FileStat> {
        self.call(DiskRequest::StatFile {
            volume: volume.to_string(),
            path: path.to_string(),
        })
        .await?
        .into_stat()
    }

    async fn append_file(&self, volume: &str, path: &str, data: &[u8]) -> DiskResult<()> {
        self.call(DiskRequest::AppendFile {
            volume: volume.to_string(),
            path: path.to_string(),
            data: Bytes::copy_from_slice(data),
        })
        .await?
        .into_unit()
    }

    async fn read_file(
        &self,
        volume: &str,
        path: &str,
        offset: u64,
        length: u64,
    ) -> DiskResult<Bytes> {
        self.call(DiskRequest::ReadFile {
            volume: volume.to_string(),
            path: path.to_string(),
            offset,
            length,
        })
        .await?
        .into_data()
    }

    async fn read_all(&self, volume: &str, path: &str) -> DiskResult<Bytes> {
        self.call(DiskRequest::ReadAll {
            volume: volume.to_string(),
            path: path.to_string(),
        })
        .await?
        .into_data()
    }

    async fn write_all(&self, volume: &str, path: &str, data: &[u8]) -> DiskResult<()> {
        self.call(DiskRequest::WriteAll {
            volume: volume.to_string(),
            path: path.to_string(),
            data: Bytes::copy_from_slice(data),
        })
        .await?
        .into_unit()
    }

    async fn rename_file(
        &self,
        src_volume: &str,
        src_path: &str,
        dst_volume: &str,
        dst_path: &str,
    ) -> DiskResult<()> {
        self.call(DiskRequest::RenameFile {
            src_volume: src_volume.to_string(),
            src_path: src_path.to_string(),
            dst_volume: dst_volume.to_string(),
            dst_path: dst_path.to_string(),
        })
        .await?
        .into_unit()
    }

    async fn delete_file(&self, volume: &str, path: &str) -> DiskResult<()> {
        self.call(DiskRequest::DeleteFile {
            volume: volume.to_string(),
            path: path.to_string(),
        })
        .await?
        .into_unit()
    }

    async fn list_dir(&self, volume: &str, path: &str) -> DiskResult<Vec<String>> {
        self.call(DiskRequest::ListDir {
            volume: volume.to_string(),
            path: path.to_string(),
        })
        .await?
        .into_entries()
    }

    async fn close(&self) {}
}
