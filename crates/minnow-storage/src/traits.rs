use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use minnow_common::error::Result;
use minnow_common::types::{BucketInfo, ObjectInfo};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::conditional::Conditions;
use crate::erasure::heal::HealResult;
use crate::range::{ByteRange, HttpRange};

/// Request body handed to the object layer together with its declared length.
pub struct PutObjReader {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub size: u64,
    /// Hex encoded MD5 the client sent in `Content-MD5`.
    pub content_md5: Option<String>,
}

impl PutObjReader {
    pub fn new(reader: Box<dyn AsyncRead + Send + Unpin>, size: u64) -> Self {
        Self {
            reader,
            size,
            content_md5: None,
        }
    }

    pub fn from_bytes(data: Bytes) -> Self {
        let size = data.len() as u64;
        Self::new(Box::new(std::io::Cursor::new(data)), size)
    }

    pub fn with_content_md5(mut self, md5_hex: impl Into<String>) -> Self {
        self.content_md5 = Some(md5_hex.into());
        self
    }
}

impl fmt::Debug for PutObjReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PutObjReader")
            .field("size", &self.size)
            .field("content_md5", &self.content_md5)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PutObjectOptions {
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
    pub conditions: Conditions,
}

#[derive(Debug, Clone, Default)]
pub struct GetObjectOptions {
    pub range: Option<HttpRange>,
    pub conditions: Conditions,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MetadataDirective {
    #[default]
    Copy,
    Replace,
}

#[derive(Debug, Clone, Default)]
pub struct CopyObjectOptions {
    pub directive: MetadataDirective,
    /// Used with [`MetadataDirective::Replace`].
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
    /// Evaluated against the source object.
    pub source_conditions: Conditions,
}

#[derive(Debug, Clone)]
pub struct GetObjectReply {
    pub info: ObjectInfo,
    pub data: Bytes,
    /// Set when only part of the object was read.
    pub range: Option<ByteRange>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListObjectsResult {
    pub objects: Vec<ObjectInfo>,
    pub prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_marker: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletePart {
    pub part_number: u32,
    pub etag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartInfo {
    pub part_number: u32,
    pub size: u64,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListPartsResult {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub part_number_marker: u32,
    pub next_part_number_marker: u32,
    pub max_parts: usize,
    pub is_truncated: bool,
    pub parts: Vec<PartInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultipartUploadInfo {
    pub key: String,
    pub upload_id: String,
    pub initiated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListMultipartsResult {
    pub key_marker: String,
    pub upload_id_marker: String,
    pub next_key_marker: String,
    pub next_upload_id_marker: String,
    pub max_uploads: usize,
    pub is_truncated: bool,
    pub uploads: Vec<MultipartUploadInfo>,
    pub prefix: String,
    pub delimiter: String,
    pub common_prefixes: Vec<String>,
}

#[async_trait]
pub trait ObjectLayer: Send + Sync {
    async fn make_bucket(&self, bucket: &str) -> Result<()>;
    async fn get_bucket_info(&self, bucket: &str) -> Result<BucketInfo>;
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>>;
    async fn delete_bucket(&self, bucket: &str) -> Result<()>;

    async fn get_bucket_policy(&self, bucket: &str) -> Result<Bytes>;
    async fn put_bucket_policy(&self, bucket: &str, policy: Bytes) -> Result<()>;
    async fn delete_bucket_policy(&self, bucket: &str) -> Result<()>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: PutObjReader,
        opts: PutObjectOptions,
    ) -> Result<ObjectInfo>;
    async fn get_object(&self, bucket: &str, key: &str, opts: GetObjectOptions)
    -> Result<GetObjectReply>;
    async fn get_object_info(
        &self,
        bucket: &str,
        key: &str,
        conditions: &Conditions,
    ) -> Result<ObjectInfo>;
    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        opts: CopyObjectOptions,
    ) -> Result<ObjectInfo>;
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        marker: &str,
        delimiter: &str,
        max_keys: i64,
    ) -> Result<ListObjectsResult>;

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        opts: PutObjectOptions,
    ) -> Result<String>;
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: PutObjReader,
    ) -> Result<PartInfo>;
    async fn list_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number_marker: u32,
        max_parts: i64,
    ) -> Result<ListPartsResult>;
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletePart>,
    ) -> Result<ObjectInfo>;
    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()>;
    #[allow(clippy::too_many_arguments)]
    async fn list_multipart_uploads(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        key_marker: &str,
        upload_id_marker: &str,
        max_uploads: i64,
    ) -> Result<ListMultipartsResult>;

    async fn heal_object(&self, bucket: &str, key: &str) -> Result<HealResult>;
}
