use std::collections::HashMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use minnow_common::error::{DiskError, MinnowError, Result};
use minnow_common::types::{ObjectInfo, ObjectPartInfo};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::disk::path_join;
use crate::erasure::ErasureConfig;
use crate::erasure::bitrot::CHECKSUM_ALGORITHM;
use crate::erasure::storage::ErasureSet;

pub const XL_META_FILE: &str = "xl.meta";
pub const XL_META_VERSION: &str = "1.0.0";
pub const ERASURE_ALGORITHM: &str = "reedsolomon";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErasureInfo {
    pub algorithm: String,
    pub data_blocks: usize,
    pub parity_blocks: usize,
    pub block_size: usize,
    /// 1-based shard index held by the disk this copy lives on.
    pub index: usize,
    /// Shard index per disk, in disk order.
    pub distribution: Vec<usize>,
    pub checksum: String,
}

impl ErasureInfo {
    pub fn new(config: &ErasureConfig, distribution: Vec<usize>) -> Self {
        Self {
            algorithm: ERASURE_ALGORITHM.to_string(),
            data_blocks: config.data_shards,
            parity_blocks: config.parity_shards,
            block_size: config.block_size,
            index: 0,
            distribution,
            checksum: CHECKSUM_ALGORITHM.to_string(),
        }
    }

    pub fn config(&self) -> ErasureConfig {
        ErasureConfig {
            data_shards: self.data_blocks,
            parity_shards: self.parity_blocks,
            block_size: self.block_size,
        }
    }
}

/// Per-object metadata stored as `<bucket>/<key>/xl.meta` on every disk.
/// Publishing it is the commit point of a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XlMeta {
    pub version: String,
    pub data_dir: String,
    pub size: u64,
    pub mod_time: DateTime<Utc>,
    pub etag: String,
    pub content_type: String,
    pub metadata: HashMap<String, String>,
    pub parts: Vec<ObjectPartInfo>,
    pub erasure: ErasureInfo,
}

impl XlMeta {
    /// Fields every disk must agree on for copies to count as the same
    /// version. The per-disk shard index is deliberately left out.
    fn signature(&self) -> (&str, DateTime<Utc>, &str, u64) {
        (&self.data_dir, self.mod_time, &self.etag, self.size)
    }

    pub fn same_version(&self, other: &XlMeta) -> bool {
        self.signature() == other.signature()
    }

    pub fn for_disk(&self, disk_index: usize) -> XlMeta {
        let mut meta = self.clone();
        meta.erasure.index = meta
            .erasure
            .distribution
            .get(disk_index)
            .copied()
            .unwrap_or_default();
        meta
    }

    pub fn to_object_info(&self, bucket: &str, key: &str) -> ObjectInfo {
        ObjectInfo {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: self.size,
            etag: self.etag.clone(),
            content_type: self.content_type.clone(),
            last_modified: self.mod_time,
            metadata: self.metadata.clone(),
            parts: self.parts.clone(),
        }
    }

    pub fn part_path(&self, key: &str, part_number: u32) -> String {
        path_join(&[key, &self.data_dir, &format!("part.{part_number}")])
    }
}

/// Why no version of a record could be agreed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaLookupError {
    NotFound,
    NoQuorum { have: usize, need: usize },
}

impl MetaLookupError {
    pub fn into_error(self, not_found: impl FnOnce() -> MinnowError) -> MinnowError {
        match self {
            Self::NotFound => not_found(),
            Self::NoQuorum { have, need } => MinnowError::InsufficientReadQuorum { have, need },
        }
    }
}

/// Picks the record at least `quorum` disks agree on, using `same` to decide
/// agreement. Returns the record and which disks hold it.
pub fn pick_canonical<T, F>(
    results: &[std::result::Result<T, DiskError>],
    quorum: usize,
    same: F,
) -> std::result::Result<(T, Vec<bool>), MetaLookupError>
where
    T: Clone,
    F: Fn(&T, &T) -> bool,
{
    let mut best: Option<(usize, usize)> = None;
    for (index, result) in results.iter().enumerate() {
        let Ok(candidate) = result else { continue };
        let agreeing = results
            .iter()
            .filter(|other| matches!(other, Ok(other) if same(candidate, other)))
            .count();
        if best.is_none_or(|(_, count)| agreeing > count) {
            best = Some((index, agreeing));
        }
    }

    if let Some((index, count)) = best
        && count >= quorum
        && let Ok(chosen) = &results[index]
    {
        let holders = results
            .iter()
            .map(|other| matches!(other, Ok(other) if same(chosen, other)))
            .collect();
        return Ok((chosen.clone(), holders));
    }

    let not_found = results
        .iter()
        .filter(|result| matches!(result, Err(err) if err.is_not_found()))
        .count();
    if not_found > results.len().saturating_sub(quorum) {
        return Err(MetaLookupError::NotFound);
    }
    Err(MetaLookupError::NoQuorum {
        have: best.map(|(_, count)| count).unwrap_or_default(),
        need: quorum,
    })
}

/// Reads and decodes `volume/path` from every disk. Undecodable copies are
/// reported as corrupt.
pub async fn read_json_all<T>(
    set: &ErasureSet,
    volume: &str,
    path: &str,
) -> Vec<std::result::Result<T, DiskError>>
where
    T: DeserializeOwned,
{
    set.for_each_disk(|index, disk| async move {
        let data = disk.read_all(volume, path).await?;
        serde_json::from_slice(&data).map_err(|err| {
            warn!(disk = index, volume, path, error = %err, "undecodable metadata");
            DiskError::FileCorrupt
        })
    })
    .await
}

pub fn encode_json<T: Serialize>(value: &T, what: &str) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|err| MinnowError::InternalError(format!("failed to serialize {what}: {err}")))
}

/// Writes one encoded record per disk, as produced by `encode(disk_index)`.
pub async fn write_json_all<T, F>(
    set: &ErasureSet,
    volume: &str,
    path: &str,
    encode: F,
) -> Result<Vec<Option<DiskError>>>
where
    T: Serialize,
    F: Fn(usize) -> T,
{
    let mut payloads = Vec::with_capacity(set.disk_count());
    for index in 0..set.disk_count() {
        payloads.push(encode_json(&encode(index), path)?);
    }

    let results = set
        .for_each_disk(|index, disk| {
            let payload = payloads[index].clone();
            async move { disk.write_all(volume, path, &payload).await }
        })
        .await;
    Ok(results.into_iter().map(|result| result.err()).collect())
}

pub async fn read_xl_meta_all(
    set: &ErasureSet,
    bucket: &str,
    key: &str,
) -> Vec<std::result::Result<XlMeta, DiskError>> {
    let path = path_join(&[key, XL_META_FILE]);
    read_json_all(set, bucket, &path).await
}

/// Loads the version of an object a read quorum agrees on.
pub async fn read_xl_meta(
    set: &ErasureSet,
    bucket: &str,
    key: &str,
) -> std::result::Result<(XlMeta, Vec<bool>), MetaLookupError> {
    let results = read_xl_meta_all(set, bucket, key).await;
    pick_canonical(&results, set.read_quorum(), XlMeta::same_version)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(data_dir: &str) -> XlMeta {
        XlMeta {
            version: XL_META_VERSION.to_string(),
            data_dir: data_dir.to_string(),
            size: 11,
            mod_time: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            etag: "5eb63bbbe01eeed093cb22bb8f5acdc3".to_string(),
            content_type: "text/plain".to_string(),
            metadata: HashMap::new(),
            parts: vec![ObjectPartInfo {
                number: 1,
                size: 11,
                etag: "5eb63bbbe01eeed093cb22bb8f5acdc3".to_string(),
            }],
            erasure: ErasureInfo::new(&ErasureConfig::new(2, 2, 1024).unwrap(), vec![3, 4, 1, 2]),
        }
    }

    #[test]
    fn disk_copies_carry_their_shard_index() {
        let base = meta("d1");
        assert_eq!(base.for_disk(0).erasure.index, 3);
        assert_eq!(base.for_disk(3).erasure.index, 2);
        assert!(base.for_disk(0).same_version(&base.for_disk(2)));
        assert_eq!(base.part_path("a/b", 1), "a/b/d1/part.1");
    }

    #[test]
    fn canonical_needs_quorum_agreement() {
        let results = vec![
            Ok(meta("d1").for_disk(0)),
            Ok(meta("d1").for_disk(1)),
            Ok(meta("d2")),
            Err(DiskError::DiskUnavailable),
        ];
        let (chosen, holders) = pick_canonical(&results, 2, XlMeta::same_version).unwrap();
        assert_eq!(chosen.data_dir, "d1");
        assert_eq!(holders, vec![true, true, false, false]);

        assert_eq!(
            pick_canonical(&results, 3, XlMeta::same_version),
            Err(MetaLookupError::NoQuorum { have: 2, need: 3 })
        );
    }

    #[test]
    fn missing_everywhere_is_not_found() {
        let results: Vec<std::result::Result<XlMeta, DiskError>> = vec![
            Err(DiskError::FileNotFound),
            Err(DiskError::FileNotFound),
            Err(DiskError::FileNotFound),
            Err(DiskError::DiskUnavailable),
        ];
        assert_eq!(
            pick_canonical(&results, 2, XlMeta::same_version),
            Err(MetaLookupError::NotFound)
        );

        let unsure: Vec<std::result::Result<XlMeta, DiskError>> = vec![
            Err(DiskError::FileNotFound),
            Err(DiskError::DiskUnavailable),
            Err(DiskError::DiskUnavailable),
            Err(DiskError::DiskUnavailable),
        ];
        assert_eq!(
            pick_canonical(&unsure, 2, XlMeta::same_version),
            Err(MetaLookupError::NoQuorum { have: 0, need: 2 })
        );
    }
}
