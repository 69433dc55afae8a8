//! Object healing: rebuilds missing, corrupted or outdated shards from the
//! healthy ones and republishes the object's metadata on the repaired disks.

use minnow_common::error::{DiskError, MinnowError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::disk::{DiskStore, SYS_VOLUME, path_join};
use crate::erasure::bitrot::{self, PartLayout};
use crate::erasure::metadata::{
    MetaLookupError, XL_META_FILE, XlMeta, encode_json, pick_canonical, read_xl_meta_all,
};
use crate::erasure::objects::{ErasureObjectLayer, TmpDir, run_to_completion};
use crate::erasure::{decode_block, encode_block};
use crate::naming::validate_object_name;
use crate::nslock::object_resource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealShardState {
    Healthy,
    Missing,
    Corrupted,
    Outdated,
    Offline,
    Repaired,
    Failed,
}

impl HealShardState {
    fn needs_repair(self) -> bool {
        matches!(self, Self::Missing | Self::Corrupted | Self::Outdated)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealResultItem {
    pub disk_index: usize,
    pub endpoint: String,
    pub before: HealShardState,
    pub after: HealShardState,
    pub bytes_repaired: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealResult {
    pub bucket: String,
    pub object: String,
    pub read_quorum: usize,
    pub write_quorum: usize,
    pub bytes_done: u64,
    /// True when at least one disk was repaired.
    pub healed: bool,
    pub items: Vec<HealResultItem>,
}

/// Classifies one disk's copy of an object against the canonical version.
async fn inspect_disk(
    disk: &DiskStore,
    bucket: &str,
    key: &str,
    canonical: &XlMeta,
    copy: &std::result::Result<XlMeta, DiskError>,
) -> HealShardState {
    let meta = match copy {
        Ok(meta) => meta,
        Err(err) if err.is_disk_fault() => return HealShardState::Offline,
        Err(DiskError::FileCorrupt) => return HealShardState::Corrupted,
        Err(_) => return HealShardState::Missing,
    };
    if !meta.same_version(canonical) {
        return HealShardState::Outdated;
    }

    let config = canonical.erasure.config();
    for part in &canonical.parts {
        let path = canonical.part_path(key, part.number);
        let layout = PartLayout::new(part.size, &config);
        match disk.stat_file(bucket, &path).await {
            Ok(stat) if stat.size == layout.shard_file_size(&config) => {}
            Ok(_) => return HealShardState::Corrupted,
            Err(err) if err.is_disk_fault() => return HealShardState::Offline,
            Err(_) => return HealShardState::Missing,
        }
        for block in 0..layout.block_count() {
            let frame = disk
                .read_file(
                    bucket,
                    &path,
                    layout.frame_offset(block),
                    layout.frame_len(block, &config),
                )
                .await;
            match frame.and_then(|framed| bitrot::verify(&framed).map(|_| ())) {
                Ok(()) => {}
                Err(err) if err.is_disk_fault() => return HealShardState::Offline,
                Err(_) => return HealShardState::Corrupted,
            }
        }
    }
    HealShardState::Healthy
}

/// Shards regenerated under the staging directory, per target disk.
#[derive(Debug)]
struct Rebuilt {
    staged_dir: String,
    targets: Vec<usize>,
    failed: Vec<Option<String>>,
    written: Vec<u64>,
}

impl ErasureObjectLayer {
    pub(crate) async fn heal(&self, bucket: &str, key: &str) -> Result<HealResult> {
        validate_object_name(key)?;
        self.check_bucket(bucket).await?;
        let lock = self.locks.write(&object_resource(bucket, key)).await;

        let copies = read_xl_meta_all(&self.set, bucket, key).await;
        let canonical = match pick_canonical(&copies, self.set.read_quorum(), XlMeta::same_version) {
            Ok((meta, _)) => meta,
            Err(MetaLookupError::NotFound) => return Err(MinnowError::object_not_found(bucket, key)),
            Err(err) => return Err(err.into_error(|| MinnowError::object_not_found(bucket, key))),
        };

        let disks = self.set.disks();
        let mut items = Vec::with_capacity(disks.len());
        for (index, (disk, copy)) in disks.iter().zip(&copies).enumerate() {
            let before = inspect_disk(disk, bucket, key, &canonical, copy).await;
            debug!(bucket, key, disk = index, state = ?before, "inspected shard");
            items.push(HealResultItem {
                disk_index: index,
                endpoint: disk.endpoint().to_string(),
                before,
                after: before,
                bytes_repaired: 0,
                error: None,
            });
        }

        let mut result = HealResult {
            bucket: bucket.to_string(),
            object: key.to_string(),
            read_quorum: self.set.read_quorum(),
            write_quorum: self.set.write_quorum(),
            bytes_done: 0,
            healed: false,
            items,
        };
        let targets = result
            .items
            .iter()
            .filter(|item| item.before.needs_repair())
            .map(|item| item.disk_index)
            .collect::<Vec<_>>();
        if targets.is_empty() {
            return Ok(result);
        }

        let healthy = result
            .items
            .iter()
            .filter(|item| item.before == HealShardState::Healthy)
            .count();
        if healthy < canonical.erasure.data_blocks {
            return Err(MinnowError::InsufficientReadQuorum {
                have: healthy,
                need: canonical.erasure.data_blocks,
            });
        }

        let tmp = TmpDir::new(&self.set);
        let rebuilt = match self
            .rebuild(bucket, key, &canonical, &targets, &tmp, &result)
            .await
        {
            Ok(rebuilt) => rebuilt,
            Err(err) => {
                tmp.cleanup().await;
                return Err(err);
            }
        };

        let layer = self.clone();
        let (bucket, key) = (bucket.to_string(), key.to_string());
        let tmp_path = tmp.release();
        run_to_completion(async move {
            let _lock = lock;
            layer
                .publish_healed(&bucket, &key, &canonical, &copies, rebuilt, &mut result)
                .await;
            layer.set.delete_all(SYS_VOLUME, &tmp_path).await;

            result.healed = result
                .items
                .iter()
                .any(|item| item.after == HealShardState::Repaired);
            result.bytes_done = result.items.iter().map(|item| item.bytes_repaired).sum();
            info!(
                bucket = %bucket,
                key = %key,
                repaired = targets.len(),
                bytes = result.bytes_done,
                "object healed"
            );
            Ok::<_, MinnowError>(result)
        })
        .await
    }

    /// Regenerates the shard files of `targets` under `tmp`.
    async fn rebuild(
        &self,
        bucket: &str,
        key: &str,
        canonical: &XlMeta,
        targets: &[usize],
        tmp: &TmpDir,
        result: &HealResult,
    ) -> Result<Rebuilt> {
        let config = canonical.erasure.config();
        let distribution = &canonical.erasure.distribution;
        let shard_disks = self.set.shard_disks(distribution);
        let staged_dir = path_join(&[tmp.path(), &canonical.data_dir]);
        let mut failed: Vec<Option<String>> = vec![None; self.set.disk_count()];
        let mut written = vec![0_u64; self.set.disk_count()];

        for part in &canonical.parts {
            let part_path = canonical.part_path(key, part.number);
            let staged_part = path_join(&[&staged_dir, &format!("part.{}", part.number)]);
            let layout = PartLayout::new(part.size, &config);
            let mut dead = shard_disks
                .iter()
                .map(|(disk_index, _)| result.items[*disk_index].before != HealShardState::Healthy)
                .collect::<Vec<_>>();

            let blocks = layout.block_count();
            if blocks == 0 {
                self.append_to_targets(targets, &staged_part, |_| Vec::new(), &mut failed, &mut written)
                    .await;
                continue;
            }
            for block in 0..blocks {
                let shards = self
                    .set
                    .read_block(bucket, &part_path, &config, &layout, &shard_disks, block, &mut dead)
                    .await?;
                let block_len = usize::try_from(layout.block_len(block)).unwrap_or(usize::MAX);
                let decoded = decode_block(&shards, &config)?;
                let data = decoded.get(..block_len).ok_or_else(|| {
                    MinnowError::InternalError(format!("{bucket}/{key}: short block {block}"))
                })?;
                let encoded = encode_block(data, &config)?;
                self.append_to_targets(
                    targets,
                    &staged_part,
                    |disk_index| {
                        distribution
                            .get(disk_index)
                            .and_then(|shard| encoded.get(shard.wrapping_sub(1)))
                            .map(|shard| bitrot::frame(shard))
                            .unwrap_or_default()
                    },
                    &mut failed,
                    &mut written,
                )
                .await;
            }
        }

        Ok(Rebuilt {
            staged_dir,
            targets: targets.to_vec(),
            failed,
            written,
        })
    }

    /// Moves the rebuilt shards into the object and writes each target's
    /// metadata.
    async fn publish_healed(
        &self,
        bucket: &str,
        key: &str,
        canonical: &XlMeta,
        copies: &[std::result::Result<XlMeta, DiskError>],
        mut rebuilt: Rebuilt,
        result: &mut HealResult,
    ) {
        let meta_path = path_join(&[key, XL_META_FILE]);
        let object_dir = path_join(&[key, &canonical.data_dir]);
        let staged_dir = rebuilt.staged_dir.as_str();
        for &index in &rebuilt.targets {
            let disk = &self.set.disks()[index];
            let item = &mut result.items[index];
            if let Some(err) = rebuilt.failed[index].take() {
                item.after = HealShardState::Failed;
                item.error = Some(err);
                continue;
            }
            let published = async {
                let payload = encode_json(&canonical.for_disk(index), XL_META_FILE)
                    .map_err(|err| DiskError::Io(err.to_string()))?;
                match disk.make_volume(bucket).await {
                    Ok(()) | Err(DiskError::VolumeExists) => {}
                    Err(err) => return Err(err),
                }
                disk.rename_file(SYS_VOLUME, staged_dir, bucket, &object_dir)
                    .await?;
                disk.write_all(bucket, &meta_path, &payload).await
            }
            .await;
            match published {
                Ok(()) => {
                    item.after = HealShardState::Repaired;
                    item.bytes_repaired = rebuilt.written[index];
                    if let Ok(stale) = &copies[index]
                        && stale.data_dir != canonical.data_dir
                        && let Err(err) = disk
                            .delete_file(bucket, &path_join(&[key, &stale.data_dir]))
                            .await
                    {
                        debug!(bucket, key, disk = index, error = %err, "stale data directory left behind");
                    }
                }
                Err(err) => {
                    warn!(bucket, key, disk = index, error = %err, "failed to publish healed shards");
                    item.after = HealShardState::Failed;
                    item.error = Some(err.to_string());
                }
            }
        }
    }

    /// Appends one frame per target disk, as produced by `frame_for`.
    /// Targets that already failed are skipped.
    async fn append_to_targets<F>(
        &self,
        targets: &[usize],
        path: &str,
        frame_for: F,
        failed: &mut [Option<String>],
        written: &mut [u64],
    ) where
        F: Fn(usize) -> Vec<u8>,
    {
        let appends = targets
            .iter()
            .copied()
            .filter(|index| failed[*index].is_none())
            .map(|index| {
                let frame = frame_for(index);
                let disk = &self.set.disks()[index];
                async move {
                    let result = disk.append_file(SYS_VOLUME, path, &frame).await;
                    (index, frame.len() as u64, result)
                }
            })
            .collect::<Vec<_>>();
        for (index, len, result) in futures::future::join_all(appends).await {
            match result {
                Ok(()) => written[index] += len,
                Err(err) => {
                    warn!(disk = index, path, error = %err, "dropping disk from heal");
                    failed[index] = Some(err.to_string());
                }
            }
        }
    }
}
