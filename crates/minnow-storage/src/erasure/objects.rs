use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use minnow_common::error::{DiskError, MinnowError, Result};
use minnow_common::hash::canonical_etag;
use minnow_common::time;
use minnow_common::types::{BucketInfo, DEFAULT_CONTENT_TYPE, ObjectInfo, ObjectPartInfo};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::conditional::{self, Conditions, Method};
use crate::config::{MAX_LIST_KEYS, ObjectLayerConfig};
use crate::disk::{
    BUCKET_META_DIR, DiskResult, DiskStore, MULTIPART_DIR, SYS_VOLUME, TMP_DIR, path_join,
};
use crate::erasure::heal::HealResult;
use crate::erasure::metadata::{
    ErasureInfo, MetaLookupError, XL_META_FILE, XL_META_VERSION, XlMeta, encode_json,
    pick_canonical, read_xl_meta_all,
};
use crate::erasure::storage::{ErasureSet, hash_order};
use crate::erasure::{reduce_read_errors, reduce_write_errors};
use crate::naming::{validate_bucket_name, validate_object_name};
use crate::nslock::{NsLockMap, object_resource};
use crate::traits::{
    CompletePart, CopyObjectOptions, GetObjectOptions, GetObjectReply, ListMultipartsResult,
    ListObjectsResult, ListPartsResult, MetadataDirective, ObjectLayer, PartInfo, PutObjReader,
    PutObjectOptions,
};

const POLICY_FILE: &str = "policy.json";
const MAX_KEYS_LIMIT: i64 = 2_147_483_647;

/// Object layer over a single erasure set.
#[derive(Debug, Clone)]
pub struct ErasureObjectLayer {
    pub(crate) set: ErasureSet,
    pub(crate) locks: NsLockMap,
    bucket_lock: Arc<RwLock<()>>,
    pub(crate) config: ObjectLayerConfig,
}

/// Object version currently published, as seen right before a commit.
#[derive(Debug, Default)]
pub(crate) struct Published {
    pub(crate) meta: Option<XlMeta>,
    /// Data directories referenced by any disk's metadata.
    pub(crate) data_dirs: HashSet<String>,
}

#[derive(Debug)]
enum ListEntry {
    Object(ObjectInfo),
    Prefix(String),
}

impl ListEntry {
    fn marker(&self) -> &str {
        match self {
            Self::Object(obj) => &obj.key,
            Self::Prefix(prefix) => prefix,
        }
    }
}

/// Staging area under `.minnow.sys/tmp`. Removed from every disk by
/// [`TmpDir::cleanup`], or in the background if the owning operation is
/// dropped first.
pub(crate) struct TmpDir {
    set: ErasureSet,
    path: String,
    cleaned: bool,
}

impl TmpDir {
    pub(crate) fn new(set: &ErasureSet) -> Self {
        Self {
            set: set.clone(),
            path: path_join(&[TMP_DIR, &Uuid::new_v4().to_string()]),
            cleaned: false,
        }
    }

    pub(crate) fn path(&self) -> &str {
        &self.path
    }

    pub(crate) async fn cleanup(mut self) {
        self.set.delete_all(SYS_VOLUME, &self.path).await;
        self.cleaned = true;
    }

    /// Hands removal of the directory over to the caller.
    pub(crate) fn release(mut self) -> String {
        self.cleaned = true;
        std::mem::take(&mut self.path)
    }
}

/// Staged data of a PUT, ready for [`ErasureObjectLayer::commit_object`].
#[derive(Debug)]
struct StagedObject {
    meta: XlMeta,
    moves: Vec<(String, String)>,
    staged: Vec<bool>,
}

/// Runs a commit on its own task. Once data starts moving into the bucket
/// the commit must either publish or roll back; a caller that is dropped or
/// times out only stops waiting for it.
pub(crate) async fn run_to_completion<T, F>(commit: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(commit)
        .await
        .map_err(|err| MinnowError::InternalError(format!("commit task failed: {err}")))?
}

impl Drop for TmpDir {
    fn drop(&mut self) {
        if self.cleaned {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(path = %self.path, "no runtime to remove abandoned staging directory");
            return;
        };
        let set = self.set.clone();
        let path = std::mem::take(&mut self.path);
        debug!(path = %path, "removing abandoned staging directory");
        runtime.spawn(async move {
            set.delete_all(SYS_VOLUME, &path).await;
        });
    }
}

pub(crate) fn object_error(index: usize, err: DiskError, bucket: &str, key: &str) -> MinnowError {
    match err {
        DiskError::VolumeNotFound => MinnowError::BucketNotFound(bucket.to_string()),
        DiskError::FileNotFound => MinnowError::object_not_found(bucket, key),
        DiskError::FileNameTooLong => MinnowError::ObjectNameTooLong(key.to_string()),
        DiskError::PathIsNotDirectory | DiskError::IsNotRegular => {
            MinnowError::InvalidObjectName(key.to_string())
        }
        DiskError::FileCorrupt => MinnowError::FileCorrupt(format!("{bucket}/{key}")),
        source => MinnowError::Disk { index, source },
    }
}

fn bucket_error(index: usize, err: DiskError, bucket: &str) -> MinnowError {
    match err {
        DiskError::VolumeNotFound | DiskError::FileNotFound => {
            MinnowError::BucketNotFound(bucket.to_string())
        }
        DiskError::VolumeExists => MinnowError::BucketAlreadyExists(bucket.to_string()),
        DiskError::VolumeNotEmpty => MinnowError::BucketNotEmpty(bucket.to_string()),
        source => MinnowError::Disk { index, source },
    }
}

fn errors_of<T>(results: &[DiskResult<T>]) -> Vec<Option<DiskError>> {
    results
        .iter()
        .map(|result| result.as_ref().err().cloned())
        .collect()
}

impl ErasureObjectLayer {
    pub fn new(set: ErasureSet, mut config: ObjectLayerConfig) -> Self {
        config.erasure = set.config().clone();
        Self {
            set,
            locks: NsLockMap::new(),
            bucket_lock: Arc::new(RwLock::new(())),
            config,
        }
    }

    pub async fn from_endpoints(endpoints: &[String], config: ObjectLayerConfig) -> Result<Self> {
        let set = ErasureSet::from_endpoints(endpoints, config.erasure.clone()).await?;
        info!(
            disks = set.disk_count(),
            data_shards = set.config().data_shards,
            parity_shards = set.config().parity_shards,
            "erasure set ready"
        );
        Ok(Self::new(set, config))
    }

    pub fn set(&self) -> &ErasureSet {
        &self.set
    }

    pub async fn close(&self) {
        self.set.close().await;
    }

    /// Runs `operation` under the configured per-operation timeout.
    async fn bounded<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let Some(limit) = self.config.operation_timeout() else {
            return fut.await;
        };
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, timeout_ms = limit.as_millis() as u64, "operation timed out");
                Err(MinnowError::OperationTimedOut(operation.to_string()))
            }
        }
    }

    async fn stat_bucket(&self, bucket: &str) -> Result<BucketInfo> {
        let results = self
            .set
            .for_each_disk(|_, disk| async move { disk.stat_volume(bucket).await })
            .await;
        reduce_read_errors(&errors_of(&results), &[], self.set.read_quorum(), |index, err| {
            bucket_error(index, err, bucket)
        })?;
        let created = results
            .iter()
            .filter_map(|result| result.as_ref().ok())
            .map(|volume| volume.created)
            .min()
            .unwrap_or_else(time::now);
        Ok(BucketInfo {
            name: bucket.to_string(),
            created,
        })
    }

    /// Fails with `BucketNotFound` unless a read quorum of disks hold the
    /// bucket.
    pub(crate) async fn check_bucket(&self, bucket: &str) -> Result<()> {
        validate_bucket_name(bucket)?;
        let _guard = self.bucket_lock.read().await;
        self.stat_bucket(bucket).await.map(|_| ())
    }

    /// Current version of an object for a commit: the canonical metadata if
    /// one exists, plus every data directory any disk still refers to.
    pub(crate) async fn published(&self, bucket: &str, key: &str, strict: bool) -> Result<Published> {
        let results = read_xl_meta_all(&self.set, bucket, key).await;
        let data_dirs = results
            .iter()
            .filter_map(|result| result.as_ref().ok())
            .map(|meta| meta.data_dir.clone())
            .collect();
        let meta = match pick_canonical(&results, self.set.read_quorum(), XlMeta::same_version) {
            Ok((meta, _)) => Some(meta),
            Err(MetaLookupError::NotFound) => None,
            Err(err) if strict => {
                return Err(err.into_error(|| MinnowError::object_not_found(bucket, key)));
            }
            Err(_) => None,
        };
        Ok(Published { meta, data_dirs })
    }

    /// Publishes `meta` as the new version of `bucket/key`.
    ///
    /// On every disk marked in `staged`, the staged files are renamed from
    /// the system volume into the object (`moves` holds pairs of source path
    /// in the system volume and destination path in the bucket), then
    /// `xl.meta` is written. Without write quorum the disks that took the
    /// new version are rolled back to `previous`.
    pub(crate) async fn commit_object(
        &self,
        bucket: &str,
        key: &str,
        meta: &XlMeta,
        published: &Published,
        moves: &[(String, String)],
        staged: &[bool],
    ) -> Result<()> {
        let meta_path = path_join(&[key, XL_META_FILE]);
        let mut payloads = Vec::with_capacity(self.set.disk_count());
        for index in 0..self.set.disk_count() {
            payloads.push(encode_json(&meta.for_disk(index), XL_META_FILE)?);
        }

        let results = self
            .set
            .for_each_disk(|index, disk| {
                let payload = payloads[index].clone();
                let meta_path = meta_path.as_str();
                let staged = staged.get(index).copied().unwrap_or(false);
                async move {
                    if !staged {
                        return Err(DiskError::DiskUnavailable);
                    }
                    for (src, dst) in moves {
                        disk.rename_file(SYS_VOLUME, src, bucket, dst).await?;
                    }
                    disk.write_all(bucket, meta_path, &payload).await
                }
            })
            .await;
        let errs = errors_of(&results);
        for (index, err) in errs.iter().enumerate() {
            if let Some(err) = err
                && staged.get(index).copied().unwrap_or(false)
            {
                warn!(disk = index, bucket, key, error = %err, "commit failed on disk");
            }
        }

        let outcome = reduce_write_errors(&errs, &[], self.set.write_quorum(), |index, err| {
            object_error(index, err, bucket, key)
        });
        if outcome.is_err() {
            self.rollback(bucket, key, meta, published.meta.as_ref(), moves, &errs)
                .await;
        }
        outcome
    }

    async fn rollback(
        &self,
        bucket: &str,
        key: &str,
        meta: &XlMeta,
        previous: Option<&XlMeta>,
        moves: &[(String, String)],
        errs: &[Option<DiskError>],
    ) {
        let meta_path = path_join(&[key, XL_META_FILE]);
        let new_dir = path_join(&[key, &meta.data_dir]);
        let restore = previous
            .map(|previous| {
                (0..self.set.disk_count())
                    .map(|index| encode_json(&previous.for_disk(index), XL_META_FILE).ok())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        self.set
            .for_each_disk(|index, disk| {
                let committed = errs.get(index).is_some_and(Option::is_none);
                let restore = restore.get(index).cloned().flatten();
                let meta_path = meta_path.as_str();
                let new_dir = new_dir.as_str();
                async move {
                    for (src, dst) in moves {
                        if let Err(err) = disk.rename_file(bucket, dst, SYS_VOLUME, src).await
                            && err != DiskError::FileNotFound
                        {
                            warn!(disk = index, bucket, path = %dst, error = %err, "rollback could not restore staged data");
                        }
                    }
                    if committed {
                        let restored = match restore {
                            Some(previous) => disk.write_all(bucket, meta_path, &previous).await,
                            None => disk.delete_file(bucket, meta_path).await,
                        };
                        if let Err(err) = restored {
                            warn!(disk = index, bucket, key, error = %err, "rollback could not restore metadata");
                        }
                    }
                    if let Err(err) = disk.delete_file(bucket, new_dir).await
                        && err != DiskError::FileNotFound
                    {
                        warn!(disk = index, bucket, path = %new_dir, error = %err, "rollback could not remove data directory");
                    }
                    Ok::<(), DiskError>(())
                }
            })
            .await;
        warn!(bucket, key, data_dir = %meta.data_dir, "rolled back partial commit");
    }

    /// Removes data directories the new version no longer references.
    pub(crate) async fn remove_stale_data(
        &self,
        bucket: &str,
        key: &str,
        published: &Published,
        current: &str,
    ) {
        for data_dir in published.data_dirs.iter().filter(|dir| *dir != current) {
            self.set
                .delete_all(bucket, &path_join(&[key, data_dir]))
                .await;
        }
    }

    pub(crate) fn new_meta(
        &self,
        key: &str,
        data_dir: String,
        etag: String,
        content_type: Option<String>,
        metadata: HashMap<String, String>,
        parts: Vec<ObjectPartInfo>,
    ) -> XlMeta {
        let config = self.set.config();
        XlMeta {
            version: XL_META_VERSION.to_string(),
            data_dir,
            size: parts.iter().map(|part| part.size).sum(),
            mod_time: time::now(),
            etag,
            content_type: content_type
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            metadata,
            parts,
            erasure: ErasureInfo::new(config, hash_order(key, config.total_shards())),
        }
    }

    async fn make_bucket_inner(&self, bucket: &str) -> Result<()> {
        validate_bucket_name(bucket)?;
        let _guard = self.bucket_lock.write().await;

        let results = self
            .set
            .for_each_disk(|_, disk| async move { disk.make_volume(bucket).await })
            .await;
        let errs = errors_of(&results);
        let outcome = reduce_write_errors(&errs, &[], self.set.write_quorum(), |index, err| {
            bucket_error(index, err, bucket)
        });

        if let Err(MinnowError::InsufficientWriteQuorum { .. }) = &outcome {
            warn!(bucket, "bucket create without write quorum, undoing");
            self.set
                .for_each_disk(|index, disk| {
                    let created = errs.get(index).is_some_and(Option::is_none);
                    async move {
                        if created {
                            disk.delete_volume(bucket).await
                        } else {
                            Ok(())
                        }
                    }
                })
                .await;
        } else if outcome.is_ok() {
            info!(bucket, "bucket created");
        }
        outcome
    }

    async fn list_buckets_inner(&self) -> Result<Vec<BucketInfo>> {
        let _guard = self.bucket_lock.read().await;
        let results = self
            .set
            .for_each_disk(|_, disk| async move { disk.list_volumes().await })
            .await;
        reduce_read_errors(&errors_of(&results), &[], self.set.read_quorum(), |index, source| {
            MinnowError::Disk { index, source }
        })?;

        let mut seen: BTreeMap<String, (usize, chrono::DateTime<chrono::Utc>)> = BTreeMap::new();
        for volume in results.into_iter().flatten().flatten() {
            if volume.name.starts_with(".minnow") {
                continue;
            }
            let entry = seen.entry(volume.name).or_insert((0, volume.created));
            entry.0 += 1;
            entry.1 = entry.1.min(volume.created);
        }
        Ok(seen
            .into_iter()
            .filter(|(_, (count, _))| *count >= self.set.read_quorum())
            .map(|(name, (_, created))| BucketInfo { name, created })
            .collect())
    }

    async fn delete_bucket_inner(&self, bucket: &str) -> Result<()> {
        validate_bucket_name(bucket)?;
        let _guard = self.bucket_lock.write().await;
        self.stat_bucket(bucket).await?;

        let listings = self
            .set
            .for_each_disk(|_, disk| async move { disk.list_dir(bucket, "").await })
            .await;
        if listings
            .iter()
            .any(|listing| listing.as_ref().is_ok_and(|entries| !entries.is_empty()))
        {
            return Err(MinnowError::BucketNotEmpty(bucket.to_string()));
        }

        let results = self
            .set
            .for_each_disk(|_, disk| async move { disk.delete_volume(bucket).await })
            .await;
        reduce_write_errors(
            &errors_of(&results),
            &[DiskError::VolumeNotFound],
            self.set.write_quorum(),
            |index, err| bucket_error(index, err, bucket),
        )?;

        self.set
            .delete_all(SYS_VOLUME, &path_join(&[BUCKET_META_DIR, bucket]))
            .await;
        self.set
            .delete_all(SYS_VOLUME, &path_join(&[MULTIPART_DIR, bucket]))
            .await;
        info!(bucket, "bucket deleted");
        Ok(())
    }

    fn policy_path(bucket: &str) -> String {
        path_join(&[BUCKET_META_DIR, bucket, POLICY_FILE])
    }

    async fn get_bucket_policy_inner(&self, bucket: &str) -> Result<Bytes> {
        self.check_bucket(bucket).await?;
        let path = Self::policy_path(bucket);
        let results = self
            .set
            .for_each_disk(|_, disk| {
                let path = path.as_str();
                async move { disk.read_all(SYS_VOLUME, path).await }
            })
            .await;
        pick_canonical(&results, self.set.read_quorum(), |a, b| a == b)
            .map(|(policy, _)| policy)
            .map_err(|err| err.into_error(|| MinnowError::PolicyNotFound(bucket.to_string())))
    }

    async fn put_bucket_policy_inner(&self, bucket: &str, policy: Bytes) -> Result<()> {
        self.check_bucket(bucket).await?;
        let path = Self::policy_path(bucket);
        let results = self
            .set
            .for_each_disk(|_, disk| {
                let path = path.as_str();
                let policy = policy.clone();
                async move { disk.write_all(SYS_VOLUME, path, &policy).await }
            })
            .await;
        reduce_write_errors(&errors_of(&results), &[], self.set.write_quorum(), |index, source| {
            MinnowError::Disk { index, source }
        })
    }

    async fn delete_bucket_policy_inner(&self, bucket: &str) -> Result<()> {
        self.check_bucket(bucket).await?;
        self.set
            .delete_all(SYS_VOLUME, &Self::policy_path(bucket))
            .await;
        Ok(())
    }

    async fn put_object_inner(
        &self,
        bucket: &str,
        key: &str,
        mut data: PutObjReader,
        opts: PutObjectOptions,
    ) -> Result<ObjectInfo> {
        validate_object_name(key)?;
        self.check_bucket(bucket).await?;

        let PutObjectOptions {
            content_type,
            metadata,
            conditions,
        } = opts;
        let tmp = TmpDir::new(&self.set);
        let staged = match self
            .stage_object(key, &mut data, content_type, metadata, &tmp)
            .await
        {
            Ok(staged) => staged,
            Err(err) => {
                tmp.cleanup().await;
                return Err(err);
            }
        };

        let layer = self.clone();
        let (bucket, key) = (bucket.to_string(), key.to_string());
        let tmp_path = tmp.release();
        run_to_completion(async move {
            let result = layer
                .publish_staged(&bucket, &key, &staged, &conditions)
                .await;
            layer.set.delete_all(SYS_VOLUME, &tmp_path).await;
            result
        })
        .await
    }

    /// Erasure-writes the body under `tmp` and builds the metadata that
    /// publishes it.
    async fn stage_object(
        &self,
        key: &str,
        data: &mut PutObjReader,
        content_type: Option<String>,
        metadata: HashMap<String, String>,
        tmp: &TmpDir,
    ) -> Result<StagedObject> {
        let data_dir = Uuid::new_v4().to_string();
        let staged_dir = path_join(&[tmp.path(), &data_dir]);
        let distribution = hash_order(key, self.set.disk_count());

        let outcome = self
            .set
            .write_part(
                SYS_VOLUME,
                &path_join(&[&staged_dir, "part.1"]),
                &distribution,
                &mut *data.reader,
                data.size,
            )
            .await?;
        if let Some(expected) = &data.content_md5
            && !expected.eq_ignore_ascii_case(&outcome.md5_hex)
        {
            return Err(MinnowError::BadDigest);
        }

        let meta = self.new_meta(
            key,
            data_dir.clone(),
            outcome.md5_hex.clone(),
            content_type,
            metadata,
            vec![ObjectPartInfo {
                number: 1,
                size: outcome.size,
                etag: outcome.md5_hex,
            }],
        );
        let staged = outcome
            .disk_errors
            .iter()
            .map(Option::is_none)
            .collect::<Vec<_>>();
        let moves = vec![(staged_dir, path_join(&[key, &data_dir]))];
        Ok(StagedObject {
            meta,
            moves,
            staged,
        })
    }

    /// Checks PUT preconditions against the current version under the
    /// object lock, then commits the staged object.
    async fn publish_staged(
        &self,
        bucket: &str,
        key: &str,
        object: &StagedObject,
        conditions: &Conditions,
    ) -> Result<ObjectInfo> {
        let _lock = self.locks.write(&object_resource(bucket, key)).await;
        let published = self.published(bucket, key, !conditions.is_empty()).await?;
        let current = published
            .meta
            .as_ref()
            .map(|meta| meta.to_object_info(bucket, key));
        conditional::evaluate(current.as_ref(), conditions, Method::Put)?;

        let meta = &object.meta;
        self.commit_object(bucket, key, meta, &published, &object.moves, &object.staged)
            .await?;
        self.remove_stale_data(bucket, key, &published, &meta.data_dir)
            .await;
        debug!(bucket, key, size = meta.size, etag = %meta.etag, "object committed");
        Ok(meta.to_object_info(bucket, key))
    }

    /// Loads the canonical metadata of an existing object.
    pub(crate) async fn object_meta(&self, bucket: &str, key: &str) -> Result<XlMeta> {
        let results = read_xl_meta_all(&self.set, bucket, key).await;
        match pick_canonical(&results, self.set.read_quorum(), XlMeta::same_version) {
            Ok((meta, _)) => Ok(meta),
            Err(MetaLookupError::NotFound) => {
                self.check_bucket(bucket).await?;
                Err(MinnowError::object_not_found(bucket, key))
            }
            Err(err) => Err(err.into_error(|| MinnowError::object_not_found(bucket, key))),
        }
    }

    /// Reads `length` bytes at `offset` of the logical object, crossing part
    /// boundaries as needed.
    async fn read_object_data(
        &self,
        bucket: &str,
        key: &str,
        meta: &XlMeta,
        offset: u64,
        length: u64,
    ) -> Result<Bytes> {
        let config = meta.erasure.config();
        let end = offset + length;
        let mut out = Vec::with_capacity(usize::try_from(length).unwrap_or_default());
        let mut part_start = 0_u64;
        for part in &meta.parts {
            let part_end = part_start + part.size;
            if part_end > offset && part_start < end {
                let from = offset.max(part_start) - part_start;
                let to = end.min(part_end) - part_start;
                self.set
                    .read_part(
                        bucket,
                        &meta.part_path(key, part.number),
                        &config,
                        &meta.erasure.distribution,
                        part.size,
                        from,
                        to - from,
                        &mut out,
                    )
                    .await?;
            }
            part_start = part_end;
        }
        Ok(Bytes::from(out))
    }

    async fn get_object_inner(
        &self,
        bucket: &str,
        key: &str,
        opts: GetObjectOptions,
    ) -> Result<GetObjectReply> {
        validate_bucket_name(bucket)?;
        validate_object_name(key)?;
        let _lock = self.locks.read(&object_resource(bucket, key)).await;

        let meta = self.object_meta(bucket, key).await?;
        let info = meta.to_object_info(bucket, key);
        conditional::evaluate(Some(&info), &opts.conditions, Method::Get)?;

        let range = opts
            .range
            .map(|range| range.resolve(meta.size))
            .transpose()?;
        let (offset, length) = match range {
            Some(range) => (range.start, range.len()),
            None => (0, meta.size),
        };
        let data = self
            .read_object_data(bucket, key, &meta, offset, length)
            .await?;
        Ok(GetObjectReply { info, data, range })
    }

    async fn get_object_info_inner(
        &self,
        bucket: &str,
        key: &str,
        conditions: &Conditions,
    ) -> Result<ObjectInfo> {
        validate_bucket_name(bucket)?;
        validate_object_name(key)?;
        let _lock = self.locks.read(&object_resource(bucket, key)).await;
        let info = self.object_meta(bucket, key).await?.to_object_info(bucket, key);
        conditional::evaluate(Some(&info), conditions, Method::Head)?;
        Ok(info)
    }

    async fn copy_object_inner(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        opts: CopyObjectOptions,
    ) -> Result<ObjectInfo> {
        validate_object_name(dst_key)?;
        let source = self
            .get_object_inner(
                src_bucket,
                src_key,
                GetObjectOptions {
                    range: None,
                    conditions: opts.source_conditions.clone(),
                },
            )
            .await
            .map_err(|err| match err {
                MinnowError::NotModified { .. } => MinnowError::PreconditionFailed,
                other => other,
            })?;

        let (content_type, metadata) = match opts.directive {
            MetadataDirective::Copy => (Some(source.info.content_type), source.info.metadata),
            MetadataDirective::Replace => (opts.content_type, opts.metadata),
        };
        self.put_object_inner(
            dst_bucket,
            dst_key,
            PutObjReader::from_bytes(source.data),
            PutObjectOptions {
                content_type,
                metadata,
                conditions: Conditions::default(),
            },
        )
        .await
    }

    async fn delete_object_inner(&self, bucket: &str, key: &str) -> Result<()> {
        validate_object_name(key)?;
        self.check_bucket(bucket).await?;
        let _lock = self.locks.write(&object_resource(bucket, key)).await;

        let meta_path = path_join(&[key, XL_META_FILE]);
        let results = self
            .set
            .for_each_disk(|_, disk| delete_object_on_disk(disk, bucket, key, &meta_path))
            .await;
        reduce_write_errors(
            &errors_of(&results),
            &[DiskError::VolumeNotFound],
            self.set.write_quorum(),
            |index, err| object_error(index, err, bucket, key),
        )?;
        debug!(bucket, key, "object deleted");
        Ok(())
    }

    async fn list_objects_inner(
        &self,
        bucket: &str,
        prefix: &str,
        marker: &str,
        delimiter: &str,
        max_keys: i64,
    ) -> Result<ListObjectsResult> {
        if !(0..=MAX_KEYS_LIMIT).contains(&max_keys) {
            return Err(MinnowError::InvalidArgument(
                "Argument maxKeys must be an integer between 0 and 2147483647.".to_string(),
            ));
        }
        self.check_bucket(bucket).await?;
        if max_keys == 0 {
            return Ok(ListObjectsResult {
                objects: Vec::new(),
                prefixes: Vec::new(),
                is_truncated: false,
                next_marker: None,
            });
        }

        let objects = self.walk_objects(bucket, prefix).await?;
        let mut entries = Vec::new();
        let mut prefixes = BTreeSet::new();
        for obj in objects {
            let suffix = &obj.key[prefix.len()..];
            match suffix.find(delimiter).filter(|_| !delimiter.is_empty()) {
                Some(idx) => {
                    prefixes.insert(format!("{prefix}{}", &suffix[..idx + delimiter.len()]));
                }
                None => entries.push(ListEntry::Object(obj)),
            }
        }
        entries.extend(prefixes.into_iter().map(ListEntry::Prefix));
        entries.retain(|entry| marker.is_empty() || entry.marker() > marker);
        entries.sort_by(|a, b| a.marker().cmp(b.marker()));

        let limit = usize::try_from(max_keys)
            .unwrap_or(MAX_LIST_KEYS)
            .min(MAX_LIST_KEYS);
        let is_truncated = entries.len() > limit;
        entries.truncate(limit);
        let next_marker = is_truncated
            .then(|| entries.last().map(|entry| entry.marker().to_string()))
            .flatten();

        let mut out_objects = Vec::new();
        let mut out_prefixes = Vec::new();
        for entry in entries {
            match entry {
                ListEntry::Object(obj) => out_objects.push(obj),
                ListEntry::Prefix(prefix) => out_prefixes.push(prefix),
            }
        }
        Ok(ListObjectsResult {
            objects: out_objects,
            prefixes: out_prefixes,
            is_truncated,
            next_marker,
        })
    }

    /// Every object under `prefix` a read quorum of disks agree on, sorted
    /// by key.
    async fn walk_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let listings = self
            .set
            .for_each_disk(|_, disk| walk_disk(disk, bucket, prefix))
            .await;
        reduce_read_errors(&errors_of(&listings), &[], self.set.read_quorum(), |index, err| {
            bucket_error(index, err, bucket)
        })?;

        let disk_count = listings.len();
        let mut by_key: BTreeMap<String, Vec<DiskResult<XlMeta>>> = BTreeMap::new();
        for (index, listing) in listings.into_iter().enumerate() {
            let Ok(listing) = listing else { continue };
            for (key, meta) in listing {
                let slots = by_key
                    .entry(key)
                    .or_insert_with(|| vec![Err(DiskError::FileNotFound); disk_count]);
                slots[index] = meta;
            }
        }

        Ok(by_key
            .into_iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter_map(|(key, metas)| {
                match pick_canonical(&metas, self.set.read_quorum(), XlMeta::same_version) {
                    Ok((meta, _)) => Some(meta.to_object_info(bucket, &key)),
                    Err(err) => {
                        debug!(bucket, key, ?err, "skipping object without quorum");
                        None
                    }
                }
            })
            .collect())
    }
}

async fn delete_object_on_disk(
    disk: &DiskStore,
    bucket: &str,
    key: &str,
    meta_path: &str,
) -> DiskResult<()> {
    let data_dir = match disk.read_all(bucket, meta_path).await {
        Ok(raw) => serde_json::from_slice::<XlMeta>(&raw)
            .ok()
            .map(|meta| meta.data_dir),
        Err(DiskError::FileNotFound) => return Ok(()),
        Err(err) => return Err(err),
    };
    if let Some(data_dir) = data_dir {
        match disk.delete_file(bucket, &path_join(&[key, &data_dir])).await {
            Ok(()) | Err(DiskError::FileNotFound) => {}
            Err(err) => return Err(err),
        }
    }
    match disk.delete_file(bucket, meta_path).await {
        Ok(()) | Err(DiskError::FileNotFound) => Ok(()),
        Err(err) => Err(err),
    }
}

/// Objects stored on one disk below the directory holding `prefix`. A
/// directory is an object when it holds `xl.meta`; its data directory is not
/// descended into.
async fn walk_disk(
    disk: &DiskStore,
    bucket: &str,
    prefix: &str,
) -> DiskResult<Vec<(String, DiskResult<XlMeta>)>> {
    let start = prefix.rfind('/').map(|idx| &prefix[..idx]).unwrap_or("");
    let mut found = Vec::new();
    let mut dirs = vec![start.to_string()];

    while let Some(dir) = dirs.pop() {
        let entries = match disk.list_dir(bucket, &dir).await {
            Ok(entries) => entries,
            Err(DiskError::FileNotFound | DiskError::PathIsNotDirectory) => continue,
            Err(err) => return Err(err),
        };

        let mut data_dir = None;
        if !dir.is_empty() && entries.iter().any(|entry| entry == XL_META_FILE) {
            let meta_path = path_join(&[&dir, XL_META_FILE]);
            let meta = match disk.read_all(bucket, &meta_path).await {
                Ok(raw) => serde_json::from_slice::<XlMeta>(&raw).map_err(|_| DiskError::FileCorrupt),
                Err(err) => Err(err),
            };
            if let Ok(meta) = &meta {
                data_dir = Some(format!("{}/", meta.data_dir));
            }
            found.push((dir.clone(), meta));
        }

        for entry in &entries {
            let Some(name) = entry.strip_suffix('/') else {
                continue;
            };
            if data_dir.as_deref() == Some(entry.as_str()) {
                continue;
            }
            let child = path_join(&[&dir, name]);
            let child_dir = format!("{child}/");
            if child_dir.starts_with(prefix) || prefix.starts_with(&child_dir) {
                dirs.push(child);
            }
        }
    }
    Ok(found)
}

#[async_trait]
impl ObjectLayer for ErasureObjectLayer {
    async fn make_bucket(&self, bucket: &str) -> Result<()> {
        self.bounded("make_bucket", self.make_bucket_inner(bucket))
            .await
    }

    async fn get_bucket_info(&self, bucket: &str) -> Result<BucketInfo> {
        validate_bucket_name(bucket)?;
        self.bounded("get_bucket_info", async {
            let _guard = self.bucket_lock.read().await;
            self.stat_bucket(bucket).await
        })
        .await
    }

    async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        self.bounded("list_buckets", self.list_buckets_inner()).await
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        self.bounded("delete_bucket", self.delete_bucket_inner(bucket))
            .await
    }

    async fn get_bucket_policy(&self, bucket: &str) -> Result<Bytes> {
        self.bounded("get_bucket_policy", self.get_bucket_policy_inner(bucket))
            .await
    }

    async fn put_bucket_policy(&self, bucket: &str, policy: Bytes) -> Result<()> {
        self.bounded(
            "put_bucket_policy",
            self.put_bucket_policy_inner(bucket, policy),
        )
        .await
    }

    async fn delete_bucket_policy(&self, bucket: &str) -> Result<()> {
        self.bounded(
            "delete_bucket_policy",
            self.delete_bucket_policy_inner(bucket),
        )
        .await
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: PutObjReader,
        opts: PutObjectOptions,
    ) -> Result<ObjectInfo> {
        self.bounded("put_object", self.put_object_inner(bucket, key, data, opts))
            .await
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        opts: GetObjectOptions,
    ) -> Result<GetObjectReply> {
        self.bounded("get_object", self.get_object_inner(bucket, key, opts))
            .await
    }

    async fn get_object_info(
        &self,
        bucket: &str,
        key: &str,
        conditions: &Conditions,
    ) -> Result<ObjectInfo> {
        self.bounded(
            "get_object_info",
            self.get_object_info_inner(bucket, key, conditions),
        )
        .await
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        opts: CopyObjectOptions,
    ) -> Result<ObjectInfo> {
        self.bounded(
            "copy_object",
            self.copy_object_inner(src_bucket, src_key, dst_bucket, dst_key, opts),
        )
        .await
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.bounded("delete_object", self.delete_object_inner(bucket, key))
            .await
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        marker: &str,
        delimiter: &str,
        max_keys: i64,
    ) -> Result<ListObjectsResult> {
        self.bounded(
            "list_objects",
            self.list_objects_inner(bucket, prefix, marker, delimiter, max_keys),
        )
        .await
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        opts: PutObjectOptions,
    ) -> Result<String> {
        self.bounded(
            "create_multipart_upload",
            self.new_multipart_upload(bucket, key, opts),
        )
        .await
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: PutObjReader,
    ) -> Result<PartInfo> {
        self.bounded(
            "upload_part",
            self.put_object_part(bucket, key, upload_id, part_number, data),
        )
        .await
    }

    async fn list_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number_marker: u32,
        max_parts: i64,
    ) -> Result<ListPartsResult> {
        self.bounded(
            "list_parts",
            self.list_object_parts(bucket, key, upload_id, part_number_marker, max_parts),
        )
        .await
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletePart>,
    ) -> Result<ObjectInfo> {
        self.bounded(
            "complete_multipart_upload",
            self.complete_upload(bucket, key, upload_id, parts),
        )
        .await
    }

    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()> {
        self.bounded(
            "abort_multipart_upload",
            self.abort_upload(bucket, key, upload_id),
        )
        .await
    }

    async fn list_multipart_uploads(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        key_marker: &str,
        upload_id_marker: &str,
        max_uploads: i64,
    ) -> Result<ListMultipartsResult> {
        self.bounded(
            "list_multipart_uploads",
            self.list_uploads(
                bucket,
                prefix,
                delimiter,
                key_marker,
                upload_id_marker,
                max_uploads,
            ),
        )
        .await
    }

    async fn heal_object(&self, bucket: &str, key: &str) -> Result<HealResult> {
        self.bounded("heal_object", self.heal(bucket, key)).await
    }
}

/// Strips quotes from client supplied part ETags before comparing.
pub(crate) fn same_etag(client: &str, stored: &str) -> bool {
    canonical_etag(client) == canonical_etag(stored)
}
