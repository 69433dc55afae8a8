//! Multipart upload sessions.
//!
//! A session lives on every disk under
//! `.minnow.sys/multipart/<bucket>/<upload id>/`: `upload.json` holds the
//! session record, each uploaded part has its shard file `part.<n>` and its
//! record `part.<n>.json`. Completing the upload moves the part shard files
//! into a fresh data directory of the object and publishes `xl.meta`.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use minnow_common::error::{DiskError, MinnowError, Result};
use minnow_common::hash::multipart_etag;
use minnow_common::time;
use minnow_common::types::{ObjectInfo, ObjectPartInfo};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{MAX_LIST_PARTS, MAX_LIST_UPLOADS, MAX_PART_NUMBER};
use crate::disk::{MULTIPART_DIR, SYS_VOLUME, path_join};
use crate::erasure::metadata::{
    MetaLookupError, XlMeta, encode_json, pick_canonical, read_json_all, write_json_all,
};
use crate::erasure::objects::{ErasureObjectLayer, TmpDir, run_to_completion, same_etag};
use crate::erasure::reduce_write_errors;
use crate::erasure::storage::hash_order;
use crate::naming::validate_object_name;
use crate::nslock::{object_resource, part_resource, upload_resource};
use crate::traits::{
    CompletePart, ListMultipartsResult, ListPartsResult, MultipartUploadInfo, PartInfo,
    PutObjReader, PutObjectOptions,
};

const UPLOAD_FILE: &str = "upload.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadState {
    AcceptingParts,
    Completed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    pub upload_id: String,
    pub bucket: String,
    pub key: String,
    pub initiated: DateTime<Utc>,
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
    pub state: UploadState,
}

impl UploadSession {
    fn new(bucket: &str, key: &str, opts: PutObjectOptions) -> Self {
        Self {
            upload_id: Uuid::new_v4().to_string(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            initiated: time::now(),
            content_type: opts.content_type,
            metadata: opts.metadata,
            state: UploadState::AcceptingParts,
        }
    }

    pub fn is_accepting_parts(&self) -> bool {
        self.state == UploadState::AcceptingParts
    }

    /// Moves the session into a terminal state. Terminal states are final.
    pub fn finish(&mut self, next: UploadState) -> Result<()> {
        if !self.is_accepting_parts() || next == UploadState::AcceptingParts {
            return Err(MinnowError::UploadNotFound(self.upload_id.clone()));
        }
        self.state = next;
        Ok(())
    }
}

/// What is known about one uploaded part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartRecord {
    pub number: u32,
    pub size: u64,
    pub etag: String,
    pub mod_time: DateTime<Utc>,
}

impl From<&PartRecord> for PartInfo {
    fn from(record: &PartRecord) -> Self {
        PartInfo {
            part_number: record.number,
            size: record.size,
            etag: record.etag.clone(),
            last_modified: record.mod_time,
        }
    }
}

fn session_dir(bucket: &str, upload_id: &str) -> String {
    path_join(&[MULTIPART_DIR, bucket, upload_id])
}

fn part_file(bucket: &str, upload_id: &str, number: u32) -> String {
    path_join(&[&session_dir(bucket, upload_id), &format!("part.{number}")])
}

fn part_record_file(bucket: &str, upload_id: &str, number: u32) -> String {
    path_join(&[&session_dir(bucket, upload_id), &format!("part.{number}.json")])
}

fn parse_part_record_name(name: &str) -> Option<u32> {
    name.strip_prefix("part.")?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

fn check_upload_id(upload_id: &str) -> Result<()> {
    Uuid::parse_str(upload_id)
        .map(|_| ())
        .map_err(|_| MinnowError::UploadNotFound(upload_id.to_string()))
}

fn check_part_number(part_number: u32) -> Result<()> {
    if !(1..=MAX_PART_NUMBER).contains(&part_number) {
        return Err(MinnowError::InvalidArgument(
            "Part number must be an integer between 1 and 10000, inclusive.".to_string(),
        ));
    }
    Ok(())
}

impl ErasureObjectLayer {
    async fn read_session(&self, bucket: &str, upload_id: &str) -> Result<Option<UploadSession>> {
        let path = path_join(&[&session_dir(bucket, upload_id), UPLOAD_FILE]);
        let results = read_json_all::<UploadSession>(&self.set, SYS_VOLUME, &path).await;
        match pick_canonical(&results, self.set.read_quorum(), |a, b| a == b) {
            Ok((session, _)) => Ok(Some(session)),
            Err(MetaLookupError::NotFound) => Ok(None),
            Err(err) => Err(err.into_error(|| MinnowError::UploadNotFound(upload_id.to_string()))),
        }
    }

    /// Loads a session that is still accepting parts for `bucket/key`.
    async fn open_session(&self, bucket: &str, key: &str, upload_id: &str) -> Result<UploadSession> {
        check_upload_id(upload_id)?;
        match self.read_session(bucket, upload_id).await? {
            Some(session) if session.key == key && session.is_accepting_parts() => Ok(session),
            _ => Err(MinnowError::UploadNotFound(upload_id.to_string())),
        }
    }

    async fn write_session(&self, session: &UploadSession) -> Result<()> {
        let path = path_join(&[
            &session_dir(&session.bucket, &session.upload_id),
            UPLOAD_FILE,
        ]);
        let errs = write_json_all(&self.set, SYS_VOLUME, &path, |_| session).await?;
        reduce_write_errors(&errs, &[], self.set.write_quorum(), |index, source| {
            MinnowError::Disk { index, source }
        })
    }

    /// Part record a read quorum agrees on, with the disks holding it.
    async fn read_part_record(
        &self,
        bucket: &str,
        upload_id: &str,
        number: u32,
    ) -> std::result::Result<(PartRecord, Vec<bool>), MetaLookupError> {
        let path = part_record_file(bucket, upload_id, number);
        let results = read_json_all::<PartRecord>(&self.set, SYS_VOLUME, &path).await;
        pick_canonical(&results, self.set.read_quorum(), |a, b| a == b)
    }

    pub(crate) async fn new_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        opts: PutObjectOptions,
    ) -> Result<String> {
        validate_object_name(key)?;
        self.check_bucket(bucket).await?;

        let session = UploadSession::new(bucket, key, opts);
        if let Err(err) = self.write_session(&session).await {
            self.set
                .delete_all(SYS_VOLUME, &session_dir(bucket, &session.upload_id))
                .await;
            return Err(err);
        }
        info!(bucket, key, upload_id = %session.upload_id, "multipart upload initiated");
        Ok(session.upload_id)
    }

    pub(crate) async fn put_object_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        mut data: PutObjReader,
    ) -> Result<PartInfo> {
        check_part_number(part_number)?;
        validate_object_name(key)?;
        self.check_bucket(bucket).await?;

        let _upload = self.locks.read(&upload_resource(bucket, upload_id)).await;
        self.open_session(bucket, key, upload_id).await?;
        let _part = self
            .locks
            .write(&part_resource(bucket, upload_id, part_number))
            .await;

        let tmp = TmpDir::new(&self.set);
        let result = self
            .stage_part(bucket, key, upload_id, part_number, &mut data, &tmp)
            .await;
        tmp.cleanup().await;
        result
    }

    async fn stage_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: &mut PutObjReader,
        tmp: &TmpDir,
    ) -> Result<PartInfo> {
        let staged_path = path_join(&[tmp.path(), &format!("part.{part_number}")]);
        let distribution = hash_order(key, self.set.disk_count());
        let outcome = self
            .set
            .write_part(
                SYS_VOLUME,
                &staged_path,
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

        let record = PartRecord {
            number: part_number,
            size: outcome.size,
            etag: outcome.md5_hex,
            mod_time: time::now(),
        };
        let payload = encode_json(&record, "part record")?;
        let part_path = part_file(bucket, upload_id, part_number);
        let record_path = part_record_file(bucket, upload_id, part_number);

        let results = self
            .set
            .for_each_disk(|index, disk| {
                let staged = outcome.disk_errors.get(index).is_some_and(Option::is_none);
                let payload = payload.clone();
                let (staged_path, part_path, record_path) = (&staged_path, &part_path, &record_path);
                async move {
                    if !staged {
                        // Drop whatever an earlier upload of this part left here.
                        let _ = disk.delete_file(SYS_VOLUME, record_path).await;
                        let _ = disk.delete_file(SYS_VOLUME, part_path).await;
                        return Err(DiskError::DiskUnavailable);
                    }
                    disk.rename_file(SYS_VOLUME, staged_path, SYS_VOLUME, part_path)
                        .await?;
                    disk.write_all(SYS_VOLUME, record_path, &payload).await
                }
            })
            .await;
        let errs = results
            .iter()
            .map(|result| result.as_ref().err().cloned())
            .collect::<Vec<_>>();
        reduce_write_errors(&errs, &[], self.set.write_quorum(), |index, err| match err {
            DiskError::FileNotFound | DiskError::VolumeNotFound => {
                MinnowError::UploadNotFound(upload_id.to_string())
            }
            source => MinnowError::Disk { index, source },
        })?;

        debug!(bucket, key, upload_id, part_number, size = record.size, "part stored");
        Ok(PartInfo::from(&record))
    }

    pub(crate) async fn list_object_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number_marker: u32,
        max_parts: i64,
    ) -> Result<ListPartsResult> {
        let max_parts = usize::try_from(max_parts)
            .ok()
            .filter(|max| (1..=MAX_LIST_PARTS).contains(max))
            .ok_or_else(|| {
                MinnowError::InvalidArgument(
                    "Argument maxParts must be an integer between 1 and 10000.".to_string(),
                )
            })?;
        validate_object_name(key)?;
        self.check_bucket(bucket).await?;
        let _upload = self.locks.read(&upload_resource(bucket, upload_id)).await;
        self.open_session(bucket, key, upload_id).await?;

        let dir = session_dir(bucket, upload_id);
        let listings = self
            .set
            .for_each_disk(|_, disk| {
                let dir = dir.as_str();
                async move { disk.list_dir(SYS_VOLUME, dir).await }
            })
            .await;
        let numbers = listings
            .into_iter()
            .flatten()
            .flatten()
            .filter_map(|name| parse_part_record_name(&name))
            .filter(|number| *number > part_number_marker)
            .collect::<BTreeSet<_>>();

        let mut parts = Vec::new();
        let mut is_truncated = false;
        for number in numbers {
            match self.read_part_record(bucket, upload_id, number).await {
                Ok((record, _)) => {
                    if parts.len() == max_parts {
                        is_truncated = true;
                        break;
                    }
                    parts.push(PartInfo::from(&record));
                }
                Err(err) => debug!(bucket, upload_id, number, ?err, "skipping part without quorum"),
            }
        }

        Ok(ListPartsResult {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id: upload_id.to_string(),
            part_number_marker,
            next_part_number_marker: parts.last().map(|part| part.part_number).unwrap_or_default(),
            max_parts,
            is_truncated,
            parts,
        })
    }

    pub(crate) async fn complete_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletePart>,
    ) -> Result<ObjectInfo> {
        validate_object_name(key)?;
        if parts.is_empty() {
            return Err(MinnowError::MalformedXml(
                "complete request names no parts".to_string(),
            ));
        }
        if parts
            .windows(2)
            .any(|pair| pair[0].part_number >= pair[1].part_number)
        {
            return Err(MinnowError::InvalidPartOrder);
        }
        self.check_bucket(bucket).await?;

        let upload_lock = self.locks.write(&upload_resource(bucket, upload_id)).await;
        let session = self.open_session(bucket, key, upload_id).await?;

        let mut records = Vec::with_capacity(parts.len());
        let mut staged = vec![true; self.set.disk_count()];
        for requested in &parts {
            let (record, holders) = self
                .read_part_record(bucket, upload_id, requested.part_number)
                .await
                .map_err(|err| match err {
                    MetaLookupError::NotFound => {
                        MinnowError::InvalidPart(format!("part {} was not uploaded", requested.part_number))
                    }
                    other => other.into_error(|| MinnowError::UploadNotFound(upload_id.to_string())),
                })?;
            if !same_etag(&requested.etag, &record.etag) {
                return Err(MinnowError::InvalidPart(format!(
                    "part {} has etag {}",
                    requested.part_number, record.etag
                )));
            }
            for (slot, holds) in staged.iter_mut().zip(holders) {
                *slot &= holds;
            }
            records.push(record);
        }

        let min_size = self.config.multipart.min_part_size;
        if let Some(small) = records[..records.len() - 1]
            .iter()
            .find(|record| record.size < min_size)
        {
            return Err(MinnowError::EntityTooSmall {
                part_number: small.number,
                size: small.size,
                min_size,
            });
        }

        let etag = multipart_etag(records.iter().map(|record| record.etag.as_str()))?;
        let data_dir = Uuid::new_v4().to_string();
        let object_parts = records
            .iter()
            .map(|record| ObjectPartInfo {
                number: record.number,
                size: record.size,
                etag: record.etag.clone(),
            })
            .collect::<Vec<_>>();
        let meta = self.new_meta(
            key,
            data_dir.clone(),
            etag,
            session.content_type.clone(),
            session.metadata.clone(),
            object_parts,
        );
        let moves = records
            .iter()
            .map(|record| {
                (
                    part_file(bucket, upload_id, record.number),
                    meta.part_path(key, record.number),
                )
            })
            .collect::<Vec<_>>();

        let layer = self.clone();
        let (bucket, key, upload_id) = (bucket.to_string(), key.to_string(), upload_id.to_string());
        run_to_completion(async move {
            let _upload = upload_lock;
            layer
                .publish_upload(&bucket, &key, &upload_id, session, &meta, &moves, &staged)
                .await?;
            Ok::<_, MinnowError>(meta.to_object_info(&bucket, &key))
        })
        .await
    }

    /// Moves the listed parts into the object, then retires the session.
    /// Runs with the upload write lock held.
    #[allow(clippy::too_many_arguments)]
    async fn publish_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        mut session: UploadSession,
        meta: &XlMeta,
        moves: &[(String, String)],
        staged: &[bool],
    ) -> Result<()> {
        {
            let _object = self.locks.write(&object_resource(bucket, key)).await;
            let published = self.published(bucket, key, false).await?;
            self.commit_object(bucket, key, meta, &published, moves, staged)
                .await?;
            self.remove_stale_data(bucket, key, &published, &meta.data_dir)
                .await;
        }

        if session.finish(UploadState::Completed).is_ok()
            && let Err(err) = self.write_session(&session).await
        {
            warn!(bucket, upload_id, error = %err, "failed to mark upload completed");
        }
        self.set
            .delete_all(SYS_VOLUME, &session_dir(bucket, upload_id))
            .await;

        info!(bucket, key, upload_id, parts = meta.parts.len(), etag = %meta.etag, "multipart upload completed");
        Ok(())
    }

    pub(crate) async fn abort_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()> {
        validate_object_name(key)?;
        self.check_bucket(bucket).await?;
        if check_upload_id(upload_id).is_err() {
            return Ok(());
        }

        let _upload = self.locks.write(&upload_resource(bucket, upload_id)).await;
        let mut session = match self.read_session(bucket, upload_id).await? {
            None => return Ok(()),
            Some(session) if session.key != key => {
                return Err(MinnowError::UploadNotFound(upload_id.to_string()));
            }
            Some(session) => session,
        };

        if session.finish(UploadState::Aborted).is_ok()
            && let Err(err) = self.write_session(&session).await
        {
            warn!(bucket, upload_id, error = %err, "failed to mark upload aborted");
        }
        self.set
            .delete_all(SYS_VOLUME, &session_dir(bucket, upload_id))
            .await;
        info!(bucket, key, upload_id, "multipart upload aborted");
        Ok(())
    }

    pub(crate) async fn list_uploads(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        key_marker: &str,
        upload_id_marker: &str,
        max_uploads: i64,
    ) -> Result<ListMultipartsResult> {
        let max_uploads = usize::try_from(max_uploads)
            .map_err(|_| {
                MinnowError::InvalidArgument(
                    "Argument max-uploads must be an integer between 0 and 2147483647.".to_string(),
                )
            })?
            .min(MAX_LIST_UPLOADS);
        self.check_bucket(bucket).await?;

        let dir = path_join(&[MULTIPART_DIR, bucket]);
        let listings = self
            .set
            .for_each_disk(|_, disk| {
                let dir = dir.as_str();
                async move { disk.list_dir(SYS_VOLUME, dir).await }
            })
            .await;
        let upload_ids = listings
            .into_iter()
            .flatten()
            .flatten()
            .filter_map(|name| name.strip_suffix('/').map(str::to_string))
            .collect::<BTreeSet<_>>();

        let mut sessions = Vec::new();
        for upload_id in upload_ids {
            match self.read_session(bucket, &upload_id).await {
                Ok(Some(session)) if session.is_accepting_parts() && session.key.starts_with(prefix) => {
                    sessions.push(session)
                }
                Ok(_) => {}
                Err(err) => {
                    debug!(bucket, upload_id = %upload_id, error = %err, "skipping unreadable upload")
                }
            }
        }
        sessions.sort_by(|a, b| {
            (&a.key, a.initiated, &a.upload_id).cmp(&(&b.key, b.initiated, &b.upload_id))
        });

        if !key_marker.is_empty() {
            let resume_at = (!upload_id_marker.is_empty())
                .then(|| {
                    sessions.iter().position(|session| {
                        session.key == key_marker && session.upload_id == upload_id_marker
                    })
                })
                .flatten();
            match resume_at {
                Some(position) => {
                    sessions.drain(..=position);
                }
                None => sessions.retain(|session| session.key.as_str() > key_marker),
            }
        }

        let mut uploads = Vec::new();
        let mut common_prefixes = Vec::<String>::new();
        let mut is_truncated = false;
        for session in sessions {
            let grouped = (!delimiter.is_empty())
                .then(|| {
                    session.key[prefix.len()..]
                        .find(delimiter)
                        .map(|idx| session.key[..prefix.len() + idx + delimiter.len()].to_string())
                })
                .flatten();
            if let Some(common) = &grouped
                && common_prefixes.last() == Some(common)
            {
                continue;
            }
            if uploads.len() + common_prefixes.len() == max_uploads {
                is_truncated = true;
                break;
            }
            match grouped {
                Some(common) => common_prefixes.push(common),
                None => uploads.push(session),
            }
        }

        let (next_key_marker, next_upload_id_marker) = uploads
            .last()
            .map(|session| (session.key.clone(), session.upload_id.clone()))
            .unwrap_or_default();
        Ok(ListMultipartsResult {
            key_marker: key_marker.to_string(),
            upload_id_marker: upload_id_marker.to_string(),
            next_key_marker,
            next_upload_id_marker,
            max_uploads,
            is_truncated,
            uploads: uploads
                .into_iter()
                .map(|session| MultipartUploadInfo {
                    key: session.key,
                    upload_id: session.upload_id,
                    initiated: session.initiated,
                })
                .collect(),
            prefix: prefix.to_string(),
            delimiter: delimiter.to_string(),
            common_prefixes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessions_finish_once() {
        let mut session = UploadSession::new("bucket", "key", PutObjectOptions::default());
        assert!(session.is_accepting_parts());
        assert!(session.finish(UploadState::AcceptingParts).is_err());
        session.finish(UploadState::Completed).unwrap();
        assert!(matches!(
            session.finish(UploadState::Aborted),
            Err(MinnowError::UploadNotFound(_))
        ));
        assert_eq!(session.state, UploadState::Completed);
    }

    #[test]
    fn session_layout() {
        assert_eq!(session_dir("b", "u"), "multipart/b/u");
        assert_eq!(part_file("b", "u", 3), "multipart/b/u/part.3");
        assert_eq!(part_record_file("b", "u", 3), "multipart/b/u/part.3.json");
        assert_eq!(parse_part_record_name("part.12.json"), Some(12));
        assert_eq!(parse_part_record_name("part.12"), None);
        assert_eq!(parse_part_record_name("upload.json"), None);
    }

    #[test]
    fn part_numbers_are_bounded() {
        assert!(check_part_number(1).is_ok());
        assert!(check_part_number(10_000).is_ok());
        assert!(check_part_number(0).is_err());
        assert!(check_part_number(10_001).is_err());
        assert!(check_upload_id("../../etc").is_err());
    }
}
