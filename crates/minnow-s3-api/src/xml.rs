//! S3 XML wire contract. These types mirror the documents clients exchange
//! with the server and are kept apart from the storage types.

use minnow_common::error::{MinnowError, Result};
use minnow_common::time::format_iso8601;
use minnow_common::types::{BucketInfo, ObjectInfo};
use minnow_storage::traits::{MultipartUploadInfo, PartInfo};
use quick_xml::{de::from_str as xml_from_str, se::to_string as xml_to_string};
use serde::{Deserialize, Serialize};

pub const S3_XMLNS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";
pub const CONTENT_TYPE_XML: &str = "application/xml";
const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";
const STORAGE_CLASS: &str = "STANDARD";
const OWNER_ID: &str = "minnow";

pub fn to_xml<T: Serialize>(payload: &T) -> Result<String> {
    let xml = xml_to_string(payload).map_err(|err| {
        MinnowError::InternalError(format!("failed to serialize xml response: {err}"))
    })?;
    Ok(format!("{XML_DECLARATION}{xml}"))
}

pub fn from_xml<T: for<'de> Deserialize<'de>>(body: &[u8]) -> Result<T> {
    let text = std::str::from_utf8(body)
        .map_err(|err| MinnowError::MalformedXml(format!("body is not utf-8: {err}")))?;
    xml_from_str(text).map_err(|err| MinnowError::MalformedXml(err.to_string()))
}

pub fn quoted_etag(etag: &str) -> String {
    if etag.starts_with('"') && etag.ends_with('"') && etag.len() >= 2 {
        etag.to_string()
    } else {
        format!("\"{etag}\"")
    }
}

#[derive(Debug, Serialize)]
#[serde(rename = "Error")]
pub struct ErrorXml {
    #[serde(rename = "Code")]
    pub code: String,
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(rename = "Resource")]
    pub resource: String,
    #[serde(rename = "RequestId")]
    pub request_id: String,
}

#[derive(Debug, Serialize)]
pub struct OwnerXml {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "DisplayName")]
    pub display_name: String,
}

impl Default for OwnerXml {
    fn default() -> Self {
        Self {
            id: OWNER_ID.to_string(),
            display_name: OWNER_ID.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename = "ListAllMyBucketsResult")]
pub struct ListAllMyBucketsResult {
    #[serde(rename = "@xmlns")]
    pub xmlns: &'static str,
    #[serde(rename = "Owner")]
    pub owner: OwnerXml,
    #[serde(rename = "Buckets")]
    pub buckets: BucketsXml,
}

#[derive(Debug, Serialize)]
pub struct BucketsXml {
    #[serde(rename = "Bucket", default)]
    pub bucket: Vec<BucketXml>,
}

#[derive(Debug, Serialize)]
pub struct BucketXml {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "CreationDate")]
    pub creation_date: String,
}

impl ListAllMyBucketsResult {
    pub fn new(buckets: &[BucketInfo]) -> Self {
        Self {
            xmlns: S3_XMLNS,
            owner: OwnerXml::default(),
            buckets: BucketsXml {
                bucket: buckets
                    .iter()
                    .map(|info| BucketXml {
                        name: info.name.clone(),
                        creation_date: format_iso8601(&info.created),
                    })
                    .collect(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename = "LocationConstraint")]
pub struct LocationConstraint {
    #[serde(rename = "@xmlns")]
    pub xmlns: &'static str,
    #[serde(rename = "$text")]
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct ObjectContentXml {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "LastModified")]
    pub last_modified: String,
    #[serde(rename = "ETag")]
    pub etag: String,
    #[serde(rename = "Size")]
    pub size: u64,
    #[serde(rename = "StorageClass")]
    pub storage_class: &'static str,
}

impl From<ObjectInfo> for ObjectContentXml {
    fn from(info: ObjectInfo) -> Self {
        Self {
            last_modified: format_iso8601(&info.last_modified),
            etag: quoted_etag(&info.etag),
            size: info.size,
            key: info.key,
            storage_class: STORAGE_CLASS,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CommonPrefixXml {
    #[serde(rename = "Prefix")]
    pub prefix: String,
}

pub fn common_prefixes(prefixes: Vec<String>) -> Vec<CommonPrefixXml> {
    prefixes
        .into_iter()
        .map(|prefix| CommonPrefixXml { prefix })
        .collect()
}

#[derive(Debug, Serialize)]
#[serde(rename = "ListBucketResult")]
pub struct ListBucketResult {
    #[serde(rename = "@xmlns")]
    pub xmlns: &'static str,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Prefix")]
    pub prefix: String,
    #[serde(rename = "Marker")]
    pub marker: String,
    #[serde(rename = "NextMarker", skip_serializing_if = "Option::is_none")]
    pub next_marker: Option<String>,
    #[serde(rename = "MaxKeys")]
    pub max_keys: i64,
    #[serde(rename = "Delimiter", skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
    #[serde(rename = "IsTruncated")]
    pub is_truncated: bool,
    #[serde(rename = "Contents", default)]
    pub contents: Vec<ObjectContentXml>,
    #[serde(rename = "CommonPrefixes", default)]
    pub common_prefixes: Vec<CommonPrefixXml>,
}

/// Version 2 listings share the root element name with version 1.
#[derive(Debug, Serialize)]
#[serde(rename = "ListBucketResult")]
pub struct ListBucketV2Result {
    #[serde(rename = "@xmlns")]
    pub xmlns: &'static str,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Prefix")]
    pub prefix: String,
    #[serde(rename = "StartAfter", skip_serializing_if = "Option::is_none")]
    pub start_after: Option<String>,
    #[serde(rename = "ContinuationToken", skip_serializing_if = "Option::is_none")]
    pub continuation_token: Option<String>,
    #[serde(
        rename = "NextContinuationToken",
        skip_serializing_if = "Option::is_none"
    )]
    pub next_continuation_token: Option<String>,
    #[serde(rename = "KeyCount")]
    pub key_count: usize,
    #[serde(rename = "MaxKeys")]
    pub max_keys: i64,
    #[serde(rename = "Delimiter", skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
    #[serde(rename = "IsTruncated")]
    pub is_truncated: bool,
    #[serde(rename = "Contents", default)]
    pub contents: Vec<ObjectContentXml>,
    #[serde(rename = "CommonPrefixes", default)]
    pub common_prefixes: Vec<CommonPrefixXml>,
}

#[derive(Debug, Serialize)]
#[serde(rename = "CopyObjectResult")]
pub struct CopyObjectResult {
    #[serde(rename = "@xmlns")]
    pub xmlns: &'static str,
    #[serde(rename = "LastModified")]
    pub last_modified: String,
    #[serde(rename = "ETag")]
    pub etag: String,
}

#[derive(Debug, Serialize)]
#[serde(rename = "InitiateMultipartUploadResult")]
pub struct InitiateMultipartUploadResult {
    #[serde(rename = "@xmlns")]
    pub xmlns: &'static str,
    #[serde(rename = "Bucket")]
    pub bucket: String,
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "UploadId")]
    pub upload_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename = "CompleteMultipartUpload")]
pub struct CompleteMultipartUpload {
    #[serde(rename = "Part", default)]
    pub parts: Vec<CompletePartXml>,
}

#[derive(Debug, Deserialize)]
pub struct CompletePartXml {
    #[serde(rename = "PartNumber")]
    pub part_number: u32,
    #[serde(rename = "ETag")]
    pub etag: String,
}

#[derive(Debug, Serialize)]
#[serde(rename = "CompleteMultipartUploadResult")]
pub struct CompleteMultipartUploadResult {
    #[serde(rename = "@xmlns")]
    pub xmlns: &'static str,
    #[serde(rename = "Location")]
    pub location: String,
    #[serde(rename = "Bucket")]
    pub bucket: String,
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "ETag")]
    pub etag: String,
}

#[derive(Debug, Serialize)]
pub struct PartXml {
    #[serde(rename = "PartNumber")]
    pub part_number: u32,
    #[serde(rename = "LastModified")]
    pub last_modified: String,
    #[serde(rename = "ETag")]
    pub etag: String,
    #[serde(rename = "Size")]
    pub size: u64,
}

impl From<PartInfo> for PartXml {
    fn from(part: PartInfo) -> Self {
        Self {
            part_number: part.part_number,
            last_modified: format_iso8601(&part.last_modified),
            etag: quoted_etag(&part.etag),
            size: part.size,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename = "ListPartsResult")]
pub struct ListPartsResult {
    #[serde(rename = "@xmlns")]
    pub xmlns: &'static str,
    #[serde(rename = "Bucket")]
    pub bucket: String,
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "UploadId")]
    pub upload_id: String,
    #[serde(rename = "Initiator")]
    pub initiator: OwnerXml,
    #[serde(rename = "Owner")]
    pub owner: OwnerXml,
    #[serde(rename = "StorageClass")]
    pub storage_class: &'static str,
    #[serde(rename = "PartNumberMarker")]
    pub part_number_marker: u32,
    #[serde(rename = "NextPartNumberMarker")]
    pub next_part_number_marker: u32,
    #[serde(rename = "MaxParts")]
    pub max_parts: usize,
    #[serde(rename = "IsTruncated")]
    pub is_truncated: bool,
    #[serde(rename = "Part", default)]
    pub parts: Vec<PartXml>,
}

impl From<minnow_storage::traits::ListPartsResult> for ListPartsResult {
    fn from(result: minnow_storage::traits::ListPartsResult) -> Self {
        Self {
            xmlns: S3_XMLNS,
            bucket: result.bucket,
            key: result.key,
            upload_id: result.upload_id,
            initiator: OwnerXml::default(),
            owner: OwnerXml::default(),
            storage_class: STORAGE_CLASS,
            part_number_marker: result.part_number_marker,
            next_part_number_marker: result.next_part_number_marker,
            max_parts: result.max_parts,
            is_truncated: result.is_truncated,
            parts: result.parts.into_iter().map(PartXml::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UploadXml {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "UploadId")]
    pub upload_id: String,
    #[serde(rename = "Initiator")]
    pub initiator: OwnerXml,
    #[serde(rename = "Owner")]
    pub owner: OwnerXml,
    #[serde(rename = "StorageClass")]
    pub storage_class: &'static str,
    #[serde(rename = "Initiated")]
    pub initiated: String,
}

impl From<MultipartUploadInfo> for UploadXml {
    fn from(upload: MultipartUploadInfo) -> Self {
        Self {
            key: upload.key,
            upload_id: upload.upload_id,
            initiator: OwnerXml::default(),
            owner: OwnerXml::default(),
            storage_class: STORAGE_CLASS,
            initiated: format_iso8601(&upload.initiated),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename = "ListMultipartUploadsResult")]
pub struct ListMultipartUploadsResult {
    #[serde(rename = "@xmlns")]
    pub xmlns: &'static str,
    #[serde(rename = "Bucket")]
    pub bucket: String,
    #[serde(rename = "KeyMarker")]
    pub key_marker: String,
    #[serde(rename = "UploadIdMarker")]
    pub upload_id_marker: String,
    #[serde(rename = "NextKeyMarker")]
    pub next_key_marker: String,
    #[serde(rename = "NextUploadIdMarker")]
    pub next_upload_id_marker: String,
    #[serde(rename = "Prefix")]
    pub prefix: String,
    #[serde(rename = "Delimiter", skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
    #[serde(rename = "MaxUploads")]
    pub max_uploads: usize,
    #[serde(rename = "IsTruncated")]
    pub is_truncated: bool,
    #[serde(rename = "Upload", default)]
    pub uploads: Vec<UploadXml>,
    #[serde(rename = "CommonPrefixes", default)]
    pub common_prefixes: Vec<CommonPrefixXml>,
}

impl ListMultipartUploadsResult {
    pub fn new(bucket: String, result: minnow_storage::traits::ListMultipartsResult) -> Self {
        Self {
            xmlns: S3_XMLNS,
            bucket,
            key_marker: result.key_marker,
            upload_id_marker: result.upload_id_marker,
            next_key_marker: result.next_key_marker,
            next_upload_id_marker: result.next_upload_id_marker,
            prefix: result.prefix,
            delimiter: Some(result.delimiter).filter(|delimiter| !delimiter.is_empty()),
            max_uploads: result.max_uploads,
            is_truncated: result.is_truncated,
            uploads: result.uploads.into_iter().map(UploadXml::from).collect(),
            common_prefixes: common_prefixes(result.common_prefixes),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn initiate_result_golden() {
        let payload = InitiateMultipartUploadResult {
            xmlns: S3_XMLNS,
            bucket: "photos".to_string(),
            key: "2024/cat.png".to_string(),
            upload_id: "4c1d0a52-9b5e-4d3a-8f61-1e2f3a4b5c6d".to_string(),
        };
        assert_eq!(
            to_xml(&payload).unwrap(),
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <InitiateMultipartUploadResult xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
             <Bucket>photos</Bucket>\
             <Key>2024/cat.png</Key>\
             <UploadId>4c1d0a52-9b5e-4d3a-8f61-1e2f3a4b5c6d</UploadId>\
             </InitiateMultipartUploadResult>"
        );
    }

    #[test]
    fn error_golden() {
        let payload = ErrorXml {
            code: "NoSuchBucket".to_string(),
            message: "The specified bucket does not exist.".to_string(),
            resource: "/photos".to_string(),
            request_id: "abc123".to_string(),
        };
        assert_eq!(
            to_xml(&payload).unwrap(),
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <Error><Code>NoSuchBucket</Code>\
             <Message>The specified bucket does not exist.</Message>\
             <Resource>/photos</Resource>\
             <RequestId>abc123</RequestId></Error>"
        );
    }

    #[test]
    fn list_buckets_golden() {
        let created = chrono::Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let payload = ListAllMyBucketsResult::new(&[BucketInfo {
            name: "photos".to_string(),
            created,
        }]);
        assert_eq!(
            to_xml(&payload).unwrap(),
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <ListAllMyBucketsResult xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
             <Owner><ID>minnow</ID><DisplayName>minnow</DisplayName></Owner>\
             <Buckets><Bucket><Name>photos</Name>\
             <CreationDate>2024-05-01T12:30:00.000Z</CreationDate></Bucket></Buckets>\
             </ListAllMyBucketsResult>"
        );
    }

    #[test]
    fn complete_request_parses_with_namespace_and_quotes() {
        let body = br#"<?xml version="1.0" encoding="UTF-8"?>
<CompleteMultipartUpload xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Part><PartNumber>1</PartNumber><ETag>"a54357aff0632cce46d942af68356b38"</ETag></Part>
  <Part><PartNumber>2</PartNumber><ETag>0c78aef83f66abc1fa1e8477f296d394</ETag></Part>
</CompleteMultipartUpload>"#;
        let parsed: CompleteMultipartUpload = from_xml(body).unwrap();
        assert_eq!(parsed.parts.len(), 2);
        assert_eq!(parsed.parts[0].part_number, 1);
        assert_eq!(parsed.parts[0].etag, "\"a54357aff0632cce46d942af68356b38\"");
        assert_eq!(parsed.parts[1].etag, "0c78aef83f66abc1fa1e8477f296d394");
    }

    #[test]
    fn malformed_complete_request_is_rejected() {
        let err = from_xml::<CompleteMultipartUpload>(b"<CompleteMultipartUpload><Part>")
            .unwrap_err();
        assert_eq!(err.s3_error_code(), "MalformedXML");
    }

    #[test]
    fn etags_are_quoted_once() {
        assert_eq!(quoted_etag("abc"), "\"abc\"");
        assert_eq!(quoted_etag("\"abc\""), "\"abc\"");
        assert_eq!(quoted_etag("\""), "\"\"\"");
    }
}
