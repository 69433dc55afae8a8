use std::{collections::HashMap, sync::Arc};

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header::{ETAG, HOST}},
    response::IntoResponse,
};
use minnow_common::error::MinnowError;
use minnow_storage::traits::{CompletePart, ObjectLayer, PutObjectOptions};
use tracing::debug;

use super::{
    S3Result, content_type, extract_put_metadata, header_str, header_value, object_body,
    query_str, xml_response,
};
use crate::xml::{
    CompleteMultipartUpload, CompleteMultipartUploadResult, InitiateMultipartUploadResult,
    ListMultipartUploadsResult, ListPartsResult, S3_XMLNS, from_xml, quoted_etag,
};

const DEFAULT_MAX_PARTS: i64 = 1000;
const DEFAULT_MAX_UPLOADS: i64 = 1000;

fn parse_upload_id(query: &HashMap<String, String>) -> Result<&str, MinnowError> {
    query
        .get("uploadId")
        .map(String::as_str)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| MinnowError::InvalidArgument("missing uploadId".to_string()))
}

fn parse_part_number(query: &HashMap<String, String>) -> Result<u32, MinnowError> {
    query
        .get("partNumber")
        .and_then(|value| value.trim().parse::<u32>().ok())
        .ok_or_else(|| {
            MinnowError::InvalidArgument(
                "Part number must be an integer between 1 and 10000, inclusive.".to_string(),
            )
        })
}

/// Reads an integer query argument, falling back to `default` when absent.
fn parse_limit(
    query: &HashMap<String, String>,
    name: &str,
    default: i64,
    message: &str,
) -> Result<i64, MinnowError> {
    match query.get(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse::<i64>()
            .map_err(|_| MinnowError::InvalidArgument(message.to_string())),
    }
}

pub async fn create_multipart_upload(
    State(store): State<Arc<dyn ObjectLayer>>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> S3Result {
    let opts = PutObjectOptions {
        content_type: content_type(&headers),
        metadata: extract_put_metadata(&headers),
        ..PutObjectOptions::default()
    };
    let upload_id = store.create_multipart_upload(&bucket, &key, opts).await?;

    let payload = InitiateMultipartUploadResult {
        xmlns: S3_XMLNS,
        bucket,
        key,
        upload_id,
    };
    xml_response(StatusCode::OK, &payload)
}

pub async fn upload_part(
    State(store): State<Arc<dyn ObjectLayer>>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Body,
) -> S3Result {
    let upload_id = parse_upload_id(&query)?;
    let part_number = parse_part_number(&query)?;
    let data = object_body(&headers, body).await?;
    let part = store
        .upload_part(&bucket, &key, upload_id, part_number, data)
        .await?;

    let mut response_headers = HeaderMap::new();
    response_headers.insert(ETAG, header_value(&quoted_etag(&part.etag))?);
    Ok((StatusCode::OK, response_headers).into_response())
}

pub async fn complete_multipart_upload(
    State(store): State<Arc<dyn ObjectLayer>>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> S3Result {
    let upload_id = parse_upload_id(&query)?;
    let payload: CompleteMultipartUpload = from_xml(&body)?;
    let parts = payload
        .parts
        .into_iter()
        .map(|part| CompletePart {
            part_number: part.part_number,
            etag: part.etag,
        })
        .collect::<Vec<_>>();
    debug!(bucket = %bucket, key = %key, upload_id, parts = parts.len(), "completing upload");

    let info = store
        .complete_multipart_upload(&bucket, &key, upload_id, parts)
        .await?;

    let host = header_str(&headers, HOST.as_str()).unwrap_or("localhost");
    let payload = CompleteMultipartUploadResult {
        xmlns: S3_XMLNS,
        location: format!("http://{host}/{bucket}/{key}"),
        bucket,
        key,
        etag: quoted_etag(&info.etag),
    };
    xml_response(StatusCode::OK, &payload)
}

pub async fn abort_multipart_upload(
    State(store): State<Arc<dyn ObjectLayer>>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> S3Result {
    let upload_id = parse_upload_id(&query)?;
    store.abort_multipart_upload(&bucket, &key, upload_id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn list_parts(
    State(store): State<Arc<dyn ObjectLayer>>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> S3Result {
    let upload_id = parse_upload_id(&query)?;
    let max_parts = parse_limit(
        &query,
        "max-parts",
        DEFAULT_MAX_PARTS,
        "Argument maxParts must be an integer between 1 and 10000.",
    )?;
    let part_number_marker = match query.get("part-number-marker") {
        None => 0,
        Some(value) => value.trim().parse::<u32>().map_err(|_| {
            MinnowError::InvalidArgument(
                "Argument partNumberMarker must be an integer.".to_string(),
            )
        })?,
    };
    let result = store
        .list_parts(&bucket, &key, upload_id, part_number_marker, max_parts)
        .await?;
    xml_response(StatusCode::OK, &ListPartsResult::from(result))
}

pub async fn list_multipart_uploads(
    State(store): State<Arc<dyn ObjectLayer>>,
    Path(bucket): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> S3Result {
    let max_uploads = parse_limit(
        &query,
        "max-uploads",
        DEFAULT_MAX_UPLOADS,
        "Argument max-uploads must be an integer between 0 and 2147483647.",
    )?;
    let result = store
        .list_multipart_uploads(
            &bucket,
            query_str(&query, "prefix"),
            query_str(&query, "delimiter"),
            query_str(&query, "key-marker"),
            query_str(&query, "upload-id-marker"),
            max_uploads,
        )
        .await?;
    xml_response(
        StatusCode::OK,
        &ListMultipartUploadsResult::new(bucket, result),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn part_numbers_must_be_unsigned_integers() {
        assert_eq!(parse_part_number(&query(&[("partNumber", "7")])).unwrap(), 7);
        assert!(parse_part_number(&query(&[("partNumber", "-1")])).is_err());
        assert!(parse_part_number(&query(&[])).is_err());
    }

    #[test]
    fn upload_id_is_required() {
        assert_eq!(parse_upload_id(&query(&[("uploadId", "u1")])).unwrap(), "u1");
        assert!(parse_upload_id(&query(&[("uploadId", "")])).is_err());
    }

    #[test]
    fn limits_default_when_absent() {
        let limits = query(&[("max-parts", "oops")]);
        assert_eq!(parse_limit(&limits, "max-uploads", 1000, "bad").unwrap(), 1000);
        let err = parse_limit(&limits, "max-parts", 1000, "bad").unwrap_err();
        assert_eq!(err.s3_message(), "bad");
    }
}
