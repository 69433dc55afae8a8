use std::{collections::HashMap, sync::Arc};

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{
        HeaderMap, HeaderName, StatusCode,
        header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, ETAG, LAST_MODIFIED, RANGE},
    },
    response::IntoResponse,
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use minnow_common::{error::MinnowError, time::format_http_date, time::format_iso8601, types::ObjectInfo};
use minnow_storage::conditional::Conditions;
use minnow_storage::range::HttpRange;
use minnow_storage::traits::{
    CopyObjectOptions, GetObjectOptions, MetadataDirective, ObjectLayer, PutObjectOptions,
};
use percent_encoding::percent_decode_str;

use super::{
    META_PREFIX, S3Result, content_type, extract_put_metadata, header_str, header_value,
    object_body, parse_conditions, query_str, xml_response,
};
use crate::xml::{
    CopyObjectResult, ListBucketResult, ListBucketV2Result, ObjectContentXml, S3_XMLNS,
    common_prefixes, quoted_etag,
};

pub const COPY_SOURCE_HEADER: &str = "x-amz-copy-source";
const COPY_SOURCE_CONDITION_PREFIX: &str = "x-amz-copy-source-";
const METADATA_DIRECTIVE_HEADER: &str = "x-amz-metadata-directive";
const DEFAULT_MAX_KEYS: i64 = 1000;

fn write_object_headers(
    headers: &mut HeaderMap,
    info: &ObjectInfo,
    content_len: u64,
) -> Result<(), MinnowError> {
    headers.insert(CONTENT_TYPE, header_value(&info.content_type)?);
    headers.insert(CONTENT_LENGTH, header_value(&content_len.to_string())?);
    headers.insert(ETAG, header_value(&quoted_etag(&info.etag))?);
    headers.insert(LAST_MODIFIED, header_value(&format_http_date(&info.last_modified))?);
    headers.insert(ACCEPT_RANGES, header_value("bytes")?);

    for (key, value) in &info.metadata {
        let header_name = HeaderName::from_bytes(format!("{META_PREFIX}{key}").as_bytes())
            .map_err(|err| MinnowError::InvalidArgument(format!("invalid metadata key: {err}")))?;
        headers.insert(header_name, header_value(value)?);
    }
    Ok(())
}

/// Splits `x-amz-copy-source` (`[/]bucket/key`, percent-encoded) into its
/// bucket and key.
fn parse_copy_source(value: &str) -> Result<(String, String), MinnowError> {
    let invalid = || {
        MinnowError::InvalidArgument(
            "Copy Source must mention the source bucket and key: sourcebucket/sourcekey."
                .to_string(),
        )
    };
    let (path, query) = match value.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (value, None),
    };
    if let Some(query) = query
        && query.split('&').any(|pair| pair.starts_with("versionId="))
    {
        return Err(MinnowError::NotImplemented(
            "copying a specific object version".to_string(),
        ));
    }

    let decoded = percent_decode_str(path)
        .decode_utf8()
        .map_err(|_| invalid())?;
    let decoded = decoded.strip_prefix('/').unwrap_or(&decoded[..]);
    let (bucket, key) = decoded
        .split_once('/')
        .filter(|(bucket, key)| !bucket.is_empty() && !key.is_empty())
        .ok_or_else(invalid)?;
    Ok((bucket.to_string(), key.to_string()))
}

fn parse_metadata_directive(headers: &HeaderMap) -> Result<MetadataDirective, MinnowError> {
    match header_str(headers, METADATA_DIRECTIVE_HEADER) {
        None => Ok(MetadataDirective::Copy),
        Some(value) if value.eq_ignore_ascii_case("COPY") => Ok(MetadataDirective::Copy),
        Some(value) if value.eq_ignore_ascii_case("REPLACE") => Ok(MetadataDirective::Replace),
        Some(_) => Err(MinnowError::InvalidArgument(
            "Unknown metadata directive.".to_string(),
        )),
    }
}

fn parse_max_keys(query: &HashMap<String, String>) -> Result<i64, MinnowError> {
    match query.get("max-keys") {
        None => Ok(DEFAULT_MAX_KEYS),
        Some(value) => value.trim().parse::<i64>().map_err(|_| {
            MinnowError::InvalidArgument(
                "Argument maxKeys must be an integer between 0 and 2147483647.".to_string(),
            )
        }),
    }
}

fn decode_continuation_token(token: &str) -> Result<String, MinnowError> {
    let invalid =
        || MinnowError::InvalidArgument("The continuation token provided is incorrect".to_string());
    let raw = BASE64_STANDARD.decode(token).map_err(|_| invalid())?;
    String::from_utf8(raw).map_err(|_| invalid())
}

pub async fn put_object(
    State(store): State<Arc<dyn ObjectLayer>>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> S3Result {
    let data = object_body(&headers, body).await?;
    let opts = PutObjectOptions {
        content_type: content_type(&headers),
        metadata: extract_put_metadata(&headers),
        conditions: parse_conditions(&headers, ""),
    };
    let info = store.put_object(&bucket, &key, data, opts).await?;

    let mut response_headers = HeaderMap::new();
    response_headers.insert(ETAG, header_value(&quoted_etag(&info.etag))?);
    Ok((StatusCode::OK, response_headers).into_response())
}

pub async fn copy_object(
    State(store): State<Arc<dyn ObjectLayer>>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> S3Result {
    let source = header_str(&headers, COPY_SOURCE_HEADER).unwrap_or_default();
    let (src_bucket, src_key) = parse_copy_source(source)?;
    let directive = parse_metadata_directive(&headers)?;
    if src_bucket == bucket && src_key == key && directive == MetadataDirective::Copy {
        return Err(MinnowError::InvalidArgument(
            "This copy request is illegal because it is trying to copy an object to itself without changing the object's metadata."
                .to_string(),
        )
        .into());
    }

    let opts = CopyObjectOptions {
        directive,
        content_type: content_type(&headers),
        metadata: extract_put_metadata(&headers),
        source_conditions: parse_conditions(&headers, COPY_SOURCE_CONDITION_PREFIX),
    };
    let info = store
        .copy_object(&src_bucket, &src_key, &bucket, &key, opts)
        .await?;

    let payload = CopyObjectResult {
        xmlns: S3_XMLNS,
        last_modified: format_iso8601(&info.last_modified),
        etag: quoted_etag(&info.etag),
    };
    xml_response(StatusCode::OK, &payload)
}

pub async fn get_object(
    State(store): State<Arc<dyn ObjectLayer>>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> S3Result {
    let range = match header_str(&headers, RANGE.as_str()) {
        Some(value) => match HttpRange::parse(value) {
            Ok(range) => range,
            Err(_) => {
                let info = store
                    .get_object_info(&bucket, &key, &Conditions::default())
                    .await?;
                return Err(MinnowError::InvalidRange { size: info.size }.into());
            }
        },
        None => None,
    };
    let opts = GetObjectOptions {
        range,
        conditions: parse_conditions(&headers, ""),
    };
    let reply = store.get_object(&bucket, &key, opts).await?;

    let mut response_headers = HeaderMap::new();
    write_object_headers(&mut response_headers, &reply.info, reply.data.len() as u64)?;
    let status = match reply.range {
        Some(range) => {
            response_headers.insert(
                CONTENT_RANGE,
                header_value(&range.content_range(reply.info.size))?,
            );
            StatusCode::PARTIAL_CONTENT
        }
        None => StatusCode::OK,
    };
    Ok((status, response_headers, Body::from(reply.data)).into_response())
}

pub async fn head_object(
    State(store): State<Arc<dyn ObjectLayer>>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> S3Result {
    let conditions = parse_conditions(&headers, "");
    let info = store.get_object_info(&bucket, &key, &conditions).await?;

    let mut response_headers = HeaderMap::new();
    write_object_headers(&mut response_headers, &info, info.size)?;
    Ok((StatusCode::OK, response_headers).into_response())
}

pub async fn delete_object(
    State(store): State<Arc<dyn ObjectLayer>>,
    Path((bucket, key)): Path<(String, String)>,
) -> S3Result {
    match store.delete_object(&bucket, &key).await {
        Ok(()) | Err(MinnowError::ObjectNotFound { .. }) => {
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        Err(err) => Err(err.into()),
    }
}

pub async fn list_objects_v1(
    State(store): State<Arc<dyn ObjectLayer>>,
    Path(bucket): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> S3Result {
    let prefix = query_str(&query, "prefix");
    let marker = query_str(&query, "marker");
    let delimiter = query_str(&query, "delimiter");
    let max_keys = parse_max_keys(&query)?;
    let result = store
        .list_objects(&bucket, prefix, marker, delimiter, max_keys)
        .await?;

    let payload = ListBucketResult {
        xmlns: S3_XMLNS,
        name: bucket,
        prefix: prefix.to_string(),
        marker: marker.to_string(),
        next_marker: result.next_marker,
        max_keys,
        delimiter: Some(delimiter.to_string()).filter(|value| !value.is_empty()),
        is_truncated: result.is_truncated,
        contents: result.objects.into_iter().map(ObjectContentXml::from).collect(),
        common_prefixes: common_prefixes(result.prefixes),
    };
    xml_response(StatusCode::OK, &payload)
}

pub async fn list_objects_v2(
    State(store): State<Arc<dyn ObjectLayer>>,
    Path(bucket): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> S3Result {
    let prefix = query_str(&query, "prefix");
    let delimiter = query_str(&query, "delimiter");
    let start_after = query_str(&query, "start-after");
    let continuation_token = query
        .get("continuation-token")
        .filter(|token| !token.is_empty());
    let marker = match continuation_token {
        Some(token) => decode_continuation_token(token)?,
        None => start_after.to_string(),
    };
    let max_keys = parse_max_keys(&query)?;
    let result = store
        .list_objects(&bucket, prefix, &marker, delimiter, max_keys)
        .await?;

    let payload = ListBucketV2Result {
        xmlns: S3_XMLNS,
        name: bucket,
        prefix: prefix.to_string(),
        start_after: Some(start_after.to_string()).filter(|value| !value.is_empty()),
        continuation_token: continuation_token.cloned(),
        next_continuation_token: result
            .next_marker
            .as_deref()
            .map(|next| BASE64_STANDARD.encode(next)),
        key_count: result.objects.len() + result.prefixes.len(),
        max_keys,
        delimiter: Some(delimiter.to_string()).filter(|value| !value.is_empty()),
        is_truncated: result.is_truncated,
        contents: result.objects.into_iter().map(ObjectContentXml::from).collect(),
        common_prefixes: common_prefixes(result.prefixes),
    };
    xml_response(StatusCode::OK, &payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_source_accepts_both_forms() {
        assert_eq!(
            parse_copy_source("/photos/2024/cat%20one.png").unwrap(),
            ("photos".to_string(), "2024/cat one.png".to_string())
        );
        assert_eq!(
            parse_copy_source("photos/cat.png").unwrap(),
            ("photos".to_string(), "cat.png".to_string())
        );
    }

    #[test]
    fn copy_source_rejects_versions_and_missing_keys() {
        assert!(matches!(
            parse_copy_source("/photos/cat.png?versionId=3"),
            Err(MinnowError::NotImplemented(_))
        ));
        assert!(matches!(
            parse_copy_source("/photos"),
            Err(MinnowError::InvalidArgument(_))
        ));
        assert!(matches!(
            parse_copy_source("/photos/"),
            Err(MinnowError::InvalidArgument(_))
        ));
    }

    #[test]
    fn continuation_tokens_are_base64_keys() {
        let token = BASE64_STANDARD.encode("photos/cat.png");
        assert_eq!(decode_continuation_token(&token).unwrap(), "photos/cat.png");
        assert!(decode_continuation_token("***").is_err());
    }

    #[test]
    fn max_keys_must_be_numeric() {
        let mut query = HashMap::new();
        assert_eq!(parse_max_keys(&query).unwrap(), 1000);
        query.insert("max-keys".to_string(), "7".to_string());
        assert_eq!(parse_max_keys(&query).unwrap(), 7);
        query.insert("max-keys".to_string(), "many".to_string());
        assert!(parse_max_keys(&query).is_err());
    }
}
