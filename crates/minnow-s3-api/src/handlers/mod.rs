use std::collections::HashMap;
use std::io;

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use futures::{StreamExt, TryStreamExt};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, StatusCode};
use minnow_common::error::MinnowError;
use minnow_common::time::parse_http_date;
use minnow_storage::conditional::Conditions;
use minnow_storage::traits::PutObjReader;
use serde::Serialize;
use tokio_util::io::StreamReader;

use crate::error::S3Error;
use crate::xml;

pub mod bucket;
pub mod health;
pub mod multipart;
pub mod object;
pub mod policy;
pub mod storage_rpc;

pub type S3Result = Result<Response, S3Error>;

pub const META_PREFIX: &str = "x-amz-meta-";
const CONTENT_MD5: &str = "content-md5";
/// Bodies sent without a `Content-Length` are buffered up to this size.
const MAX_UNSIZED_BODY: usize = 1 << 30;

pub fn xml_response<T: Serialize>(status: StatusCode, payload: &T) -> S3Result {
    let body = xml::to_xml(payload)?;
    Ok((status, [(CONTENT_TYPE, xml::CONTENT_TYPE_XML)], body).into_response())
}

pub fn header_value(value: &str) -> Result<HeaderValue, MinnowError> {
    HeaderValue::from_str(value)
        .map_err(|err| MinnowError::InvalidArgument(format!("invalid header value: {err}")))
}

/// Trimmed, non-empty header value.
pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

pub fn query_str<'a>(query: &'a HashMap<String, String>, name: &str) -> &'a str {
    query.get(name).map(String::as_str).unwrap_or_default()
}

pub fn content_type(headers: &HeaderMap) -> Option<String> {
    header_str(headers, CONTENT_TYPE.as_str()).map(str::to_string)
}

pub fn extract_put_metadata(headers: &HeaderMap) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    for (name, value) in headers {
        if let Some(meta_key) = name.as_str().strip_prefix(META_PREFIX)
            && let Ok(meta_value) = value.to_str()
        {
            metadata.insert(meta_key.to_string(), meta_value.to_string());
        }
    }
    metadata
}

/// Reads `If-*` headers, optionally under a prefix such as
/// `x-amz-copy-source-`. Dates that do not parse are ignored.
pub fn parse_conditions(headers: &HeaderMap, prefix: &str) -> Conditions {
    let header = |name: &str| header_str(headers, &format!("{prefix}{name}"));
    Conditions {
        if_match: header("if-match").map(str::to_string),
        if_none_match: header("if-none-match").map(str::to_string),
        if_modified_since: header("if-modified-since").and_then(parse_http_date),
        if_unmodified_since: header("if-unmodified-since").and_then(parse_http_date),
    }
}

/// Decodes `Content-MD5` into the hex digest the object layer checks.
pub fn content_md5(headers: &HeaderMap) -> Result<Option<String>, MinnowError> {
    let Some(value) = headers.get(CONTENT_MD5) else {
        return Ok(None);
    };
    let invalid = || MinnowError::InvalidArgument("The Content-MD5 you specified is not valid.".to_string());
    let value = value.to_str().map_err(|_| invalid())?;
    let digest = BASE64_STANDARD.decode(value.trim()).map_err(|_| invalid())?;
    if digest.len() != 16 {
        return Err(invalid());
    }
    Ok(Some(hex::encode(digest)))
}

/// Wraps a request body for the object layer. Sized bodies are streamed;
/// the object layer rejects a stream that ends early.
pub async fn object_body(headers: &HeaderMap, body: Body) -> Result<PutObjReader, MinnowError> {
    let declared = match headers.get(CONTENT_LENGTH) {
        Some(value) => Some(
            value
                .to_str()
                .ok()
                .and_then(|value| value.trim().parse::<u64>().ok())
                .ok_or_else(|| MinnowError::InvalidArgument("invalid Content-Length".to_string()))?,
        ),
        None => None,
    };

    let reader = match declared {
        Some(size) => {
            let stream = body.into_data_stream().map_err(io::Error::other).boxed();
            PutObjReader::new(Box::new(StreamReader::new(stream)), size)
        }
        None => {
            let data = axum::body::to_bytes(body, MAX_UNSIZED_BODY)
                .await
                .map_err(|err| {
                    MinnowError::InvalidArgument(format!("failed to read request body: {err}"))
                })?;
            PutObjReader::from_bytes(data)
        }
    };

    Ok(match content_md5(headers)? {
        Some(md5) => reader.with_content_md5(md5),
        None => reader,
    })
}

#[cfg(test)]
mod tests {
    use http::header::IF_MODIFIED_SINCE;

    use super::*;

    #[test]
    fn metadata_headers_lose_their_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert("x-amz-meta-camera", HeaderValue::from_static("x100"));
        headers.insert("x-amz-acl", HeaderValue::from_static("private"));
        let metadata = extract_put_metadata(&headers);
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata["camera"], "x100");
    }

    #[test]
    fn content_md5_is_decoded_to_hex() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_MD5, HeaderValue::from_static("XrY7u+Ae7tCTyyK7j1rNww=="));
        assert_eq!(
            content_md5(&headers).unwrap().as_deref(),
            Some("5eb63bbbe01eeed093cb22bb8f5acdc3")
        );

        headers.insert(CONTENT_MD5, HeaderValue::from_static("bm90LWEtZGlnZXN0"));
        assert!(matches!(content_md5(&headers), Err(MinnowError::InvalidArgument(_))));
    }

    #[test]
    fn unparsable_condition_dates_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(IF_MODIFIED_SINCE, HeaderValue::from_static("last tuesday"));
        headers.insert("x-amz-copy-source-if-match", HeaderValue::from_static("\"abc\""));
        assert!(parse_conditions(&headers, "").is_empty());

        let source = parse_conditions(&headers, "x-amz-copy-source-");
        assert_eq!(source.if_match.as_deref(), Some("\"abc\""));
    }
}
