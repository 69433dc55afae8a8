use axum::response::{IntoResponse, Response};
use http::header::{CONTENT_RANGE, CONTENT_TYPE, ETAG, LAST_MODIFIED};
use http::{HeaderValue, StatusCode};
use minnow_common::error::MinnowError;
use minnow_common::time::format_http_date;
use tracing::{error, warn};
use uuid::Uuid;

use crate::xml::{self, ErrorXml};

pub const REQUEST_ID_HEADER: &str = "x-amz-request-id";

pub struct S3Error(pub MinnowError);

impl S3Error {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            MinnowError::BucketNotFound(_)
            | MinnowError::ObjectNotFound { .. }
            | MinnowError::UploadNotFound(_)
            | MinnowError::PolicyNotFound(_)
            | MinnowError::ObjectNameTooLong(_) => StatusCode::NOT_FOUND,
            MinnowError::BucketAlreadyExists(_) | MinnowError::BucketNotEmpty(_) => {
                StatusCode::CONFLICT
            }
            MinnowError::InvalidBucketName(_)
            | MinnowError::InvalidObjectName(_)
            | MinnowError::InvalidArgument(_)
            | MinnowError::InvalidPart(_)
            | MinnowError::InvalidPartOrder
            | MinnowError::MalformedXml(_)
            | MinnowError::BadDigest
            | MinnowError::IncompleteBody { .. } => StatusCode::BAD_REQUEST,
            // Kept on the success status for client compatibility.
            MinnowError::EntityTooSmall { .. } => StatusCode::OK,
            MinnowError::InvalidRange { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            MinnowError::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            MinnowError::NotModified { .. } => StatusCode::NOT_MODIFIED,
            MinnowError::InsufficientReadQuorum { .. }
            | MinnowError::InsufficientWriteQuorum { .. }
            | MinnowError::OperationTimedOut(_) => StatusCode::SERVICE_UNAVAILABLE,
            MinnowError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            MinnowError::FileCorrupt(_)
            | MinnowError::Disk { .. }
            | MinnowError::InternalError(_)
            | MinnowError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn resource(&self) -> String {
        match &self.0 {
            MinnowError::BucketNotFound(bucket)
            | MinnowError::BucketAlreadyExists(bucket)
            | MinnowError::BucketNotEmpty(bucket)
            | MinnowError::InvalidBucketName(bucket)
            | MinnowError::PolicyNotFound(bucket) => format!("/{bucket}"),
            MinnowError::ObjectNotFound { bucket, key } => format!("/{bucket}/{key}"),
            MinnowError::InvalidObjectName(key) | MinnowError::ObjectNameTooLong(key) => {
                format!("/{key}")
            }
            _ => "/".to_string(),
        }
    }
}

impl IntoResponse for S3Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let request_id = Uuid::new_v4().simple().to_string();
        if status.is_server_error() {
            error!(status = %status, request_id = %request_id, error = %self.0, "request failed");
        } else if status != StatusCode::NOT_MODIFIED {
            warn!(status = %status, request_id = %request_id, error = %self.0, "request rejected");
        }

        let mut response = match &self.0 {
            MinnowError::NotModified {
                etag,
                last_modified,
            } => {
                let mut response = status.into_response();
                let headers = response.headers_mut();
                if let Ok(value) = HeaderValue::from_str(&format!("\"{etag}\"")) {
                    headers.insert(ETAG, value);
                }
                if let Ok(value) = HeaderValue::from_str(&format_http_date(last_modified)) {
                    headers.insert(LAST_MODIFIED, value);
                }
                response
            }
            err => {
                let payload = ErrorXml {
                    code: err.s3_error_code().to_string(),
                    message: err.s3_message(),
                    resource: self.resource(),
                    request_id: request_id.clone(),
                };
                let body = xml::to_xml(&payload).unwrap_or_default();
                (status, [(CONTENT_TYPE, xml::CONTENT_TYPE_XML)], body).into_response()
            }
        };

        if let MinnowError::InvalidRange { size } = &self.0
            && let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}"))
        {
            response.headers_mut().insert(CONTENT_RANGE, value);
        }
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        response
    }
}

impl From<MinnowError> for S3Error {
    fn from(err: MinnowError) -> Self {
        S3Error(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_s3() {
        let cases = [
            (MinnowError::BucketNotFound("b".into()), StatusCode::NOT_FOUND),
            (MinnowError::BucketNotEmpty("b".into()), StatusCode::CONFLICT),
            (MinnowError::ObjectNameTooLong("k".into()), StatusCode::NOT_FOUND),
            (
                MinnowError::EntityTooSmall {
                    part_number: 1,
                    size: 1,
                    min_size: 5,
                },
                StatusCode::OK,
            ),
            (MinnowError::InvalidRange { size: 3 }, StatusCode::RANGE_NOT_SATISFIABLE),
            (
                MinnowError::InsufficientWriteQuorum { have: 1, need: 3 },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (MinnowError::NotImplemented("acl".into()), StatusCode::NOT_IMPLEMENTED),
        ];
        for (err, status) in cases {
            assert_eq!(S3Error(err).status(), status);
        }
    }

    #[test]
    fn invalid_range_reports_object_size() {
        let response = S3Error(MinnowError::InvalidRange { size: 11 }).into_response();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[CONTENT_RANGE], "bytes */11");
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    }
}
