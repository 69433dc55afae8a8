use std::sync::Arc;

use axum::Router;
use axum::body::{Body, Bytes};
use http::{HeaderMap, Method, Request, StatusCode};
use http_body_util::BodyExt;
use minnow_common::error::DiskError;
use minnow_s3_api::s3_router;
use minnow_storage::disk::rpc::{DiskRequest, decode_reply, encode_request};
use minnow_storage::disk::{DiskStore, LocalDisk};
use minnow_storage::{
    ErasureConfig, ErasureObjectLayer, ErasureSet, MultipartConfig, ObjectLayer,
    ObjectLayerConfig,
};
use tempfile::TempDir;
use tower::ServiceExt;

const HELLO_MD5_HEX: &str = "5eb63bbbe01eeed093cb22bb8f5acdc3";
const HELLO_MD5_BASE64: &str = "XrY7u+Ae7tCTyyK7j1rNww==";

struct App {
    _dirs: Vec<TempDir>,
    router: Router,
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Reply {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    fn header(&self, name: &str) -> &str {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
    }
}

/// Text of the first `<tag>` element in an XML body.
fn tag(xml: &str, name: &str) -> Option<String> {
    let open = format!("<{name}>");
    let close = format!("</{name}>");
    let start = xml.find(&open)? + open.len();
    let end = start + xml[start..].find(&close)?;
    Some(xml[start..end].to_string())
}

impl App {
    async fn new() -> Self {
        let mut dirs = Vec::new();
        let mut disks: Vec<DiskStore> = Vec::new();
        for _ in 0..4 {
            let dir = tempfile::tempdir().unwrap();
            disks.push(Arc::new(LocalDisk::new(dir.path().join("disk")).await.unwrap()));
            dirs.push(dir);
        }
        let erasure = ErasureConfig::new(2, 2, 16).unwrap();
        let set = ErasureSet::new(disks, erasure.clone()).unwrap();
        let layer: Arc<dyn ObjectLayer> = Arc::new(ErasureObjectLayer::new(
            set,
            ObjectLayerConfig {
                erasure,
                multipart: MultipartConfig { min_part_size: 5 },
                operation_timeout_ms: None,
            },
        ));
        Self {
            _dirs: dirs,
            router: s3_router(layer, Vec::new()),
        }
    }

    async fn with_bucket(bucket: &str) -> Self {
        let app = Self::new().await;
        let reply = app.call(Method::PUT, &format!("/{bucket}"), &[], "").await;
        assert_eq!(reply.status, StatusCode::OK);
        app
    }

    async fn call(
        &self,
        method: Method,
        uri: &str,
        headers: &[(&str, &str)],
        body: impl Into<Body>,
    ) -> Reply {
        let mut request = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = self
            .router
            .clone()
            .oneshot(request.body(body.into()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        Reply {
            status,
            headers,
            body,
        }
    }

    async fn put(&self, uri: &str, data: &'static str) -> Reply {
        let length = data.len().to_string();
        self.call(Method::PUT, uri, &[("content-length", length.as_str())], data)
            .await
    }
}

#[tokio::test]
async fn bucket_lifecycle() {
    let app = App::new().await;

    let created = app.call(Method::PUT, "/photos", &[], "").await;
    assert_eq!(created.status, StatusCode::OK);
    assert_eq!(created.header("location"), "/photos");

    let again = app.call(Method::PUT, "/photos", &[], "").await;
    assert_eq!(again.status, StatusCode::CONFLICT);
    assert_eq!(tag(&again.text(), "Code").as_deref(), Some("BucketAlreadyOwnedByYou"));
    assert!(!again.header("x-amz-request-id").is_empty());

    let invalid = app.call(Method::PUT, "/No_Such", &[], "").await;
    assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
    assert_eq!(tag(&invalid.text(), "Code").as_deref(), Some("InvalidBucketName"));

    assert_eq!(app.call(Method::HEAD, "/photos", &[], "").await.status, StatusCode::OK);
    let listing = app.call(Method::GET, "/", &[], "").await;
    assert_eq!(listing.status, StatusCode::OK);
    assert_eq!(listing.header("content-type"), "application/xml");
    assert_eq!(tag(&listing.text(), "Name").as_deref(), Some("photos"));

    app.put("/photos/cat.png", "meow").await;
    let busy = app.call(Method::DELETE, "/photos", &[], "").await;
    assert_eq!(busy.status, StatusCode::CONFLICT);
    assert_eq!(tag(&busy.text(), "Code").as_deref(), Some("BucketNotEmpty"));

    app.call(Method::DELETE, "/photos/cat.png", &[], "").await;
    let deleted = app.call(Method::DELETE, "/photos", &[], "").await;
    assert_eq!(deleted.status, StatusCode::NO_CONTENT);
    let gone = app.call(Method::HEAD, "/photos", &[], "").await;
    assert_eq!(gone.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn put_get_and_head_object() {
    let app = App::with_bucket("photos").await;

    let put = app
        .call(
            Method::PUT,
            "/photos/notes/hello.txt",
            &[
                ("content-length", "11"),
                ("content-type", "text/plain"),
                ("x-amz-meta-author", "ada"),
                ("content-md5", HELLO_MD5_BASE64),
            ],
            "hello world",
        )
        .await;
    assert_eq!(put.status, StatusCode::OK);
    assert_eq!(put.header("etag"), format!("\"{HELLO_MD5_HEX}\""));

    let get = app.call(Method::GET, "/photos/notes/hello.txt", &[], "").await;
    assert_eq!(get.status, StatusCode::OK);
    assert_eq!(get.body.as_ref(), b"hello world");
    assert_eq!(get.header("content-type"), "text/plain");
    assert_eq!(get.header("content-length"), "11");
    assert_eq!(get.header("x-amz-meta-author"), "ada");
    assert_eq!(get.header("accept-ranges"), "bytes");
    assert!(get.header("last-modified").ends_with("GMT"));

    let head = app.call(Method::HEAD, "/photos/notes/hello.txt", &[], "").await;
    assert_eq!(head.status, StatusCode::OK);
    assert_eq!(head.header("content-length"), "11");
    assert_eq!(head.header("etag"), format!("\"{HELLO_MD5_HEX}\""));
    assert!(head.body.is_empty());
}

#[tokio::test]
async fn bodies_without_length_are_buffered() {
    let app = App::with_bucket("photos").await;
    let put = app.call(Method::PUT, "/photos/chunked", &[], "hello world").await;
    assert_eq!(put.status, StatusCode::OK);
    assert_eq!(put.header("etag"), format!("\"{HELLO_MD5_HEX}\""));
}

#[tokio::test]
async fn digest_mismatch_is_rejected() {
    let app = App::with_bucket("photos").await;
    let reply = app
        .call(
            Method::PUT,
            "/photos/hello.txt",
            &[("content-length", "11"), ("content-md5", HELLO_MD5_BASE64)],
            "hello there",
        )
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(tag(&reply.text(), "Code").as_deref(), Some("BadDigest"));

    let missing = app.call(Method::GET, "/photos/hello.txt", &[], "").await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
    assert_eq!(tag(&missing.text(), "Code").as_deref(), Some("NoSuchKey"));
    assert_eq!(tag(&missing.text(), "Resource").as_deref(), Some("/photos/hello.txt"));
}

#[tokio::test]
async fn short_bodies_are_incomplete() {
    let app = App::with_bucket("photos").await;
    let reply = app
        .call(Method::PUT, "/photos/short", &[("content-length", "20")], "hello")
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(tag(&reply.text(), "Code").as_deref(), Some("IncompleteBody"));
}

#[tokio::test]
async fn range_requests() {
    let app = App::with_bucket("photos").await;
    app.put("/photos/hello.txt", "hello world").await;

    let head = app
        .call(Method::GET, "/photos/hello.txt", &[("range", "bytes=0-4")], "")
        .await;
    assert_eq!(head.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(head.body.as_ref(), b"hello");
    assert_eq!(head.header("content-range"), "bytes 0-4/11");
    assert_eq!(head.header("content-length"), "5");

    let tail = app
        .call(Method::GET, "/photos/hello.txt", &[("range", "bytes=-5")], "")
        .await;
    assert_eq!(tail.body.as_ref(), b"world");

    let beyond = app
        .call(Method::GET, "/photos/hello.txt", &[("range", "bytes=20-30")], "")
        .await;
    assert_eq!(beyond.status, StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(beyond.header("content-range"), "bytes */11");

    let garbled = app
        .call(Method::GET, "/photos/hello.txt", &[("range", "bytes=abc")], "")
        .await;
    assert_eq!(garbled.status, StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(garbled.header("content-range"), "bytes */11");

    let multi = app
        .call(Method::GET, "/photos/hello.txt", &[("range", "bytes=0-1,4-5")], "")
        .await;
    assert_eq!(multi.status, StatusCode::OK);
    assert_eq!(multi.body.as_ref(), b"hello world");
}

#[tokio::test]
async fn conditional_requests() {
    let app = App::with_bucket("photos").await;
    let etag = app.put("/photos/hello.txt", "hello world").await.header("etag").to_string();

    let cached = app
        .call(Method::GET, "/photos/hello.txt", &[("if-none-match", etag.as_str())], "")
        .await;
    assert_eq!(cached.status, StatusCode::NOT_MODIFIED);
    assert_eq!(cached.header("etag"), etag);
    assert!(cached.body.is_empty());

    let stale = app
        .call(Method::GET, "/photos/hello.txt", &[("if-match", "\"0000\"")], "")
        .await;
    assert_eq!(stale.status, StatusCode::PRECONDITION_FAILED);

    let guarded = app
        .call(
            Method::PUT,
            "/photos/hello.txt",
            &[("content-length", "3"), ("if-none-match", "*")],
            "new",
        )
        .await;
    assert_eq!(guarded.status, StatusCode::PRECONDITION_FAILED);
    let unchanged = app.call(Method::GET, "/photos/hello.txt", &[], "").await;
    assert_eq!(unchanged.body.as_ref(), b"hello world");
}

#[tokio::test]
async fn copy_object() {
    let app = App::with_bucket("photos").await;
    app.call(
        Method::PUT,
        "/photos/src.txt",
        &[("content-length", "11"), ("x-amz-meta-tone", "warm")],
        "hello world",
    )
    .await;

    let copied = app
        .call(
            Method::PUT,
            "/photos/copies/dst%20one.txt",
            &[("x-amz-copy-source", "/photos/src.txt")],
            "",
        )
        .await;
    assert_eq!(copied.status, StatusCode::OK);
    assert!(copied.text().contains("<CopyObjectResult"));
    assert!(copied.text().contains(HELLO_MD5_HEX));

    let dst = app.call(Method::GET, "/photos/copies/dst%20one.txt", &[], "").await;
    assert_eq!(dst.body.as_ref(), b"hello world");
    assert_eq!(dst.header("x-amz-meta-tone"), "warm");

    let onto_itself = app
        .call(
            Method::PUT,
            "/photos/src.txt",
            &[("x-amz-copy-source", "photos/src.txt")],
            "",
        )
        .await;
    assert_eq!(onto_itself.status, StatusCode::BAD_REQUEST);

    let missing = app
        .call(
            Method::PUT,
            "/photos/dst.txt",
            &[("x-amz-copy-source", "/photos/nope.txt")],
            "",
        )
        .await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
    assert_eq!(tag(&missing.text(), "Code").as_deref(), Some("NoSuchKey"));
}

#[tokio::test]
async fn listings() {
    let app = App::with_bucket("photos").await;
    for key in ["a/1", "a/2", "b"] {
        app.put(&format!("/photos/{key}"), "x").await;
    }

    let grouped = app.call(Method::GET, "/photos?delimiter=/", &[], "").await;
    assert_eq!(grouped.status, StatusCode::OK);
    let text = grouped.text();
    assert!(text.contains("<CommonPrefixes><Prefix>a/</Prefix></CommonPrefixes>"));
    assert_eq!(tag(&text, "Key").as_deref(), Some("b"));
    assert_eq!(tag(&text, "IsTruncated").as_deref(), Some("false"));

    let first = app
        .call(Method::GET, "/photos?list-type=2&max-keys=1", &[], "")
        .await;
    let text = first.text();
    assert_eq!(tag(&text, "KeyCount").as_deref(), Some("1"));
    assert_eq!(tag(&text, "Key").as_deref(), Some("a/1"));
    assert_eq!(tag(&text, "IsTruncated").as_deref(), Some("true"));
    let token = tag(&text, "NextContinuationToken").unwrap();

    let second = app
        .call(
            Method::GET,
            &format!("/photos?list-type=2&max-keys=1&continuation-token={token}"),
            &[],
            "",
        )
        .await;
    assert_eq!(tag(&second.text(), "Key").as_deref(), Some("a/2"));

    let bad = app.call(Method::GET, "/photos?max-keys=lots", &[], "").await;
    assert_eq!(bad.status, StatusCode::BAD_REQUEST);
    assert_eq!(tag(&bad.text(), "Code").as_deref(), Some("InvalidArgument"));

    let negative = app.call(Method::GET, "/photos?max-keys=-1", &[], "").await;
    assert_eq!(negative.status, StatusCode::BAD_REQUEST);

    let missing = app.call(Method::GET, "/nobody", &[], "").await;
    assert_eq!(tag(&missing.text(), "Code").as_deref(), Some("NoSuchBucket"));
}

#[tokio::test]
async fn multipart_round_trip() {
    let app = App::with_bucket("photos").await;

    let initiated = app
        .call(Method::POST, "/photos/big.bin?uploads", &[("content-type", "video/mp4")], "")
        .await;
    assert_eq!(initiated.status, StatusCode::OK);
    let upload_id = tag(&initiated.text(), "UploadId").unwrap();

    let mut etags = Vec::new();
    for (number, data) in [(1, "hello"), (2, "world")] {
        let reply = app
            .put(
                &format!("/photos/big.bin?partNumber={number}&uploadId={upload_id}"),
                data,
            )
            .await;
        assert_eq!(reply.status, StatusCode::OK);
        etags.push(reply.header("etag").to_string());
    }

    let parts = app
        .call(Method::GET, &format!("/photos/big.bin?uploadId={upload_id}"), &[], "")
        .await;
    assert_eq!(parts.status, StatusCode::OK);
    assert_eq!(parts.text().matches("<Part>").count(), 2);

    let uploads = app.call(Method::GET, "/photos?uploads", &[], "").await;
    assert_eq!(tag(&uploads.text(), "UploadId").as_deref(), Some(upload_id.as_str()));

    let complete = format!(
        "<CompleteMultipartUpload>\
         <Part><PartNumber>1</PartNumber><ETag>{}</ETag></Part>\
         <Part><PartNumber>2</PartNumber><ETag>{}</ETag></Part>\
         </CompleteMultipartUpload>",
        etags[0], etags[1]
    );
    let done = app
        .call(
            Method::POST,
            &format!("/photos/big.bin?uploadId={upload_id}"),
            &[("host", "minnow.local")],
            complete,
        )
        .await;
    assert_eq!(done.status, StatusCode::OK);
    assert!(done.text().contains("<CompleteMultipartUploadResult"));
    assert_eq!(
        tag(&done.text(), "Location").as_deref(),
        Some("http://minnow.local/photos/big.bin")
    );
    assert!(done.text().contains("-2"));

    let object = app.call(Method::GET, "/photos/big.bin", &[], "").await;
    assert_eq!(object.body.as_ref(), b"helloworld");
    assert_eq!(object.header("content-type"), "video/mp4");
    assert!(object.header("etag").ends_with("-2\""));

    let finished = app
        .call(Method::GET, &format!("/photos/big.bin?uploadId={upload_id}"), &[], "")
        .await;
    assert_eq!(finished.status, StatusCode::NOT_FOUND);
    assert_eq!(tag(&finished.text(), "Code").as_deref(), Some("NoSuchUpload"));
}

#[tokio::test]
async fn small_parts_fail_with_a_success_status() {
    let app = App::with_bucket("photos").await;
    let initiated = app.call(Method::POST, "/photos/big.bin?uploads", &[], "").await;
    let upload_id = tag(&initiated.text(), "UploadId").unwrap();

    let first = app
        .put(&format!("/photos/big.bin?partNumber=1&uploadId={upload_id}"), "hi")
        .await;
    let second = app
        .put(&format!("/photos/big.bin?partNumber=2&uploadId={upload_id}"), "there")
        .await;
    let complete = format!(
        "<CompleteMultipartUpload>\
         <Part><PartNumber>1</PartNumber><ETag>{}</ETag></Part>\
         <Part><PartNumber>2</PartNumber><ETag>{}</ETag></Part>\
         </CompleteMultipartUpload>",
        first.header("etag"),
        second.header("etag")
    );
    let reply = app
        .call(Method::POST, &format!("/photos/big.bin?uploadId={upload_id}"), &[], complete)
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(tag(&reply.text(), "Code").as_deref(), Some("EntityTooSmall"));

    let malformed = app
        .call(
            Method::POST,
            &format!("/photos/big.bin?uploadId={upload_id}"),
            &[],
            "<CompleteMultipartUpload><Part>",
        )
        .await;
    assert_eq!(malformed.status, StatusCode::BAD_REQUEST);
    assert_eq!(tag(&malformed.text(), "Code").as_deref(), Some("MalformedXML"));
}

#[tokio::test]
async fn abort_is_idempotent() {
    let app = App::with_bucket("photos").await;
    let initiated = app.call(Method::POST, "/photos/big.bin?uploads", &[], "").await;
    let upload_id = tag(&initiated.text(), "UploadId").unwrap();

    for _ in 0..2 {
        let reply = app
            .call(Method::DELETE, &format!("/photos/big.bin?uploadId={upload_id}"), &[], "")
            .await;
        assert_eq!(reply.status, StatusCode::NO_CONTENT);
    }
    let uploads = app.call(Method::GET, "/photos?uploads", &[], "").await;
    assert_eq!(uploads.text().matches("<Upload>").count(), 0);

    let late = app
        .put(&format!("/photos/big.bin?partNumber=1&uploadId={upload_id}"), "hello")
        .await;
    assert_eq!(late.status, StatusCode::NOT_FOUND);

    let bad_limit = app.call(Method::GET, "/photos?uploads&max-uploads=-1", &[], "").await;
    assert_eq!(bad_limit.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn bucket_policy() {
    let app = App::with_bucket("photos").await;
    let policy = r#"{"Version":"2012-10-17","Statement":[]}"#;

    let missing = app.call(Method::GET, "/photos?policy", &[], "").await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
    assert_eq!(tag(&missing.text(), "Code").as_deref(), Some("NoSuchBucketPolicy"));

    let put = app.call(Method::PUT, "/photos?policy", &[], policy).await;
    assert_eq!(put.status, StatusCode::NO_CONTENT);
    let get = app.call(Method::GET, "/photos?policy", &[], "").await;
    assert_eq!(get.status, StatusCode::OK);
    assert_eq!(get.header("content-type"), "application/json");
    assert_eq!(get.text(), policy);

    let invalid = app.call(Method::PUT, "/photos?policy", &[], "{not json").await;
    assert_eq!(invalid.status, StatusCode::BAD_REQUEST);

    let deleted = app.call(Method::DELETE, "/photos?policy", &[], "").await;
    assert_eq!(deleted.status, StatusCode::NO_CONTENT);
    let after = app.call(Method::GET, "/photos?policy", &[], "").await;
    assert_eq!(after.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unsupported_features_answer_not_implemented() {
    let app = App::with_bucket("photos").await;
    for (method, uri) in [
        (Method::GET, "/photos?acl"),
        (Method::PUT, "/photos?versioning"),
        (Method::GET, "/photos?lifecycle"),
        (Method::PUT, "/photos/cat.png?tagging"),
        (Method::POST, "/photos?delete"),
        (Method::GET, "/photos/object?policy"),
        (Method::GET, "/nobucket/object?policy"),
    ] {
        let reply = app.call(method, uri, &[], "").await;
        assert_eq!(reply.status, StatusCode::NOT_IMPLEMENTED, "{uri}");
        assert_eq!(tag(&reply.text(), "Code").as_deref(), Some("NotImplemented"));
    }
}

#[tokio::test]
async fn deleting_a_missing_object_succeeds() {
    let app = App::with_bucket("photos").await;
    let reply = app.call(Method::DELETE, "/photos/never-there", &[], "").await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn liveness_endpoint_answers_ok() {
    let app = App::new().await;
    let reply = app.call(Method::GET, "/minnow/health/live", &[], "").await;
    assert_eq!(reply.status, StatusCode::OK);
}

#[tokio::test]
async fn storage_rpc_rejects_unknown_disks_and_garbage() {
    let app = App::new().await;
    let request = encode_request(&DiskRequest::ListVolumes).unwrap();
    let reply = app
        .call(
            Method::POST,
            "/minnow/storage/v1/list-volumes?disk=/not/exported",
            &[],
            request,
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(decode_reply(&reply.body).unwrap(), Err(DiskError::DiskUnavailable));

    let garbage = app
        .call(Method::POST, "/minnow/storage/v1/list-volumes?disk=/x", &[], "oops")
        .await;
    assert_eq!(garbage.status, StatusCode::BAD_REQUEST);

    let mismatched = app
        .call(
            Method::POST,
            "/minnow/storage/v1/make-volume?disk=/x",
            &[],
            encode_request(&DiskRequest::ListVolumes).unwrap(),
        )
        .await;
    assert_eq!(mismatched.status, StatusCode::BAD_REQUEST);
}
