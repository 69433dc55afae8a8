use std::{collections::HashMap, sync::Arc};

use axum::{
    Router,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{get, post, put},
};
use minnow_common::error::MinnowError;
use minnow_storage::disk::DiskStore;
use minnow_storage::disk::rpc::RPC_PREFIX;
use minnow_storage::traits::ObjectLayer;
use tower_http::trace::TraceLayer;

use crate::error::S3Error;
use crate::handlers::object::COPY_SOURCE_HEADER;
use crate::handlers::{
    S3Result, bucket, health, multipart, object, policy, storage_rpc,
};

pub const HEALTH_LIVE_PATH: &str = "/minnow/health/live";

const UNSUPPORTED_BUCKET_SUBRESOURCES: &[&str] = &[
    "accelerate",
    "acl",
    "analytics",
    "cors",
    "delete",
    "encryption",
    "intelligent-tiering",
    "inventory",
    "lifecycle",
    "logging",
    "metrics",
    "notification",
    "object-lock",
    "ownershipControls",
    "policyStatus",
    "publicAccessBlock",
    "replication",
    "requestPayment",
    "tagging",
    "versioning",
    "versions",
    "website",
];

const UNSUPPORTED_OBJECT_SUBRESOURCES: &[&str] = &[
    "acl",
    "attributes",
    "legal-hold",
    "policy",
    "restore",
    "retention",
    "select",
    "tagging",
    "torrent",
    "versionId",
];

fn reject_unsupported(
    query: &HashMap<String, String>,
    unsupported: &[&str],
) -> Result<(), S3Error> {
    match unsupported.iter().find(|name| query.contains_key(**name)) {
        Some(name) => Err(MinnowError::NotImplemented(format!("subresource {name}")).into()),
        None => Ok(()),
    }
}

async fn put_bucket_dispatch(
    State(store): State<Arc<dyn ObjectLayer>>,
    Path(bucket): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> S3Result {
    reject_unsupported(&query, UNSUPPORTED_BUCKET_SUBRESOURCES)?;
    if query.contains_key("policy") {
        policy::put_bucket_policy(State(store), Path(bucket), body).await
    } else {
        bucket::make_bucket(State(store), Path(bucket)).await
    }
}

async fn get_bucket_dispatch(
    State(store): State<Arc<dyn ObjectLayer>>,
    Path(bucket): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> S3Result {
    reject_unsupported(&query, UNSUPPORTED_BUCKET_SUBRESOURCES)?;
    if query.contains_key("policy") {
        policy::get_bucket_policy(State(store), Path(bucket)).await
    } else if query.contains_key("uploads") {
        multipart::list_multipart_uploads(State(store), Path(bucket), Query(query)).await
    } else if query.contains_key("location") {
        bucket::get_bucket_location(State(store), Path(bucket)).await
    } else if query.get("list-type").is_some_and(|v| v == "2") {
        object::list_objects_v2(State(store), Path(bucket), Query(query)).await
    } else {
        object::list_objects_v1(State(store), Path(bucket), Query(query)).await
    }
}

async fn delete_bucket_dispatch(
    State(store): State<Arc<dyn ObjectLayer>>,
    Path(bucket): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> S3Result {
    reject_unsupported(&query, UNSUPPORTED_BUCKET_SUBRESOURCES)?;
    if query.contains_key("policy") {
        policy::delete_bucket_policy(State(store), Path(bucket)).await
    } else {
        bucket::delete_bucket(State(store), Path(bucket)).await
    }
}

async fn post_bucket_dispatch(Path(bucket): Path<String>) -> S3Result {
    Err(MinnowError::NotImplemented(format!("POST on bucket {bucket}")).into())
}

async fn put_object_dispatch(
    State(store): State<Arc<dyn ObjectLayer>>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Body,
) -> S3Result {
    reject_unsupported(&query, UNSUPPORTED_OBJECT_SUBRESOURCES)?;
    let is_copy = headers.contains_key(COPY_SOURCE_HEADER);
    if query.contains_key("uploadId") {
        if is_copy {
            return Err(MinnowError::NotImplemented("UploadPartCopy".to_string()).into());
        }
        multipart::upload_part(State(store), Path((bucket, key)), Query(query), headers, body)
            .await
    } else if is_copy {
        object::copy_object(State(store), Path((bucket, key)), headers).await
    } else {
        object::put_object(State(store), Path((bucket, key)), headers, body).await
    }
}

async fn get_object_dispatch(
    State(store): State<Arc<dyn ObjectLayer>>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> S3Result {
    reject_unsupported(&query, UNSUPPORTED_OBJECT_SUBRESOURCES)?;
    if query.contains_key("uploadId") {
        multipart::list_parts(State(store), Path((bucket, key)), Query(query)).await
    } else {
        object::get_object(State(store), Path((bucket, key)), headers).await
    }
}

async fn head_object_dispatch(
    State(store): State<Arc<dyn ObjectLayer>>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> S3Result {
    reject_unsupported(&query, UNSUPPORTED_OBJECT_SUBRESOURCES)?;
    object::head_object(State(store), Path((bucket, key)), headers).await
}

async fn post_object_dispatch(
    State(store): State<Arc<dyn ObjectLayer>>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> S3Result {
    reject_unsupported(&query, UNSUPPORTED_OBJECT_SUBRESOURCES)?;
    if query.contains_key("uploads") {
        multipart::create_multipart_upload(State(store), Path((bucket, key)), headers).await
    } else if query.contains_key("uploadId") {
        multipart::complete_multipart_upload(
            State(store),
            Path((bucket, key)),
            Query(query),
            headers,
            body,
        )
        .await
    } else {
        Err(MinnowError::NotImplemented(format!("POST on object {bucket}/{key}")).into())
    }
}

async fn delete_object_dispatch(
    State(store): State<Arc<dyn ObjectLayer>>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> S3Result {
    reject_unsupported(&query, UNSUPPORTED_OBJECT_SUBRESOURCES)?;
    if query.contains_key("uploadId") {
        multipart::abort_multipart_upload(State(store), Path((bucket, key)), Query(query)).await
    } else {
        object::delete_object(State(store), Path((bucket, key))).await
    }
}

/// Builds the node's HTTP surface: the S3 API, the liveness check and the
/// storage RPC serving `exported_disks`.
pub fn s3_router(object_layer: Arc<dyn ObjectLayer>, exported_disks: Vec<DiskStore>) -> Router {
    let s3: Router = Router::<Arc<dyn ObjectLayer>>::new()
        .route("/", get(bucket::list_buckets))
        .route(
            "/{bucket}",
            put(put_bucket_dispatch)
                .get(get_bucket_dispatch)
                .head(bucket::head_bucket)
                .delete(delete_bucket_dispatch)
                .post(post_bucket_dispatch),
        )
        .route(
            "/{bucket}/{*key}",
            put(put_object_dispatch)
                .get(get_object_dispatch)
                .head(head_object_dispatch)
                .post(post_object_dispatch)
                .delete(delete_object_dispatch),
        )
        .with_state(object_layer);

    let storage: Router = Router::new()
        .route(
            &format!("{RPC_PREFIX}/{{method}}"),
            post(storage_rpc::handle_disk_call),
        )
        .with_state(storage_rpc::disk_registry(exported_disks));

    Router::new()
        .route(HEALTH_LIVE_PATH, get(health::health_live))
        .merge(storage)
        .merge(s3)
        .layer(TraceLayer::new_for_http())
}
