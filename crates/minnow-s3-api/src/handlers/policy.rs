//! Bucket policies are stored verbatim; only their JSON well-formedness is
//! checked.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    response::IntoResponse,
};
use http::StatusCode;
use http::header::CONTENT_TYPE;
use minnow_common::error::MinnowError;
use minnow_storage::traits::ObjectLayer;

use super::S3Result;

const CONTENT_TYPE_JSON: &str = "application/json";

pub async fn get_bucket_policy(
    State(store): State<Arc<dyn ObjectLayer>>,
    Path(bucket): Path<String>,
) -> S3Result {
    let policy = store.get_bucket_policy(&bucket).await?;
    Ok((StatusCode::OK, [(CONTENT_TYPE, CONTENT_TYPE_JSON)], policy).into_response())
}

pub async fn put_bucket_policy(
    State(store): State<Arc<dyn ObjectLayer>>,
    Path(bucket): Path<String>,
    body: Bytes,
) -> S3Result {
    if body.is_empty() {
        return Err(MinnowError::InvalidArgument("Policy document is empty.".to_string()).into());
    }
    serde_json::from_slice::<serde_json::Value>(&body).map_err(|err| {
        MinnowError::InvalidArgument(format!("Policy has invalid JSON: {err}"))
    })?;
    store.put_bucket_policy(&bucket, body).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn delete_bucket_policy(
    State(store): State<Arc<dyn ObjectLayer>>,
    Path(bucket): Path<String>,
) -> S3Result {
    store.delete_bucket_policy(&bucket).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
