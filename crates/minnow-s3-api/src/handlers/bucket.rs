use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::IntoResponse,
};
use http::StatusCode;
use http::header::LOCATION;
use minnow_storage::traits::ObjectLayer;

use super::{S3Result, header_value, xml_response};
use crate::xml::{ListAllMyBucketsResult, LocationConstraint, S3_XMLNS};

pub async fn list_buckets(State(store): State<Arc<dyn ObjectLayer>>) -> S3Result {
    let buckets = store.list_buckets().await?;
    xml_response(StatusCode::OK, &ListAllMyBucketsResult::new(&buckets))
}

pub async fn make_bucket(
    State(store): State<Arc<dyn ObjectLayer>>,
    Path(bucket): Path<String>,
) -> S3Result {
    store.make_bucket(&bucket).await?;
    let location = header_value(&format!("/{bucket}"))?;
    Ok((StatusCode::OK, [(LOCATION, location)]).into_response())
}

pub async fn head_bucket(
    State(store): State<Arc<dyn ObjectLayer>>,
    Path(bucket): Path<String>,
) -> S3Result {
    store.get_bucket_info(&bucket).await?;
    Ok(StatusCode::OK.into_response())
}

pub async fn delete_bucket(
    State(store): State<Arc<dyn ObjectLayer>>,
    Path(bucket): Path<String>,
) -> S3Result {
    store.delete_bucket(&bucket).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn get_bucket_location(
    State(store): State<Arc<dyn ObjectLayer>>,
    Path(bucket): Path<String>,
) -> S3Result {
    store.get_bucket_info(&bucket).await?;
    let payload = LocationConstraint {
        xmlns: S3_XMLNS,
        value: String::new(),
    };
    xml_response(StatusCode::OK, &payload)
}
