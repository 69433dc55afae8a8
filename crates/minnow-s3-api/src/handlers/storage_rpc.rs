//! Server side of the storage RPC. Exposes this node's local disks to
//! `RemoteDisk` clients running on other nodes.

use std::{collections::HashMap, sync::Arc};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use minnow_common::error::DiskError;
use minnow_storage::disk::DiskStore;
use minnow_storage::disk::rpc::{RPC_CONTENT_TYPE, decode_request, dispatch, encode_reply};
use tracing::{debug, error, warn};

/// Exported disks keyed by the path remote nodes use to address them.
pub type DiskRegistry = Arc<HashMap<String, DiskStore>>;

pub fn disk_registry(disks: Vec<DiskStore>) -> DiskRegistry {
    Arc::new(
        disks
            .into_iter()
            .map(|disk| (disk.endpoint().to_string(), disk))
            .collect(),
    )
}

pub async fn handle_disk_call(
    State(disks): State<DiskRegistry>,
    Path(method): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let request = match decode_request(&body) {
        Ok(request) => request,
        Err(err) => {
            warn!(method = %method, error = %err, "rejecting undecodable storage rpc");
            return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
        }
    };
    if request.method() != method {
        warn!(method = %method, body_method = request.method(), "storage rpc method mismatch");
        return (StatusCode::BAD_REQUEST, "method does not match request body").into_response();
    }

    let disk_path = query.get("disk").map(String::as_str).unwrap_or_default();
    let reply = match disks.get(disk_path) {
        Some(disk) => {
            debug!(method = %method, disk = disk_path, "serving storage rpc");
            dispatch(disk.as_ref(), request).await
        }
        None => {
            warn!(method = %method, disk = disk_path, "storage rpc for a disk this node does not export");
            Err(DiskError::DiskUnavailable)
        }
    };

    match encode_reply(&reply) {
        Ok(payload) => (StatusCode::OK, [(CONTENT_TYPE, RPC_CONTENT_TYPE)], payload).into_response(),
        Err(err) => {
            error!(method = %method, error = %err, "failed to encode storage rpc reply");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
