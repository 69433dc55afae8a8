use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by a single disk. Serializable so remote disks can ship
/// the exact variant back over the storage RPC.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiskError {
    #[error("volume not found")]
    VolumeNotFound,
    #[error("volume already exists")]
    VolumeExists,
    #[error("volume is not empty")]
    VolumeNotEmpty,
    #[error("file not found")]
    FileNotFound,
    #[error("a path component is not a directory")]
    PathIsNotDirectory,
    #[error("not a regular file")]
    IsNotRegular,
    #[error("file name too long")]
    FileNameTooLong,
    #[error("access denied")]
    AccessDenied,
    #[error("disk full")]
    DiskFull,
    #[error("disk unavailable")]
    DiskUnavailable,
    #[error("file is corrupted")]
    FileCorrupt,
    #[error("i/o error: {0}")]
    Io(String),
}

impl DiskError {
    /// Errors that say nothing about the object itself, only about the disk.
    pub fn is_disk_fault(&self) -> bool {
        matches!(
            self,
            Self::DiskUnavailable | Self::DiskFull | Self::AccessDenied | Self::Io(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::FileNotFound | Self::VolumeNotFound)
    }
}

/// Coarse classification used by callers that only care about the kind of
/// failure, not its exact S3 rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Precondition,
    Integrity,
    Disk,
    Quorum,
    Other,
}

#[derive(Debug, Error)]
pub enum MinnowError {
    #[error("bucket not found: {0}")]
    BucketNotFound(String),
    #[error("bucket already exists: {0}")]
    BucketAlreadyExists(String),
    #[error("bucket is not empty: {0}")]
    BucketNotEmpty(String),
    #[error("invalid bucket name: {0}")]
    InvalidBucketName(String),
    #[error("object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object name: {0}")]
    InvalidObjectName(String),
    #[error("object name too long: {0}")]
    ObjectNameTooLong(String),
    #[error("upload not found: {0}")]
    UploadNotFound(String),
    #[error("invalid part: {0}")]
    InvalidPart(String),
    #[error("parts are not in ascending order")]
    InvalidPartOrder,
    #[error("part {part_number} is too small: size={size}, min_size={min_size}")]
    EntityTooSmall {
        part_number: u32,
        size: u64,
        min_size: u64,
    },
    #[error("incomplete body: expected {expected} bytes, got {actual}")]
    IncompleteBody { expected: u64, actual: u64 },
    #[error("malformed xml: {0}")]
    MalformedXml(String),
    #[error("content-md5 does not match the received body")]
    BadDigest,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("requested range cannot be satisfied for object of size {size}")]
    InvalidRange { size: u64 },
    #[error("precondition failed")]
    PreconditionFailed,
    #[error("not modified")]
    NotModified {
        etag: String,
        last_modified: DateTime<Utc>,
    },
    #[error("bucket policy not found: {0}")]
    PolicyNotFound(String),
    #[error("file corrupt: {0}")]
    FileCorrupt(String),
    #[error("disk {index}: {source}")]
    Disk {
        index: usize,
        #[source]
        source: DiskError,
    },
    #[error("insufficient read quorum: have {have}, need {need}")]
    InsufficientReadQuorum { have: usize, need: usize },
    #[error("insufficient write quorum: have {have}, need {need}")]
    InsufficientWriteQuorum { have: usize, need: usize },
    #[error("operation timed out: {0}")]
    OperationTimedOut(String),
    #[error("not implemented: {0}")]
    NotImplemented(String),
    #[error("internal error: {0}")]
    InternalError(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl MinnowError {
    pub fn object_not_found(bucket: &str, key: &str) -> Self {
        Self::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidBucketName(_)
            | Self::InvalidObjectName(_)
            | Self::ObjectNameTooLong(_)
            | Self::InvalidArgument(_)
            | Self::InvalidRange { .. }
            | Self::InvalidPart(_)
            | Self::InvalidPartOrder
            | Self::EntityTooSmall { .. }
            | Self::MalformedXml(_)
            | Self::BadDigest
            | Self::IncompleteBody { .. } => ErrorKind::Validation,
            Self::BucketNotFound(_)
            | Self::ObjectNotFound { .. }
            | Self::UploadNotFound(_)
            | Self::PolicyNotFound(_) => ErrorKind::NotFound,
            Self::BucketAlreadyExists(_) | Self::BucketNotEmpty(_) => ErrorKind::Conflict,
            Self::PreconditionFailed | Self::NotModified { .. } => ErrorKind::Precondition,
            Self::FileCorrupt(_) => ErrorKind::Integrity,
            Self::Disk { .. } => ErrorKind::Disk,
            Self::InsufficientReadQuorum { .. } | Self::InsufficientWriteQuorum { .. } => {
                ErrorKind::Quorum
            }
            Self::OperationTimedOut(_)
            | Self::NotImplemented(_)
            | Self::InternalError(_)
            | Self::Io(_) => ErrorKind::Other,
        }
    }

    pub fn s3_error_code(&self) -> &'static str {
        match self {
            Self::BucketNotFound(_) => "NoSuchBucket",
            Self::BucketAlreadyExists(_) => "BucketAlreadyOwnedByYou",
            Self::BucketNotEmpty(_) => "BucketNotEmpty",
            Self::InvalidBucketName(_) => "InvalidBucketName",
            Self::ObjectNotFound { .. } => "NoSuchKey",
            Self::InvalidObjectName(_) => "XMinnowInvalidObjectName",
            Self::ObjectNameTooLong(_) => "KeyTooLongError",
            Self::UploadNotFound(_) => "NoSuchUpload",
            Self::InvalidPart(_) => "InvalidPart",
            Self::InvalidPartOrder => "InvalidPartOrder",
            Self::EntityTooSmall { .. } => "EntityTooSmall",
            Self::IncompleteBody { .. } => "IncompleteBody",
            Self::MalformedXml(_) => "MalformedXML",
            Self::BadDigest => "BadDigest",
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::InvalidRange { .. } => "InvalidRange",
            Self::PreconditionFailed => "PreconditionFailed",
            Self::NotModified { .. } => "NotModified",
            Self::PolicyNotFound(_) => "NoSuchBucketPolicy",
            Self::FileCorrupt(_) => "XMinnowObjectCorrupted",
            Self::Disk { .. } | Self::InternalError(_) | Self::Io(_) => "InternalError",
            Self::InsufficientReadQuorum { .. } => "XMinnowReadQuorum",
            Self::InsufficientWriteQuorum { .. } => "XMinnowWriteQuorum",
            Self::OperationTimedOut(_) => "RequestTimeout",
            Self::NotImplemented(_) => "NotImplemented",
        }
    }

    /// Client-facing message in S3 wording. Argument errors carry their own
    /// message since S3 words them per argument.
    pub fn s3_message(&self) -> String {
        let message = match self {
            Self::BucketNotFound(_) => "The specified bucket does not exist.",
            Self::BucketAlreadyExists(_) => {
                "Your previous request to create the named bucket succeeded and you already own it."
            }
            Self::BucketNotEmpty(_) => "The bucket you tried to delete is not empty.",
            Self::InvalidBucketName(_) => "The specified bucket is not valid.",
            Self::ObjectNotFound { .. } => "The specified key does not exist.",
            Self::InvalidObjectName(_) => "Object name contains unsupported characters.",
            Self::ObjectNameTooLong(_) => "Your key is too long.",
            Self::UploadNotFound(_) => {
                "The specified multipart upload does not exist. The upload ID may be invalid, or the upload may have been aborted or completed."
            }
            Self::InvalidPart(_) => {
                "One or more of the specified parts could not be found. The part may not have been uploaded, or the specified entity tag may not match the part's entity tag."
            }
            Self::InvalidPartOrder => {
                "The list of parts was not in ascending order. The parts list must be specified in order by part number."
            }
            Self::EntityTooSmall { .. } => {
                "Your proposed upload is smaller than the minimum allowed object size."
            }
            Self::IncompleteBody { .. } => {
                "You did not provide the number of bytes specified by the Content-Length HTTP header."
            }
            Self::MalformedXml(_) => {
                "The XML you provided was not well-formed or did not validate against our published schema."
            }
            Self::BadDigest => "The Content-Md5 you specified did not match what we received.",
            Self::InvalidArgument(message) => return message.clone(),
            Self::InvalidRange { .. } => "The requested range cannot be satisfied.",
            Self::PreconditionFailed => {
                "At least one of the preconditions you specified did not hold."
            }
            Self::NotModified { .. } => "Not Modified",
            Self::PolicyNotFound(_) => "The bucket policy does not exist.",
            Self::FileCorrupt(_) => "Object data is corrupted beyond repair.",
            Self::InsufficientReadQuorum { .. } => {
                "Storage resources are insufficient for the read operation."
            }
            Self::InsufficientWriteQuorum { .. } => {
                "Storage resources are insufficient for the write operation."
            }
            Self::OperationTimedOut(_) => "The operation did not complete in time.",
            Self::NotImplemented(_) => {
                "A header you provided implies functionality that is not implemented."
            }
            Self::Disk { .. } | Self::InternalError(_) | Self::Io(_) => {
                "We encountered an internal error, please try again."
            }
        };
        message.to_string()
    }
}

pub type Result<T> = std::result::Result<T, MinnowError>;
