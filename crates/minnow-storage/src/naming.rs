//! Bucket and object name validation.

use std::net::Ipv4Addr;

use minnow_common::error::{MinnowError, Result};

use crate::disk::SYS_VOLUME;
use crate::disk::path::MAX_COMPONENT_BYTES;

pub const MAX_KEY_BYTES: usize = 1024;

pub fn validate_bucket_name(bucket: &str) -> Result<()> {
    let invalid = || MinnowError::InvalidBucketName(bucket.to_string());

    if !(3..=63).contains(&bucket.len()) {
        return Err(invalid());
    }
    if bucket == SYS_VOLUME || bucket.starts_with(".minnow") {
        return Err(invalid());
    }
    let bytes = bucket.as_bytes();
    let edge_ok = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !edge_ok(bytes[0]) || !edge_ok(bytes[bytes.len() - 1]) {
        return Err(invalid());
    }
    if !bytes
        .iter()
        .all(|&b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.' || b == b'-')
    {
        return Err(invalid());
    }
    if bucket.contains("..") || bucket.contains(".-") || bucket.contains("-.") {
        return Err(invalid());
    }
    if bucket.parse::<Ipv4Addr>().is_ok() {
        return Err(invalid());
    }
    Ok(())
}

/// Keys map onto directory trees, so every `/`-separated component must be a
/// usable file name on its own.
pub fn validate_object_name(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(MinnowError::InvalidObjectName(key.to_string()));
    }
    if key.len() > MAX_KEY_BYTES {
        return Err(MinnowError::ObjectNameTooLong(key.to_string()));
    }
    if key.starts_with('/') || key.ends_with('/') || key.contains('\\') || key.contains('\0') {
        return Err(MinnowError::InvalidObjectName(key.to_string()));
    }
    for component in key.split('/') {
        if component.is_empty() || component == "." || component == ".." {
            return Err(MinnowError::InvalidObjectName(key.to_string()));
        }
        if component.len() > MAX_COMPONENT_BYTES {
            return Err(MinnowError::ObjectNameTooLong(key.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_names() {
        for ok in ["abc", "my-bucket", "my.bucket.2", &"a".repeat(63)] {
            assert!(validate_bucket_name(ok).is_ok(), "{ok}");
        }
        for bad in [
            "ab",
            "Bucket",
            "-bucket",
            "bucket-",
            "my..bucket",
            "my_bucket",
            "192.168.1.1",
            ".minnow.sys",
            &"a".repeat(64),
        ] {
            assert!(
                matches!(validate_bucket_name(bad), Err(MinnowError::InvalidBucketName(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn object_names() {
        assert!(validate_object_name("photos/2024/cat.png").is_ok());
        assert!(validate_object_name(&"界".repeat(85)).is_ok());

        for bad in ["", "/abs", "dir/", "a//b", "a/../b", "./a", "a\\b"] {
            assert!(
                matches!(validate_object_name(bad), Err(MinnowError::InvalidObjectName(_))),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn long_components_are_rejected() {
        let ok = format!("prefix/{}", "a".repeat(255));
        assert!(validate_object_name(&ok).is_ok());

        let too_long = format!("prefix/{}", "a".repeat(256));
        assert!(matches!(
            validate_object_name(&too_long),
            Err(MinnowError::ObjectNameTooLong(_))
        ));
        assert!(matches!(
            validate_object_name(&"界".repeat(86)),
            Err(MinnowError::ObjectNameTooLong(_))
        ));

        let long_key = vec!["a".repeat(200); 6].join("/");
        assert!(matches!(
            validate_object_name(&long_key),
            Err(MinnowError::ObjectNameTooLong(_))
        ));
    }
}
