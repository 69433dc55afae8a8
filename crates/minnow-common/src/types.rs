use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BucketInfo {
    pub name: String,
    pub created: DateTime<Utc>,
}

/// One part of a stored object. A single PUT produces exactly one part
/// numbered 1.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectPartInfo {
    pub number: u32,
    pub size: u64,
    pub etag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub etag: String,
    pub content_type: String,
    pub last_modified: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
    pub parts: Vec<ObjectPartInfo>,
}

impl ObjectInfo {
    /// Byte offset of every part in the logical object, in part order.
    pub fn part_offsets(&self) -> Vec<u64> {
        let mut offset = 0_u64;
        self.parts
            .iter()
            .map(|part| {
                let start = offset;
                offset += part.size;
                start
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_offsets_accumulate_sizes() {
        let info = ObjectInfo {
            bucket: "b".to_string(),
            key: "k".to_string(),
            size: 12,
            etag: "abc-3".to_string(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            last_modified: Utc::now(),
            metadata: HashMap::new(),
            parts: vec![
                ObjectPartInfo { number: 1, size: 5, etag: "a".to_string() },
                ObjectPartInfo { number: 2, size: 5, etag: "b".to_string() },
                ObjectPartInfo { number: 4, size: 2, etag: "c".to_string() },
            ],
        };
        assert_eq!(info.part_offsets(), vec![0, 5, 10]);
    }
}
