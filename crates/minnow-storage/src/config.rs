use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::erasure::ErasureConfig;

pub const DEFAULT_MIN_PART_SIZE: u64 = 5 * 1024 * 1024;
pub const MAX_PART_NUMBER: u32 = 10_000;
pub const MAX_LIST_KEYS: usize = 1000;
pub const MAX_LIST_UPLOADS: usize = 1000;
pub const MAX_LIST_PARTS: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartConfig {
    /// Smallest size allowed for every part but the last at completion.
    pub min_part_size: u64,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            min_part_size: DEFAULT_MIN_PART_SIZE,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectLayerConfig {
    pub erasure: ErasureConfig,
    pub multipart: MultipartConfig,
    /// Upper bound for a single object layer call; `None` disables it.
    pub operation_timeout_ms: Option<u64>,
}

impl ObjectLayerConfig {
    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_s3_limits() {
        let config = ObjectLayerConfig::default();
        assert_eq!(config.multipart.min_part_size, 5 * 1024 * 1024);
        assert_eq!(config.erasure.data_shards, 4);
        assert_eq!(config.operation_timeout(), None);

        let config = ObjectLayerConfig {
            operation_timeout_ms: Some(1500),
            ..ObjectLayerConfig::default()
        };
        assert_eq!(config.operation_timeout(), Some(Duration::from_millis(1500)));
    }
}
