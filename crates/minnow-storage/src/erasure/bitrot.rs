//! Streaming bitrot protection for shard files.
//!
//! A shard file is a sequence of frames, one per erasure block:
//! `[sha256(shard)][shard]`. Every block but the last has the same shard
//! size, so a frame's offset follows from its block index.

use minnow_common::error::DiskError;
use sha2::{Digest, Sha256};

use super::ErasureConfig;

pub const HASH_SIZE: usize = 32;
pub const CHECKSUM_ALGORITHM: &str = "sha256-streaming";

pub fn frame(shard: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(HASH_SIZE + shard.len());
    framed.extend_from_slice(&Sha256::digest(shard));
    framed.extend_from_slice(shard);
    framed
}

/// Returns the shard carried by a frame if its checksum holds.
pub fn verify(framed: &[u8]) -> Result<&[u8], DiskError> {
    if framed.len() < HASH_SIZE {
        return Err(DiskError::FileCorrupt);
    }
    let (hash, shard) = framed.split_at(HASH_SIZE);
    if Sha256::digest(shard).as_slice() != hash {
        return Err(DiskError::FileCorrupt);
    }
    Ok(shard)
}

/// Block geometry of one part stored with a given erasure layout.
#[derive(Debug, Clone, Copy)]
pub struct PartLayout {
    pub part_size: u64,
    pub block_size: u64,
    pub full_shard_size: u64,
}

impl PartLayout {
    pub fn new(part_size: u64, config: &ErasureConfig) -> Self {
        Self {
            part_size,
            block_size: config.block_size as u64,
            full_shard_size: config.shard_size(config.block_size) as u64,
        }
    }

    pub fn block_count(&self) -> u64 {
        self.part_size.div_ceil(self.block_size)
    }

    pub fn block_len(&self, block: u64) -> u64 {
        let start = block * self.block_size;
        self.block_size.min(self.part_size.saturating_sub(start))
    }

    /// Offset of the block's frame inside a shard file.
    pub fn frame_offset(&self, block: u64) -> u64 {
        block * (HASH_SIZE as u64 + self.full_shard_size)
    }

    pub fn frame_len(&self, block: u64, config: &ErasureConfig) -> u64 {
        let block_len = usize::try_from(self.block_len(block)).unwrap_or(usize::MAX);
        HASH_SIZE as u64 + config.shard_size(block_len) as u64
    }

    /// Expected shard file size for the whole part.
    pub fn shard_file_size(&self, config: &ErasureConfig) -> u64 {
        (0..self.block_count())
            .map(|block| self.frame_len(block, config))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupted_frames_are_detected() {
        let mut framed = frame(b"shard bytes");
        assert_eq!(verify(&framed).unwrap(), b"shard bytes");

        let last = framed.len() - 1;
        framed[last] ^= 0x01;
        assert_eq!(verify(&framed), Err(DiskError::FileCorrupt));
        assert_eq!(verify(&[0_u8; 4]), Err(DiskError::FileCorrupt));
    }

    #[test]
    fn layout_handles_short_last_block() {
        let config = ErasureConfig::new(2, 2, 100).unwrap();
        let layout = PartLayout::new(250, &config);
        assert_eq!(layout.block_count(), 3);
        assert_eq!(layout.block_len(2), 50);
        assert_eq!(layout.frame_offset(2), 2 * (32 + 50));
        assert_eq!(layout.frame_len(2, &config), 32 + 26);
        assert_eq!(layout.shard_file_size(&config), 2 * 82 + 58);

        assert_eq!(PartLayout::new(0, &config).block_count(), 0);
    }
}
