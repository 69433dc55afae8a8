use minnow_common::error::{DiskError, MinnowError, Result};
use reed_solomon_simd::{ReedSolomonDecoder, ReedSolomonEncoder};
use serde::{Deserialize, Serialize};

pub mod bitrot;
pub mod heal;
pub mod metadata;
pub mod multipart;
pub mod objects;
pub mod storage;

pub const DEFAULT_DATA_SHARDS: usize = 4;
pub const DEFAULT_PARITY_SHARDS: usize = 2;
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErasureConfig {
    pub data_shards: usize,
    pub parity_shards: usize,
    pub block_size: usize,
}

impl Default for ErasureConfig {
    fn default() -> Self {
        Self {
            data_shards: DEFAULT_DATA_SHARDS,
            parity_shards: DEFAULT_PARITY_SHARDS,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl ErasureConfig {
    pub fn new(data_shards: usize, parity_shards: usize, block_size: usize) -> Result<Self> {
        let config = Self {
            data_shards,
            parity_shards,
            block_size,
        };
        validate_config(&config)?;
        Ok(config)
    }

    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    pub fn read_quorum(&self) -> usize {
        self.data_shards
    }

    /// One extra disk when data and parity are equal, so two disjoint halves
    /// can never both accept a write.
    pub fn write_quorum(&self) -> usize {
        if self.data_shards == self.parity_shards {
            self.data_shards + 1
        } else {
            self.data_shards
        }
    }

    /// Shard length for a block of `block_len` bytes. The codec requires an
    /// even, non-zero shard size.
    pub fn shard_size(&self, block_len: usize) -> usize {
        let mut shard_size = block_len.div_ceil(self.data_shards).max(2);
        if shard_size % 2 != 0 {
            shard_size += 1;
        }
        shard_size
    }
}

pub fn encode_block(data: &[u8], config: &ErasureConfig) -> Result<Vec<Vec<u8>>> {
    validate_config(config)?;

    if data.len() > config.block_size {
        return Err(MinnowError::InvalidArgument(format!(
            "block size {} exceeds configured block_size {}",
            data.len(),
            config.block_size
        )));
    }

    let shard_size = config.shard_size(data.len());
    let data_payload_size = shard_size * config.data_shards;
    let mut payload = vec![0_u8; data_payload_size];
    payload[..data.len()].copy_from_slice(data);

    let mut encoder = ReedSolomonEncoder::new(config.data_shards, config.parity_shards, shard_size)
        .map_err(map_reed_solomon_error)?;

    let mut shards = Vec::with_capacity(config.total_shards());
    for shard in payload.chunks_exact(shard_size) {
        encoder
            .add_original_shard(shard)
            .map_err(map_reed_solomon_error)?;
        shards.push(shard.to_vec());
    }

    let encoded = encoder.encode().map_err(map_reed_solomon_error)?;
    for recovery in encoded.recovery_iter() {
        shards.push(recovery.to_vec());
    }

    Ok(shards)
}

/// Rebuilds the data shards of one block from any `data_shards` of the
/// shards, returned concatenated and still padded to the shard size.
pub fn decode_block(shards: &[Option<Vec<u8>>], config: &ErasureConfig) -> Result<Vec<u8>> {
    validate_config(config)?;

    if shards.len() != config.total_shards() {
        return Err(MinnowError::InvalidArgument(format!(
            "invalid shard count: expected {}, got {}",
            config.total_shards(),
            shards.len()
        )));
    }

    let available_shards = shards.iter().filter(|shard| shard.is_some()).count();
    if available_shards < config.data_shards {
        return Err(MinnowError::InsufficientReadQuorum {
            have: available_shards,
            need: config.data_shards,
        });
    }
    let shard_size = shards
        .iter()
        .flatten()
        .map(Vec::len)
        .next()
        .unwrap_or_default();

    for (idx, shard) in shards.iter().enumerate() {
        if let Some(bytes) = shard {
            validate_shard_size(idx, bytes, shard_size)?;
        }
    }

    let data_complete = shards
        .iter()
        .take(config.data_shards)
        .all(|shard| shard.is_some());
    if data_complete {
        return Ok(shards
            .iter()
            .take(config.data_shards)
            .flatten()
            .flat_map(|shard| shard.iter().copied())
            .collect());
    }

    let mut decoder = ReedSolomonDecoder::new(config.data_shards, config.parity_shards, shard_size)
        .map_err(map_reed_solomon_error)?;

    for (idx, shard) in shards.iter().take(config.data_shards).enumerate() {
        if let Some(bytes) = shard {
            decoder
                .add_original_shard(idx, bytes)
                .map_err(map_reed_solomon_error)?;
        }
    }

    for (parity_idx, shard) in shards.iter().skip(config.data_shards).enumerate() {
        if let Some(bytes) = shard {
            decoder
                .add_recovery_shard(parity_idx, bytes)
                .map_err(map_reed_solomon_error)?;
        }
    }

    let decoded = decoder.decode().map_err(map_reed_solomon_error)?;
    let mut originals: Vec<Option<Vec<u8>>> =
        shards.iter().take(config.data_shards).cloned().collect();

    for (idx, bytes) in decoded.restored_original_iter() {
        if idx < config.data_shards {
            originals[idx] = Some(bytes.to_vec());
        }
    }

    let mut block = Vec::with_capacity(config.data_shards * shard_size);
    for shard in originals {
        let shard = shard.ok_or_else(|| {
            MinnowError::InternalError("decoder did not restore all original shards".to_string())
        })?;
        block.extend_from_slice(&shard);
    }

    Ok(block)
}

pub(crate) fn validate_config(config: &ErasureConfig) -> Result<()> {
    if config.data_shards == 0 {
        return Err(MinnowError::InvalidArgument(
            "data_shards must be greater than zero".to_string(),
        ));
    }
    if config.parity_shards == 0 {
        return Err(MinnowError::InvalidArgument(
            "parity_shards must be greater than zero".to_string(),
        ));
    }
    if config.block_size == 0 {
        return Err(MinnowError::InvalidArgument(
            "block_size must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_shard_size(shard_index: usize, shard: &[u8], expected_size: usize) -> Result<()> {
    if shard.len() != expected_size {
        return Err(MinnowError::InvalidArgument(format!(
            "invalid shard size for shard {}: expected {}, got {}",
            shard_index,
            expected_size,
            shard.len()
        )));
    }
    Ok(())
}

fn map_reed_solomon_error(error: reed_solomon_simd::Error) -> MinnowError {
    MinnowError::InternalError(format!("reed-solomon error: {error}"))
}

/// Outcome of reducing per-disk results against a quorum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Reduced {
    Success,
    /// At least a quorum of disks agree on this error.
    Failed(DiskError),
    NoQuorum { successes: usize },
}

/// Picks the outcome a quorum of disks agree on. `ignored` errors count as
/// successes.
pub(crate) fn reduce_errs(
    errs: &[Option<DiskError>],
    ignored: &[DiskError],
    quorum: usize,
) -> Reduced {
    let successes = errs
        .iter()
        .filter(|err| match err {
            None => true,
            Some(err) => ignored.contains(err),
        })
        .count();
    if successes >= quorum {
        return Reduced::Success;
    }

    let mut counts: Vec<(&DiskError, usize)> = Vec::new();
    for err in errs.iter().flatten().filter(|err| !ignored.contains(err)) {
        match counts.iter_mut().find(|(seen, _)| *seen == err) {
            Some((_, count)) => *count += 1,
            None => counts.push((err, 1)),
        }
    }
    match counts.into_iter().max_by_key(|(_, count)| *count) {
        Some((err, count)) if count >= quorum => Reduced::Failed(err.clone()),
        _ => Reduced::NoQuorum { successes },
    }
}

/// Reduces per-disk results of a write. An error shared by a quorum of disks
/// is handed to `map` along with the first disk reporting it.
pub(crate) fn reduce_write_errors<F>(
    errs: &[Option<DiskError>],
    ignored: &[DiskError],
    quorum: usize,
    map: F,
) -> Result<()>
where
    F: FnOnce(usize, DiskError) -> MinnowError,
{
    match reduce_errs(errs, ignored, quorum) {
        Reduced::Success => Ok(()),
        Reduced::Failed(err) => Err(map(first_disk_with(errs, &err), err)),
        Reduced::NoQuorum { successes } => Err(MinnowError::InsufficientWriteQuorum {
            have: successes,
            need: quorum,
        }),
    }
}

pub(crate) fn reduce_read_errors<F>(
    errs: &[Option<DiskError>],
    ignored: &[DiskError],
    quorum: usize,
    map: F,
) -> Result<()>
where
    F: FnOnce(usize, DiskError) -> MinnowError,
{
    match reduce_errs(errs, ignored, quorum) {
        Reduced::Success => Ok(()),
        Reduced::Failed(err) => Err(map(first_disk_with(errs, &err), err)),
        Reduced::NoQuorum { successes } => Err(MinnowError::InsufficientReadQuorum {
            have: successes,
            need: quorum,
        }),
    }
}

fn first_disk_with(errs: &[Option<DiskError>], wanted: &DiskError) -> usize {
    errs.iter()
        .position(|err| err.as_ref() == Some(wanted))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(data: usize, parity: usize, block: usize) -> ErasureConfig {
        ErasureConfig::new(data, parity, block).unwrap()
    }

    #[test]
    fn quorums_follow_shard_layout() {
        assert_eq!(config(4, 2, 1024).write_quorum(), 4);
        assert_eq!(config(2, 2, 1024).write_quorum(), 3);
        assert_eq!(config(2, 2, 1024).read_quorum(), 2);
        assert!(ErasureConfig::new(2, 0, 1024).is_err());
    }

    #[test]
    fn shard_size_is_even_and_non_zero() {
        let cfg = config(4, 2, 1024);
        assert_eq!(cfg.shard_size(1024), 256);
        assert_eq!(cfg.shard_size(1021), 256);
        assert_eq!(cfg.shard_size(13), 4);
        assert_eq!(cfg.shard_size(1), 2);
    }

    #[test]
    fn decode_restores_missing_data_shards() {
        let cfg = config(4, 2, 64);
        let data = (0..61_u8).collect::<Vec<_>>();
        let shards = encode_block(&data, &cfg).unwrap();
        assert_eq!(shards.len(), 6);

        let mut partial = shards.into_iter().map(Some).collect::<Vec<_>>();
        partial[0] = None;
        partial[2] = None;
        let decoded = decode_block(&partial, &cfg).unwrap();
        assert_eq!(&decoded[..data.len()], data.as_slice());
    }

    #[test]
    fn decode_needs_data_shard_count() {
        let cfg = config(2, 2, 16);
        let shards = encode_block(b"abcdefgh", &cfg).unwrap();
        let mut partial = shards.into_iter().map(Some).collect::<Vec<_>>();
        partial[0] = None;
        partial[1] = None;
        partial[3] = None;
        assert!(matches!(
            decode_block(&partial, &cfg),
            Err(MinnowError::InsufficientReadQuorum { have: 1, need: 2 })
        ));
    }

    #[test]
    fn reduce_prefers_agreeing_errors() {
        let errs = vec![
            None,
            Some(DiskError::FileNotFound),
            Some(DiskError::FileNotFound),
            Some(DiskError::FileNotFound),
        ];
        assert_eq!(reduce_errs(&errs, &[], 3), Reduced::Failed(DiskError::FileNotFound));
        assert_eq!(reduce_errs(&errs, &[DiskError::FileNotFound], 3), Reduced::Success);

        let mixed = vec![None, Some(DiskError::DiskUnavailable), Some(DiskError::FileCorrupt)];
        assert_eq!(reduce_errs(&mixed, &[], 2), Reduced::NoQuorum { successes: 1 });
    }

    #[test]
    fn reduced_errors_name_the_disk() {
        let errs = vec![
            None,
            Some(DiskError::DiskFull),
            Some(DiskError::DiskFull),
            Some(DiskError::DiskFull),
        ];
        let err = reduce_write_errors(&errs, &[], 3, |index, source| MinnowError::Disk {
            index,
            source,
        })
        .unwrap_err();
        assert!(matches!(
            err,
            MinnowError::Disk {
                index: 1,
                source: DiskError::DiskFull
            }
        ));

        let split = vec![None, None, Some(DiskError::DiskUnavailable), Some(DiskError::DiskFull)];
        assert!(matches!(
            reduce_write_errors(&split, &[], 3, |index, source| MinnowError::Disk { index, source }),
            Err(MinnowError::InsufficientWriteQuorum { have: 2, need: 3 })
        ));
        assert!(matches!(
            reduce_read_errors(&split, &[], 3, |index, source| MinnowError::Disk { index, source }),
            Err(MinnowError::InsufficientReadQuorum { have: 2, need: 3 })
        ));
    }
}
