use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use md5::{Digest, Md5};
use minnow_common::error::{DiskError, MinnowError, Result};
use sha2::Sha256;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::disk::{DiskResult, DiskStore, new_disk};
use crate::erasure::bitrot::{self, PartLayout};
use crate::erasure::{ErasureConfig, decode_block, encode_block, validate_config};

/// Blocks a shard writer may queue before the feeder waits for its disk.
const WRITE_PIPELINE_DEPTH: usize = 4;

/// The disks of one erasure set together with the layout used to spread
/// shards across them.
#[derive(Debug, Clone)]
pub struct ErasureSet {
    config: ErasureConfig,
    disks: Vec<DiskStore>,
}

/// Result of streaming one part onto the set.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub size: u64,
    pub md5_hex: String,
    /// Failure per disk index; `None` where the shard file is complete.
    pub disk_errors: Vec<Option<DiskError>>,
}

impl ErasureSet {
    pub fn new(disks: Vec<DiskStore>, config: ErasureConfig) -> Result<Self> {
        validate_config(&config)?;
        if disks.len() != config.total_shards() {
            return Err(MinnowError::InvalidArgument(format!(
                "invalid disk count: expected {}, got {}",
                config.total_shards(),
                disks.len()
            )));
        }
        Ok(Self { config, disks })
    }

    pub async fn from_endpoints(endpoints: &[String], config: ErasureConfig) -> Result<Self> {
        let mut disks = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            disks.push(new_disk(endpoint).await?);
        }
        Self::new(disks, config)
    }

    pub fn config(&self) -> &ErasureConfig {
        &self.config
    }

    pub fn disks(&self) -> &[DiskStore] {
        &self.disks
    }

    pub fn disk_count(&self) -> usize {
        self.disks.len()
    }

    pub fn read_quorum(&self) -> usize {
        self.config.read_quorum()
    }

    pub fn write_quorum(&self) -> usize {
        self.config.write_quorum()
    }

    pub async fn close(&self) {
        join_all(self.disks.iter().map(|disk| disk.close())).await;
    }

    /// Disks ordered by the shard they hold under `distribution`, where
    /// `distribution[disk]` is the 1-based shard index stored on that disk.
    pub(crate) fn shard_disks(&self, distribution: &[usize]) -> Vec<(usize, DiskStore)> {
        let mut ordered = vec![None; self.disks.len()];
        for (disk_index, shard) in distribution.iter().enumerate() {
            if let (Some(slot), Some(disk)) =
                (ordered.get_mut(shard.wrapping_sub(1)), self.disks.get(disk_index))
            {
                *slot = Some((disk_index, disk.clone()));
            }
        }
        ordered.into_iter().flatten().collect()
    }

    /// Streams `size` bytes from `reader` into the shard file at
    /// `volume/path` on every disk. Each disk has its own writer fed through
    /// a bounded queue, so one slow disk does not hold up the others. Disks
    /// that fail are dropped for the rest of the write; the write aborts once
    /// fewer than write quorum remain.
    pub async fn write_part<R>(
        &self,
        volume: &str,
        path: &str,
        distribution: &[usize],
        reader: &mut R,
        size: u64,
    ) -> Result<WriteOutcome>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let shard_disks = self.shard_disks(distribution);
        if shard_disks.len() != self.disks.len() {
            return Err(MinnowError::InternalError(format!(
                "distribution {distribution:?} does not cover {} disks",
                self.disks.len()
            )));
        }

        let aborted = AtomicBool::new(false);
        let mut senders = Vec::with_capacity(shard_disks.len());
        let mut writers = Vec::with_capacity(shard_disks.len());
        for (disk_index, disk) in &shard_disks {
            let (tx, rx) = mpsc::channel::<Vec<u8>>(WRITE_PIPELINE_DEPTH);
            senders.push(Some(tx));
            writers.push(shard_writer(*disk_index, disk, volume, path, rx, &aborted));
        }

        let produce = async {
            let result = self.feed_blocks(reader, size, &mut senders).await;
            if result.is_err() {
                aborted.store(true, Ordering::Relaxed);
            }
            // Closing the channels lets every writer drain and finish.
            senders.clear();
            result
        };
        let (produced, written) = futures::join!(produce, join_all(writers));

        let mut disk_errors: Vec<Option<DiskError>> = vec![None; self.disks.len()];
        for (disk_index, result) in written {
            if let Err(err) = result {
                disk_errors[disk_index] = Some(err);
            }
        }
        let (size, md5_hex) = produced?;

        let online = disk_errors.iter().filter(|err| err.is_none()).count();
        if online < self.write_quorum() {
            return Err(MinnowError::InsufficientWriteQuorum {
                have: online,
                need: self.write_quorum(),
            });
        }
        Ok(WriteOutcome {
            size,
            md5_hex,
            disk_errors,
        })
    }

    /// Reads, hashes and encodes the stream block by block, handing each
    /// shard frame to its disk's writer. Returns the size read and its MD5.
    async fn feed_blocks<R>(
        &self,
        reader: &mut R,
        size: u64,
        senders: &mut [Option<mpsc::Sender<Vec<u8>>>],
    ) -> Result<(u64, String)>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let mut hasher = Md5::new();
        let mut buf = vec![0_u8; self.config.block_size];
        let mut total = 0_u64;
        let mut limited = reader.take(size);

        loop {
            let n = read_full(&mut limited, &mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            total += n as u64;

            let frames = encode_block(&buf[..n], &self.config)?
                .iter()
                .map(|shard| bitrot::frame(shard))
                .collect::<Vec<_>>();
            self.dispatch_frames(senders, frames).await?;
        }

        if total < size {
            return Err(MinnowError::IncompleteBody {
                expected: size,
                actual: total,
            });
        }
        if total == 0 {
            let empty = vec![Vec::new(); senders.len()];
            self.dispatch_frames(senders, empty).await?;
        }
        Ok((total, hex::encode(hasher.finalize())))
    }

    /// Queues one frame per shard. A disk only holds up the stream once it
    /// is `WRITE_PIPELINE_DEPTH` blocks behind; a disk whose writer has
    /// stopped is dropped for the rest of the write.
    async fn dispatch_frames(
        &self,
        senders: &mut [Option<mpsc::Sender<Vec<u8>>>],
        frames: Vec<Vec<u8>>,
    ) -> Result<()> {
        let delivered = join_all(senders.iter().zip(frames).map(|(sender, frame)| async move {
            match sender {
                Some(sender) => sender.send(frame).await.is_ok(),
                None => false,
            }
        }))
        .await;
        for (sender, delivered) in senders.iter_mut().zip(delivered) {
            if !delivered {
                *sender = None;
            }
        }

        let online = senders.iter().filter(|sender| sender.is_some()).count();
        if online < self.write_quorum() {
            return Err(MinnowError::InsufficientWriteQuorum {
                have: online,
                need: self.write_quorum(),
            });
        }
        Ok(())
    }

    /// Reads `length` bytes starting at `offset` of the part stored at
    /// `volume/path` and appends them to `out`.
    #[allow(clippy::too_many_arguments)]
    pub async fn read_part(
        &self,
        volume: &str,
        path: &str,
        config: &ErasureConfig,
        distribution: &[usize],
        part_size: u64,
        offset: u64,
        length: u64,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        if length == 0 {
            return Ok(());
        }
        let layout = PartLayout::new(part_size, config);
        let shard_disks = self.shard_disks(distribution);
        let mut dead = vec![false; shard_disks.len()];

        let first_block = offset / layout.block_size;
        let last_block = (offset + length - 1) / layout.block_size;
        for block in first_block..=last_block {
            let shards = self
                .read_block(volume, path, config, &layout, &shard_disks, block, &mut dead)
                .await?;
            let decoded = decode_block(&shards, config)?;

            let block_start = block * layout.block_size;
            let block_len = layout.block_len(block);
            let from = offset.max(block_start) - block_start;
            let to = (offset + length).min(block_start + block_len) - block_start;
            out.extend_from_slice(&decoded[from as usize..to as usize]);
        }
        Ok(())
    }

    /// Collects at least `data_shards` verified shards of one block, reading
    /// data shards first and falling back to parity. Shards on disks marked
    /// `dead` are skipped; disks that fail are marked dead.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn read_block(
        &self,
        volume: &str,
        path: &str,
        config: &ErasureConfig,
        layout: &PartLayout,
        shard_disks: &[(usize, DiskStore)],
        block: u64,
        dead: &mut [bool],
    ) -> Result<Vec<Option<Vec<u8>>>> {
        let offset = layout.frame_offset(block);
        let frame_len = layout.frame_len(block, config);
        let mut shards: Vec<Option<Vec<u8>>> = vec![None; shard_disks.len()];
        let mut valid = 0_usize;
        let mut corrupt = 0_usize;
        let mut next = 0_usize;

        while valid < config.data_shards && next < shard_disks.len() {
            let wanted = config.data_shards - valid;
            let mut batch = Vec::with_capacity(wanted);
            while batch.len() < wanted && next < shard_disks.len() {
                if !dead[next] {
                    batch.push(next);
                }
                next += 1;
            }
            if batch.is_empty() {
                break;
            }

            let reads = batch.iter().map(|&shard_index| {
                let disk = &shard_disks[shard_index].1;
                async move {
                    let result = disk.read_file(volume, path, offset, frame_len).await;
                    (shard_index, result)
                }
            });
            for (shard_index, result) in join_all(reads).await {
                let verified = result.and_then(|framed| bitrot::verify(&framed).map(<[u8]>::to_vec));
                match verified {
                    Ok(shard) => {
                        shards[shard_index] = Some(shard);
                        valid += 1;
                    }
                    Err(err) => {
                        let disk_index = shard_disks[shard_index].0;
                        if err == DiskError::FileCorrupt {
                            corrupt += 1;
                            warn!(disk = disk_index, volume, path, block, "bitrot detected in shard");
                        } else {
                            debug!(disk = disk_index, volume, path, block, error = %err, "shard unreadable");
                            dead[shard_index] = true;
                        }
                    }
                }
            }
        }

        if valid < config.data_shards {
            if corrupt > 0 {
                return Err(MinnowError::FileCorrupt(format!(
                    "{volume}/{path}: block {block} has {valid} intact shards, need {}",
                    config.data_shards
                )));
            }
            return Err(MinnowError::InsufficientReadQuorum {
                have: valid,
                need: config.data_shards,
            });
        }
        Ok(shards)
    }

    /// Applies `op` to every disk concurrently, keeping the per-disk results
    /// in disk order.
    pub(crate) async fn for_each_disk<'a, F, Fut, T>(&'a self, op: F) -> Vec<std::result::Result<T, DiskError>>
    where
        F: Fn(usize, &'a DiskStore) -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, DiskError>>,
    {
        join_all(self.disks.iter().enumerate().map(|(index, disk)| op(index, disk))).await
    }

    /// Best-effort removal of `volume/path` from every disk. Missing files
    /// and offline disks are not errors.
    pub async fn delete_all(&self, volume: &str, path: &str) {
        let results = self
            .for_each_disk(|_, disk| async move { disk.delete_file(volume, path).await })
            .await;
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(()) | Err(DiskError::FileNotFound) | Err(DiskError::VolumeNotFound) => {}
                Err(err) => {
                    debug!(disk = index, volume, path, error = %err, "best-effort delete failed")
                }
            }
        }
    }
}

/// Appends queued frames to one disk's shard file in order. Stops at the
/// first failure, which closes the channel so the feeder drops the disk.
async fn shard_writer(
    disk_index: usize,
    disk: &DiskStore,
    volume: &str,
    path: &str,
    mut frames: mpsc::Receiver<Vec<u8>>,
    aborted: &AtomicBool,
) -> (usize, DiskResult<()>) {
    while let Some(frame) = frames.recv().await {
        if aborted.load(Ordering::Relaxed) {
            break;
        }
        if let Err(err) = disk.append_file(volume, path, &frame).await {
            warn!(
                disk = disk_index,
                endpoint = disk.endpoint(),
                volume,
                path,
                error = %err,
                "dropping disk from write"
            );
            return (disk_index, Err(err));
        }
    }
    (disk_index, Ok(()))
}

/// Fills `buf` unless the reader runs dry first.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Rotation of shards over disks derived from the object name, so shard 1
/// does not always land on the first disk.
pub fn hash_order(key: &str, cardinality: usize) -> Vec<usize> {
    if cardinality == 0 {
        return Vec::new();
    }
    let digest = Sha256::digest(key.as_bytes());
    let seed = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize;
    let start = seed % cardinality;
    (0..cardinality)
        .map(|disk| 1 + (disk + start) % cardinality)
        .collect()
}
