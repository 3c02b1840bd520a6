// Non-resident attribute streams.
// Fragmented attribute content, addressed by its decoded run list, is
// presented as a forward-only byte stream. Reads are batched: one seek+read
// per cluster-aligned batch, capped by the chunk boundary and a fixed
// maximum batch size.

use std::sync::Arc;

use log::trace;
use relic_core::RelicError;

use crate::attributes::Attribute;
use crate::boot_sector::VolumeGeometry;
use crate::data_runs::{check_volume_bounds, decode_runs, total_clusters, RunChunk};
use crate::partition::Partition;
use crate::pool::{BufferChain, BufferPool};

/// Upper bound on clusters staged per device request.
pub const MAX_BATCH_CLUSTERS: u64 = 16;

/// Forward-only, non-seekable reader over non-resident attribute content.
///
/// The stream never reads past the declared run list; content ends at the
/// allocated length, so callers wanting the logical end compare against the
/// attribute's own data-size field. The staging chain goes back to the pool
/// when the stream drops, on every exit path.
pub struct AttributeStream<'p> {
    partition: &'p Partition,
    pool: Arc<BufferPool>,
    geometry: VolumeGeometry,
    chunks: Vec<RunChunk>,
    chunk_index: usize,
    /// Clusters of the current chunk already staged.
    clusters_consumed: u64,
    staging: Option<BufferChain>,
    staged_bytes: usize,
    staged_pos: usize,
}

impl<'p> AttributeStream<'p> {
    /// Open a stream over a non-resident attribute.
    ///
    /// Compressed, encrypted and sparse attributes are refused up front; the
    /// decoded run list must account for exactly the allocated cluster count.
    pub fn open(
        partition: &'p Partition,
        pool: &Arc<BufferPool>,
        geometry: VolumeGeometry,
        attr: &Attribute<'_>,
    ) -> Result<Self, RelicError> {
        if attr.is_compressed() {
            return Err(RelicError::NotSupported("compressed attribute".into()));
        }
        if attr.is_encrypted() {
            return Err(RelicError::NotSupported("encrypted attribute".into()));
        }
        if attr.is_sparse() {
            return Err(RelicError::NotSupported("sparse attribute".into()));
        }
        let ext = attr.non_resident()?;
        let chunks = decode_runs(attr.run_list()?)?;
        check_volume_bounds(&chunks, geometry.cluster_count())?;
        let decoded = total_clusters(&chunks) * geometry.cluster_size as u64;
        if decoded != { ext.allocated_size } {
            return Err(RelicError::FormatViolation(format!(
                "run list covers {} bytes, attribute allocates {}",
                decoded,
                { ext.allocated_size }
            )));
        }
        Ok(Self::from_chunks(partition, pool, geometry, chunks))
    }

    /// Stream over pre-decoded chunks; used where the run list is already
    /// held (the MFT's own DATA runs) and by tests.
    pub fn from_chunks(
        partition: &'p Partition,
        pool: &Arc<BufferPool>,
        geometry: VolumeGeometry,
        chunks: Vec<RunChunk>,
    ) -> Self {
        Self {
            partition,
            pool: Arc::clone(pool),
            geometry,
            chunks,
            chunk_index: 0,
            clusters_consumed: 0,
            staging: None,
            staged_bytes: 0,
            staged_pos: 0,
        }
    }

    /// Read up to `dest.len()` bytes. Returns the bytes copied; 0 only at
    /// the genuine end of the run list.
    pub fn read(&mut self, dest: &mut [u8]) -> Result<usize, RelicError> {
        let mut copied = 0;
        while copied < dest.len() {
            if self.staged_pos == self.staged_bytes && !self.stage_next_batch()? {
                break;
            }
            let take = (dest.len() - copied).min(self.staged_bytes - self.staged_pos);
            let staging = self.staging.as_ref().ok_or_else(|| {
                RelicError::InvariantViolation("stream has staged bytes but no staging chain".into())
            })?;
            staging.copy_to(self.staged_pos, &mut dest[copied..copied + take])?;
            self.staged_pos += take;
            copied += take;
        }
        Ok(copied)
    }

    /// Advance the cursor without delivering data. Whole clusters are
    /// skipped arithmetically; only a trailing partial cluster costs a read.
    pub fn skip(&mut self, mut count: u64) -> Result<(), RelicError> {
        // Drain whatever is already staged.
        let staged_left = (self.staged_bytes - self.staged_pos) as u64;
        if count <= staged_left {
            self.staged_pos += count as usize;
            return Ok(());
        }
        count -= staged_left;
        self.staged_pos = self.staged_bytes;

        let cluster = self.geometry.cluster_size as u64;
        while count >= cluster && self.chunk_index < self.chunks.len() {
            let remaining = self.chunks[self.chunk_index].length - self.clusters_consumed;
            if remaining == 0 {
                self.chunk_index += 1;
                self.clusters_consumed = 0;
                continue;
            }
            let hop = remaining.min(count / cluster);
            self.clusters_consumed += hop;
            count -= hop * cluster;
        }

        if count > 0 {
            if !self.stage_next_batch()? {
                // Forward-only contract: skipping beyond the end just pins
                // the cursor there; the next read reports end of stream.
                return Ok(());
            }
            self.staged_pos = (count as usize).min(self.staged_bytes);
        }
        Ok(())
    }

    /// Stage the next cluster-aligned batch. Returns false at end of runs.
    fn stage_next_batch(&mut self) -> Result<bool, RelicError> {
        let chunk = loop {
            match self.chunks.get(self.chunk_index) {
                None => return Ok(false),
                Some(chunk) if self.clusters_consumed >= chunk.length => {
                    self.chunk_index += 1;
                    self.clusters_consumed = 0;
                }
                Some(chunk) => break *chunk,
            }
        };

        let batch = (chunk.length - self.clusters_consumed).min(MAX_BATCH_CLUSTERS);
        let spc = self.geometry.sectors_per_cluster as u64;
        // An LCN is corruption-controlled data; it never reaches sector
        // arithmetic unchecked.
        let sector = chunk
            .lcn
            .checked_add(self.clusters_consumed)
            .and_then(|c| c.checked_mul(spc))
            .ok_or_else(|| {
                RelicError::FormatViolation(format!(
                    "cluster {} is beyond the addressable sector range",
                    chunk.lcn
                ))
            })?;

        if self.staging.is_none() {
            self.staging = Some(self.pool.acquire(
                self.geometry.cluster_size as usize,
                MAX_BATCH_CLUSTERS as usize,
                false,
            )?);
        }
        let staging = self.staging.as_mut().ok_or_else(|| {
            RelicError::InvariantViolation("staging chain missing after acquire".into())
        })?;
        self.partition.read_sectors(staging, 0, sector, batch * spc)?;
        trace!(
            "staged {} cluster(s) from LCN {} (chunk {})",
            batch,
            chunk.lcn + self.clusters_consumed,
            self.chunk_index
        );

        self.clusters_consumed += batch;
        self.staged_bytes = (batch * self.geometry.cluster_size as u64) as usize;
        self.staged_pos = 0;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boot_sector::tests::sample_boot_sector;
    use crate::boot_sector::decode_boot_sector;
    use crate::partition::shared_device;
    use relic_core::test_utils::SharedMemDevice;

    fn geometry() -> VolumeGeometry {
        decode_boot_sector(&sample_boot_sector()).unwrap()
    }

    fn patterned_image(bytes: usize) -> Vec<u8> {
        (0..bytes).map(|i| (i / 512 % 256) as u8).collect()
    }

    #[test]
    fn two_fragment_stream_batches_one_read_per_chunk() {
        let geometry = geometry();
        let cluster = geometry.cluster_size as usize;
        let spc = geometry.sectors_per_cluster as u64;

        let mem = SharedMemDevice::new(patterned_image(cluster * 128));
        let part = Partition::new(shared_device(mem.clone()), 0, 128 * spc, 512);
        let pool = BufferPool::new();

        let chunks = vec![
            RunChunk { lcn: 100, length: 4 },
            RunChunk { lcn: 70, length: 2 },
        ];
        let mut stream = AttributeStream::from_chunks(&part, &pool, geometry, chunks);

        let mut content = vec![0u8; 6 * cluster];
        assert_eq!(stream.read(&mut content).unwrap(), 6 * cluster);

        // Exactly two batched requests, one per chunk.
        assert_eq!(
            mem.requests(),
            vec![
                (100 * spc * 512, 4 * cluster),
                (70 * spc * 512, 2 * cluster),
            ]
        );

        // Content matches the source clusters.
        let image = patterned_image(cluster * 128);
        assert_eq!(&content[..4 * cluster], &image[100 * cluster..104 * cluster]);
        assert_eq!(&content[4 * cluster..], &image[70 * cluster..72 * cluster]);

        // End of run list: further reads return 0.
        assert_eq!(stream.read(&mut content[..16]).unwrap(), 0);
    }

    #[test]
    fn large_chunk_is_capped_by_batch_limit() {
        let geometry = geometry();
        let cluster = geometry.cluster_size as usize;
        let spc = geometry.sectors_per_cluster as u64;

        let mem = SharedMemDevice::new(patterned_image(cluster * 64));
        let part = Partition::new(shared_device(mem.clone()), 0, 64 * spc, 512);
        let pool = BufferPool::new();

        let chunks = vec![RunChunk { lcn: 0, length: 40 }];
        let mut stream = AttributeStream::from_chunks(&part, &pool, geometry, chunks);
        let mut out = vec![0u8; 40 * cluster];
        assert_eq!(stream.read(&mut out).unwrap(), 40 * cluster);

        // 40 clusters staged as 16 + 16 + 8.
        let sizes: Vec<usize> = mem.requests().iter().map(|r| r.1).collect();
        assert_eq!(sizes, vec![16 * cluster, 16 * cluster, 8 * cluster]);
    }

    #[test]
    fn small_reads_are_served_from_staging() {
        let geometry = geometry();
        let cluster = geometry.cluster_size as usize;
        let spc = geometry.sectors_per_cluster as u64;

        let mem = SharedMemDevice::new(patterned_image(cluster * 32));
        let part = Partition::new(shared_device(mem.clone()), 0, 32 * spc, 512);
        let pool = BufferPool::new();

        let chunks = vec![RunChunk { lcn: 2, length: 2 }];
        let mut stream = AttributeStream::from_chunks(&part, &pool, geometry, chunks);

        let mut a = vec![0u8; 100];
        let mut b = vec![0u8; 100];
        assert_eq!(stream.read(&mut a).unwrap(), 100);
        assert_eq!(stream.read(&mut b).unwrap(), 100);
        // One device request serves both partial reads.
        assert_eq!(mem.requests().len(), 1);
        assert_eq!(mem.requests()[0], (2 * cluster as u64, 2 * cluster));
    }

    #[test]
    fn skip_positions_without_reading_whole_prefix() {
        let geometry = geometry();
        let cluster = geometry.cluster_size as usize;
        let spc = geometry.sectors_per_cluster as u64;

        let image = patterned_image(cluster * 64);
        let mem = SharedMemDevice::new(image.clone());
        let part = Partition::new(shared_device(mem.clone()), 0, 64 * spc, 512);
        let pool = BufferPool::new();

        let chunks = vec![RunChunk { lcn: 8, length: 32 }];
        let mut stream = AttributeStream::from_chunks(&part, &pool, geometry, chunks);

        // Skip 10 clusters + 100 bytes, then read 16 bytes.
        stream.skip(10 * cluster as u64 + 100).unwrap();
        let mut out = [0u8; 16];
        assert_eq!(stream.read(&mut out).unwrap(), 16);
        let source = (8 + 10) * cluster + 100;
        assert_eq!(&out, &image[source..source + 16]);
        // Only one batch was staged; the skipped clusters were never read.
        assert_eq!(mem.requests().len(), 1);
        assert_eq!(mem.requests()[0].0, (8 + 10) as u64 * spc * 512);
    }

    #[test]
    fn skip_past_end_then_read_returns_zero() {
        let geometry = geometry();
        let spc = geometry.sectors_per_cluster as u64;
        let mem = SharedMemDevice::new(patterned_image(geometry.cluster_size as usize * 16));
        let part = Partition::new(shared_device(mem.clone()), 0, 16 * spc, 512);
        let pool = BufferPool::new();

        let chunks = vec![RunChunk { lcn: 0, length: 2 }];
        let mut stream = AttributeStream::from_chunks(&part, &pool, geometry, chunks);
        stream.skip(100 * geometry.cluster_size as u64).unwrap();
        assert_eq!(stream.read(&mut [0u8; 8]).unwrap(), 0);
    }

    #[test]
    fn hostile_lcn_fails_instead_of_wrapping() {
        let geometry = geometry();
        let spc = geometry.sectors_per_cluster as u64;
        let mem = SharedMemDevice::new(patterned_image(geometry.cluster_size as usize * 16));
        let part = Partition::new(shared_device(mem), 0, 16 * spc, 512);
        let pool = BufferPool::new();

        // A cluster number near 2^61 would overflow the sector product and,
        // wrapped, land on a valid in-partition sector.
        let chunks = vec![RunChunk { lcn: 1 << 61, length: 1 }];
        let mut stream = AttributeStream::from_chunks(&part, &pool, geometry, chunks);
        assert!(matches!(
            stream.read(&mut [0u8; 64]),
            Err(RelicError::FormatViolation(_)) | Err(RelicError::InvalidInput(_))
        ));
    }

    #[test]
    fn open_rejects_runs_outside_the_volume() {
        use crate::testkit::build_nonresident_attribute;
        use crate::structures::ATTR_TYPE_DATA;

        let geometry = geometry();
        let spc = geometry.sectors_per_cluster as u64;
        let mem = SharedMemDevice::new(patterned_image(geometry.cluster_size as usize * 16));
        let part = Partition::new(shared_device(mem), 0, 16 * spc, 512);
        let pool = BufferPool::new();

        // Structurally valid run list: 1 cluster at LCN 2^61.
        let mut runs = vec![0x81u8, 0x01];
        runs.extend_from_slice(&(1u64 << 61).to_le_bytes());
        runs.push(0x00);
        let buf = build_nonresident_attribute(
            ATTR_TYPE_DATA,
            None,
            &runs,
            geometry.cluster_size as u64,
            100,
        );
        let attr = crate::attributes::Attribute::parse(&buf, 0).unwrap();
        assert!(matches!(
            AttributeStream::open(&part, &pool, geometry, &attr),
            Err(RelicError::FormatViolation(_))
        ));
    }

    #[test]
    fn staging_chain_returns_to_pool_on_drop() {
        let geometry = geometry();
        let spc = geometry.sectors_per_cluster as u64;
        let mem = SharedMemDevice::new(patterned_image(geometry.cluster_size as usize * 32));
        let part = Partition::new(shared_device(mem), 0, 32 * spc, 512);
        let pool = BufferPool::new();

        {
            let chunks = vec![RunChunk { lcn: 0, length: 4 }];
            let mut stream = AttributeStream::from_chunks(&part, &pool, geometry, chunks);
            let mut out = vec![0u8; 64];
            stream.read(&mut out).unwrap();
            assert_eq!(pool.free_count(geometry.cluster_size as usize), 0);
        }
        assert_eq!(
            pool.free_count(geometry.cluster_size as usize),
            MAX_BATCH_CLUSTERS as usize
        );
    }
}
