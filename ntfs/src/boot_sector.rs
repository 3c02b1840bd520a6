// Boot sector interpretation.
// Sector 0 of an NTFS partition is decoded field-by-field at fixed offsets;
// the decode cursor must land exactly at the start of the bootstrap code
// (byte 0x54), otherwise the sector is rejected as a whole.

use std::io::Cursor;
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, info};
use relic_core::RelicError;
use serde::Serialize;

use crate::partition::Partition;
use crate::pool::BufferPool;
use crate::structures::{BOOT_SIGNATURE, NTFS_OEM_ID};

/// Offset where the geometry fields end and bootstrap code begins.
const GEOMETRY_END: u64 = 0x54;

/// Volume geometry decoded from the boot sector. Immutable once built.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct VolumeGeometry {
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
    pub cluster_size: u32,
    pub total_sectors: u64,
    pub mft_cluster: u64,
    pub mft_mirror_cluster: u64,
    pub record_size: u32,
    pub index_block_size: u32,
    pub index_block_clusters: u32,
    pub volume_serial: u64,
}

impl VolumeGeometry {
    /// First sector of the MFT, partition-relative.
    pub fn mft_start_sector(&self) -> u64 {
        self.mft_cluster * self.sectors_per_cluster as u64
    }

    pub fn sectors_per_record(&self) -> u64 {
        (self.record_size / self.bytes_per_sector) as u64
    }

    /// Addressable clusters on the volume.
    pub fn cluster_count(&self) -> u64 {
        self.total_sectors / self.sectors_per_cluster as u64
    }
}

/// Read sector 0 of `partition` and decode it.
///
/// The cluster size is unknown at this point, so the read goes through a
/// single non-pooled buffer.
pub fn interpret_boot_sector(
    partition: &Partition,
    pool: &Arc<BufferPool>,
) -> Result<VolumeGeometry, RelicError> {
    let bps = partition.bytes_per_sector() as usize;
    let mut chain = pool.acquire(bps, 1, true)?;
    partition.read_sectors(&mut chain, 0, 0, 1)?;
    let sector = chain.to_vec()?;
    chain.release()?;
    let geometry = decode_boot_sector(&sector)?;
    info!(
        "NTFS volume: {} bytes/cluster, MFT at cluster {}, serial {:016X}",
        geometry.cluster_size, geometry.mft_cluster, geometry.volume_serial
    );
    Ok(geometry)
}

/// Decode a raw boot sector. Any structural mismatch is a format violation;
/// nothing is tolerated or corrected silently.
pub fn decode_boot_sector(sector: &[u8]) -> Result<VolumeGeometry, RelicError> {
    if sector.len() < 512 {
        return Err(RelicError::FormatViolation(format!(
            "boot sector of {} bytes, need at least 512",
            sector.len()
        )));
    }
    if sector[510] != BOOT_SIGNATURE[0] || sector[511] != BOOT_SIGNATURE[1] {
        return Err(RelicError::FormatViolation(format!(
            "boot signature {:02X}{:02X}, expected 55AA",
            sector[510], sector[511]
        )));
    }
    if &sector[3..11] != NTFS_OEM_ID {
        return Err(RelicError::FormatViolation(format!(
            "OEM identifier {:?} is not \"NTFS    \"",
            String::from_utf8_lossy(&sector[3..11])
        )));
    }

    let mut cursor = Cursor::new(sector);
    cursor.set_position(0x0B); // jump + OEM id already validated

    let bytes_per_sector = cursor.read_u16::<LittleEndian>()? as u32;
    let sectors_per_cluster = cursor.read_u8()? as u32;
    let _reserved_sectors = cursor.read_u16::<LittleEndian>()?;
    cursor.set_position(cursor.position() + 3); // always-zero
    let _unused = cursor.read_u16::<LittleEndian>()?;
    let _media_descriptor = cursor.read_u8()?;
    cursor.set_position(cursor.position() + 2); // always-zero
    let _sectors_per_track = cursor.read_u16::<LittleEndian>()?;
    let _heads = cursor.read_u16::<LittleEndian>()?;
    let _hidden_sectors = cursor.read_u32::<LittleEndian>()?;
    cursor.set_position(cursor.position() + 8); // two unused dwords
    let total_sectors = cursor.read_u64::<LittleEndian>()?;
    let mft_cluster = cursor.read_u64::<LittleEndian>()?;
    let mft_mirror_cluster = cursor.read_u64::<LittleEndian>()?;
    let clusters_per_record = cursor.read_i8()?;
    cursor.set_position(cursor.position() + 3);
    let clusters_per_index_block = cursor.read_i8()?;
    cursor.set_position(cursor.position() + 3);
    let volume_serial = cursor.read_u64::<LittleEndian>()?;
    let _checksum = cursor.read_u32::<LittleEndian>()?;

    if cursor.position() != GEOMETRY_END {
        return Err(RelicError::FormatViolation(format!(
            "geometry decode ended at {:#x}, expected {:#x}",
            cursor.position(),
            GEOMETRY_END
        )));
    }

    if !(512..=4096).contains(&bytes_per_sector) || !bytes_per_sector.is_power_of_two() {
        return Err(RelicError::FormatViolation(format!(
            "bytes per sector {}",
            bytes_per_sector
        )));
    }
    if sectors_per_cluster == 0 || !sectors_per_cluster.is_power_of_two() {
        return Err(RelicError::FormatViolation(format!(
            "sectors per cluster {}",
            sectors_per_cluster
        )));
    }
    if total_sectors == 0 || mft_cluster == 0 {
        return Err(RelicError::FormatViolation(
            "zero total sectors or MFT cluster".into(),
        ));
    }

    let cluster_size = bytes_per_sector * sectors_per_cluster;
    let record_size = size_from_clusters(clusters_per_record, cluster_size);
    let index_block_size = size_from_clusters(clusters_per_index_block, cluster_size);
    let index_block_clusters = index_block_size.div_ceil(cluster_size);

    debug!(
        "boot sector: {} b/s, {} s/c, {} total sectors, record size {}, index block {}",
        bytes_per_sector, sectors_per_cluster, total_sectors, record_size, index_block_size
    );

    Ok(VolumeGeometry {
        bytes_per_sector,
        sectors_per_cluster,
        cluster_size,
        total_sectors,
        mft_cluster,
        mft_mirror_cluster,
        record_size,
        index_block_size,
        index_block_clusters,
        volume_serial,
    })
}

/// A positive value counts clusters; a negative value encodes 2^(-n) bytes.
fn size_from_clusters(raw: i8, cluster_size: u32) -> u32 {
    if raw >= 0 {
        raw as u32 * cluster_size
    } else {
        1u32 << (-(raw as i32)) as u32
    }
}
