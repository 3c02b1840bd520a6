// MBR partition table decoding.
// Only the four primary entries are read; partition-type dispatch is the
// caller's business, the engine just hands out typed entries.

use std::sync::Arc;

use log::debug;
use relic_core::RelicError;
use serde::Serialize;

use crate::partition::Partition;
use crate::pool::BufferPool;
use crate::structures::BOOT_SIGNATURE;

/// Partition table offset within the MBR sector.
const PARTITION_TABLE_OFFSET: usize = 446;
const PARTITION_ENTRY_SIZE: usize = 16;

/// MBR partition type byte for NTFS (also used by exFAT).
pub const PARTITION_TYPE_NTFS: u8 = 0x07;
/// Extended partition containers, not parseable as volumes themselves.
pub const PARTITION_TYPE_EXTENDED_CHS: u8 = 0x05;
pub const PARTITION_TYPE_EXTENDED_LBA: u8 = 0x0F;

/// One primary partition entry.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MbrPartition {
    /// Slot 0-3 in the table.
    pub index: u8,
    pub bootable: bool,
    pub partition_type: u8,
    pub start_lba: u64,
    pub sector_count: u64,
}

impl MbrPartition {
    pub fn is_ntfs(&self) -> bool {
        self.partition_type == PARTITION_TYPE_NTFS
    }

    pub fn is_extended(&self) -> bool {
        matches!(
            self.partition_type,
            PARTITION_TYPE_EXTENDED_CHS | PARTITION_TYPE_EXTENDED_LBA
        )
    }
}

/// Decode the four primary entries from a raw MBR sector. Empty slots
/// (type 0) are skipped.
pub fn decode_mbr(sector: &[u8]) -> Result<Vec<MbrPartition>, RelicError> {
    if sector.len() < 512 {
        return Err(RelicError::FormatViolation(format!(
            "MBR sector of {} bytes, need at least 512",
            sector.len()
        )));
    }
    if sector[510] != BOOT_SIGNATURE[0] || sector[511] != BOOT_SIGNATURE[1] {
        return Err(RelicError::FormatViolation(format!(
            "MBR signature {:02X}{:02X}, expected 55AA",
            sector[510], sector[511]
        )));
    }

    let mut partitions = Vec::new();
    for index in 0..4u8 {
        let base = PARTITION_TABLE_OFFSET + index as usize * PARTITION_ENTRY_SIZE;
        let entry = &sector[base..base + PARTITION_ENTRY_SIZE];
        let partition_type = entry[4];
        if partition_type == 0 {
            continue;
        }
        let start_lba = u32::from_le_bytes([entry[8], entry[9], entry[10], entry[11]]) as u64;
        let sector_count =
            u32::from_le_bytes([entry[12], entry[13], entry[14], entry[15]]) as u64;
        debug!(
            "MBR slot {}: type {:#04x}, LBA {} + {} sectors",
            index, partition_type, start_lba, sector_count
        );
        partitions.push(MbrPartition {
            index,
            bootable: entry[0] == 0x80,
            partition_type,
            start_lba,
            sector_count,
        });
    }
    Ok(partitions)
}

/// Read sector 0 of the device (through a whole-device partition) and decode
/// its table. Uses a non-pooled buffer; no volume geometry exists yet.
pub fn discover_partitions(
    device_span: &Partition,
    pool: &Arc<BufferPool>,
) -> Result<Vec<MbrPartition>, RelicError> {
    let bps = device_span.bytes_per_sector() as usize;
    let mut chain = pool.acquire(bps, 1, true)?;
    device_span.read_sectors(&mut chain, 0, 0, 1)?;
    let sector = chain.to_vec()?;
    chain.release()?;
    decode_mbr(&sector)
}
