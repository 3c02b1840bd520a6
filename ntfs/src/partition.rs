// Partition abstraction: partition-relative sector addressing over a shared
// block device. One read_sectors call is one atomic seek+read sequence; the
// per-device lock makes it non-reentrant, so a caller must never issue a
// nested read against the same partition from inside one.

use std::io;
use std::sync::{Arc, Mutex};

use log::trace;
use relic_core::{BlockDevice, RelicError};

use crate::pool::{BufferChain, BufferPool};

pub type SharedDevice = Arc<Mutex<Box<dyn BlockDevice>>>;

/// Wrap a device for sharing between partitions.
pub fn shared_device(device: impl BlockDevice + 'static) -> SharedDevice {
    Arc::new(Mutex::new(Box::new(device) as Box<dyn BlockDevice>))
}

pub struct Partition {
    device: SharedDevice,
    start_sector: u64,
    sector_count: u64,
    bytes_per_sector: u32,
}

impl Partition {
    pub fn new(
        device: SharedDevice,
        start_sector: u64,
        sector_count: u64,
        bytes_per_sector: u32,
    ) -> Self {
        Self { device, start_sector, sector_count, bytes_per_sector }
    }

    /// Partition spanning a whole device, sector 0 upward.
    pub fn whole_device(device: SharedDevice, bytes_per_sector: u32) -> Result<Self, RelicError> {
        let size = device.lock().expect("device lock poisoned").size()?;
        Ok(Self::new(device, 0, size / bytes_per_sector as u64, bytes_per_sector))
    }

    /// Share the underlying device handle, e.g. to construct a sibling
    /// partition from the same MBR.
    pub fn device(&self) -> SharedDevice {
        Arc::clone(&self.device)
    }

    pub fn start_sector(&self) -> u64 {
        self.start_sector
    }

    pub fn sector_count(&self) -> u64 {
        self.sector_count
    }

    pub fn bytes_per_sector(&self) -> u32 {
        self.bytes_per_sector
    }

    /// Read `count` sectors at partition-relative `logical_sector` into
    /// `dest`, starting `at_offset` bytes into the chain.
    ///
    /// Capacity and range are validated before any device I/O. A short read
    /// is fatal: sector math further up depends on every byte arriving.
    pub fn read_sectors(
        &self,
        dest: &mut BufferChain,
        at_offset: usize,
        logical_sector: u64,
        count: u64,
    ) -> Result<(), RelicError> {
        let in_range = logical_sector
            .checked_add(count)
            .map_or(false, |end| end <= self.sector_count);
        if !in_range {
            return Err(RelicError::InvalidInput(format!(
                "sectors {}+{} outside partition of {} sectors",
                logical_sector, count, self.sector_count
            )));
        }
        let byte_count = count as usize * self.bytes_per_sector as usize;
        if at_offset + byte_count > dest.capacity() {
            return Err(RelicError::InvalidInput(format!(
                "destination chain of {} bytes cannot take {} bytes at offset {}",
                dest.capacity(),
                byte_count,
                at_offset
            )));
        }

        let device_offset = logical_sector
            .checked_add(self.start_sector)
            .and_then(|s| s.checked_mul(self.bytes_per_sector as u64))
            .ok_or_else(|| {
                RelicError::InvalidInput(format!(
                    "sector {} past the addressable byte range",
                    logical_sector
                ))
            })?;
        trace!(
            "read {} sector(s) at lsn {} (device offset {})",
            count,
            logical_sector,
            device_offset
        );

        let mut device = self.device.lock().expect("device lock poisoned");
        device.seek_to(device_offset)?;

        let mut pos = at_offset;
        let mut remaining = byte_count;
        while remaining > 0 {
            let chunk = dest.chunk_mut(pos)?;
            let want = remaining.min(chunk.len());
            let got = device.read_at_cursor(&mut chunk[..want])?;
            if got == 0 {
                return Err(RelicError::DeviceIo(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "device returned {} of {} bytes at offset {}",
                        byte_count - remaining,
                        byte_count,
                        device_offset
                    ),
                )));
            }
            pos += got;
            remaining -= got;
        }
        Ok(())
    }

    /// Convenience form: acquires its own chain from the pool and reads into
    /// it. The chain is released by its own drop on every failure path.
    pub fn read_sectors_pooled(
        &self,
        pool: &Arc<BufferPool>,
        logical_sector: u64,
        count: u64,
        unit_sectors: u64,
    ) -> Result<BufferChain, RelicError> {
        if unit_sectors == 0 || count % unit_sectors != 0 {
            return Err(RelicError::InvalidInput(format!(
                "{} sectors not divisible into units of {}",
                count, unit_sectors
            )));
        }
        let unit_size = unit_sectors as usize * self.bytes_per_sector as usize;
        let mut chain = pool.acquire(unit_size, (count / unit_sectors) as usize, false)?;
        self.read_sectors(&mut chain, 0, logical_sector, count)?;
        Ok(chain)
    }
}
