// Shared test doubles for device-level testing.
// Available to dependent crates so the engine's batching behavior can be
// asserted against a recorded read log.

use std::io::Read;
use std::sync::{Arc, Mutex};

use crate::{BlockDevice, RelicError};

/// In-memory block device that records every seek+read pair issued against
/// it as `(byte_offset, byte_count)`.
pub struct MemDevice {
    data: Vec<u8>,
    cursor: u64,
    reads: Vec<(u64, usize)>,
    requests: Vec<(u64, usize)>,
}

impl MemDevice {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, cursor: 0, reads: Vec::new(), requests: Vec::new() }
    }

    /// All reads issued so far, in order.
    pub fn reads(&self) -> &[(u64, usize)] {
        &self.reads
    }

    pub fn read_count(&self) -> usize {
        self.reads.len()
    }

    /// Seek+read sequences: one entry per seek, accumulating every byte read
    /// before the next seek. This is the granularity of a batched request.
    pub fn requests(&self) -> &[(u64, usize)] {
        &self.requests
    }
}

impl BlockDevice for MemDevice {
    fn seek_to(&mut self, offset: u64) -> Result<u64, RelicError> {
        self.cursor = offset;
        self.requests.push((offset, 0));
        Ok(offset)
    }

    fn read_at_cursor(&mut self, buf: &mut [u8]) -> Result<usize, RelicError> {
        let start = self.cursor as usize;
        let mut slice = self.data.get(start..).unwrap_or(&[]);
        let n = slice.read(buf)?;
        self.reads.push((self.cursor, n));
        if self.requests.is_empty() {
            self.requests.push((self.cursor, 0));
        }
        if let Some(last) = self.requests.last_mut() {
            last.1 += n;
        }
        self.cursor += n as u64;
        Ok(n)
    }

    fn size(&self) -> Result<u64, RelicError> {
        Ok(self.data.len() as u64)
    }
}

/// Cloneable handle around a `MemDevice` so a test can keep inspecting the
/// read log after handing the device to the code under test.
#[derive(Clone)]
pub struct SharedMemDevice(pub Arc<Mutex<MemDevice>>);

impl SharedMemDevice {
    pub fn new(data: Vec<u8>) -> Self {
        Self(Arc::new(Mutex::new(MemDevice::new(data))))
    }

    pub fn reads(&self) -> Vec<(u64, usize)> {
        self.0.lock().unwrap().reads().to_vec()
    }

    pub fn read_count(&self) -> usize {
        self.0.lock().unwrap().read_count()
    }

    pub fn requests(&self) -> Vec<(u64, usize)> {
        self.0.lock().unwrap().requests().to_vec()
    }
}

impl BlockDevice for SharedMemDevice {
    fn seek_to(&mut self, offset: u64) -> Result<u64, RelicError> {
        self.0.lock().unwrap().seek_to(offset)
    }

    fn read_at_cursor(&mut self, buf: &mut [u8]) -> Result<usize, RelicError> {
        self.0.lock().unwrap().read_at_cursor(buf)
    }

    fn size(&self) -> Result<u64, RelicError> {
        self.0.lock().unwrap().size()
    }
}

/// Device that fails every read with a fixed OS error, for propagation tests.
pub struct FailingDevice;

impl BlockDevice for FailingDevice {
    fn seek_to(&mut self, offset: u64) -> Result<u64, RelicError> {
        Ok(offset)
    }

    fn read_at_cursor(&mut self, _buf: &mut [u8]) -> Result<usize, RelicError> {
        Err(RelicError::DeviceIo(std::io::Error::from_raw_os_error(5)))
    }

    fn size(&self) -> Result<u64, RelicError> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_device_records_reads() {
        let mut dev = MemDevice::new(vec![7u8; 1024]);
        dev.seek_to(512).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(dev.read_at_cursor(&mut buf).unwrap(), 16);
        assert_eq!(dev.reads(), &[(512, 16)]);
        assert_eq!(buf, [7u8; 16]);
    }

    #[test]
    fn mem_device_short_read_at_end() {
        let mut dev = MemDevice::new(vec![0u8; 10]);
        dev.seek_to(8).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(dev.read_at_cursor(&mut buf).unwrap(), 2);
    }

    #[test]
    fn failing_device_preserves_os_code() {
        let mut dev = FailingDevice;
        let err = dev.read_at_cursor(&mut [0u8; 4]).unwrap_err();
        assert_eq!(err.os_code(), Some(5));
    }
}
