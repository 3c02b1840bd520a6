// Block device abstraction
// The engine only ever needs seek + sequential read; everything else
// (enumeration, privileges, ioctls) stays outside this crate.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use log::debug;

use crate::RelicError;

/// Synchronous raw block device.
///
/// One call is one device operation; the engine serializes access per
/// partition, so implementations do not need internal locking. A read may
/// return fewer bytes than requested only at end of device.
pub trait BlockDevice: Send {
    /// Seek to an absolute byte offset. Returns the resulting position.
    fn seek_to(&mut self, offset: u64) -> Result<u64, RelicError>;

    /// Read into `buf` from the current position. Returns bytes read.
    fn read_at_cursor(&mut self, buf: &mut [u8]) -> Result<usize, RelicError>;

    /// Total device size in bytes.
    fn size(&self) -> Result<u64, RelicError>;
}

/// Block device backed by a file: a raw device node (`/dev/sdb`,
/// `\\.\PhysicalDrive1`) or a disk image.
#[derive(Debug)]
pub struct FileDevice {
    file: File,
    path: String,
}

impl FileDevice {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RelicError> {
        let path_str = path.as_ref().display().to_string();
        let file = File::open(path.as_ref())?;
        debug!("Opened block device {}", path_str);
        Ok(Self { file, path: path_str })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl BlockDevice for FileDevice {
    fn seek_to(&mut self, offset: u64) -> Result<u64, RelicError> {
        Ok(self.file.seek(SeekFrom::Start(offset))?)
    }

    fn read_at_cursor(&mut self, buf: &mut [u8]) -> Result<usize, RelicError> {
        Ok(self.file.read(buf)?)
    }

    fn size(&self) -> Result<u64, RelicError> {
        Ok(self.file.metadata()?.len())
    }
}
