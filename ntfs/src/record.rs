// File records: the fixed-size MFT slots.
// A record is validated ("FILE" magic), has its fixups reverted, and then
// owns its buffer for the lifetime of every attribute view handed out.

use log::trace;
use relic_core::RelicError;

use crate::attributes::Attribute;
use crate::structures::*;

/// Revert the update-sequence fixups in a multi-sector block.
///
/// NTFS overwrites the last two bytes of every sector with the update
/// sequence number at write time; the displaced originals live in the update
/// sequence array. Each tail must still equal the sequence number, otherwise
/// the block is a torn write and nothing in it can be trusted.
pub fn apply_fixups(
    block: &mut [u8],
    usa_offset: u16,
    usa_count: u16,
    bytes_per_sector: u32,
) -> Result<(), RelicError> {
    let usa_offset = usa_offset as usize;
    let usa_count = usa_count as usize;
    let bps = bytes_per_sector as usize;

    if usa_count < 2 {
        return Err(RelicError::FormatViolation(format!(
            "update sequence array of {} entries",
            usa_count
        )));
    }
    let sectors = usa_count - 1;
    if usa_offset + usa_count * 2 > block.len() || sectors * bps > block.len() {
        return Err(RelicError::FormatViolation(
            "update sequence array outside block".into(),
        ));
    }

    let usn = [block[usa_offset], block[usa_offset + 1]];
    for sector in 0..sectors {
        let tail = (sector + 1) * bps - 2;
        if block[tail] != usn[0] || block[tail + 1] != usn[1] {
            return Err(RelicError::FormatViolation(format!(
                "torn write: sector {} tail {:02X}{:02X} != usn {:02X}{:02X}",
                sector, block[tail], block[tail + 1], usn[0], usn[1]
            )));
        }
        let slot = usa_offset + 2 + sector * 2;
        block[tail] = block[slot];
        block[tail + 1] = block[slot + 1];
    }
    Ok(())
}

/// One MFT record, owning its (fixed-up) buffer.
#[derive(Clone)]
pub struct FileRecord {
    index: u64,
    data: Box<[u8]>,
}

impl FileRecord {
    /// Validate magic, revert fixups, take ownership of the buffer.
    pub fn parse(
        index: u64,
        mut bytes: Vec<u8>,
        bytes_per_sector: u32,
    ) -> Result<Self, RelicError> {
        if bytes.len() < std::mem::size_of::<FileRecordHeader>() {
            return Err(RelicError::FormatViolation(format!(
                "record {} of {} bytes, below header size",
                index,
                bytes.len()
            )));
        }
        if &bytes[0..4] != FILE_RECORD_MAGIC {
            return Err(RelicError::FormatViolation(format!(
                "record {}: magic {:02X?} is not \"FILE\"",
                index,
                &bytes[0..4]
            )));
        }
        let header: FileRecordHeader = overlay(&bytes, 0)?;
        apply_fixups(&mut bytes, header.usa_offset, header.usa_count, bytes_per_sector)?;
        trace!(
            "record {}: seq {}, {} links, {} bytes in use",
            index,
            { header.sequence_number },
            { header.link_count },
            { header.bytes_in_use }
        );
        Ok(Self { index, data: bytes.into_boxed_slice() })
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn header(&self) -> FileRecordHeader {
        overlay(&self.data, 0).expect("length validated at parse")
    }

    pub fn sequence_number(&self) -> u16 {
        self.header().sequence_number
    }

    pub fn is_in_use(&self) -> bool {
        self.header().flags & RECORD_FLAG_IN_USE != 0
    }

    pub fn is_directory(&self) -> bool {
        self.header().flags & RECORD_FLAG_IS_DIRECTORY != 0
    }

    /// Record index combined with the sequence number: the identity other
    /// structures use to reference this record.
    pub fn reference(&self) -> u64 {
        self.index | (self.sequence_number() as u64) << 48
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Walk the record's own attribute chain. Attribute-list indirection is
    /// the catalog's concern; this iterator sees only local attributes.
    pub fn attributes(&self) -> AttributeIter<'_> {
        let header = self.header();
        AttributeIter {
            data: &self.data,
            offset: { header.attrs_offset } as usize,
            bytes_in_use: ({ header.bytes_in_use } as usize).min(self.data.len()),
            done: false,
        }
    }

    /// Nth local attribute of `type_code`. `name` filters alternate streams:
    /// `None` matches only the unnamed primary instance.
    pub fn find_local(
        &self,
        type_code: u32,
        order: usize,
        name: Option<&str>,
    ) -> Result<Option<Attribute<'_>>, RelicError> {
        let mut seen = 0;
        for attr in self.attributes() {
            let attr = attr?;
            if attr.type_code() != type_code {
                continue;
            }
            if attr.name()?.as_deref() != name {
                continue;
            }
            if seen == order {
                return Ok(Some(attr));
            }
            seen += 1;
        }
        Ok(None)
    }

    /// First FILE_NAME attribute value, preferring non-DOS namespaces.
    pub fn primary_name(&self) -> Result<Option<String>, RelicError> {
        let mut dos_name = None;
        for attr in self.attributes() {
            let attr = attr?;
            if attr.type_code() != ATTR_TYPE_FILE_NAME {
                continue;
            }
            let (fixed, name) = attr.file_name()?;
            if fixed.namespace == FILE_NAME_DOS {
                dos_name.get_or_insert(name);
            } else {
                return Ok(Some(name));
            }
        }
        Ok(dos_name)
    }
}

/// Iterator over a record's local attribute chain. Terminates at the
/// end-marker type, at the unused-id sentinel, or when the cursor would pass
/// bytes-in-use; corruption surfaces as an `Err` item and ends the walk.
pub struct AttributeIter<'a> {
    data: &'a [u8],
    offset: usize,
    bytes_in_use: usize,
    done: bool,
}

impl<'a> Iterator for AttributeIter<'a> {
    type Item = Result<Attribute<'a>, RelicError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.offset + 4 > self.bytes_in_use {
            self.done = true;
            return None;
        }
        let type_code = u32::from_le_bytes([
            self.data[self.offset],
            self.data[self.offset + 1],
            self.data[self.offset + 2],
            self.data[self.offset + 3],
        ]);
        if type_code == ATTR_TYPE_END {
            self.done = true;
            return None;
        }

        match Attribute::parse(self.data, self.offset) {
            Ok(attr) => {
                if attr.attribute_id() == ATTR_ID_UNUSED {
                    self.done = true;
                    return None;
                }
                let next = self.offset + attr.length();
                if next > self.bytes_in_use {
                    self.done = true;
                    return Some(Err(RelicError::FormatViolation(format!(
                        "attribute at {} runs past bytes-in-use {}",
                        self.offset, self.bytes_in_use
                    ))));
                }
                self.offset = next;
                Some(Ok(attr))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
