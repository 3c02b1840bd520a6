// NTFS on-disk structures and constants.
// Everything here is a fixed little-endian layout consumed verbatim from the
// volume; parsing logic lives in the sibling modules.

use relic_core::RelicError;
use static_assertions::const_assert_eq;

/// File record magic at the start of every MFT slot.
pub const FILE_RECORD_MAGIC: &[u8; 4] = b"FILE";

/// Index allocation block magic.
pub const INDX_BLOCK_MAGIC: &[u8; 4] = b"INDX";

/// OEM identifier at boot sector offset 3.
pub const NTFS_OEM_ID: &[u8; 8] = b"NTFS    ";

/// Boot signature bytes at offsets 510-511.
pub const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];

/// Default MFT record size when the boot sector encodes the usual 2^10.
pub const DEFAULT_RECORD_SIZE: u32 = 1024;

// Attribute type codes
pub const ATTR_TYPE_STANDARD_INFORMATION: u32 = 0x10;
pub const ATTR_TYPE_ATTRIBUTE_LIST: u32 = 0x20;
pub const ATTR_TYPE_FILE_NAME: u32 = 0x30;
pub const ATTR_TYPE_OBJECT_ID: u32 = 0x40;
pub const ATTR_TYPE_SECURITY_DESCRIPTOR: u32 = 0x50;
pub const ATTR_TYPE_VOLUME_NAME: u32 = 0x60;
pub const ATTR_TYPE_VOLUME_INFORMATION: u32 = 0x70;
pub const ATTR_TYPE_DATA: u32 = 0x80;
pub const ATTR_TYPE_INDEX_ROOT: u32 = 0x90;
pub const ATTR_TYPE_INDEX_ALLOCATION: u32 = 0xA0;
pub const ATTR_TYPE_BITMAP: u32 = 0xB0;
pub const ATTR_TYPE_REPARSE_POINT: u32 = 0xC0;
pub const ATTR_TYPE_EA_INFORMATION: u32 = 0xD0;
pub const ATTR_TYPE_EA: u32 = 0xE0;
pub const ATTR_TYPE_LOGGED_UTILITY_STREAM: u32 = 0x100;
/// End-of-chain marker in a record's attribute sequence.
pub const ATTR_TYPE_END: u32 = 0xFFFF_FFFF;

/// Sentinel attribute id marking a slot never used.
pub const ATTR_ID_UNUSED: u16 = 0xFFFF;

// Attribute flags
pub const ATTR_FLAG_COMPRESSED: u16 = 0x0001;
pub const ATTR_FLAG_ENCRYPTED: u16 = 0x4000;
pub const ATTR_FLAG_SPARSE: u16 = 0x8000;

// File record flags
pub const RECORD_FLAG_IN_USE: u16 = 0x0001;
pub const RECORD_FLAG_IS_DIRECTORY: u16 = 0x0002;

/// FILE_NAME attribute flag set on directories (index present).
pub const FILE_ATTR_DIRECTORY: u32 = 0x1000_0000;

// File name namespaces
pub const FILE_NAME_POSIX: u8 = 0;
pub const FILE_NAME_WIN32: u8 = 1;
pub const FILE_NAME_DOS: u8 = 2;
pub const FILE_NAME_WIN32_AND_DOS: u8 = 3;

// Collation rules declared by index roots
pub const COLLATION_BINARY: u32 = 0x00;
pub const COLLATION_FILE_NAME: u32 = 0x01;
pub const COLLATION_UNICODE: u32 = 0x02;
pub const COLLATION_ULONG: u32 = 0x10;
pub const COLLATION_SID: u32 = 0x11;
pub const COLLATION_SECURITY_HASH: u32 = 0x12;
pub const COLLATION_ULONGS: u32 = 0x13;

// Index entry flags
pub const INDEX_ENTRY_HAS_CHILD: u16 = 0x01;
pub const INDEX_ENTRY_LAST: u16 = 0x02;

// Index node header flags
pub const INDEX_NODE_HAS_CHILDREN: u32 = 0x01;

/// A file reference addresses a record by its low 48 bits; the high 16 bits
/// carry the expected sequence number.
pub const FILE_REFERENCE_INDEX_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

// Well-known MFT record indices
pub const MFT_RECORD_MFT: u64 = 0;
pub const MFT_RECORD_MFT_MIRROR: u64 = 1;
pub const MFT_RECORD_LOG_FILE: u64 = 2;
pub const MFT_RECORD_VOLUME: u64 = 3;
pub const MFT_RECORD_ATTR_DEF: u64 = 4;
pub const MFT_RECORD_ROOT: u64 = 5;
pub const MFT_RECORD_BITMAP: u64 = 6;
pub const MFT_RECORD_BOOT: u64 = 7;
pub const MFT_RECORD_BAD_CLUSTERS: u64 = 8;
pub const MFT_RECORD_SECURE: u64 = 9;
pub const MFT_RECORD_UPCASE: u64 = 10;
pub const MFT_RECORD_EXTEND: u64 = 11;

/// The 16 fixed metadata-file slots at the start of every MFT. Slots past
/// $Extend are reserved on 3.x volumes but were named files on older ones.
pub const WELL_KNOWN_NAMES: [&str; 16] = [
    "$MFT", "$MFTMirr", "$LogFile", "$Volume", "$AttrDef", ".", "$Bitmap",
    "$Boot", "$BadClus", "$Secure", "$UpCase", "$Extend", "$Quota", "$ObjId",
    "$Reparse", "$Reserved15",
];

/// Difference between the FILETIME epoch (1601) and the Unix epoch (1970),
/// in 100-nanosecond units.
pub const FILETIME_UNIX_EPOCH: u64 = 116_444_736_000_000_000;

/// Convert a Windows FILETIME to Unix seconds. Times before 1970 clamp to 0.
pub fn filetime_to_unix(filetime: u64) -> u64 {
    filetime.saturating_sub(FILETIME_UNIX_EPOCH) / 10_000_000
}

/// File record header: the first 48 bytes of every MFT slot.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct FileRecordHeader {
    pub magic: [u8; 4],
    pub usa_offset: u16,
    pub usa_count: u16,
    pub lsn: u64,
    pub sequence_number: u16,
    pub link_count: u16,
    pub attrs_offset: u16,
    pub flags: u16,
    pub bytes_in_use: u32,
    pub bytes_allocated: u32,
    pub base_record: u64,
    pub next_attribute_id: u16,
    pub alignment: u16,
    pub record_number: u32,
}

const_assert_eq!(std::mem::size_of::<FileRecordHeader>(), 48);

/// Common attribute header, first 16 bytes of every attribute.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AttributeHeader {
    pub type_code: u32,
    pub length: u32,
    pub non_resident: u8,
    pub name_length: u8,
    pub name_offset: u16,
    pub flags: u16,
    pub attribute_id: u16,
}

const_assert_eq!(std::mem::size_of::<AttributeHeader>(), 16);

/// Resident extension following the common header.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct ResidentExtension {
    pub value_length: u32,
    pub value_offset: u16,
    pub indexed: u8,
    pub padding: u8,
}

const_assert_eq!(std::mem::size_of::<ResidentExtension>(), 8);

/// Non-resident extension following the common header.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct NonResidentExtension {
    pub start_vcn: u64,
    pub end_vcn: u64,
    pub runs_offset: u16,
    pub compression_unit: u16,
    pub padding: u32,
    pub allocated_size: u64,
    pub data_size: u64,
    pub initialized_size: u64,
}

const_assert_eq!(std::mem::size_of::<NonResidentExtension>(), 48);

/// Fixed part of the FILE_NAME attribute value; the UTF-16LE name follows.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct FileNameValue {
    pub parent_reference: u64,
    pub creation_time: u64,
    pub modification_time: u64,
    pub mft_modification_time: u64,
    pub access_time: u64,
    pub allocated_size: u64,
    pub data_size: u64,
    pub file_attributes: u32,
    pub reparse_tag: u32,
    pub name_length: u8,
    pub namespace: u8,
}

const_assert_eq!(std::mem::size_of::<FileNameValue>(), 66);

/// STANDARD_INFORMATION value (NT 1.x fixed part; 3.0 appends quota/USN
/// fields the engine does not consume).
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct StandardInformationValue {
    pub creation_time: u64,
    pub modification_time: u64,
    pub mft_modification_time: u64,
    pub access_time: u64,
    pub file_attributes: u32,
    pub max_versions: u32,
    pub version: u32,
    pub class_id: u32,
}

const_assert_eq!(std::mem::size_of::<StandardInformationValue>(), 48);

/// Fixed part of one ATTRIBUTE_LIST entry; the name (if any) follows at
/// `name_offset` and the entry is `length` bytes in total.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AttributeListEntry {
    pub type_code: u32,
    pub length: u16,
    pub name_length: u8,
    pub name_offset: u8,
    pub start_vcn: u64,
    pub base_reference: u64,
    pub attribute_id: u16,
}

const_assert_eq!(std::mem::size_of::<AttributeListEntry>(), 26);

/// INDEX_ROOT value header; an index node header follows immediately.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct IndexRootHeader {
    pub indexed_type: u32,
    pub collation_rule: u32,
    pub index_block_size: u32,
    pub clusters_per_block: u8,
    pub reserved: [u8; 3],
}

const_assert_eq!(std::mem::size_of::<IndexRootHeader>(), 16);

/// Index node header, common to the root node and allocation blocks.
/// Offsets are relative to the start of this header.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct IndexNodeHeader {
    pub entries_offset: u32,
    pub used_size: u32,
    pub allocated_size: u32,
    pub flags: u32,
}

const_assert_eq!(std::mem::size_of::<IndexNodeHeader>(), 16);

/// Index entry header; the key (a FILE_NAME value for directories) follows,
/// and entries with `INDEX_ENTRY_HAS_CHILD` carry a trailing child VCN.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct IndexEntryHeader {
    pub reference: u64,
    pub length: u16,
    pub key_length: u16,
    pub flags: u16,
    pub reserved: u16,
}

const_assert_eq!(std::mem::size_of::<IndexEntryHeader>(), 16);

/// Header of one INDEX_ALLOCATION block ("INDX"); fixed up like a file
/// record, with the node header at offset 24.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct IndxBlockHeader {
    pub magic: [u8; 4],
    pub usa_offset: u16,
    pub usa_count: u16,
    pub lsn: u64,
    pub vcn: u64,
}

const_assert_eq!(std::mem::size_of::<IndxBlockHeader>(), 24);

/// Bounds-checked overlay of a packed on-disk struct at `offset`.
///
/// The only unsafe in the crate; soundness rests on the length check and on
/// every overlay type being `repr(C, packed)` + `Copy` with no padding or
/// invalid bit patterns.
pub fn overlay<T: Copy>(data: &[u8], offset: usize) -> Result<T, RelicError> {
    let size = std::mem::size_of::<T>();
    let end = offset
        .checked_add(size)
        .ok_or_else(|| RelicError::FormatViolation("structure offset overflow".into()))?;
    if end > data.len() {
        return Err(RelicError::FormatViolation(format!(
            "structure at offset {} ({} bytes) exceeds buffer of {} bytes",
            offset,
            size,
            data.len()
        )));
    }
    Ok(unsafe { std::ptr::read_unaligned(data[offset..].as_ptr() as *const T) })
}
