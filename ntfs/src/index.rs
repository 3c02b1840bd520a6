// Directory index traversal.
// A directory's entries live in a B+-tree: a resident INDEX_ROOT node plus
// INDX allocation blocks reached through trailing child references. Nodes are
// walked in key order; lookups descend by collation instead of scanning.

use std::cmp::Ordering;
use std::sync::Arc;

use log::{debug, trace};
use relic_core::RelicError;
use serde::Serialize;

use crate::attributes::{decode_utf16le, Attribute};
use crate::boot_sector::VolumeGeometry;
use crate::partition::Partition;
use crate::pool::BufferPool;
use crate::record::{apply_fixups, FileRecord};
use crate::stream::AttributeStream;
use crate::structures::*;

/// Name shared by a directory's INDEX_ROOT and INDEX_ALLOCATION attributes.
pub const DIR_INDEX_NAME: &str = "$I30";

/// A tree deeper than this is cyclic or corrupt.
const MAX_INDEX_DEPTH: usize = 16;

/// View of one index node: the node header plus its entry region, bounded by
/// the header's used size.
pub struct IndexNode<'a> {
    data: &'a [u8],
}

impl<'a> IndexNode<'a> {
    /// Parse the node header at `offset` and bound the view to its used size.
    pub fn parse(buf: &'a [u8], offset: usize) -> Result<IndexNode<'a>, RelicError> {
        let header: IndexNodeHeader = overlay(buf, offset)?;
        let used = { header.used_size } as usize;
        let entries_offset = { header.entries_offset } as usize;
        if entries_offset < std::mem::size_of::<IndexNodeHeader>() || entries_offset > used {
            return Err(RelicError::FormatViolation(format!(
                "index entries at {} within node of {} used bytes",
                entries_offset, used
            )));
        }
        let end = offset
            .checked_add(used)
            .filter(|&e| e <= buf.len())
            .ok_or_else(|| {
                RelicError::FormatViolation(format!(
                    "index node claims {} used bytes in a buffer of {}",
                    used,
                    buf.len() - offset
                ))
            })?;
        Ok(IndexNode { data: &buf[offset..end] })
    }

    pub fn header(&self) -> IndexNodeHeader {
        overlay(self.data, 0).expect("length validated at parse")
    }

    pub fn has_children(&self) -> bool {
        self.header().flags & INDEX_NODE_HAS_CHILDREN != 0
    }

    pub fn entries(&self) -> IndexEntryIter<'a> {
        IndexEntryIter {
            data: self.data,
            offset: { self.header().entries_offset } as usize,
            done: false,
        }
    }
}

/// One entry within a node. The key (a FILE_NAME value in directories)
/// follows the header; entries flagged with a child carry the child node's
/// VCN in their last eight bytes.
#[derive(Clone, Copy)]
pub struct IndexEntry<'a> {
    data: &'a [u8],
}

impl<'a> IndexEntry<'a> {
    pub fn header(&self) -> IndexEntryHeader {
        overlay(self.data, 0).expect("length validated by iterator")
    }

    pub fn reference(&self) -> u64 {
        self.header().reference
    }

    pub fn is_last(&self) -> bool {
        self.header().flags & INDEX_ENTRY_LAST != 0
    }

    pub fn key(&self) -> &'a [u8] {
        let len = { self.header().key_length } as usize;
        &self.data[std::mem::size_of::<IndexEntryHeader>()..][..len]
    }

    /// VCN of the child node covering keys below this entry, if any.
    pub fn child_vcn(&self) -> Option<u64> {
        if self.header().flags & INDEX_ENTRY_HAS_CHILD == 0 {
            return None;
        }
        let tail = &self.data[self.data.len() - 8..];
        Some(u64::from_le_bytes([
            tail[0], tail[1], tail[2], tail[3], tail[4], tail[5], tail[6], tail[7],
        ]))
    }

    /// Decode the key as FILE_NAME.
    pub fn file_name(&self) -> Result<(FileNameValue, String), RelicError> {
        let key = self.key();
        let fixed: FileNameValue = overlay(key, 0)?;
        let start = std::mem::size_of::<FileNameValue>();
        let len = fixed.name_length as usize * 2;
        let bytes = key.get(start..start + len).ok_or_else(|| {
            RelicError::FormatViolation("index key shorter than its name length".into())
        })?;
        Ok((fixed, decode_utf16le(bytes)?))
    }
}

/// Iterator over a node's entries, in key order. The walk ends after the
/// entry flagged last; an entry overrunning the node's used size ends the
/// walk with an `Err` item.
pub struct IndexEntryIter<'a> {
    data: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> IndexEntryIter<'a> {
    fn corrupt(&mut self, what: String) -> Option<Result<IndexEntry<'a>, RelicError>> {
        self.done = true;
        Some(Err(RelicError::FormatViolation(what)))
    }
}

impl<'a> Iterator for IndexEntryIter<'a> {
    type Item = Result<IndexEntry<'a>, RelicError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let header: IndexEntryHeader = match overlay(self.data, self.offset) {
            Ok(h) => h,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };
        let length = { header.length } as usize;
        let key_length = { header.key_length } as usize;
        let header_size = std::mem::size_of::<IndexEntryHeader>();
        if length < header_size {
            return self.corrupt(format!("index entry of {} bytes", length));
        }
        let end = self.offset + length;
        if end > self.data.len() {
            return self.corrupt(format!(
                "index entry at {} ({} bytes) runs past used size {}",
                self.offset,
                length,
                self.data.len()
            ));
        }
        if header_size + key_length > length {
            return self.corrupt(format!(
                "index key of {} bytes in an entry of {}",
                key_length, length
            ));
        }
        if header.flags & INDEX_ENTRY_HAS_CHILD != 0 && length < header_size + 8 {
            return self.corrupt("index entry too short for a child reference".into());
        }

        let entry = IndexEntry { data: &self.data[self.offset..end] };
        if entry.is_last() {
            self.done = true;
        }
        self.offset = end;
        Some(Ok(entry))
    }
}

/// One name within a directory, as recorded in its index.
#[derive(Debug, Clone, Serialize)]
pub struct DirEntry {
    pub name: String,
    pub reference: u64,
    pub file_attributes: u32,
    pub size: u64,
    pub namespace: u8,
}

impl DirEntry {
    /// MFT slot of the referenced record, sequence bits masked off.
    pub fn record_index(&self) -> u64 {
        self.reference & FILE_REFERENCE_INDEX_MASK
    }

    pub fn is_directory(&self) -> bool {
        self.file_attributes & FILE_ATTR_DIRECTORY != 0
    }
}

/// Reader over one directory's index tree.
pub struct DirectoryIndex<'a> {
    partition: &'a Partition,
    pool: Arc<BufferPool>,
    geometry: VolumeGeometry,
    record: &'a FileRecord,
}

impl<'a> DirectoryIndex<'a> {
    pub fn open(
        partition: &'a Partition,
        pool: &Arc<BufferPool>,
        geometry: VolumeGeometry,
        record: &'a FileRecord,
    ) -> Result<Self, RelicError> {
        if !record.is_directory() {
            return Err(RelicError::InvalidInput(format!(
                "record {} is not a directory",
                record.index()
            )));
        }
        Ok(Self { partition, pool: Arc::clone(pool), geometry, record })
    }

    /// All entries in key order, DOS-only duplicate names skipped.
    pub fn entries(&self) -> Result<Vec<DirEntry>, RelicError> {
        let (_, value) = self.root_value()?;
        let alloc = self.allocation()?;
        let node = IndexNode::parse(value, std::mem::size_of::<IndexRootHeader>())?;
        let mut out = Vec::new();
        self.collect(&node, alloc, &mut out, 0)?;
        Ok(out)
    }

    /// Find one name, descending by the declared collation rule.
    pub fn lookup(&self, name: &str) -> Result<Option<DirEntry>, RelicError> {
        let (root, value) = self.root_value()?;
        let rule = { root.collation_rule };
        if rule != COLLATION_FILE_NAME {
            // Other rules order keys the engine cannot compare; a full scan
            // still finds the entry.
            debug!("collation rule {:#x}: falling back to a full scan", rule);
            return Ok(self
                .entries()?
                .into_iter()
                .find(|e| compare_file_names(name, &e.name) == Ordering::Equal));
        }
        let alloc = self.allocation()?;
        let node = IndexNode::parse(value, std::mem::size_of::<IndexRootHeader>())?;
        self.search(&node, alloc, name, 0)
    }

    fn root_value(&self) -> Result<(IndexRootHeader, &'a [u8]), RelicError> {
        let attr = self
            .record
            .find_local(ATTR_TYPE_INDEX_ROOT, 0, Some(DIR_INDEX_NAME))?
            .ok_or_else(|| {
                RelicError::FormatViolation(format!(
                    "directory record {} without an index root",
                    self.record.index()
                ))
            })?;
        let value = attr.resident_value()?;
        Ok((overlay(value, 0)?, value))
    }

    fn allocation(&self) -> Result<Option<Attribute<'a>>, RelicError> {
        self.record
            .find_local(ATTR_TYPE_INDEX_ALLOCATION, 0, Some(DIR_INDEX_NAME))
    }

    fn collect(
        &self,
        node: &IndexNode<'_>,
        alloc: Option<Attribute<'_>>,
        out: &mut Vec<DirEntry>,
        depth: usize,
    ) -> Result<(), RelicError> {
        if depth > MAX_INDEX_DEPTH {
            return Err(RelicError::FormatViolation(format!(
                "index tree deeper than {} levels",
                MAX_INDEX_DEPTH
            )));
        }
        for entry in node.entries() {
            let entry = entry?;
            if let Some(vcn) = entry.child_vcn() {
                let block = self.read_block(alloc, vcn)?;
                let child = IndexNode::parse(&block, std::mem::size_of::<IndxBlockHeader>())?;
                self.collect(&child, alloc, out, depth + 1)?;
            }
            if entry.is_last() {
                break;
            }
            let (fixed, name) = entry.file_name()?;
            if fixed.namespace == FILE_NAME_DOS {
                continue;
            }
            out.push(make_entry(entry.reference(), &fixed, name));
        }
        Ok(())
    }

    fn search(
        &self,
        node: &IndexNode<'_>,
        alloc: Option<Attribute<'_>>,
        name: &str,
        depth: usize,
    ) -> Result<Option<DirEntry>, RelicError> {
        if depth > MAX_INDEX_DEPTH {
            return Err(RelicError::FormatViolation(format!(
                "index tree deeper than {} levels",
                MAX_INDEX_DEPTH
            )));
        }
        for entry in node.entries() {
            let entry = entry?;
            let descend = if entry.is_last() {
                true
            } else {
                let (fixed, candidate) = entry.file_name()?;
                match compare_file_names(name, &candidate) {
                    Ordering::Equal => {
                        return Ok(Some(make_entry(entry.reference(), &fixed, candidate)))
                    }
                    Ordering::Less => true,
                    Ordering::Greater => false,
                }
            };
            if descend {
                return match entry.child_vcn() {
                    Some(vcn) => {
                        let block = self.read_block(alloc, vcn)?;
                        let child =
                            IndexNode::parse(&block, std::mem::size_of::<IndxBlockHeader>())?;
                        self.search(&child, alloc, name, depth + 1)
                    }
                    None => Ok(None),
                };
            }
        }
        Ok(None)
    }

    /// Read one INDX block, revert its fixups, and confirm it is the block
    /// the parent pointed at.
    fn read_block(
        &self,
        alloc: Option<Attribute<'_>>,
        vcn: u64,
    ) -> Result<Vec<u8>, RelicError> {
        let alloc = alloc.ok_or_else(|| {
            RelicError::FormatViolation(format!(
                "directory record {} has child nodes but no index allocation",
                self.record.index()
            ))
        })?;
        let block_size = self.geometry.index_block_size as u64;
        // Child VCNs count clusters, except on volumes where the cluster
        // outgrows the index block; there they count 512-byte sectors.
        let vcn_unit = if self.geometry.cluster_size as u64 <= block_size {
            self.geometry.cluster_size as u64
        } else {
            512
        };

        let mut stream = AttributeStream::open(self.partition, &self.pool, self.geometry, &alloc)?;
        stream.skip(vcn * vcn_unit)?;
        let mut block = vec![0u8; block_size as usize];
        let got = stream.read(&mut block)?;
        if got != block.len() {
            return Err(RelicError::FormatViolation(format!(
                "index block at VCN {} truncated to {} of {} bytes",
                vcn, got, block_size
            )));
        }

        let header: IndxBlockHeader = overlay(&block, 0)?;
        if { header.magic } != *INDX_BLOCK_MAGIC {
            return Err(RelicError::FormatViolation(format!(
                "index block at VCN {}: magic {:02X?} is not \"INDX\"",
                vcn,
                { header.magic }
            )));
        }
        apply_fixups(
            &mut block,
            header.usa_offset,
            header.usa_count,
            self.geometry.bytes_per_sector,
        )?;
        if { header.vcn } != vcn {
            return Err(RelicError::FormatViolation(format!(
                "index block claims VCN {}, parent pointed at {}",
                { header.vcn },
                vcn
            )));
        }
        trace!("index block at VCN {} loaded", vcn);
        Ok(block)
    }
}

fn make_entry(reference: u64, fixed: &FileNameValue, name: String) -> DirEntry {
    DirEntry {
        name,
        reference,
        file_attributes: { fixed.file_attributes },
        size: { fixed.data_size },
        namespace: fixed.namespace,
    }
}

//// Directory collation: case-insensitive by Unicode uppercase fold.
///
/// This approximates the volume's $UpCase table, which real NTFS uses for
/// ordering. The two agree on ASCII; a non-ASCII name whose fold differs may
/// be missed by tree descent, though the full-scan fallback still finds it.
pub fn compare_file_names(probe: &str, candidate: &str) -> Ordering {
    probe
        .chars()
        .flat_map(char::to_uppercase)
        .cmp(candidate.chars().flat_map(char::to_uppercase))
}
