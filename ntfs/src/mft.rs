// MFT bootstrap and metadata catalog.
// The $MFT's own record is the dereferencing root for every other lookup: it
// is read once at the geometry-derived LBA, validated, and cached privately
// for the lifetime of the volume handle. Everything else goes through its
// non-resident DATA stream.

use std::sync::Arc;

use log::{debug, info, warn};
use relic_core::RelicError;
use serde::Serialize;

use crate::attributes::{decode_utf16le, Attribute};
use crate::boot_sector::VolumeGeometry;
use crate::data_runs::{check_volume_bounds, decode_runs, total_clusters, RunChunk};
use crate::partition::Partition;
use crate::pool::BufferPool;
use crate::record::FileRecord;
use crate::stream::AttributeStream;
use crate::structures::*;

/// Fixed metadata slots at the start of every MFT.
pub const WELL_KNOWN_SLOTS: u64 = 16;

/// Bitmaps past this size are not plausible MFT allocation maps.
const MAX_BITMAP_BYTES: u64 = 1 << 24;

/// One catalog row: a well-known metadata file and where its record starts.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    pub index: u64,
    pub name: String,
    pub lba: u64,
}

/// Handle over a bootstrapped MFT.
pub struct Mft<'a> {
    partition: &'a Partition,
    pool: Arc<BufferPool>,
    geometry: VolumeGeometry,
    mft_record: FileRecord,
    data_chunks: Vec<RunChunk>,
    data_size: u64,
}

impl<'a> Mft<'a> {
    /// Read and validate the $MFT's own record, then capture its DATA runs.
    pub fn bootstrap(
        partition: &'a Partition,
        pool: &Arc<BufferPool>,
        geometry: VolumeGeometry,
    ) -> Result<Self, RelicError> {
        let chain = partition.read_sectors_pooled(
            pool,
            geometry.mft_start_sector(),
            geometry.sectors_per_record(),
            geometry.sectors_per_record(),
        )?;
        let bytes = chain.to_vec()?;
        chain.release()?;

        let mft_record = FileRecord::parse(MFT_RECORD_MFT, bytes, geometry.bytes_per_sector)?;
        if !mft_record.is_in_use() {
            return Err(RelicError::FormatViolation(
                "$MFT record not marked in use".into(),
            ));
        }
        match mft_record.primary_name()? {
            Some(name) if name == WELL_KNOWN_NAMES[MFT_RECORD_MFT as usize] => {}
            other => {
                return Err(RelicError::FormatViolation(format!(
                    "record at the MFT cluster is named {:?}, not $MFT",
                    other
                )))
            }
        }

        let data = match mft_record.find_local(ATTR_TYPE_DATA, 0, None)? {
            Some(attr) => attr,
            // A heavily fragmented volume can push the $MFT's own DATA into
            // extension records; that is a real layout, not corruption.
            None if Self::has_local_list(&mft_record)? => {
                return Err(RelicError::NotSupported(
                    "$MFT DATA behind an attribute list".into(),
                ))
            }
            None => {
                return Err(RelicError::FormatViolation(
                    "$MFT without a DATA attribute".into(),
                ))
            }
        };
        let ext = data.non_resident()?;
        let data_chunks = decode_runs(data.run_list()?)?;
        check_volume_bounds(&data_chunks, geometry.cluster_count())?;
        let covered = total_clusters(&data_chunks) * geometry.cluster_size as u64;
        if covered != { ext.allocated_size } {
            return Err(RelicError::FormatViolation(format!(
                "$MFT runs cover {} bytes, DATA allocates {}",
                covered,
                { ext.allocated_size }
            )));
        }
        let data_size = { ext.data_size };
        info!(
            "MFT bootstrapped: {} records in {} fragment(s)",
            data_size / geometry.record_size as u64,
            data_chunks.len()
        );

        Ok(Self {
            partition,
            pool: Arc::clone(pool),
            geometry,
            mft_record,
            data_chunks,
            data_size,
        })
    }

    pub fn partition(&self) -> &'a Partition {
        self.partition
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub fn geometry(&self) -> VolumeGeometry {
        self.geometry
    }

    /// The cached $MFT record itself.
    pub fn record(&self) -> &FileRecord {
        &self.mft_record
    }

    pub fn record_count(&self) -> u64 {
        self.data_size / self.geometry.record_size as u64
    }

    /// Walk the 16 well-known slots and map each named one to its starting
    /// LBA. A malformed slot is logged and skipped; the catalog is a
    /// diagnostic summary, not a dereferencing path.
    pub fn catalog(&self) -> Result<Vec<CatalogEntry>, RelicError> {
        let record_size = self.geometry.record_size as u64;
        let mut stream = self.data_stream();
        let mut out = Vec::new();
        let mut offset = 0u64;

        for index in 0..WELL_KNOWN_SLOTS.min(self.record_count()) {
            let mut buf = vec![0u8; record_size as usize];
            let got = stream.read(&mut buf)?;
            if got < buf.len() {
                debug!("MFT data ended at slot {}", index);
                break;
            }
            let next_offset = offset + record_size;
            match FileRecord::parse(index, buf, self.geometry.bytes_per_sector) {
                Ok(record) => {
                    // Slots advance by their declared allocated size.
                    let allocated = { record.header().bytes_allocated } as u64;
                    if allocated > record_size {
                        stream.skip(allocated - record_size)?;
                    }
                    match record.primary_name()? {
                        Some(name) => {
                            let lba = self.lba_of_offset(offset).ok_or_else(|| {
                                RelicError::InvariantViolation(format!(
                                    "catalog offset {} outside the $MFT runs",
                                    offset
                                ))
                            })?;
                            out.push(CatalogEntry { index, name, lba });
                        }
                        None => debug!("slot {} carries no file name", index),
                    }
                    offset = next_offset + allocated.saturating_sub(record_size);
                }
                Err(e) => {
                    warn!("skipping malformed metadata slot {}: {}", index, e);
                    offset = next_offset;
                }
            }
        }
        Ok(out)
    }

    /// Fetch one record by file reference. The low 48 bits select the slot;
    /// a nonzero sequence in the high bits must match the record's own.
    pub fn get_file_record(&self, reference: u64) -> Result<FileRecord, RelicError> {
        let index = reference & FILE_REFERENCE_INDEX_MASK;
        let expected_sequence = (reference >> 48) as u16;
        let record_size = self.geometry.record_size as u64;
        if (index + 1) * record_size > self.data_size {
            return Err(RelicError::InvalidInput(format!(
                "record {} beyond the MFT's {} records",
                index,
                self.record_count()
            )));
        }

        let mut stream = self.data_stream();
        stream.skip(index * record_size)?;
        let mut buf = vec![0u8; record_size as usize];
        let got = stream.read(&mut buf)?;
        if got < buf.len() {
            return Err(RelicError::FormatViolation(format!(
                "record {} truncated to {} of {} bytes",
                index, got, record_size
            )));
        }

        let record = FileRecord::parse(index, buf, self.geometry.bytes_per_sector)?;
        if expected_sequence != 0 && expected_sequence != record.sequence_number() {
            return Err(RelicError::FormatViolation(format!(
                "record {}: sequence {} does not match reference sequence {}",
                index,
                record.sequence_number(),
                expected_sequence
            )));
        }
        Ok(record)
    }

    /// Iterate every allocated record, skipping never-used slots via the
    /// $MFT's BITMAP attribute.
    pub fn records(&self) -> Result<RecordIter<'a>, RelicError> {
        let bitmap = self.load_bitmap()?;
        Ok(RecordIter {
            stream: self.data_stream(),
            bitmap,
            bytes_per_sector: self.geometry.bytes_per_sector,
            record_size: self.geometry.record_size as u64,
            next_index: 0,
            total: self.record_count(),
            stream_pos: 0,
        })
    }

    /// Enumerate a record's attributes, following ATTRIBUTE_LIST indirection
    /// into extension records after the local chain. The visitor returns
    /// `false` to stop early.
    pub fn enumerate_attributes<F>(
        &self,
        record: &FileRecord,
        mut visit: F,
    ) -> Result<(), RelicError>
    where
        F: FnMut(&Attribute<'_>) -> Result<bool, RelicError>,
    {
        let mut list = None;
        for attr in record.attributes() {
            let attr = attr?;
            if attr.type_code() == ATTR_TYPE_ATTRIBUTE_LIST {
                list = Some(attr);
            }
            if !visit(&attr)? {
                return Ok(());
            }
        }
        let Some(list) = list else { return Ok(()) };

        for entry in self.attribute_list_entries(&list)? {
            let ext_index = entry.base_reference & FILE_REFERENCE_INDEX_MASK;
            if ext_index == record.index() || entry.start_vcn != 0 {
                continue;
            }
            let ext = self.extension_record(entry.base_reference)?;
            for attr in ext.attributes() {
                let attr = attr?;
                if attr.type_code() == entry.type_code
                    && attr.attribute_id() == entry.attribute_id
                {
                    if !visit(&attr)? {
                        return Ok(());
                    }
                    break;
                }
            }
        }
        Ok(())
    }

    /// Locate the Nth attribute of `type_code`, transparently resolving
    /// attribute-list indirection. The result owns whichever record the
    /// attribute actually lives in.
    pub fn find_attribute(
        &self,
        record: &FileRecord,
        type_code: u32,
        order: usize,
        name: Option<&str>,
    ) -> Result<Option<FoundAttribute>, RelicError> {
        let list = record.find_local(ATTR_TYPE_ATTRIBUTE_LIST, 0, None)?;
        let Some(list) = list else {
            if record.find_local(type_code, order, name)?.is_none() {
                return Ok(None);
            }
            return Ok(Some(FoundAttribute {
                record: record.clone(),
                type_code,
                name: name.map(String::from),
                local_order: order,
            }));
        };

        let entries = self.attribute_list_entries(&list)?;
        let matches: Vec<&ListEntry> = entries
            .iter()
            .filter(|e| e.type_code == type_code && e.name.as_deref() == name)
            .collect();
        if matches.iter().any(|e| e.start_vcn != 0) {
            return Err(RelicError::NotSupported(
                "attribute split across multiple extents".into(),
            ));
        }
        let Some(entry) = matches.get(order) else { return Ok(None) };

        let target = self.extension_record_or_base(record, entry.base_reference)?;
        let mut local_order = None;
        let mut seen = 0;
        for attr in target.attributes() {
            let attr = attr?;
            if attr.type_code() != type_code || attr.name()?.as_deref() != name {
                continue;
            }
            if attr.attribute_id() == entry.attribute_id {
                local_order = Some(seen);
                break;
            }
            seen += 1;
        }
        let local_order = local_order.ok_or_else(|| {
            RelicError::FormatViolation(format!(
                "attribute list points at attribute id {} missing from record {}",
                entry.attribute_id,
                target.index()
            ))
        })?;
        Ok(Some(FoundAttribute {
            record: target,
            type_code,
            name: name.map(String::from),
            local_order,
        }))
    }

    fn has_local_list(record: &FileRecord) -> Result<bool, RelicError> {
        Ok(record.find_local(ATTR_TYPE_ATTRIBUTE_LIST, 0, None)?.is_some())
    }

    /// Fresh forward-only stream over the $MFT's own DATA runs.
    fn data_stream(&self) -> AttributeStream<'a> {
        AttributeStream::from_chunks(
            self.partition,
            &self.pool,
            self.geometry,
            self.data_chunks.clone(),
        )
    }

    fn extension_record(&self, reference: u64) -> Result<FileRecord, RelicError> {
        let ext = self.get_file_record(reference)?;
        if ext.find_local(ATTR_TYPE_ATTRIBUTE_LIST, 0, None)?.is_some() {
            return Err(RelicError::NotSupported(
                "attribute list chained through an extension record".into(),
            ));
        }
        Ok(ext)
    }

    fn extension_record_or_base(
        &self,
        base: &FileRecord,
        reference: u64,
    ) -> Result<FileRecord, RelicError> {
        if reference & FILE_REFERENCE_INDEX_MASK == base.index() {
            Ok(base.clone())
        } else {
            self.extension_record(reference)
        }
    }

    fn attribute_list_entries(
        &self,
        list: &Attribute<'_>,
    ) -> Result<Vec<ListEntry>, RelicError> {
        let value = if list.is_resident() {
            list.resident_value()?.to_vec()
        } else {
            let size = list.content_size()?;
            let mut stream =
                AttributeStream::open(self.partition, &self.pool, self.geometry, list)?;
            let mut buf = vec![0u8; size as usize];
            let got = stream.read(&mut buf)?;
            if got < buf.len() {
                return Err(RelicError::FormatViolation(format!(
                    "attribute list truncated to {} of {} bytes",
                    got, size
                )));
            }
            buf
        };

        let fixed = std::mem::size_of::<AttributeListEntry>();
        let mut out = Vec::new();
        let mut cursor = 0usize;
        while cursor + fixed <= value.len() {
            let raw: AttributeListEntry = overlay(&value, cursor)?;
            let length = { raw.length } as usize;
            if length < fixed || cursor + length > value.len() {
                return Err(RelicError::FormatViolation(format!(
                    "attribute list entry at {} of {} bytes",
                    cursor, length
                )));
            }
            let name = if raw.name_length == 0 {
                None
            } else {
                let start = cursor + raw.name_offset as usize;
                let len = raw.name_length as usize * 2;
                let bytes = value.get(start..start + len).ok_or_else(|| {
                    RelicError::FormatViolation("attribute list name out of bounds".into())
                })?;
                Some(decode_utf16le(bytes)?)
            };
            out.push(ListEntry {
                type_code: { raw.type_code },
                name,
                start_vcn: { raw.start_vcn },
                base_reference: { raw.base_reference },
                attribute_id: { raw.attribute_id },
            });
            cursor += length;
        }
        Ok(out)
    }

    fn load_bitmap(&self) -> Result<Vec<u8>, RelicError> {
        let bitmap = match self.mft_record.find_local(ATTR_TYPE_BITMAP, 0, None)? {
            Some(attr) => attr,
            None if Self::has_local_list(&self.mft_record)? => {
                return Err(RelicError::NotSupported(
                    "$MFT BITMAP behind an attribute list".into(),
                ))
            }
            None => {
                return Err(RelicError::FormatViolation(
                    "$MFT without a BITMAP attribute".into(),
                ))
            }
        };
        if bitmap.is_resident() {
            return Ok(bitmap.resident_value()?.to_vec());
        }
        let size = bitmap.content_size()?;
        if size > MAX_BITMAP_BYTES {
            return Err(RelicError::NotSupported(format!(
                "MFT bitmap of {} bytes",
                size
            )));
        }
        let mut stream =
            AttributeStream::open(self.partition, &self.pool, self.geometry, &bitmap)?;
        let mut buf = vec![0u8; size as usize];
        let got = stream.read(&mut buf)?;
        if got < buf.len() {
            return Err(RelicError::FormatViolation(format!(
                "MFT bitmap truncated to {} of {} bytes",
                got, size
            )));
        }
        Ok(buf)
    }

    /// Map a byte offset within the MFT data to its partition-relative LBA.
    fn lba_of_offset(&self, offset: u64) -> Option<u64> {
        let cluster_size = self.geometry.cluster_size as u64;
        let spc = self.geometry.sectors_per_cluster as u64;
        let mut vcn = offset / cluster_size;
        let within = offset % cluster_size;
        for chunk in &self.data_chunks {
            if vcn < chunk.length {
                let sector = (chunk.lcn + vcn) * spc + within / self.geometry.bytes_per_sector as u64;
                return Some(sector);
            }
            vcn -= chunk.length;
        }
        None
    }
}

/// A resolved attribute, owning the record it lives in. The view is
/// re-derived on demand so the owner can be moved freely.
pub struct FoundAttribute {
    record: FileRecord,
    type_code: u32,
    name: Option<String>,
    local_order: usize,
}

impl FoundAttribute {
    pub fn record(&self) -> &FileRecord {
        &self.record
    }

    pub fn attribute(&self) -> Result<Attribute<'_>, RelicError> {
        self.record
            .find_local(self.type_code, self.local_order, self.name.as_deref())?
            .ok_or_else(|| {
                RelicError::InvariantViolation("resolved attribute vanished from its record".into())
            })
    }
}

struct ListEntry {
    type_code: u32,
    name: Option<String>,
    start_vcn: u64,
    base_reference: u64,
    attribute_id: u16,
}

/// Iterator over allocated MFT records, in slot order.
pub struct RecordIter<'a> {
    stream: AttributeStream<'a>,
    bitmap: Vec<u8>,
    bytes_per_sector: u32,
    record_size: u64,
    next_index: u64,
    total: u64,
    stream_pos: u64,
}

impl RecordIter<'_> {
    fn allocated(&self, index: u64) -> bool {
        self.bitmap
            .get((index / 8) as usize)
            .map_or(false, |byte| byte >> (index % 8) & 1 != 0)
    }
}

impl Iterator for RecordIter<'_> {
    type Item = Result<FileRecord, RelicError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next_index < self.total {
            let index = self.next_index;
            self.next_index += 1;
            if !self.allocated(index) {
                continue;
            }

            let target = index * self.record_size;
            if target > self.stream_pos {
                if let Err(e) = self.stream.skip(target - self.stream_pos) {
                    self.next_index = self.total;
                    return Some(Err(e));
                }
                self.stream_pos = target;
            }
            let mut buf = vec![0u8; self.record_size as usize];
            match self.stream.read(&mut buf) {
                Ok(n) if n as u64 == self.record_size => {
                    self.stream_pos += n as u64;
                    return Some(FileRecord::parse(index, buf, self.bytes_per_sector));
                }
                Ok(_) => return None,
                Err(e) => {
                    self.next_index = self.total;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boot_sector::decode_boot_sector;
    use crate::boot_sector::tests::sample_boot_sector;
    use crate::partition::shared_device;
    use crate::testkit::*;
    use relic_core::test_utils::SharedMemDevice;

    const RECORD_SIZE: usize = 1024;
    const BPS: usize = 512;

    fn geometry() -> VolumeGeometry {
        decode_boot_sector(&sample_boot_sector()).unwrap()
    }

    fn named_record(index: u64, name: &str, extra: Vec<Vec<u8>>) -> Vec<u8> {
        let mut attrs = vec![build_resident_attribute(
            ATTR_TYPE_FILE_NAME,
            None,
            &encode_file_name_value(MFT_RECORD_ROOT, name, 0),
        )];
        attrs.extend(extra);
        build_file_record(index, RECORD_SIZE, BPS, RECORD_FLAG_IN_USE, &attrs)
    }

    /// A 32-cluster volume whose MFT occupies clusters 4..8 (16 slots).
    /// Allocated slots: 0 ($MFT), 1, 2 ($LogFile with non-resident DATA at
    /// cluster 10), 5 (root, directory flag), 6 (attribute list base) and
    /// 7 (its extension). Slots 3, 4 and 8.. stay zeroed.
    fn sample_volume() -> (SharedMemDevice, VolumeGeometry) {
        let geometry = geometry();
        let cluster = geometry.cluster_size as usize;
        let mut image = vec![0u8; cluster * 32];

        let mft_runs = [0x11u8, 0x04, 0x04, 0x00]; // 4 clusters at LCN 4
        let mft_data = build_nonresident_attribute(
            ATTR_TYPE_DATA,
            None,
            &mft_runs,
            4 * cluster as u64,
            4 * cluster as u64,
        );
        let bitmap = build_resident_attribute(ATTR_TYPE_BITMAP, None, &[0b1110_0111, 0x00]);
        let mft = named_record(0, "$MFT", vec![mft_data, bitmap]);

        let log_runs = [0x11u8, 0x01, 0x0A, 0x00]; // 1 cluster at LCN 10
        let log_data = build_nonresident_attribute(
            ATTR_TYPE_DATA,
            None,
            &log_runs,
            cluster as u64,
            11, // "log payload"
        );

        // Record 6 defers its DATA attribute to extension record 7.
        let seq1 = 1u64 << 48;
        let list_value: Vec<u8> = [
            encode_attribute_list_entry(ATTR_TYPE_FILE_NAME, None, 0, 6 | seq1, 0),
            encode_attribute_list_entry(ATTR_TYPE_DATA, None, 0, 7 | seq1, 2),
        ]
        .concat();
        let split_base = named_record(
            6,
            "split",
            vec![build_resident_attribute(
                ATTR_TYPE_ATTRIBUTE_LIST,
                None,
                &list_value,
            )],
        );
        let mut ext_data = build_resident_attribute(ATTR_TYPE_DATA, None, b"from the extension");
        ext_data[14..16].copy_from_slice(&2u16.to_le_bytes()); // attribute id
        let extension = build_file_record(7, RECORD_SIZE, BPS, RECORD_FLAG_IN_USE, &[ext_data]);

        let root = build_file_record(
            5,
            RECORD_SIZE,
            BPS,
            RECORD_FLAG_IN_USE | RECORD_FLAG_IS_DIRECTORY,
            &[build_resident_attribute(
                ATTR_TYPE_FILE_NAME,
                None,
                &encode_file_name_value(MFT_RECORD_ROOT, ".", FILE_ATTR_DIRECTORY),
            )],
        );

        let mft_base = 4 * cluster;
        for (slot, bytes) in [
            (0usize, mft),
            (1, named_record(1, "$MFTMirr", vec![])),
            (2, named_record(2, "$LogFile", vec![log_data])),
            (5, root),
            (6, split_base),
            (7, extension),
        ] {
            let at = mft_base + slot * RECORD_SIZE;
            image[at..at + RECORD_SIZE].copy_from_slice(&bytes);
        }
        image[10 * cluster..10 * cluster + 11].copy_from_slice(b"log payload");

        (SharedMemDevice::new(image), geometry)
    }

    fn volume_partition(mem: &SharedMemDevice, geometry: &VolumeGeometry) -> Partition {
        Partition::new(
            shared_device(mem.clone()),
            0,
            32 * geometry.sectors_per_cluster as u64,
            geometry.bytes_per_sector,
        )
    }

    #[test]
    fn bootstrap_validates_and_caches_the_mft_record() {
        let (mem, geometry) = sample_volume();
        let part = volume_partition(&mem, &geometry);
        let pool = BufferPool::new();

        let mft = Mft::bootstrap(&part, &pool, geometry).unwrap();
        assert_eq!(mft.record().index(), 0);
        assert_eq!(mft.record_count(), 16);
        assert_eq!(mft.record().primary_name().unwrap().as_deref(), Some("$MFT"));
    }

    #[test]
    fn bootstrap_rejects_a_volume_without_mft_magic() {
        let geometry = geometry();
        let mem = SharedMemDevice::new(vec![0u8; geometry.cluster_size as usize * 32]);
        let part = volume_partition(&mem, &geometry);
        let pool = BufferPool::new();
        assert!(matches!(
            Mft::bootstrap(&part, &pool, geometry),
            Err(RelicError::FormatViolation(_))
        ));
    }

    /// Place one hand-built $MFT record at the MFT cluster of a zeroed image.
    fn volume_with_mft_record(record: Vec<u8>, geometry: &VolumeGeometry) -> SharedMemDevice {
        let cluster = geometry.cluster_size as usize;
        let mut image = vec![0u8; cluster * 32];
        let at = 4 * cluster;
        image[at..at + RECORD_SIZE].copy_from_slice(&record);
        SharedMemDevice::new(image)
    }

    #[test]
    fn listed_mft_data_is_unsupported_not_corruption() {
        let geometry = geometry();
        // $MFT whose DATA sits behind an ATTRIBUTE_LIST in an extension
        // record: a fragmented-volume layout, distinguishable from a volume
        // that simply has no DATA at all.
        let list = encode_attribute_list_entry(ATTR_TYPE_DATA, None, 0, 17 | 1u64 << 48, 0);
        let mft = named_record(
            0,
            "$MFT",
            vec![build_resident_attribute(ATTR_TYPE_ATTRIBUTE_LIST, None, &list)],
        );
        let mem = volume_with_mft_record(mft, &geometry);
        let part = volume_partition(&mem, &geometry);
        let pool = BufferPool::new();
        assert!(matches!(
            Mft::bootstrap(&part, &pool, geometry),
            Err(RelicError::NotSupported(_))
        ));
    }

    #[test]
    fn listed_mft_bitmap_is_unsupported_not_corruption() {
        let geometry = geometry();
        let cluster = geometry.cluster_size as u64;
        let mft_data = build_nonresident_attribute(
            ATTR_TYPE_DATA,
            None,
            &[0x11, 0x04, 0x04, 0x00],
            4 * cluster,
            4 * cluster,
        );
        let list = encode_attribute_list_entry(ATTR_TYPE_BITMAP, None, 0, 17 | 1u64 << 48, 0);
        let mft = named_record(
            0,
            "$MFT",
            vec![
                mft_data,
                build_resident_attribute(ATTR_TYPE_ATTRIBUTE_LIST, None, &list),
            ],
        );
        let mem = volume_with_mft_record(mft, &geometry);
        let part = volume_partition(&mem, &geometry);
        let pool = BufferPool::new();

        // Bootstrap only needs DATA; record enumeration needs the bitmap.
        let mft = Mft::bootstrap(&part, &pool, geometry).unwrap();
        assert!(matches!(mft.records(), Err(RelicError::NotSupported(_))));
    }

    #[test]
    fn catalog_names_the_well_known_slots_and_skips_bad_ones() {
        let (mem, geometry) = sample_volume();
        let part = volume_partition(&mem, &geometry);
        let pool = BufferPool::new();
        let mft = Mft::bootstrap(&part, &pool, geometry).unwrap();

        let catalog = mft.catalog().unwrap();
        let names: Vec<(u64, &str)> =
            catalog.iter().map(|e| (e.index, e.name.as_str())).collect();
        assert_eq!(
            names,
            vec![(0, "$MFT"), (1, "$MFTMirr"), (2, "$LogFile"), (5, "."), (6, "split")]
        );

        // LBA: MFT starts at cluster 4 (sector 32), two sectors per record.
        assert_eq!(catalog[0].lba, 32);
        assert_eq!(catalog[3].lba, 32 + 5 * 2);
    }

    #[test]
    fn get_file_record_checks_the_reference_sequence() {
        let (mem, geometry) = sample_volume();
        let part = volume_partition(&mem, &geometry);
        let pool = BufferPool::new();
        let mft = Mft::bootstrap(&part, &pool, geometry).unwrap();

        let root = mft.get_file_record(5 | 1 << 48).unwrap();
        assert!(root.is_directory());
        assert_eq!(root.primary_name().unwrap().as_deref(), Some("."));

        // Stale sequence in the high bits.
        assert!(matches!(
            mft.get_file_record(5 | 9 << 48),
            Err(RelicError::FormatViolation(_))
        ));
        // Index past the MFT.
        assert!(matches!(
            mft.get_file_record(400),
            Err(RelicError::InvalidInput(_))
        ));
    }

    #[test]
    fn enumeration_skips_unallocated_slots() {
        let (mem, geometry) = sample_volume();
        let part = volume_partition(&mem, &geometry);
        let pool = BufferPool::new();
        let mft = Mft::bootstrap(&part, &pool, geometry).unwrap();

        let indices: Vec<u64> = mft
            .records()
            .unwrap()
            .map(|r| r.unwrap().index())
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 5, 6, 7]);
    }

    #[test]
    fn enumeration_stops_early_like_any_iterator() {
        let (mem, geometry) = sample_volume();
        let part = volume_partition(&mem, &geometry);
        let pool = BufferPool::new();
        let mft = Mft::bootstrap(&part, &pool, geometry).unwrap();

        let first_two: Vec<u64> = mft
            .records()
            .unwrap()
            .take(2)
            .map(|r| r.unwrap().index())
            .collect();
        assert_eq!(first_two, vec![0, 1]);
    }

    #[test]
    fn non_resident_data_reads_through_the_stream() {
        let (mem, geometry) = sample_volume();
        let part = volume_partition(&mem, &geometry);
        let pool = BufferPool::new();
        let mft = Mft::bootstrap(&part, &pool, geometry).unwrap();

        let log = mft.get_file_record(2).unwrap();
        let found = mft
            .find_attribute(&log, ATTR_TYPE_DATA, 0, None)
            .unwrap()
            .expect("$LogFile DATA");
        let attr = found.attribute().unwrap();
        assert_eq!(attr.content_size().unwrap(), 11);

        let mut stream = AttributeStream::open(&part, &pool, geometry, &attr).unwrap();
        let mut content = vec![0u8; 11];
        assert_eq!(stream.read(&mut content).unwrap(), 11);
        assert_eq!(&content, b"log payload");
    }

    #[test]
    fn attribute_list_resolves_into_the_extension_record() {
        let (mem, geometry) = sample_volume();
        let part = volume_partition(&mem, &geometry);
        let pool = BufferPool::new();
        let mft = Mft::bootstrap(&part, &pool, geometry).unwrap();

        let base = mft.get_file_record(6).unwrap();
        let found = mft
            .find_attribute(&base, ATTR_TYPE_DATA, 0, None)
            .unwrap()
            .expect("DATA via the attribute list");
        assert_eq!(found.record().index(), 7);
        assert_eq!(
            found.attribute().unwrap().resident_value().unwrap(),
            b"from the extension"
        );

        // The visitor sees local attributes first, then the extension's.
        let mut seen = Vec::new();
        mft.enumerate_attributes(&base, |attr| {
            seen.push(attr.type_code());
            Ok(true)
        })
        .unwrap();
        assert_eq!(
            seen,
            vec![ATTR_TYPE_FILE_NAME, ATTR_TYPE_ATTRIBUTE_LIST, ATTR_TYPE_DATA]
        );
    }

    #[test]
    fn visitor_early_stop_is_honored() {
        let (mem, geometry) = sample_volume();
        let part = volume_partition(&mem, &geometry);
        let pool = BufferPool::new();
        let mft = Mft::bootstrap(&part, &pool, geometry).unwrap();

        let base = mft.get_file_record(6).unwrap();
        let mut seen = 0;
        mft.enumerate_attributes(&base, |_| {
            seen += 1;
            Ok(false)
        })
        .unwrap();
        assert_eq!(seen, 1);
    }
}
