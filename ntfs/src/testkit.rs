// Builders for synthetic on-disk layouts used across the test suite.
// Everything here produces the same byte shapes the parser consumes from a
// real volume: records with live fixups, attributes, index nodes, MBRs.

use crate::structures::*;

/// FILE_NAME value: fixed fields plus the UTF-16LE name.
pub(crate) fn encode_file_name_value(parent: u64, name: &str, attributes: u32) -> Vec<u8> {
    let units: Vec<u16> = name.encode_utf16().collect();
    let mut out = vec![0u8; std::mem::size_of::<FileNameValue>() + units.len() * 2];
    out[0..8].copy_from_slice(&parent.to_le_bytes());
    out[56..60].copy_from_slice(&attributes.to_le_bytes());
    out[64] = units.len() as u8;
    out[65] = FILE_NAME_WIN32;
    for (i, unit) in units.iter().enumerate() {
        out[66 + i * 2..68 + i * 2].copy_from_slice(&unit.to_le_bytes());
    }
    out
}

/// Resident attribute with optional name, 8-byte aligned.
pub(crate) fn build_resident_attribute(
    type_code: u32,
    name: Option<&str>,
    value: &[u8],
) -> Vec<u8> {
    let name_units: Vec<u16> = name.unwrap_or("").encode_utf16().collect();
    let name_bytes = name_units.len() * 2;
    let name_offset = 24usize;
    let value_offset = (name_offset + name_bytes + 7) & !7;
    let total = (value_offset + value.len() + 7) & !7;

    let mut out = vec![0u8; total];
    out[0..4].copy_from_slice(&type_code.to_le_bytes());
    out[4..8].copy_from_slice(&(total as u32).to_le_bytes());
    out[8] = 0; // resident
    out[9] = name_units.len() as u8;
    out[10..12].copy_from_slice(&(name_offset as u16).to_le_bytes());
    out[16..20].copy_from_slice(&(value.len() as u32).to_le_bytes());
    out[20..22].copy_from_slice(&(value_offset as u16).to_le_bytes());
    for (i, unit) in name_units.iter().enumerate() {
        out[name_offset + i * 2..name_offset + i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
    }
    out[value_offset..value_offset + value.len()].copy_from_slice(value);
    out
}

/// Non-resident attribute carrying an encoded run list.
pub(crate) fn build_nonresident_attribute(
    type_code: u32,
    name: Option<&str>,
    runs: &[u8],
    allocated_size: u64,
    data_size: u64,
) -> Vec<u8> {
    let name_units: Vec<u16> = name.unwrap_or("").encode_utf16().collect();
    let name_bytes = name_units.len() * 2;
    let name_offset = 64usize;
    let runs_offset = (name_offset + name_bytes + 7) & !7;
    let total = (runs_offset + runs.len() + 7) & !7;

    let mut out = vec![0u8; total];
    out[0..4].copy_from_slice(&type_code.to_le_bytes());
    out[4..8].copy_from_slice(&(total as u32).to_le_bytes());
    out[8] = 1; // non-resident
    out[9] = name_units.len() as u8;
    out[10..12].copy_from_slice(&(name_offset as u16).to_le_bytes());
    out[0x20..0x22].copy_from_slice(&(runs_offset as u16).to_le_bytes());
    out[0x28..0x30].copy_from_slice(&allocated_size.to_le_bytes());
    out[0x30..0x38].copy_from_slice(&data_size.to_le_bytes());
    out[0x38..0x40].copy_from_slice(&data_size.to_le_bytes()); // initialized
    for (i, unit) in name_units.iter().enumerate() {
        out[name_offset + i * 2..name_offset + i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
    }
    out[runs_offset..runs_offset + runs.len()].copy_from_slice(runs);
    out
}

/// One ATTRIBUTE_LIST entry, 8-aligned.
pub(crate) fn encode_attribute_list_entry(
    type_code: u32,
    name: Option<&str>,
    start_vcn: u64,
    base_reference: u64,
    attribute_id: u16,
) -> Vec<u8> {
    let units: Vec<u16> = name.unwrap_or("").encode_utf16().collect();
    let name_offset = 26usize;
    let length = (name_offset + units.len() * 2 + 7) & !7;

    let mut out = vec![0u8; length];
    out[0..4].copy_from_slice(&type_code.to_le_bytes());
    out[4..6].copy_from_slice(&(length as u16).to_le_bytes());
    out[6] = units.len() as u8;
    out[7] = name_offset as u8;
    out[8..16].copy_from_slice(&start_vcn.to_le_bytes());
    out[16..24].copy_from_slice(&base_reference.to_le_bytes());
    out[24..26].copy_from_slice(&attribute_id.to_le_bytes());
    for (i, unit) in units.iter().enumerate() {
        out[name_offset + i * 2..name_offset + i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
    }
    out
}

/// End-of-attributes marker.
pub(crate) fn end_marker() -> Vec<u8> {
    let mut out = vec![0u8; 8];
    out[0..4].copy_from_slice(&ATTR_TYPE_END.to_le_bytes());
    out
}

/// A complete file record with live fixups: the last two bytes of every
/// sector hold the update sequence number and the displaced originals sit in
/// the update sequence array, exactly as a write would leave them.
pub(crate) fn build_file_record(
    index: u64,
    record_size: usize,
    bytes_per_sector: usize,
    flags: u16,
    attributes: &[Vec<u8>],
) -> Vec<u8> {
    let sectors = record_size / bytes_per_sector;
    let usa_offset = 0x30usize;
    let usa_count = 1 + sectors;
    let attrs_offset = (usa_offset + usa_count * 2 + 7) & !7;

    let mut record = vec![0u8; record_size];
    record[0..4].copy_from_slice(FILE_RECORD_MAGIC);
    record[4..6].copy_from_slice(&(usa_offset as u16).to_le_bytes());
    record[6..8].copy_from_slice(&(usa_count as u16).to_le_bytes());
    record[16..18].copy_from_slice(&1u16.to_le_bytes()); // sequence
    record[18..20].copy_from_slice(&1u16.to_le_bytes()); // link count
    record[20..22].copy_from_slice(&(attrs_offset as u16).to_le_bytes());
    record[22..24].copy_from_slice(&flags.to_le_bytes());
    record[28..32].copy_from_slice(&(record_size as u32).to_le_bytes()); // allocated
    record[44..48].copy_from_slice(&(index as u32).to_le_bytes());

    let mut cursor = attrs_offset;
    for attr in attributes {
        record[cursor..cursor + attr.len()].copy_from_slice(attr);
        cursor += attr.len();
    }
    let marker = end_marker();
    record[cursor..cursor + marker.len()].copy_from_slice(&marker);
    cursor += marker.len();
    record[24..28].copy_from_slice(&(cursor as u32).to_le_bytes()); // bytes in use

    apply_write_fixups(&mut record, usa_offset, bytes_per_sector, 0x0042);
    record
}

/// Overwrite sector tails with `usn` and stash the originals in the USA,
/// mimicking what NTFS does on write.
pub(crate) fn apply_write_fixups(
    block: &mut [u8],
    usa_offset: usize,
    bytes_per_sector: usize,
    usn: u16,
) {
    let sectors = block.len() / bytes_per_sector;
    block[usa_offset..usa_offset + 2].copy_from_slice(&usn.to_le_bytes());
    for sector in 0..sectors {
        let tail = (sector + 1) * bytes_per_sector - 2;
        let slot = usa_offset + 2 + sector * 2;
        let original = [block[tail], block[tail + 1]];
        block[slot..slot + 2].copy_from_slice(&original);
        block[tail..tail + 2].copy_from_slice(&usn.to_le_bytes());
    }
}

/// One index entry; `child_vcn` appends the 8-byte trailing reference and
/// sets the has-child flag.
pub(crate) fn build_index_entry(
    reference: u64,
    key: &[u8],
    last: bool,
    child_vcn: Option<u64>,
) -> Vec<u8> {
    let key_len = if last { 0 } else { key.len() };
    let mut length = (16 + key_len + 7) & !7;
    if child_vcn.is_some() {
        length += 8;
    }
    let mut out = vec![0u8; length];
    out[0..8].copy_from_slice(&reference.to_le_bytes());
    out[8..10].copy_from_slice(&(length as u16).to_le_bytes());
    out[10..12].copy_from_slice(&(key_len as u16).to_le_bytes());
    let mut flags = 0u16;
    if last {
        flags |= INDEX_ENTRY_LAST;
    }
    if child_vcn.is_some() {
        flags |= INDEX_ENTRY_HAS_CHILD;
    }
    out[12..14].copy_from_slice(&flags.to_le_bytes());
    if !last {
        out[16..16 + key.len()].copy_from_slice(key);
    }
    if let Some(vcn) = child_vcn {
        out[length - 8..].copy_from_slice(&vcn.to_le_bytes());
    }
    out
}

/// INDEX_ROOT attribute value: root header + node header + entries.
pub(crate) fn build_index_root_value(
    collation: u32,
    index_block_size: u32,
    clusters_per_block: u8,
    entries: &[Vec<u8>],
    has_children: bool,
) -> Vec<u8> {
    let entries_len: usize = entries.iter().map(Vec::len).sum();
    let node_start = 16usize;
    let entries_offset = 16usize; // relative to the node header
    let used = entries_offset + entries_len;

    let mut out = vec![0u8; node_start + used];
    out[0..4].copy_from_slice(&ATTR_TYPE_FILE_NAME.to_le_bytes());
    out[4..8].copy_from_slice(&collation.to_le_bytes());
    out[8..12].copy_from_slice(&index_block_size.to_le_bytes());
    out[12] = clusters_per_block;
    out[node_start..node_start + 4].copy_from_slice(&(entries_offset as u32).to_le_bytes());
    out[node_start + 4..node_start + 8].copy_from_slice(&(used as u32).to_le_bytes());
    out[node_start + 8..node_start + 12].copy_from_slice(&(used as u32).to_le_bytes());
    if has_children {
        out[node_start + 12..node_start + 16]
            .copy_from_slice(&INDEX_NODE_HAS_CHILDREN.to_le_bytes());
    }
    let mut cursor = node_start + entries_offset;
    for entry in entries {
        out[cursor..cursor + entry.len()].copy_from_slice(entry);
        cursor += entry.len();
    }
    out
}

/// One INDX allocation block with live fixups.
pub(crate) fn build_indx_block(
    vcn: u64,
    block_size: usize,
    bytes_per_sector: usize,
    entries: &[Vec<u8>],
) -> Vec<u8> {
    let sectors = block_size / bytes_per_sector;
    let usa_offset = 0x28usize;
    let usa_count = 1 + sectors;
    let node_start = 24usize;
    let entries_offset = (usa_offset + usa_count * 2 + 7 - node_start) & !7;
    let entries_len: usize = entries.iter().map(Vec::len).sum();
    let used = entries_offset + entries_len;

    let mut block = vec![0u8; block_size];
    block[0..4].copy_from_slice(INDX_BLOCK_MAGIC);
    block[4..6].copy_from_slice(&(usa_offset as u16).to_le_bytes());
    block[6..8].copy_from_slice(&(usa_count as u16).to_le_bytes());
    block[16..24].copy_from_slice(&vcn.to_le_bytes());
    block[node_start..node_start + 4].copy_from_slice(&(entries_offset as u32).to_le_bytes());
    block[node_start + 4..node_start + 8].copy_from_slice(&(used as u32).to_le_bytes());
    block[node_start + 8..node_start + 12]
        .copy_from_slice(&((block_size - node_start) as u32).to_le_bytes());

    let mut cursor = node_start + entries_offset;
    for entry in entries {
        block[cursor..cursor + entry.len()].copy_from_slice(entry);
        cursor += entry.len();
    }

    apply_write_fixups(&mut block, usa_offset, bytes_per_sector, 0x0051);
    block
}
