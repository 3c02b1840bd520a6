// Data run decoder.
// A non-resident attribute locates its clusters through a run list: a byte
// whose nibbles give the widths of a run length and a signed cluster-offset
// delta, followed by those two little-endian fields. Deltas accumulate from
// run to run; a zero header byte terminates the list.

use log::trace;
use relic_core::RelicError;

/// One decoded run: `length` contiguous clusters starting at logical
/// cluster `lcn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunChunk {
    pub lcn: u64,
    pub length: u64,
}

/// Decode a run list into ordered chunks.
///
/// A zero offset width denotes a sparse run, which this engine refuses
/// rather than fabricating zero-filled content; an offset wider than the
/// 8-byte cluster-number width is likewise refused.
pub fn decode_runs(data: &[u8]) -> Result<Vec<RunChunk>, RelicError> {
    let mut chunks = Vec::new();
    let mut pos = 0usize;
    let mut previous_lcn = 0i64;

    while pos < data.len() {
        let header = data[pos];
        if header == 0 {
            break;
        }
        pos += 1;

        let length_width = (header & 0x0F) as usize;
        let offset_width = ((header >> 4) & 0x0F) as usize;
        if length_width == 0 {
            return Err(RelicError::FormatViolation(format!(
                "run header {:#04x} with zero length width",
                header
            )));
        }
        if offset_width == 0 {
            return Err(RelicError::NotSupported("sparse run".into()));
        }
        if length_width > 8 || offset_width > 8 {
            return Err(RelicError::NotSupported(format!(
                "run field widths {}/{} exceed cluster-number width",
                length_width, offset_width
            )));
        }
        if pos + length_width + offset_width > data.len() {
            return Err(RelicError::FormatViolation(
                "run fields extend past the run list".into(),
            ));
        }

        let length = read_unsigned(&data[pos..pos + length_width]);
        pos += length_width;
        let delta = read_signed(&data[pos..pos + offset_width]);
        pos += offset_width;

        if length == 0 {
            return Err(RelicError::FormatViolation("zero-length run".into()));
        }

        let lcn = previous_lcn
            .checked_add(delta)
            .ok_or_else(|| RelicError::FormatViolation("cluster delta overflow".into()))?;
        if lcn < 0 {
            return Err(RelicError::FormatViolation(format!(
                "run resolves to negative cluster {}",
                lcn
            )));
        }
        previous_lcn = lcn;

        trace!("run: {} cluster(s) at LCN {} (delta {})", length, lcn, delta);
        chunks.push(RunChunk { lcn: lcn as u64, length });
    }

    Ok(chunks)
}

/// Sum of chunk lengths; callers compare this against the attribute's
/// allocated cluster count.
pub fn total_clusters(chunks: &[RunChunk]) -> u64 {
    chunks.iter().map(|c| c.length).sum()
}

/// Reject any run addressing clusters past the end of the volume.
///
/// A run list is structurally decodable even when its accumulated LCN points
/// nowhere near the volume; such an LCN must never reach sector arithmetic.
pub fn check_volume_bounds(chunks: &[RunChunk], cluster_count: u64) -> Result<(), RelicError> {
    for chunk in chunks {
        let in_bounds = chunk
            .lcn
            .checked_add(chunk.length)
            .map_or(false, |end| end <= cluster_count);
        if !in_bounds {
            return Err(RelicError::FormatViolation(format!(
                "run of {} cluster(s) at LCN {} outside volume of {} clusters",
                chunk.length, chunk.lcn, cluster_count
            )));
        }
    }
    Ok(())
}

fn read_unsigned(bytes: &[u8]) -> u64 {
    let mut value = 0u64;
    for (i, &byte) in bytes.iter().enumerate() {
        value |= (byte as u64) << (i * 8);
    }
    value
}

/// Little-endian two's-complement read, sign-extended from its narrow width.
fn read_signed(bytes: &[u8]) -> i64 {
    let mut value = read_unsigned(bytes) as i64;
    let bits = bytes.len() * 8;
    if bits < 64 && value & (1i64 << (bits - 1)) != 0 {
        value |= !((1i64 << bits) - 1);
    }
    value
}
