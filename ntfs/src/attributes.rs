// Typed views over attribute bytes.
// An Attribute borrows straight from its record buffer; resident values are
// windows into that buffer, never copies, and live exactly as long as it.

use relic_core::RelicError;

use crate::structures::*;

/// Decode a UTF-16LE byte slice.
pub fn decode_utf16le(data: &[u8]) -> Result<String, RelicError> {
    if data.len() % 2 != 0 {
        return Err(RelicError::FormatViolation(format!(
            "UTF-16 string of {} bytes",
            data.len()
        )));
    }
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units)
        .map_err(|_| RelicError::FormatViolation("invalid UTF-16 in name".into()))
}

/// View of one attribute within a record (or attribute-list) buffer.
#[derive(Clone, Copy)]
pub struct Attribute<'a> {
    data: &'a [u8],
}

impl<'a> Attribute<'a> {
    /// Parse the attribute starting at `offset` in `buf`. The declared
    /// length must fit the buffer; a length that walks out of bounds is
    /// corruption, not something to clamp.
    pub fn parse(buf: &'a [u8], offset: usize) -> Result<Attribute<'a>, RelicError> {
        let header: AttributeHeader = overlay(buf, offset)?;
        let length = { header.length } as usize;
        if length < std::mem::size_of::<AttributeHeader>() {
            return Err(RelicError::FormatViolation(format!(
                "attribute length {} below header size",
                length
            )));
        }
        let end = offset
            .checked_add(length)
            .filter(|&e| e <= buf.len())
            .ok_or_else(|| {
                RelicError::FormatViolation(format!(
                    "attribute at {} with length {} exceeds record bounds",
                    offset, length
                ))
            })?;
        Ok(Attribute { data: &buf[offset..end] })
    }

    pub fn header(&self) -> AttributeHeader {
        overlay(self.data, 0).expect("length validated at parse")
    }

    pub fn type_code(&self) -> u32 {
        self.header().type_code
    }

    pub fn length(&self) -> usize {
        self.data.len()
    }

    pub fn attribute_id(&self) -> u16 {
        self.header().attribute_id
    }

    pub fn is_resident(&self) -> bool {
        self.header().non_resident == 0
    }

    pub fn is_compressed(&self) -> bool {
        self.header().flags & ATTR_FLAG_COMPRESSED != 0
    }

    pub fn is_encrypted(&self) -> bool {
        self.header().flags & ATTR_FLAG_ENCRYPTED != 0
    }

    pub fn is_sparse(&self) -> bool {
        self.header().flags & ATTR_FLAG_SPARSE != 0
    }

    /// Attribute name, or `None` for the primary unnamed instance.
    pub fn name(&self) -> Result<Option<String>, RelicError> {
        let header = self.header();
        if header.name_length == 0 {
            return Ok(None);
        }
        let start = { header.name_offset } as usize;
        let len = header.name_length as usize * 2;
        let bytes = self
            .data
            .get(start..start + len)
            .ok_or_else(|| RelicError::FormatViolation("attribute name out of bounds".into()))?;
        decode_utf16le(bytes).map(Some)
    }

    /// Resident value as a window into the record buffer.
    pub fn resident_value(&self) -> Result<&'a [u8], RelicError> {
        if !self.is_resident() {
            return Err(RelicError::InvalidInput(
                "resident value requested from non-resident attribute".into(),
            ));
        }
        let ext: ResidentExtension =
            overlay(self.data, std::mem::size_of::<AttributeHeader>())?;
        let start = { ext.value_offset } as usize;
        let len = { ext.value_length } as usize;
        self.data.get(start..start + len).ok_or_else(|| {
            RelicError::FormatViolation(format!(
                "resident value {}+{} outside attribute of {} bytes",
                start,
                len,
                self.data.len()
            ))
        })
    }

    /// Size fields and run-list location of a non-resident attribute.
    pub fn non_resident(&self) -> Result<NonResidentExtension, RelicError> {
        if self.is_resident() {
            return Err(RelicError::InvalidInput(
                "non-resident header requested from resident attribute".into(),
            ));
        }
        overlay(self.data, std::mem::size_of::<AttributeHeader>())
    }

    /// Encoded run list of a non-resident attribute.
    pub fn run_list(&self) -> Result<&'a [u8], RelicError> {
        let ext = self.non_resident()?;
        let start = { ext.runs_offset } as usize;
        self.data.get(start..).ok_or_else(|| {
            RelicError::FormatViolation(format!(
                "run list offset {} outside attribute of {} bytes",
                start,
                self.data.len()
            ))
        })
    }

    /// Logical content size: resident value length, or the non-resident
    /// data-size field.
    pub fn content_size(&self) -> Result<u64, RelicError> {
        if self.is_resident() {
            Ok(self.resident_value()?.len() as u64)
        } else {
            Ok(self.non_resident()?.data_size)
        }
    }

    /// Decode the value as FILE_NAME: fixed fields plus the Unicode name.
    pub fn file_name(&self) -> Result<(FileNameValue, String), RelicError> {
        let value = self.resident_value()?;
        let fixed: FileNameValue = overlay(value, 0)?;
        let name_len = fixed.name_length as usize * 2;
        let name_start = std::mem::size_of::<FileNameValue>();
        let bytes = value.get(name_start..name_start + name_len).ok_or_else(|| {
            RelicError::FormatViolation("file name value shorter than its name length".into())
        })?;
        let name = decode_utf16le(bytes)?;
        Ok((fixed, name))
    }

    pub fn standard_information(&self) -> Result<StandardInformationValue, RelicError> {
        overlay(self.resident_value()?, 0)
    }

    /// Whole attribute, header included.
    pub fn raw(&self) -> &'a [u8] {
        self.data
    }
}
