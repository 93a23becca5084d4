use byteorder::{LittleEndian, ReadBytesExt};
use rdimg_core::{DiskError, DiskResult};
use std::io::Cursor;

/// One entry of a `$ATTRIBUTE_LIST` (attribute type `0x20`): points to an
/// attribute that actually lives in `target_file_ref`, an extension record
/// of the base file record that carries this list.
#[derive(Debug, Clone)]
pub struct AttributeListEntry {
    pub attr_type: u32,
    pub name: Option<String>,
    pub start_vcn: u64,
    pub target_file_ref: u64,
    pub attribute_id: u16,
}

impl AttributeListEntry {
    /// Target record number, with the sequence number bits masked off.
    pub fn target_record_number(&self) -> u64 {
        self.target_file_ref & 0x0000_FFFF_FFFF_FFFF
    }
}

pub fn parse_attribute_list(data: &[u8]) -> DiskResult<Vec<AttributeListEntry>> {
    let mut entries = Vec::new();
    let mut pos = 0usize;

    while pos + 8 <= data.len() {
        let entry_data = &data[pos..];
        let attr_type = u32::from_le_bytes(entry_data[0..4].try_into().unwrap());
        let entry_length = u16::from_le_bytes([entry_data[4], entry_data[5]]) as usize;
        if entry_length < 26 || pos + entry_length > data.len() {
            break;
        }

        let mut c = Cursor::new(entry_data);
        c.set_position(6);
        let name_length = c
            .read_u8()
            .map_err(|e| DiskError::io("attribute list name length", e))?
            as usize;
        let name_offset = c
            .read_u8()
            .map_err(|e| DiskError::io("attribute list name offset", e))?
            as usize;
        let start_vcn = c
            .read_u64::<LittleEndian>()
            .map_err(|e| DiskError::io("attribute list start vcn", e))?;
        let target_file_ref = c
            .read_u64::<LittleEndian>()
            .map_err(|e| DiskError::io("attribute list target file reference", e))?;
        let attribute_id = c
            .read_u16::<LittleEndian>()
            .map_err(|e| DiskError::io("attribute list attribute id", e))?;

        let name = if name_length > 0 {
            let name_bytes = entry_data
                .get(name_offset..name_offset + name_length * 2)
                .ok_or_else(|| DiskError::corrupt("attribute list name runs past entry"))?;
            let units: Vec<u16> = name_bytes
                .chunks_exact(2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]))
                .collect();
            Some(
                String::from_utf16(&units)
                    .map_err(|_| DiskError::corrupt("invalid utf-16 in attribute list name"))?,
            )
        } else {
            None
        };

        entries.push(AttributeListEntry {
            attr_type,
            name,
            start_vcn,
            target_file_ref,
            attribute_id,
        });
        pos += entry_length;
    }

    Ok(entries)
}
