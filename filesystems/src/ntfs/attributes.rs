use byteorder::{LittleEndian, ReadBytesExt};
use rdimg_core::{DiskError, DiskResult};
use std::io::Cursor;

use super::data_runs::{decode_run_list, DataRun};
use super::structures::FileNameNamespace;
use super::timestamps::filetime_to_datetime;
use chrono::{DateTime, Utc};

/// Common header fields every attribute carries, resident or not.
#[derive(Debug, Clone)]
pub struct AttributeHeader {
    pub attr_type: u32,
    pub non_resident: bool,
    pub name: Option<String>,
    pub flags: u16,
    pub id: u16,
}

#[derive(Debug, Clone)]
pub enum AttributeBody {
    Resident { data: Vec<u8> },
    NonResident {
        start_vcn: u64,
        last_vcn: u64,
        compression_unit: u16,
        alloc_size: u64,
        real_size: u64,
        init_size: u64,
        runs: Vec<DataRun>,
    },
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub header: AttributeHeader,
    pub body: AttributeBody,
}

impl Attribute {
    /// Parses a single attribute starting at the front of `data` and
    /// returns it together with the number of bytes it occupies, so the
    /// caller can advance to the next attribute. `data` may contain
    /// trailing attributes or padding beyond this one.
    pub fn parse(data: &[u8]) -> DiskResult<(Self, usize)> {
        if data.len() < 4 {
            return Err(DiskError::corrupt("attribute header truncated"));
        }
        let attr_type = u32::from_le_bytes(data[0..4].try_into().unwrap());
        if attr_type == super::structures::ATTR_TYPE_END {
            return Ok((
                Attribute {
                    header: AttributeHeader {
                        attr_type,
                        non_resident: false,
                        name: None,
                        flags: 0,
                        id: 0,
                    },
                    body: AttributeBody::Resident { data: Vec::new() },
                },
                4,
            ));
        }
        if data.len() < 8 {
            return Err(DiskError::corrupt("attribute header truncated"));
        }
        let total_length = u32::from_le_bytes(data[4..8].try_into().unwrap()) as usize;
        if total_length < 8 || total_length > data.len() {
            return Err(DiskError::corrupt("attribute length out of range"));
        }
        let raw = &data[..total_length];

        let mut c = Cursor::new(raw);
        c.set_position(8);
        let non_resident = c
            .read_u8()
            .map_err(|e| DiskError::io("attribute non-resident flag", e))?
            != 0;
        let name_length = c
            .read_u8()
            .map_err(|e| DiskError::io("attribute name length", e))?
            as usize;
        let name_offset = c
            .read_u16::<LittleEndian>()
            .map_err(|e| DiskError::io("attribute name offset", e))? as usize;
        let flags = c
            .read_u16::<LittleEndian>()
            .map_err(|e| DiskError::io("attribute flags", e))?;
        let id = c
            .read_u16::<LittleEndian>()
            .map_err(|e| DiskError::io("attribute id", e))?;

        let name = if name_length > 0 {
            Some(decode_utf16_le(
                &raw.get(name_offset..name_offset + name_length * 2)
                    .ok_or_else(|| DiskError::corrupt("attribute name runs past its record"))?,
            )?)
        } else {
            None
        };

        let body = if non_resident {
            c.set_position(16);
            let start_vcn = c
                .read_u64::<LittleEndian>()
                .map_err(|e| DiskError::io("start vcn", e))?;
            let last_vcn = c
                .read_u64::<LittleEndian>()
                .map_err(|e| DiskError::io("last vcn", e))?;
            let runlist_offset = c
                .read_u16::<LittleEndian>()
                .map_err(|e| DiskError::io("runlist offset", e))? as usize;
            let compression_unit = c
                .read_u16::<LittleEndian>()
                .map_err(|e| DiskError::io("compression unit", e))?;
            let _padding = c
                .read_u32::<LittleEndian>()
                .map_err(|e| DiskError::io("non-resident padding", e))?;
            let alloc_size = c
                .read_u64::<LittleEndian>()
                .map_err(|e| DiskError::io("alloc size", e))?;
            let real_size = c
                .read_u64::<LittleEndian>()
                .map_err(|e| DiskError::io("real size", e))?;
            let init_size = c
                .read_u64::<LittleEndian>()
                .map_err(|e| DiskError::io("init size", e))?;
            let runs = decode_run_list(
                raw.get(runlist_offset..)
                    .ok_or_else(|| DiskError::corrupt("runlist offset past attribute"))?,
            )?;
            AttributeBody::NonResident {
                start_vcn,
                last_vcn,
                compression_unit,
                alloc_size,
                real_size,
                init_size,
                runs,
            }
        } else {
            let attr_length = c
                .read_u32::<LittleEndian>()
                .map_err(|e| DiskError::io("resident attr length", e))? as usize;
            let attr_offset = c
                .read_u16::<LittleEndian>()
                .map_err(|e| DiskError::io("resident attr offset", e))? as usize;
            let payload = raw
                .get(attr_offset..attr_offset + attr_length)
                .ok_or_else(|| DiskError::corrupt("resident attribute payload out of range"))?;
            AttributeBody::Resident {
                data: payload.to_vec(),
            }
        };

        Ok((
            Attribute {
                header: AttributeHeader {
                    attr_type,
                    non_resident,
                    name,
                    flags,
                    id,
                },
                body,
            },
            total_length,
        ))
    }

    pub fn resident_data(&self) -> Option<&[u8]> {
        match &self.body {
            AttributeBody::Resident { data } => Some(data),
            AttributeBody::NonResident { .. } => None,
        }
    }
}

fn decode_utf16_le(bytes: &[u8]) -> DiskResult<String> {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16(&units).map_err(|_| DiskError::corrupt("invalid utf-16 in attribute name"))
}

/// Parsed `$STANDARD_INFORMATION` (attribute type `0x10`).
#[derive(Debug, Clone)]
pub struct StandardInformation {
    pub time_created: DateTime<Utc>,
    pub time_modified: DateTime<Utc>,
    pub time_mft_modified: DateTime<Utc>,
    pub time_accessed: DateTime<Utc>,
    pub file_attributes: u32,
}

impl StandardInformation {
    pub fn parse(data: &[u8]) -> DiskResult<Self> {
        let mut c = Cursor::new(data);
        let time_created = c
            .read_u64::<LittleEndian>()
            .map_err(|e| DiskError::io("standard information time created", e))?;
        let time_modified = c
            .read_u64::<LittleEndian>()
            .map_err(|e| DiskError::io("standard information time modified", e))?;
        let time_mft_modified = c
            .read_u64::<LittleEndian>()
            .map_err(|e| DiskError::io("standard information time mft modified", e))?;
        let time_accessed = c
            .read_u64::<LittleEndian>()
            .map_err(|e| DiskError::io("standard information time accessed", e))?;
        let file_attributes = c
            .read_u32::<LittleEndian>()
            .map_err(|e| DiskError::io("standard information flags", e))?;
        Ok(StandardInformation {
            time_created: filetime_to_datetime(time_created),
            time_modified: filetime_to_datetime(time_modified),
            time_mft_modified: filetime_to_datetime(time_mft_modified),
            time_accessed: filetime_to_datetime(time_accessed),
            file_attributes,
        })
    }
}

/// Parsed `$FILE_NAME` (attribute type `0x30`). A file record usually
/// carries more than one of these, one per namespace.
#[derive(Debug, Clone)]
pub struct FileNameAttribute {
    pub parent_ref: u64,
    pub parent_seq: u16,
    pub time_created: DateTime<Utc>,
    pub time_modified: DateTime<Utc>,
    pub allocated_size: u64,
    pub real_size: u64,
    pub flags: u32,
    pub namespace: FileNameNamespace,
    pub name: String,
}

impl FileNameAttribute {
    pub fn parse(data: &[u8]) -> DiskResult<Self> {
        if data.len() < 66 {
            return Err(DiskError::corrupt("file_name attribute truncated"));
        }
        let mut parent_ref_bytes = [0u8; 8];
        parent_ref_bytes[..6].copy_from_slice(&data[0..6]);
        let parent_ref = u64::from_le_bytes(parent_ref_bytes);
        let parent_seq = u16::from_le_bytes([data[6], data[7]]);

        let mut c = Cursor::new(&data[8..]);
        let time_created = c
            .read_u64::<LittleEndian>()
            .map_err(|e| DiskError::io("file_name time created", e))?;
        let time_modified = c
            .read_u64::<LittleEndian>()
            .map_err(|e| DiskError::io("file_name time modified", e))?;
        let _time_mft_modified = c
            .read_u64::<LittleEndian>()
            .map_err(|e| DiskError::io("file_name time mft modified", e))?;
        let _time_accessed = c
            .read_u64::<LittleEndian>()
            .map_err(|e| DiskError::io("file_name time accessed", e))?;
        let allocated_size = c
            .read_u64::<LittleEndian>()
            .map_err(|e| DiskError::io("file_name allocated size", e))?;
        let real_size = c
            .read_u64::<LittleEndian>()
            .map_err(|e| DiskError::io("file_name real size", e))?;
        let flags = c
            .read_u32::<LittleEndian>()
            .map_err(|e| DiskError::io("file_name flags", e))?;
        let _reparse_value = c
            .read_u32::<LittleEndian>()
            .map_err(|e| DiskError::io("file_name reparse value", e))?;
        let name_length = c
            .read_u8()
            .map_err(|e| DiskError::io("file_name length", e))? as usize;
        let namespace_byte = c
            .read_u8()
            .map_err(|e| DiskError::io("file_name namespace", e))?;

        let name_start = 8 + 56 + 2;
        let name_bytes = data
            .get(name_start..name_start + name_length * 2)
            .ok_or_else(|| DiskError::corrupt("file_name string runs past attribute"))?;
        let name = decode_utf16_le(name_bytes)?;

        Ok(FileNameAttribute {
            parent_ref,
            parent_seq,
            time_created: filetime_to_datetime(time_created),
            time_modified: filetime_to_datetime(time_modified),
            allocated_size,
            real_size,
            flags,
            namespace: FileNameNamespace::from_u8(namespace_byte),
            name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_resident_attribute(attr_type: u32, payload: &[u8]) -> Vec<u8> {
        let header_len = 24usize;
        let total_len = header_len + payload.len();
        let total_len = total_len.div_ceil(8) * 8;
        let mut buf = vec![0u8; total_len];
        buf[0..4].copy_from_slice(&attr_type.to_le_bytes());
        buf[4..8].copy_from_slice(&(total_len as u32).to_le_bytes());
        buf[8] = 0; // resident
        buf[16..20].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        buf[20..22].copy_from_slice(&(header_len as u16).to_le_bytes());
        buf[header_len..header_len + payload.len()].copy_from_slice(payload);
        buf
    }

    #[test]
    fn parses_resident_attribute_header_and_payload() {
        let payload = [1, 2, 3, 4];
        let data = build_resident_attribute(0x10, &payload);
        let (attr, consumed) = Attribute::parse(&data).unwrap();
        assert_eq!(consumed, data.len());
        assert_eq!(attr.header.attr_type, 0x10);
        assert!(!attr.header.non_resident);
        assert_eq!(attr.resident_data().unwrap(), &payload[..]);
    }

    #[test]
    fn attr_type_end_marker_is_recognized() {
        let data = 0xFFFF_FFFFu32.to_le_bytes();
        let (attr, consumed) = Attribute::parse(&data).unwrap();
        assert_eq!(attr.header.attr_type, super::super::structures::ATTR_TYPE_END);
        assert_eq!(consumed, 4);
    }

    #[test]
    fn file_name_attribute_roundtrips_name() {
        let mut payload = vec![0u8; 66];
        payload[64] = 4; // name length in utf-16 units
        payload[65] = 1; // WIN32 namespace
        let name: Vec<u16> = "test".encode_utf16().collect();
        let mut name_bytes = Vec::new();
        for u in name {
            name_bytes.extend_from_slice(&u.to_le_bytes());
        }
        payload.extend_from_slice(&name_bytes);
        let fna = FileNameAttribute::parse(&payload).unwrap();
        assert_eq!(fna.name, "test");
        assert_eq!(fna.namespace, FileNameNamespace::Win32);
    }
}
