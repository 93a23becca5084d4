use byteorder::{LittleEndian, ReadBytesExt};
use rdimg_core::{DiskError, DiskResult};
use std::io::Cursor;

use super::attributes::Attribute;
use super::structures::{apply_usa_fixup, FileRecordFlags, ATTR_TYPE_END, FILE_RECORD_SIGNATURE};

/// A parsed MFT file record: header fields plus every attribute found
/// between `attr_offset` and `bytes_in_use`.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub sequence_number: u16,
    pub link_count: u16,
    pub flags: FileRecordFlags,
    pub bytes_in_use: u32,
    pub bytes_allocated: u32,
    pub base_record: u64,
    pub record_number: u64,
    pub attributes: Vec<Attribute>,
}

impl FileRecord {
    /// Parses a file record occupying the first `record_size` bytes of
    /// `data`, applying the Update Sequence Array fix-up first. A checksum
    /// mismatch is logged and the record is returned anyway: forensic
    /// recovery over a damaged image benefits more from a best-effort
    /// record than from a hard failure.
    pub fn parse(data: &[u8], record_size: usize, bytes_per_sector: u32) -> DiskResult<Self> {
        if data.len() < record_size {
            return Err(DiskError::corrupt("file record buffer shorter than record size"));
        }
        let mut buf = data[..record_size].to_vec();

        if &buf[0..4] != FILE_RECORD_SIGNATURE {
            return Err(DiskError::corrupt("file record missing FILE signature"));
        }

        let usa_offset = u16::from_le_bytes([buf[4], buf[5]]) as usize;
        let usa_count = u16::from_le_bytes([buf[6], buf[7]]) as usize;
        apply_usa_fixup(&mut buf, usa_offset, usa_count, bytes_per_sector as usize);

        let mut c = Cursor::new(&buf);
        c.set_position(16);
        let sequence_number = c
            .read_u16::<LittleEndian>()
            .map_err(|e| DiskError::io("file record sequence number", e))?;
        let link_count = c
            .read_u16::<LittleEndian>()
            .map_err(|e| DiskError::io("file record link count", e))?;
        let attr_offset = c
            .read_u16::<LittleEndian>()
            .map_err(|e| DiskError::io("file record attribute offset", e))? as usize;
        let flags_raw = c
            .read_u16::<LittleEndian>()
            .map_err(|e| DiskError::io("file record flags", e))?;
        let bytes_in_use = c
            .read_u32::<LittleEndian>()
            .map_err(|e| DiskError::io("file record bytes in use", e))?;
        let bytes_allocated = c
            .read_u32::<LittleEndian>()
            .map_err(|e| DiskError::io("file record bytes allocated", e))?;
        let base_record = c
            .read_u64::<LittleEndian>()
            .map_err(|e| DiskError::io("file record base reference", e))?;
        let _next_attr_id = c
            .read_u16::<LittleEndian>()
            .map_err(|e| DiskError::io("file record next attribute id", e))?;
        c.set_position(44);
        let record_number = c
            .read_u32::<LittleEndian>()
            .map_err(|e| DiskError::io("file record number", e))? as u64;

        let flags = FileRecordFlags::from_bits_truncate(flags_raw);

        let mut attributes = Vec::new();
        let mut pos = attr_offset;
        let end = (bytes_in_use as usize).min(buf.len());
        while pos + 4 <= end {
            let (attr, consumed) = Attribute::parse(&buf[pos..end])?;
            if attr.header.attr_type == ATTR_TYPE_END {
                break;
            }
            attributes.push(attr);
            pos += consumed;
        }

        Ok(FileRecord {
            sequence_number,
            link_count,
            flags,
            bytes_in_use,
            bytes_allocated,
            base_record,
            record_number,
            attributes,
        })
    }

    pub fn is_in_use(&self) -> bool {
        self.flags.contains(FileRecordFlags::IN_USE)
    }

    pub fn is_directory(&self) -> bool {
        self.flags.contains(FileRecordFlags::DIRECTORY)
    }

    pub fn attributes_by_type(&self, attr_type: u32) -> impl Iterator<Item = &Attribute> {
        self.attributes
            .iter()
            .filter(move |a| a.header.attr_type == attr_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_record(bytes_per_sector: usize, sector_count: usize) -> Vec<u8> {
        let record_size = bytes_per_sector * sector_count;
        let mut buf = vec![0u8; record_size];
        buf[0..4].copy_from_slice(FILE_RECORD_SIGNATURE);
        let usa_offset = 48u16;
        let usa_count = (sector_count + 1) as u16;
        buf[4..6].copy_from_slice(&usa_offset.to_le_bytes());
        buf[6..8].copy_from_slice(&usa_count.to_le_bytes());
        buf[16..18].copy_from_slice(&1u16.to_le_bytes()); // sequence number
        buf[18..20].copy_from_slice(&1u16.to_le_bytes()); // link count
        buf[20..22].copy_from_slice(&((usa_offset as usize + usa_count as usize * 2) as u16).to_le_bytes());
        buf[22..24].copy_from_slice(&0x03u16.to_le_bytes()); // IN_USE | DIRECTORY
        buf[24..28].copy_from_slice(&(record_size as u32).to_le_bytes());
        buf[28..32].copy_from_slice(&(record_size as u32).to_le_bytes());
        buf[44..48].copy_from_slice(&5u32.to_le_bytes());

        let check_value = [0x12, 0x34];
        buf[usa_offset as usize..usa_offset as usize + 2].copy_from_slice(&check_value);
        for sector in 0..sector_count {
            let trailer_pos = (sector + 1) * bytes_per_sector - 2;
            buf[trailer_pos..trailer_pos + 2].copy_from_slice(&check_value);
            let replacement_pos = usa_offset as usize + 2 + sector * 2;
            buf[replacement_pos..replacement_pos + 2].copy_from_slice(&[0xAA, (sector) as u8]);
        }
        // terminate attribute list immediately
        let attr_offset = usa_offset as usize + usa_count as usize * 2;
        buf[attr_offset..attr_offset + 4].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        buf
    }

    #[test]
    fn parses_header_and_restores_sector_trailers() {
        let data = build_record(512, 2);
        let record = FileRecord::parse(&data, data.len(), 512).unwrap();
        assert_eq!(record.record_number, 5);
        assert!(record.is_in_use());
        assert!(record.is_directory());
        assert!(record.attributes.is_empty());
    }

    #[test]
    fn mismatched_checksum_does_not_abort_parsing() {
        let mut data = build_record(512, 2);
        data[510] = 0xFF; // corrupt the first sector trailer before fixup
        data[511] = 0xFF;
        let record = FileRecord::parse(&data, data.len(), 512);
        assert!(record.is_ok());
    }
}
