use byteorder::{LittleEndian, ReadBytesExt};
use rdimg_core::{DiskError, DiskResult};
use std::io::{Cursor, Read};
use uuid::Uuid;

pub const VHDX_SIGNATURE: &[u8; 8] = b"vhdxfile";
pub const HEADER_SIGNATURE: u32 = 0x64616568; // "head" LE
pub const REGION_TABLE_SIGNATURE: u32 = 0x69676572; // "regi" LE

pub const GUID_BAT: &str = "2DC27766-F623-4200-9D64-115E9BFD4A08";
pub const GUID_METADATA: &str = "8B7CA206-4790-4B9A-B8FE-575F050F886E";

/// Top-level 1 MiB VHDX header area: file type identifier, two headers and
/// two region tables at their fixed offsets.
pub struct VhdxHeaders {
    pub signature: [u8; 8],
    pub header1: Header,
    pub header2: Header,
    pub region_table1: RegionTable,
    pub region_table2: RegionTable,
}

impl VhdxHeaders {
    /// Parses the first 1 MiB of a VHDX image, already read into `data`.
    pub fn parse(data: &[u8]) -> DiskResult<Self> {
        if data.len() < 1024 * 1024 {
            return Err(DiskError::corrupt("VHDX header region shorter than 1 MiB"));
        }
        let mut signature = [0u8; 8];
        signature.copy_from_slice(&data[0..8]);
        if &signature != VHDX_SIGNATURE {
            return Err(DiskError::corrupt(format!(
                "bad VHDX file type identifier: {:?}",
                signature
            )));
        }

        let header1 = Header::parse(&data[64 * 1024..128 * 1024])?;
        let header2 = Header::parse(&data[128 * 1024..192 * 1024])?;
        let region_table1 = RegionTable::parse(&data[192 * 1024..256 * 1024])?;
        let region_table2 = RegionTable::parse(&data[256 * 1024..320 * 1024])?;

        Ok(VhdxHeaders {
            signature,
            header1,
            header2,
            region_table1,
            region_table2,
        })
    }

    /// Picks the header with the higher sequence number among those whose
    /// checksum validates, and the region table paired with it (region
    /// table 1 unless it is invalid).
    pub fn active_header(&self) -> DiskResult<&Header> {
        let h1_ok = self.header1.signature == HEADER_SIGNATURE && self.header1.checksum_valid();
        let h2_ok = self.header2.signature == HEADER_SIGNATURE && self.header2.checksum_valid();
        match (h1_ok, h2_ok) {
            (true, true) => {
                if self.header2.sequence_number > self.header1.sequence_number {
                    Ok(&self.header2)
                } else {
                    Ok(&self.header1)
                }
            }
            (true, false) => Ok(&self.header1),
            (false, true) => Ok(&self.header2),
            (false, false) => Err(DiskError::corrupt("no valid VHDX header found")),
        }
    }

    pub fn active_region_table(&self) -> &RegionTable {
        if self.region_table1.signature == REGION_TABLE_SIGNATURE
            && self.region_table1.checksum_valid()
        {
            &self.region_table1
        } else {
            &self.region_table2
        }
    }
}

#[derive(Debug, Clone)]
pub struct Header {
    pub signature: u32,
    pub checksum: u32,
    pub sequence_number: u64,
    pub file_write_guid: Uuid,
    pub data_write_guid: Uuid,
    pub log_guid: Uuid,
    pub log_version: u16,
    pub version: u16,
    pub log_length: u32,
    pub log_offset: u64,
    raw: Vec<u8>,
}

impl Header {
    fn parse(data: &[u8]) -> DiskResult<Self> {
        if data.len() < 4096 {
            return Err(DiskError::corrupt("VHDX header block shorter than 4096 bytes"));
        }
        let raw = data[..4096].to_vec();
        let mut c = Cursor::new(&raw);
        let signature = c
            .read_u32::<LittleEndian>()
            .map_err(|e| DiskError::io("vhdx header signature", e))?;
        let checksum = c
            .read_u32::<LittleEndian>()
            .map_err(|e| DiskError::io("vhdx header checksum", e))?;
        let sequence_number = c
            .read_u64::<LittleEndian>()
            .map_err(|e| DiskError::io("vhdx header sequence number", e))?;
        let file_write_guid = read_guid(&mut c)?;
        let data_write_guid = read_guid(&mut c)?;
        let log_guid = read_guid(&mut c)?;
        let log_version = c
            .read_u16::<LittleEndian>()
            .map_err(|e| DiskError::io("vhdx log version", e))?;
        let version = c
            .read_u16::<LittleEndian>()
            .map_err(|e| DiskError::io("vhdx version", e))?;
        let log_length = c
            .read_u32::<LittleEndian>()
            .map_err(|e| DiskError::io("vhdx log length", e))?;
        let log_offset = c
            .read_u64::<LittleEndian>()
            .map_err(|e| DiskError::io("vhdx log offset", e))?;

        Ok(Header {
            signature,
            checksum,
            sequence_number,
            file_write_guid,
            data_write_guid,
            log_guid,
            log_version,
            version,
            log_length,
            log_offset,
            raw,
        })
    }

    /// VHDX headers are checksummed with CRC-32C over the full 4096-byte
    /// block with the checksum field itself treated as zero.
    pub fn checksum_valid(&self) -> bool {
        let mut buf = self.raw.clone();
        buf[4..8].fill(0);
        crc32c::crc32c(&buf) == self.checksum
    }
}

#[derive(Debug, Clone)]
pub struct RegionTable {
    pub signature: u32,
    pub checksum: u32,
    pub entry_count: u32,
    pub entries: Vec<RegionTableEntry>,
    raw: Vec<u8>,
}

impl RegionTable {
    fn parse(data: &[u8]) -> DiskResult<Self> {
        if data.len() < 64 * 1024 {
            return Err(DiskError::corrupt("VHDX region table shorter than 64 KiB"));
        }
        let raw = data[..64 * 1024].to_vec();
        let mut c = Cursor::new(&raw);
        let signature = c
            .read_u32::<LittleEndian>()
            .map_err(|e| DiskError::io("region table signature", e))?;
        let checksum = c
            .read_u32::<LittleEndian>()
            .map_err(|e| DiskError::io("region table checksum", e))?;
        let entry_count = c
            .read_u32::<LittleEndian>()
            .map_err(|e| DiskError::io("region table entry count", e))?;
        let _reserved = c
            .read_u32::<LittleEndian>()
            .map_err(|e| DiskError::io("region table reserved", e))?;

        let mut entries = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            entries.push(RegionTableEntry::parse(&mut c)?);
        }

        Ok(RegionTable {
            signature,
            checksum,
            entry_count,
            entries,
            raw,
        })
    }

    pub fn checksum_valid(&self) -> bool {
        let mut buf = self.raw.clone();
        buf[4..8].fill(0);
        crc32c::crc32c(&buf) == self.checksum
    }
}

#[derive(Debug, Clone)]
pub struct RegionTableEntry {
    pub guid: Uuid,
    pub file_offset: u64,
    pub length: u32,
    pub required: bool,
}

impl RegionTableEntry {
    fn parse(c: &mut Cursor<&Vec<u8>>) -> DiskResult<Self> {
        let guid = read_guid(c)?;
        let file_offset = c
            .read_u64::<LittleEndian>()
            .map_err(|e| DiskError::io("region entry file offset", e))?;
        let length = c
            .read_u32::<LittleEndian>()
            .map_err(|e| DiskError::io("region entry length", e))?;
        let flags = c
            .read_u32::<LittleEndian>()
            .map_err(|e| DiskError::io("region entry flags", e))?;
        Ok(RegionTableEntry {
            guid,
            file_offset,
            length,
            required: flags & 0x1 != 0,
        })
    }
}

pub fn read_guid(c: &mut Cursor<&Vec<u8>>) -> DiskResult<Uuid> {
    let mut bytes = [0u8; 16];
    c.read_exact(&mut bytes)
        .map_err(|e| DiskError::io("guid", e))?;
    Ok(Uuid::from_bytes_le(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crc_checksummed(mut block: Vec<u8>) -> Vec<u8> {
        block[4..8].fill(0);
        let sum = crc32c::crc32c(&block);
        block[4..8].copy_from_slice(&sum.to_le_bytes());
        block
    }

    fn make_header(seq: u64) -> Vec<u8> {
        let mut block = vec![0u8; 4096];
        block[0..4].copy_from_slice(&HEADER_SIGNATURE.to_le_bytes());
        block[8..16].copy_from_slice(&seq.to_le_bytes());
        crc_checksummed(block)
    }

    #[test]
    fn picks_header_with_higher_sequence_number() {
        let mut data = vec![0u8; 1024 * 1024];
        data[0..8].copy_from_slice(VHDX_SIGNATURE);
        data[64 * 1024..64 * 1024 + 4096].copy_from_slice(&make_header(1));
        data[128 * 1024..128 * 1024 + 4096].copy_from_slice(&make_header(2));

        let mut rt = vec![0u8; 64 * 1024];
        rt[0..4].copy_from_slice(&REGION_TABLE_SIGNATURE.to_le_bytes());
        let rt = crc_checksummed(rt);
        data[192 * 1024..192 * 1024 + 64 * 1024].copy_from_slice(&rt);
        data[256 * 1024..256 * 1024 + 64 * 1024].copy_from_slice(&rt);

        let headers = VhdxHeaders::parse(&data).unwrap();
        let active = headers.active_header().unwrap();
        assert_eq!(active.sequence_number, 2);
    }

    #[test]
    fn rejects_bad_signature() {
        let data = vec![0u8; 1024 * 1024];
        assert!(VhdxHeaders::parse(&data).is_err());
    }
}
