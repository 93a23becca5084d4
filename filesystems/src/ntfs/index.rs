use byteorder::{LittleEndian, ReadBytesExt};
use rdimg_core::{DiskError, DiskResult};
use std::io::Cursor;

use super::structures::{apply_usa_fixup, IndexEntryFlags, INDEX_RECORD_SIGNATURE};

const FILE_REFERENCE_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

/// `$I30` header shared by `INDEX_ROOT` and every `INDX` record: where the
/// entry list starts and how far it runs.
#[derive(Debug, Clone)]
pub struct IndexHeader {
    pub first_entry_offset: u32,
    pub index_length: u32,
    pub allocated_size: u32,
}

impl IndexHeader {
    fn parse(c: &mut Cursor<&[u8]>) -> DiskResult<Self> {
        let first_entry_offset = c
            .read_u32::<LittleEndian>()
            .map_err(|e| DiskError::io("index header first entry offset", e))?;
        let index_length = c
            .read_u32::<LittleEndian>()
            .map_err(|e| DiskError::io("index header index length", e))?;
        let allocated_size = c
            .read_u32::<LittleEndian>()
            .map_err(|e| DiskError::io("index header allocated size", e))?;
        let _flags = c
            .read_u32::<LittleEndian>()
            .map_err(|e| DiskError::io("index header flags", e))?;
        Ok(IndexHeader {
            first_entry_offset,
            index_length,
            allocated_size,
        })
    }
}

/// One B+-tree node entry: a leaf carries a `FILE_NAME` payload in `stream`,
/// an internal node carries `sub_node_vcn`, pointing at the child `INDX`
/// record in `INDEX_ALLOCATION`. Both may be present on the same entry.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub file_reference: u64,
    pub flags: IndexEntryFlags,
    pub stream: Option<Vec<u8>>,
    pub sub_node_vcn: Option<u64>,
}

impl IndexEntry {
    pub fn is_last_entry(&self) -> bool {
        self.flags.contains(IndexEntryFlags::LAST_ENTRY)
    }

    pub fn is_sub_node(&self) -> bool {
        self.flags.contains(IndexEntryFlags::SUB_NODE)
    }

    /// Parses one entry from the front of `data`, returning it along with
    /// the number of bytes it occupies (`entry_length`).
    fn parse(data: &[u8]) -> DiskResult<(Self, usize)> {
        if data.len() < 16 {
            return Err(DiskError::corrupt("index entry truncated"));
        }
        let mut ref_bytes = [0u8; 8];
        ref_bytes[..6].copy_from_slice(&data[0..6]);
        let file_reference = u64::from_le_bytes(ref_bytes) & FILE_REFERENCE_MASK;

        let entry_length = u16::from_le_bytes([data[8], data[9]]) as usize;
        let _stream_length = u16::from_le_bytes([data[10], data[11]]) as usize;
        let flags_raw = u32::from_le_bytes(data[12..16].try_into().unwrap());
        let flags = IndexEntryFlags::from_bits_truncate(flags_raw);

        if entry_length < 16 || entry_length > data.len() {
            return Err(DiskError::corrupt("index entry length out of range"));
        }
        let entry = &data[..entry_length];

        // The spec's convention: when SUB_NODE is set, the last 8 bytes of
        // the entry are a plain little-endian VCN of the child node, not a
        // 6-byte file reference plus 2-byte sequence number.
        let sub_node_vcn = if flags.contains(IndexEntryFlags::SUB_NODE) {
            let vcn_bytes: [u8; 8] = entry[entry_length - 8..].try_into().unwrap();
            Some(u64::from_le_bytes(vcn_bytes))
        } else {
            None
        };

        let stream = if !flags.contains(IndexEntryFlags::LAST_ENTRY) {
            let stream_end = if flags.contains(IndexEntryFlags::SUB_NODE) {
                entry_length - 8
            } else {
                entry_length
            };
            entry.get(16..stream_end).map(|s| s.to_vec())
        } else {
            None
        };

        Ok((
            IndexEntry {
                file_reference,
                flags,
                stream,
                sub_node_vcn,
            },
            entry_length,
        ))
    }
}

/// Parses the entry list of one B+-tree node: entries stop at the one
/// carrying `LAST_ENTRY`.
pub fn parse_index_entries(data: &[u8]) -> DiskResult<Vec<IndexEntry>> {
    let mut entries = Vec::new();
    let mut pos = 0usize;
    while pos + 16 <= data.len() {
        let (entry, consumed) = IndexEntry::parse(&data[pos..])?;
        let is_last = entry.is_last_entry();
        entries.push(entry);
        pos += consumed;
        if is_last {
            break;
        }
    }
    Ok(entries)
}

/// The inline top of the B+-tree, carried directly in the `INDEX_ROOT`
/// attribute's resident data.
#[derive(Debug, Clone)]
pub struct IndexRoot {
    pub bytes_per_record: u32,
    pub entries: Vec<IndexEntry>,
}

impl IndexRoot {
    pub fn parse(data: &[u8]) -> DiskResult<Self> {
        if data.len() < 16 {
            return Err(DiskError::corrupt("index root truncated"));
        }
        let mut c = Cursor::new(data);
        let _attribute_type = c
            .read_u32::<LittleEndian>()
            .map_err(|e| DiskError::io("index root attribute type", e))?;
        let _collation_rule = c
            .read_u32::<LittleEndian>()
            .map_err(|e| DiskError::io("index root collation rule", e))?;
        let bytes_per_record = c
            .read_u32::<LittleEndian>()
            .map_err(|e| DiskError::io("index root bytes per record", e))?;
        let _clusters_per_record = c
            .read_u32::<LittleEndian>()
            .map_err(|e| DiskError::io("index root clusters per record", e))?;

        let header_start = c.position() as usize;
        let header = IndexHeader::parse(&mut c)?;

        let entries_start = header_start + header.first_entry_offset as usize;
        let entries_end = (header_start + header.index_length as usize).min(data.len());
        let entries_data = data
            .get(entries_start..entries_end)
            .ok_or_else(|| DiskError::corrupt("index root entry list out of range"))?;

        Ok(IndexRoot {
            bytes_per_record,
            entries: parse_index_entries(entries_data)?,
        })
    }
}

/// One `INDX` record referenced from `INDEX_ALLOCATION`: a sub-node of the
/// directory B+-tree, with its own USA fix-up.
#[derive(Debug, Clone)]
pub struct IndexRecord {
    pub vcn: u64,
    pub entries: Vec<IndexEntry>,
}

impl IndexRecord {
    pub fn parse(data: &[u8], bytes_per_sector: u32) -> DiskResult<Self> {
        if data.len() < 24 || &data[0..4] != INDEX_RECORD_SIGNATURE {
            return Err(DiskError::corrupt("INDX record missing signature"));
        }
        let mut buf = data.to_vec();
        let usa_offset = u16::from_le_bytes([buf[4], buf[5]]) as usize;
        let usa_count = u16::from_le_bytes([buf[6], buf[7]]) as usize;
        apply_usa_fixup(&mut buf, usa_offset, usa_count, bytes_per_sector as usize);

        let vcn = u64::from_le_bytes(buf[16..24].try_into().unwrap());

        let mut c = Cursor::new(&buf[24..]);
        let header_start = 24usize;
        let header = IndexHeader::parse(&mut c)?;

        let entries_start = header_start + header.first_entry_offset as usize;
        let entries_end = (header_start + header.index_length as usize).min(buf.len());
        let entries_data = buf
            .get(entries_start..entries_end.max(entries_start))
            .ok_or_else(|| DiskError::corrupt("INDX entry list out of range"))?;

        Ok(IndexRecord {
            vcn,
            entries: parse_index_entries(entries_data)?,
        })
    }
}
