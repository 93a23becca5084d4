use rdimg_core::{DiskError, DiskResult};

pub const MBR_SIGNATURE_OFFSET: usize = 510;
pub const MBR_PARTITION_TABLE_OFFSET: usize = 0x1BE;
pub const MBR_ENTRY_SIZE: usize = 16;
pub const MBR_ENTRY_COUNT: usize = 4;

/// GPT protective partition type: a real MBR with a single entry of this
/// type means the disk is actually GPT-partitioned and LBA 1 should govern.
pub const MBR_TYPE_GPT_PROTECTIVE: u8 = 0xEE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MbrEntry {
    pub bootable: bool,
    pub partition_type: u8,
    pub start_lba: u32,
    pub size_sectors: u32,
}

#[derive(Debug, Clone)]
pub struct Mbr {
    pub entries: Vec<MbrEntry>,
}

impl Mbr {
    /// Parses a 512-byte LBA 0 sector. Returns `None` when the `0x55AA`
    /// signature is absent -- this is not corruption, just "no MBR here".
    pub fn parse(sector: &[u8]) -> DiskResult<Option<Self>> {
        if sector.len() < 512 {
            return Err(DiskError::corrupt("MBR sector shorter than 512 bytes"));
        }
        if sector[MBR_SIGNATURE_OFFSET] != 0x55 || sector[MBR_SIGNATURE_OFFSET + 1] != 0xAA {
            return Ok(None);
        }

        let mut entries = Vec::with_capacity(MBR_ENTRY_COUNT);
        for i in 0..MBR_ENTRY_COUNT {
            let offset = MBR_PARTITION_TABLE_OFFSET + i * MBR_ENTRY_SIZE;
            let raw = &sector[offset..offset + MBR_ENTRY_SIZE];
            let partition_type = raw[4];
            if partition_type == 0 {
                continue;
            }
            let start_lba = u32::from_le_bytes(raw[8..12].try_into().unwrap());
            let size_sectors = u32::from_le_bytes(raw[12..16].try_into().unwrap());
            entries.push(MbrEntry {
                bootable: raw[0] == 0x80,
                partition_type,
                start_lba,
                size_sectors,
            });
        }

        Ok(Some(Mbr { entries }))
    }

    /// True when this MBR is the single-entry "protective" marker that
    /// means the real partitioning scheme is GPT.
    pub fn is_gpt_protective(&self) -> bool {
        self.entries.len() == 1 && self.entries[0].partition_type == MBR_TYPE_GPT_PROTECTIVE
    }
}
