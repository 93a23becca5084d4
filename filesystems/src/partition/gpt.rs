use byteorder::{LittleEndian, ReadBytesExt};
use rdimg_core::{DiskError, DiskResult};
use std::io::{Cursor, Read};
use uuid::Uuid;

pub const GPT_SIGNATURE: &[u8; 8] = b"EFI PART";
const GPT_HEADER_SIZE: u32 = 92;

#[derive(Debug, Clone)]
pub struct GptHeader {
    pub current_lba: u64,
    pub backup_lba: u64,
    pub first_usable_lba: u64,
    pub last_usable_lba: u64,
    pub disk_guid: Uuid,
    pub partition_entries_lba: u64,
    pub num_entries: u32,
    pub entry_size: u32,
}

impl GptHeader {
    /// Parses the GPT header sector (LBA 1). Does not read the partition
    /// entry array; callers fetch `num_entries * entry_size` bytes starting
    /// at `partition_entries_lba` separately, since that may span several
    /// LBAs.
    pub fn parse(sector: &[u8]) -> DiskResult<Self> {
        if sector.len() < 92 {
            return Err(DiskError::corrupt("GPT header sector shorter than 92 bytes"));
        }
        let mut c = Cursor::new(sector);
        let mut sig = [0u8; 8];
        c.read_exact(&mut sig)
            .map_err(|e| DiskError::io("GPT signature", e))?;
        if &sig != GPT_SIGNATURE {
            return Err(DiskError::corrupt("bad GPT signature, expected 'EFI PART'"));
        }
        c.set_position(c.position() + 4); // revision
        let header_size = c
            .read_u32::<LittleEndian>()
            .map_err(|e| DiskError::io("GPT header size", e))?;
        if header_size != GPT_HEADER_SIZE {
            return Err(DiskError::corrupt(format!(
                "unexpected GPT header size {}",
                header_size
            )));
        }
        c.set_position(c.position() + 4); // header CRC32
        c.set_position(c.position() + 4); // reserved
        let current_lba = c
            .read_u64::<LittleEndian>()
            .map_err(|e| DiskError::io("GPT current LBA", e))?;
        let backup_lba = c
            .read_u64::<LittleEndian>()
            .map_err(|e| DiskError::io("GPT backup LBA", e))?;
        let first_usable_lba = c
            .read_u64::<LittleEndian>()
            .map_err(|e| DiskError::io("GPT first usable LBA", e))?;
        let last_usable_lba = c
            .read_u64::<LittleEndian>()
            .map_err(|e| DiskError::io("GPT last usable LBA", e))?;
        let mut guid_bytes = [0u8; 16];
        c.read_exact(&mut guid_bytes)
            .map_err(|e| DiskError::io("GPT disk GUID", e))?;
        let disk_guid = Uuid::from_bytes_le(guid_bytes);
        let partition_entries_lba = c
            .read_u64::<LittleEndian>()
            .map_err(|e| DiskError::io("GPT partition entries LBA", e))?;
        let num_entries = c
            .read_u32::<LittleEndian>()
            .map_err(|e| DiskError::io("GPT num entries", e))?;
        let entry_size = c
            .read_u32::<LittleEndian>()
            .map_err(|e| DiskError::io("GPT entry size", e))?;

        Ok(GptHeader {
            current_lba,
            backup_lba,
            first_usable_lba,
            last_usable_lba,
            disk_guid,
            partition_entries_lba,
            num_entries,
            entry_size,
        })
    }
}

#[derive(Debug, Clone)]
pub struct GptPartitionEntry {
    pub type_guid: Uuid,
    pub unique_guid: Uuid,
    pub first_lba: u64,
    pub last_lba: u64,
}

impl GptPartitionEntry {
    pub fn parse(entry: &[u8]) -> DiskResult<Self> {
        if entry.len() < 56 {
            return Err(DiskError::corrupt("GPT partition entry shorter than 56 bytes"));
        }
        let mut c = Cursor::new(entry);
        let mut type_guid_bytes = [0u8; 16];
        c.read_exact(&mut type_guid_bytes)
            .map_err(|e| DiskError::io("GPT partition type GUID", e))?;
        let mut unique_guid_bytes = [0u8; 16];
        c.read_exact(&mut unique_guid_bytes)
            .map_err(|e| DiskError::io("GPT unique partition GUID", e))?;
        let first_lba = c
            .read_u64::<LittleEndian>()
            .map_err(|e| DiskError::io("GPT partition first LBA", e))?;
        let last_lba = c
            .read_u64::<LittleEndian>()
            .map_err(|e| DiskError::io("GPT partition last LBA", e))?;

        Ok(GptPartitionEntry {
            type_guid: Uuid::from_bytes_le(type_guid_bytes),
            unique_guid: Uuid::from_bytes_le(unique_guid_bytes),
            first_lba,
            last_lba,
        })
    }

    pub fn is_unused(&self) -> bool {
        self.type_guid.is_nil()
    }
}
