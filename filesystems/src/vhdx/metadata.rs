use byteorder::{LittleEndian, ReadBytesExt};
use rdimg_core::{DiskError, DiskResult};
use std::io::Cursor;
use uuid::Uuid;

pub const GUID_FILE_PARAMETERS: &str = "CAA16737-FA36-4D43-B3B6-33F0AA44E76B";
pub const GUID_VIRTUAL_DISK_SIZE: &str = "2FA54224-CD1B-4876-B211-5DBED83BF4B8";
pub const GUID_VIRTUAL_DISK_ID: &str = "BECA12AB-B2E6-4523-93EF-C309E000C746";
pub const GUID_LOGICAL_SECTOR_SIZE: &str = "8141BF1D-A96F-4709-BA47-F233A8FAAB5F";
pub const GUID_PHYSICAL_SECTOR_SIZE: &str = "CDA348C7-445D-4471-9CC9-E9885251C556";

const VHDX_MAX_SECTORS_PER_BLOCK: u64 = 1 << 23;

/// Parsed `Metadata` region: file parameters plus derived block-mapping
/// constants (`chunk_ratio`, `lbas_per_block`).
#[derive(Debug, Clone)]
pub struct VhdxMetadata {
    pub block_size: u32,
    pub leave_block_allocated: bool,
    pub has_parent: bool,
    pub virtual_disk_size: u64,
    pub virtual_disk_id: Option<Uuid>,
    pub logical_sector_size: u32,
    pub physical_sector_size: u32,
    pub chunk_ratio: u64,
    pub lbas_per_block: u64,
}

struct TableEntry {
    item_id: Uuid,
    item_offset: u32,
    item_length: u32,
}

impl VhdxMetadata {
    pub fn parse(region: &[u8]) -> DiskResult<Self> {
        let mut c = Cursor::new(region);
        let mut sig = [0u8; 8];
        std::io::Read::read_exact(&mut c, &mut sig)
            .map_err(|e| DiskError::io("metadata table signature", e))?;
        if &sig != b"metadata" {
            return Err(DiskError::corrupt("bad VHDX metadata table signature"));
        }
        let _reserved = c
            .read_u16::<LittleEndian>()
            .map_err(|e| DiskError::io("metadata reserved", e))?;
        let entry_count = c
            .read_u16::<LittleEndian>()
            .map_err(|e| DiskError::io("metadata entry count", e))?;
        c.set_position(c.position() + 20);

        let mut entries = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            let item_id = read_guid_cursor(&mut c)?;
            let item_offset = c
                .read_u32::<LittleEndian>()
                .map_err(|e| DiskError::io("metadata item offset", e))?;
            let item_length = c
                .read_u32::<LittleEndian>()
                .map_err(|e| DiskError::io("metadata item length", e))?;
            c.set_position(c.position() + 8);
            entries.push(TableEntry {
                item_id,
                item_offset,
                item_length,
            });
        }

        let mut block_size = None;
        let mut leave_block_allocated = false;
        let mut has_parent = false;
        let mut virtual_disk_size = None;
        let mut virtual_disk_id = None;
        let mut logical_sector_size = None;
        let mut physical_sector_size = None;

        for entry in &entries {
            let start = entry.item_offset as usize;
            let end = start + entry.item_length as usize;
            if end > region.len() {
                return Err(DiskError::corrupt("VHDX metadata item beyond region"));
            }
            let item = &region[start..end];
            let guid_str = entry.item_id.to_string().to_uppercase();

            if guid_str == GUID_FILE_PARAMETERS {
                if item.len() < 8 {
                    return Err(DiskError::corrupt("FileParameters item too short"));
                }
                block_size = Some(u32::from_le_bytes(item[0..4].try_into().unwrap()));
                let flags = item[4];
                leave_block_allocated = (flags >> 7) & 1 != 0;
                has_parent = (flags >> 6) & 1 != 0;
            } else if guid_str == GUID_VIRTUAL_DISK_SIZE {
                if item.len() < 8 {
                    return Err(DiskError::corrupt("VirtualDiskSize item too short"));
                }
                virtual_disk_size = Some(u64::from_le_bytes(item[0..8].try_into().unwrap()));
            } else if guid_str == GUID_VIRTUAL_DISK_ID {
                if item.len() < 16 {
                    return Err(DiskError::corrupt("VirtualDiskId item too short"));
                }
                virtual_disk_id = Some(Uuid::from_bytes_le(item[0..16].try_into().unwrap()));
            } else if guid_str == GUID_LOGICAL_SECTOR_SIZE {
                if item.len() < 4 {
                    return Err(DiskError::corrupt("LogicalSectorSize item too short"));
                }
                logical_sector_size = Some(u32::from_le_bytes(item[0..4].try_into().unwrap()));
            } else if guid_str == GUID_PHYSICAL_SECTOR_SIZE {
                if item.len() < 4 {
                    return Err(DiskError::corrupt("PhysicalSectorSize item too short"));
                }
                physical_sector_size = Some(u32::from_le_bytes(item[0..4].try_into().unwrap()));
            }
        }

        let block_size = block_size.ok_or_else(|| {
            DiskError::corrupt("VHDX metadata is missing required FileParameters item")
        })?;
        let virtual_disk_size = virtual_disk_size.ok_or_else(|| {
            DiskError::corrupt("VHDX metadata is missing required VirtualDiskSize item")
        })?;
        let logical_sector_size = logical_sector_size.unwrap_or(512);
        let physical_sector_size = physical_sector_size.unwrap_or(logical_sector_size);

        if !block_size.is_power_of_two() || !(1..=256).contains(&(block_size / (1024 * 1024))) {
            return Err(DiskError::corrupt(format!(
                "VHDX BlockSize {} is not a power of two between 1 MiB and 256 MiB",
                block_size
            )));
        }

        let chunk_ratio = (VHDX_MAX_SECTORS_PER_BLOCK * logical_sector_size as u64) / block_size as u64;
        let lbas_per_block = block_size as u64 / logical_sector_size as u64;

        Ok(VhdxMetadata {
            block_size,
            leave_block_allocated,
            has_parent,
            virtual_disk_size,
            virtual_disk_id,
            logical_sector_size,
            physical_sector_size,
            chunk_ratio,
            lbas_per_block,
        })
    }
}

fn read_guid_cursor(c: &mut Cursor<&[u8]>) -> DiskResult<Uuid> {
    let mut bytes = [0u8; 16];
    std::io::Read::read_exact(c, &mut bytes).map_err(|e| DiskError::io("guid", e))?;
    Ok(Uuid::from_bytes_le(bytes))
}
