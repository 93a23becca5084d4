use byteorder::{LittleEndian, ReadBytesExt};
use rdimg_core::{DiskError, DiskResult};
use std::io::Cursor;

pub const OEM_ID: &[u8; 8] = b"NTFS    ";
pub const BOOT_SECTOR_SIGNATURE: &[u8; 2] = &[0x55, 0xAA];

/// Parsed NTFS partition boot sector (the first 512 bytes of a volume).
/// `bytes_per_file_record` and `bytes_per_index_buffer` keep the signed byte
/// read straight off the disk; `file_record_size`/`index_buffer_size`
/// resolve them into an actual byte count.
#[derive(Debug, Clone)]
pub struct NtfsBootSector {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub total_sectors: u64,
    pub mft_cluster: u64,
    pub mft_mirror_cluster: u64,
    pub bytes_per_file_record: i8,
    pub bytes_per_index_buffer: i8,
    pub volume_serial_number: u64,
}

impl NtfsBootSector {
    pub fn parse(data: &[u8]) -> DiskResult<Self> {
        if data.len() < 512 {
            return Err(DiskError::corrupt("NTFS boot sector shorter than 512 bytes"));
        }
        if &data[3..11] != OEM_ID {
            return Err(DiskError::corrupt("not an NTFS boot sector (bad OEM id)"));
        }
        if &data[510..512] != BOOT_SECTOR_SIGNATURE {
            return Err(DiskError::corrupt("bad boot sector signature"));
        }

        let mut c = Cursor::new(data);
        c.set_position(11);
        let bytes_per_sector = c
            .read_u16::<LittleEndian>()
            .map_err(|e| DiskError::io("bytes per sector", e))?;
        let sectors_per_cluster = c
            .read_u8()
            .map_err(|e| DiskError::io("sectors per cluster", e))?;

        c.set_position(0x28);
        let total_sectors = c
            .read_u64::<LittleEndian>()
            .map_err(|e| DiskError::io("total sectors", e))?;
        let mft_cluster = c
            .read_u64::<LittleEndian>()
            .map_err(|e| DiskError::io("mft cluster", e))?;
        let mft_mirror_cluster = c
            .read_u64::<LittleEndian>()
            .map_err(|e| DiskError::io("mft mirror cluster", e))?;
        let bytes_per_file_record = c
            .read_i8()
            .map_err(|e| DiskError::io("bytes per file record", e))?;
        c.set_position(0x44);
        let bytes_per_index_buffer = c
            .read_i8()
            .map_err(|e| DiskError::io("bytes per index buffer", e))?;

        c.set_position(0x48);
        let volume_serial_number = c
            .read_u64::<LittleEndian>()
            .map_err(|e| DiskError::io("volume serial number", e))?;

        if bytes_per_sector == 0 || sectors_per_cluster == 0 {
            return Err(DiskError::corrupt(
                "NTFS boot sector has zero sector or cluster size",
            ));
        }

        Ok(NtfsBootSector {
            bytes_per_sector,
            sectors_per_cluster,
            total_sectors,
            mft_cluster,
            mft_mirror_cluster,
            bytes_per_file_record,
            bytes_per_index_buffer,
            volume_serial_number,
        })
    }

    pub fn bytes_per_cluster(&self) -> u32 {
        self.bytes_per_sector as u32 * self.sectors_per_cluster as u32
    }

    /// A negative count means "2^|n| bytes"; a positive one is a count of
    /// clusters.
    pub fn file_record_size(&self) -> u32 {
        Self::resolve_signed_size(self.bytes_per_file_record, self.bytes_per_cluster())
    }

    pub fn index_buffer_size(&self) -> u32 {
        Self::resolve_signed_size(self.bytes_per_index_buffer, self.bytes_per_cluster())
    }

    fn resolve_signed_size(n: i8, bytes_per_cluster: u32) -> u32 {
        if n < 0 {
            1u32 << n.unsigned_abs()
        } else {
            n as u32 * bytes_per_cluster
        }
    }
}
