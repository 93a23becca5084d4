// Shared on-disk constants used across the NTFS layer.

/// Restores the real sector-trailer bytes that the Update Sequence Array
/// mechanism temporarily overwrites with a checksum, for any record type
/// that uses the convention (file records, `INDX` records). `usa_count`
/// includes the checksum word itself, so `usa_count - 1` sectors are
/// patched. A mismatch is logged and the record kept as-is: this reader's
/// main job is recovering data from damaged images.
pub(crate) fn apply_usa_fixup(
    buf: &mut [u8],
    usa_offset: usize,
    usa_count: usize,
    bytes_per_sector: usize,
) {
    if usa_count == 0 || usa_offset + usa_count * 2 > buf.len() || bytes_per_sector < 2 {
        return;
    }
    let check_value = [buf[usa_offset], buf[usa_offset + 1]];

    for sector in 0..usa_count.saturating_sub(1) {
        let trailer_pos = (sector + 1) * bytes_per_sector - 2;
        if trailer_pos + 2 > buf.len() {
            break;
        }
        let actual = [buf[trailer_pos], buf[trailer_pos + 1]];
        if actual != check_value {
            log::warn!(
                "USA checksum mismatch in sector {} (expected {:?}, found {:?}); continuing with torn data",
                sector,
                check_value,
                actual
            );
        }
        let replacement_pos = usa_offset + 2 + sector * 2;
        buf[trailer_pos] = buf[replacement_pos];
        buf[trailer_pos + 1] = buf[replacement_pos + 1];
    }
}

pub const ATTR_TYPE_STANDARD_INFORMATION: u32 = 0x10;
pub const ATTR_TYPE_ATTRIBUTE_LIST: u32 = 0x20;
pub const ATTR_TYPE_FILE_NAME: u32 = 0x30;
pub const ATTR_TYPE_OBJECT_ID: u32 = 0x40;
pub const ATTR_TYPE_SECURITY_DESCRIPTOR: u32 = 0x50;
pub const ATTR_TYPE_VOLUME_NAME: u32 = 0x60;
pub const ATTR_TYPE_VOLUME_INFORMATION: u32 = 0x70;
pub const ATTR_TYPE_DATA: u32 = 0x80;
pub const ATTR_TYPE_INDEX_ROOT: u32 = 0x90;
pub const ATTR_TYPE_INDEX_ALLOCATION: u32 = 0xA0;
pub const ATTR_TYPE_BITMAP: u32 = 0xB0;
pub const ATTR_TYPE_REPARSE_POINT: u32 = 0xC0;
pub const ATTR_TYPE_EA_INFORMATION: u32 = 0xD0;
pub const ATTR_TYPE_EA: u32 = 0xE0;
pub const ATTR_TYPE_LOGGED_UTILITY_STREAM: u32 = 0x100;
pub const ATTR_TYPE_END: u32 = 0xFFFF_FFFF;

pub const FILE_RECORD_SIGNATURE: &[u8; 4] = b"FILE";
pub const INDEX_RECORD_SIGNATURE: &[u8; 4] = b"INDX";

/// Record number of the volume root directory.
pub const MFT_RECORD_ROOT: u64 = 5;
/// Record numbers below this are reserved NTFS metadata files and are
/// skipped from user-visible directory listings.
pub const RESERVED_RECORD_THRESHOLD: u64 = 24;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileRecordFlags: u16 {
        const IN_USE = 0x01;
        const DIRECTORY = 0x02;
        const EXTENSION = 0x04;
        const SPECIAL_INDEX_PRESENT = 0x08;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IndexEntryFlags: u32 {
        const SUB_NODE = 0x01;
        const LAST_ENTRY = 0x02;
    }
}

/// `FILE_NAME` namespace; a file may carry several names, one per
/// namespace, and user-facing paths prefer WIN32 over DOS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileNameNamespace {
    Posix,
    Win32,
    Dos,
    Win32AndDos,
}

impl FileNameNamespace {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => FileNameNamespace::Win32,
            2 => FileNameNamespace::Dos,
            3 => FileNameNamespace::Win32AndDos,
            _ => FileNameNamespace::Posix,
        }
    }
}
