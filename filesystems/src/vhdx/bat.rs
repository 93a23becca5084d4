use byteorder::{LittleEndian, ReadBytesExt};
use rdimg_core::{DiskError, DiskResult};
use std::io::Cursor;

use super::metadata::VhdxMetadata;

const BAT_ENTRY_STATE_MASK: u64 = 0b111;
const BAT_ENTRY_OFFSET_UNIT: u64 = 1024 * 1024;

/// `PAYLOAD_BLOCK_FULLY_PRESENT`: the block's data lives at `file_offset` in
/// the backing image and should be returned verbatim.
pub const BAT_STATE_FULLY_PRESENT: u8 = 6;
/// `PAYLOAD_BLOCK_NOT_PRESENT`: the block has never been written; reads
/// return zeroes without touching the image.
pub const BAT_STATE_NOT_PRESENT: u8 = 0;

#[derive(Debug, Clone, Copy)]
pub struct BatEntry {
    pub state: u8,
    pub file_offset: u64,
}

impl BatEntry {
    fn decode(word: u64) -> Self {
        let state = (word & BAT_ENTRY_STATE_MASK) as u8;
        // Spec resolves the VHDX BAT offset ambiguity explicitly as a
        // multiplication by 1 MiB rather than a left-shift; both forms are
        // numerically identical but the multiplier form is the one named.
        let file_offset = (word >> 20) * BAT_ENTRY_OFFSET_UNIT;
        BatEntry { state, file_offset }
    }

    pub fn is_present(&self) -> bool {
        self.state == BAT_STATE_FULLY_PRESENT
    }
}

/// The decoded Block Allocation Table: one entry per payload block, plus one
/// interleaved bitmap entry per `chunk_ratio` payload blocks when the disk
/// is dynamic (`LeaveBlockAllocated == false`).
pub struct Bat {
    entries: Vec<BatEntry>,
    chunk_ratio: u64,
    dynamic: bool,
}

impl Bat {
    pub fn parse(region: &[u8], meta: &VhdxMetadata) -> DiskResult<Self> {
        if region.len() % 8 != 0 {
            return Err(DiskError::corrupt("VHDX BAT region is not a multiple of 8 bytes"));
        }
        let mut c = Cursor::new(region);
        let count = region.len() / 8;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let word = c
                .read_u64::<LittleEndian>()
                .map_err(|e| DiskError::io("BAT entry", e))?;
            entries.push(BatEntry::decode(word));
        }
        Ok(Bat {
            entries,
            chunk_ratio: meta.chunk_ratio,
            dynamic: !meta.leave_block_allocated,
        })
    }

    /// Looks up the BAT entry for payload block `block_idx`, skipping over
    /// the interleaved sector-bitmap entries that follow each chunk of
    /// `chunk_ratio` payload blocks on a dynamic disk.
    pub fn block_entry(&self, block_idx: u64) -> DiskResult<BatEntry> {
        let bitmap_blocks_before = if self.dynamic {
            block_idx / self.chunk_ratio
        } else {
            0
        };
        let index = block_idx + bitmap_blocks_before;
        self.entries
            .get(index as usize)
            .copied()
            .ok_or_else(|| DiskError::corrupt(format!("BAT has no entry for block {}", block_idx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta_with(chunk_ratio: u64, dynamic: bool) -> VhdxMetadata {
        VhdxMetadata {
            block_size: 32 * 1024 * 1024,
            leave_block_allocated: !dynamic,
            has_parent: false,
            virtual_disk_size: 0,
            virtual_disk_id: None,
            logical_sector_size: 512,
            physical_sector_size: 512,
            chunk_ratio,
            lbas_per_block: 65536,
        }
    }

    #[test]
    fn decodes_offset_as_multiple_of_one_mib() {
        let word: u64 = (5u64 << 20) | BAT_STATE_FULLY_PRESENT as u64;
        let entry = BatEntry::decode(word);
        assert_eq!(entry.file_offset, 5 * 1024 * 1024);
        assert!(entry.is_present());
    }

    #[test]
    fn skips_interleaved_bitmap_entries_on_dynamic_disk() {
        // chunk_ratio = 2: entries are [blk0, blk1, bitmap, blk2, blk3, bitmap]
        let mut region = Vec::new();
        let words: [u64; 6] = [6, 6, 0, 6, 6, 0];
        for w in words {
            region.extend_from_slice(&w.to_le_bytes());
        }
        let meta = meta_with(2, true);
        let bat = Bat::parse(&region, &meta).unwrap();
        assert!(bat.block_entry(0).unwrap().is_present());
        assert!(bat.block_entry(1).unwrap().is_present());
        assert!(bat.block_entry(2).unwrap().is_present());
        assert!(bat.block_entry(3).unwrap().is_present());
    }

    #[test]
    fn fixed_disk_has_no_bitmap_interleaving() {
        let mut region = Vec::new();
        for w in [6u64, 0, 6] {
            region.extend_from_slice(&w.to_le_bytes());
        }
        let meta = meta_with(1 << 23, false);
        let bat = Bat::parse(&region, &meta).unwrap();
        assert!(bat.block_entry(0).unwrap().is_present());
        assert!(!bat.block_entry(1).unwrap().is_present());
        assert!(bat.block_entry(2).unwrap().is_present());
    }
}
