use std::num::NonZeroUsize;

use lru::LruCache;
use rdimg_core::{ByteSource, DiskError, DiskResult};

use crate::DiskTranslator;

use super::bat::Bat;
use super::headers::{GUID_BAT, GUID_METADATA, VhdxHeaders};
use super::metadata::VhdxMetadata;

const VHDX_HEADER_AREA_SIZE: usize = 1024 * 1024;
const BLOCK_CACHE_CAPACITY: usize = 32;

/// Translates logical block addresses against a sparse/dynamic VHDX image by
/// walking the Block Allocation Table. Never-allocated blocks read back as
/// zeroes without touching the backing file.
pub struct VhdxDiskTranslator<S: ByteSource> {
    source: S,
    metadata: VhdxMetadata,
    bat: Bat,
    block_cache: LruCache<u64, Vec<u8>>,
}

impl<S: ByteSource> VhdxDiskTranslator<S> {
    pub async fn open(mut source: S) -> DiskResult<Self> {
        let header_area = source.read_at(0, VHDX_HEADER_AREA_SIZE).await?;
        if header_area.len() < VHDX_HEADER_AREA_SIZE {
            return Err(DiskError::corrupt("VHDX image shorter than the 1 MiB header area"));
        }
        let headers = VhdxHeaders::parse(&header_area)?;
        headers.active_header()?;
        let region_table = headers.active_region_table();

        let mut metadata_region = None;
        let mut bat_region = None;
        for entry in &region_table.entries {
            let guid = entry.guid.to_string().to_uppercase();
            if guid == GUID_METADATA {
                metadata_region = Some(entry);
            } else if guid == GUID_BAT {
                bat_region = Some(entry);
            } else if entry.required {
                return Err(DiskError::unsupported(format!(
                    "VHDX image references an unrecognized required region {}",
                    guid
                )));
            }
        }

        let metadata_entry = metadata_region
            .ok_or_else(|| DiskError::corrupt("VHDX image has no Metadata region"))?;
        let bat_entry =
            bat_region.ok_or_else(|| DiskError::corrupt("VHDX image has no BAT region"))?;

        let metadata_bytes = source
            .read_at(metadata_entry.file_offset, metadata_entry.length as usize)
            .await?;
        let metadata = VhdxMetadata::parse(&metadata_bytes)?;

        let bat_bytes = source
            .read_at(bat_entry.file_offset, bat_entry.length as usize)
            .await?;
        let bat = Bat::parse(&bat_bytes, &metadata)?;

        Ok(VhdxDiskTranslator {
            source,
            metadata,
            bat,
            block_cache: LruCache::new(NonZeroUsize::new(BLOCK_CACHE_CAPACITY).unwrap()),
        })
    }

    async fn read_block(&mut self, block_idx: u64) -> DiskResult<Vec<u8>> {
        if let Some(block) = self.block_cache.get(&block_idx) {
            return Ok(block.clone());
        }

        let entry = self.bat.block_entry(block_idx)?;
        let block = if entry.is_present() {
            let data = self
                .source
                .read_at(entry.file_offset, self.metadata.block_size as usize)
                .await?;
            if data.len() != self.metadata.block_size as usize {
                return Err(DiskError::corrupt(format!(
                    "VHDX block {} read short: expected {} bytes, got {}",
                    block_idx,
                    self.metadata.block_size,
                    data.len()
                )));
            }
            data
        } else {
            vec![0u8; self.metadata.block_size as usize]
        };

        self.block_cache.put(block_idx, block.clone());
        Ok(block)
    }

    fn sector_size(&self) -> u64 {
        self.metadata.logical_sector_size as u64
    }
}

#[async_trait::async_trait]
impl<S: ByteSource> DiskTranslator for VhdxDiskTranslator<S> {
    async fn read_lba(&mut self, lba: u64) -> DiskResult<Vec<u8>> {
        let lbas_per_block = self.metadata.lbas_per_block;
        let block_idx = lba / lbas_per_block;
        let offset_in_block = lba % lbas_per_block;
        let block = self.read_block(block_idx).await?;
        let sector_size = self.sector_size() as usize;
        let start = offset_in_block as usize * sector_size;
        let end = start + sector_size;
        if end > block.len() {
            return Err(DiskError::corrupt(format!(
                "LBA {} falls outside its VHDX block",
                lba
            )));
        }
        Ok(block[start..end].to_vec())
    }

    async fn read_lbas(&mut self, lbas: &[u64]) -> DiskResult<Vec<u8>> {
        if lbas.is_empty() {
            return Ok(Vec::new());
        }
        let mut sorted = lbas.to_vec();
        sorted.sort_unstable();
        for pair in sorted.windows(2) {
            if pair[1] != pair[0] + 1 {
                return Err(DiskError::invalid_argument(
                    "read_lbas requires a contiguous run of LBAs",
                ));
            }
        }

        let first_lba = sorted[0];
        let last_lba = *sorted.last().unwrap();
        let lbas_per_block = self.metadata.lbas_per_block;
        let sector_size = self.sector_size();

        let first_block_idx = first_lba / lbas_per_block;
        let last_block_idx = last_lba / lbas_per_block;

        let mut buf = Vec::new();
        for block_idx in first_block_idx..=last_block_idx {
            buf.extend_from_slice(&self.read_block(block_idx).await?);
        }

        let start_block_lba = first_block_idx * lbas_per_block;
        let start_offset = (first_lba - start_block_lba) * sector_size;
        let total_length = (last_lba - first_lba + 1) * sector_size;

        let start = start_offset as usize;
        let end = start + total_length as usize;
        if end > buf.len() {
            return Err(DiskError::corrupt("contiguous LBA read spans past read blocks"));
        }
        Ok(buf[start..end].to_vec())
    }

    async fn lba_count(&mut self) -> DiskResult<u64> {
        Ok(self.metadata.virtual_disk_size / self.metadata.logical_sector_size as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rdimg_core::Whence;

    struct MemSource {
        data: Vec<u8>,
        pos: u64,
    }

    #[async_trait]
    impl ByteSource for MemSource {
        async fn read(&mut self, n: usize) -> DiskResult<Vec<u8>> {
            let pos = self.pos as usize;
            if pos >= self.data.len() {
                if n == 0 {
                    return Ok(Vec::new());
                }
                return Err(DiskError::eof("mem source"));
            }
            let end = (pos + n).min(self.data.len());
            self.pos = end as u64;
            Ok(self.data[pos..end].to_vec())
        }

        async fn seek(&mut self, offset: i64, whence: Whence) -> DiskResult<u64> {
            self.pos = match whence {
                Whence::Start => offset as u64,
                Whence::Current => (self.pos as i64 + offset) as u64,
                Whence::End => (self.data.len() as i64 + offset) as u64,
            };
            Ok(self.pos)
        }

        async fn tell(&mut self) -> DiskResult<u64> {
            Ok(self.pos)
        }

        async fn size(&mut self) -> DiskResult<u64> {
            Ok(self.data.len() as u64)
        }
    }

    fn crc_fill(mut block: Vec<u8>) -> Vec<u8> {
        block[4..8].fill(0);
        let sum = crc32c::crc32c(&block);
        block[4..8].copy_from_slice(&sum.to_le_bytes());
        block
    }

    fn build_image(block_size: u32, virtual_disk_size: u64, block_data: &[(u64, Vec<u8>)]) -> Vec<u8> {
        use super::super::headers::{HEADER_SIGNATURE, REGION_TABLE_SIGNATURE, VHDX_SIGNATURE};
        use uuid::Uuid;

        let mut image = vec![0u8; VHDX_HEADER_AREA_SIZE];
        image[0..8].copy_from_slice(VHDX_SIGNATURE);

        let mut header = vec![0u8; 4096];
        header[0..4].copy_from_slice(&HEADER_SIGNATURE.to_le_bytes());
        header[8..16].copy_from_slice(&1u64.to_le_bytes());
        let header = crc_fill(header);
        image[64 * 1024..64 * 1024 + 4096].copy_from_slice(&header);

        // Region table with two entries: Metadata then BAT, placed right
        // after the 1 MiB header area.
        let metadata_offset: u64 = VHDX_HEADER_AREA_SIZE as u64;
        let bat_offset: u64 = metadata_offset + 4096;

        let mut rt = vec![0u8; 64 * 1024];
        rt[0..4].copy_from_slice(&REGION_TABLE_SIGNATURE.to_le_bytes());
        rt[8..12].copy_from_slice(&2u32.to_le_bytes());
        let meta_guid = Uuid::parse_str(GUID_METADATA).unwrap();
        let bat_guid = Uuid::parse_str(GUID_BAT).unwrap();
        let mut off = 16;
        rt[off..off + 16].copy_from_slice(&meta_guid.to_bytes_le());
        rt[off + 16..off + 24].copy_from_slice(&metadata_offset.to_le_bytes());
        rt[off + 24..off + 28].copy_from_slice(&4096u32.to_le_bytes());
        off += 32;
        rt[off..off + 16].copy_from_slice(&bat_guid.to_bytes_le());
        rt[off + 16..off + 24].copy_from_slice(&bat_offset.to_le_bytes());
        rt[off + 24..off + 28].copy_from_slice(&(8 * 8u32).to_le_bytes());
        let rt = crc_fill(rt);
        image[192 * 1024..192 * 1024 + 64 * 1024].copy_from_slice(&rt);
        image[256 * 1024..256 * 1024 + 64 * 1024].copy_from_slice(&rt);

        // Metadata region: FileParameters + VirtualDiskSize + LogicalSectorSize.
        let mut meta = vec![0u8; 4096];
        meta[0..8].copy_from_slice(b"metadata");
        meta[10..12].copy_from_slice(&3u16.to_le_bytes());
        let mut item_off = 32 + 3 * 32;
        let mut put_entry = |buf: &mut Vec<u8>, idx: usize, guid: &str, len: u32, data: &[u8], item_off: &mut usize| {
            let e = 32 + idx * 32;
            let g = Uuid::parse_str(guid).unwrap();
            buf[e..e + 16].copy_from_slice(&g.to_bytes_le());
            buf[e + 16..e + 20].copy_from_slice(&(*item_off as u32).to_le_bytes());
            buf[e + 20..e + 24].copy_from_slice(&len.to_le_bytes());
            buf[*item_off..*item_off + data.len()].copy_from_slice(data);
            *item_off += data.len();
        };
        let mut fp = vec![0u8; 8];
        fp[0..4].copy_from_slice(&block_size.to_le_bytes());
        put_entry(&mut meta, 0, super::super::metadata::GUID_FILE_PARAMETERS, 8, &fp, &mut item_off);
        put_entry(
            &mut meta,
            1,
            super::super::metadata::GUID_VIRTUAL_DISK_SIZE,
            8,
            &virtual_disk_size.to_le_bytes(),
            &mut item_off,
        );
        put_entry(
            &mut meta,
            2,
            super::super::metadata::GUID_LOGICAL_SECTOR_SIZE,
            4,
            &512u32.to_le_bytes(),
            &mut item_off,
        );
        image.extend_from_slice(&meta);

        // BAT: 8 entries, all NOT_PRESENT except those named in block_data.
        let mut bat = vec![0u8; 8 * 8];
        for (block_idx, _) in block_data {
            let word: u64 = 6;
            bat[*block_idx as usize * 8..*block_idx as usize * 8 + 8].copy_from_slice(&word.to_le_bytes());
        }
        image.extend_from_slice(&bat);

        // Lay out payload blocks after a data area; BAT offsets point at 1 MiB-aligned slots.
        let data_area_start = 16 * 1024 * 1024u64;
        for (i, (_, data)) in block_data.iter().enumerate() {
            let slot = data_area_start + i as u64 * block_size as u64;
            if image.len() < (slot + block_size as u64) as usize {
                image.resize((slot + block_size as u64) as usize, 0);
            }
            image[slot as usize..slot as usize + data.len()].copy_from_slice(data);
        }
        // patch BAT offsets now that slots are known
        for (i, (block_idx, _)) in block_data.iter().enumerate() {
            let slot = data_area_start + i as u64 * block_size as u64;
            let word: u64 = 6 | ((slot / (1024 * 1024)) << 20);
            let bat_region_start = (metadata_offset + 4096) as usize;
            image[bat_region_start + *block_idx as usize * 8..bat_region_start + *block_idx as usize * 8 + 8]
                .copy_from_slice(&word.to_le_bytes());
        }

        image
    }

    #[tokio::test]
    async fn reads_allocated_and_zero_fills_unallocated_blocks() {
        let block_size = 1024 * 1024u32;
        let mut block0 = vec![0xABu8; block_size as usize];
        block0[0] = 0x11;
        let image = build_image(block_size, 4 * block_size as u64, &[(0, block0.clone())]);
        let source = MemSource { data: image, pos: 0 };
        let mut translator = VhdxDiskTranslator::open(source).await.unwrap();

        let lba0 = translator.read_lba(0).await.unwrap();
        assert_eq!(lba0, block0[0..512]);

        let lbas_per_block = block_size as u64 / 512;
        let unallocated_lba = translator.read_lba(lbas_per_block).await.unwrap();
        assert_eq!(unallocated_lba, vec![0u8; 512]);
    }

    #[tokio::test]
    async fn read_lbas_rejects_non_contiguous_input() {
        let block_size = 1024 * 1024u32;
        let image = build_image(block_size, 4 * block_size as u64, &[]);
        let source = MemSource { data: image, pos: 0 };
        let mut translator = VhdxDiskTranslator::open(source).await.unwrap();
        let err = translator.read_lbas(&[0, 2]).await.unwrap_err();
        assert!(matches!(err, DiskError::InvalidArgument(_)));
    }
}
