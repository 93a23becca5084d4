use rdimg_core::DiskResult;

use crate::DiskTranslator;

use super::gpt::{GptHeader, GptPartitionEntry};
use super::mbr::Mbr;
use super::Partition;

/// Locates partitions by reading LBA 0 (MBR) and, when the MBR defers to it
/// or is absent, LBA 1 onward (GPT). `end_lba` in the returned partitions is
/// an exclusive upper bound, matching how sizes are expressed on-disk (MBR
/// `size_sectors`, GPT `last_lba + 1`).
pub struct PartitionFinder;

impl PartitionFinder {
    pub async fn find(translator: &mut dyn DiskTranslator) -> DiskResult<Vec<Partition>> {
        let lba0 = translator.read_lba(0).await?;
        let mbr = Mbr::parse(&lba0)?;

        let use_gpt = match &mbr {
            Some(m) => m.is_gpt_protective(),
            None => true,
        };

        if use_gpt {
            if let Some(partitions) = Self::try_gpt(translator).await? {
                return Ok(partitions);
            }
        }

        if let Some(mbr) = mbr {
            if !mbr.entries.is_empty() {
                return Ok(mbr
                    .entries
                    .iter()
                    .map(|e| Partition {
                        start_lba: e.start_lba as u64,
                        end_lba: e.start_lba as u64 + e.size_sectors as u64,
                        type_hint: format!("{:#04X}", e.partition_type),
                    })
                    .collect());
            }
        }

        let total_lbas = translator.lba_count().await?;
        Ok(vec![Partition {
            start_lba: 0,
            end_lba: total_lbas,
            type_hint: "RAW".to_string(),
        }])
    }

    async fn try_gpt(translator: &mut dyn DiskTranslator) -> DiskResult<Option<Vec<Partition>>> {
        let lba1 = translator.read_lba(1).await?;
        let header = match GptHeader::parse(&lba1) {
            Ok(h) => h,
            Err(_) => return Ok(None),
        };

        let entries_total_bytes = header.num_entries as usize * header.entry_size as usize;
        let mut raw = Vec::with_capacity(entries_total_bytes);
        let mut lba = header.partition_entries_lba;
        while raw.len() < entries_total_bytes {
            raw.extend_from_slice(&translator.read_lba(lba).await?);
            lba += 1;
        }

        let mut partitions = Vec::new();
        for i in 0..header.num_entries as usize {
            let start = i * header.entry_size as usize;
            let end = start + header.entry_size as usize;
            if end > raw.len() {
                break;
            }
            let entry = GptPartitionEntry::parse(&raw[start..end.min(raw.len())])?;
            if entry.is_unused() {
                continue;
            }
            partitions.push(Partition {
                start_lba: entry.first_lba,
                end_lba: entry.last_lba + 1,
                type_hint: entry.type_guid.to_string().to_uppercase(),
            });
        }

        if partitions.is_empty() {
            return Ok(None);
        }
        Ok(Some(partitions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::RawDiskTranslator;
    use async_trait::async_trait;
    use rdimg_core::{ByteSource, DiskError, Whence};

    const LBA_SIZE: usize = 512;

    struct MemSource {
        data: Vec<u8>,
        pos: u64,
    }

    #[async_trait]
    impl ByteSource for MemSource {
        async fn read(&mut self, n: usize) -> DiskResult<Vec<u8>> {
            let pos = self.pos as usize;
            if pos >= self.data.len() && n > 0 {
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

    #[tokio::test]
    async fn no_boot_record_collapses_to_raw_pseudo_partition() {
        let data = vec![0u8; LBA_SIZE * 4];
        let source = MemSource { data, pos: 0 };
        let mut translator = RawDiskTranslator::new(source);
        let partitions = PartitionFinder::find(&mut translator).await.unwrap();
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].type_hint, "RAW");
        assert_eq!(partitions[0].start_lba, 0);
        assert_eq!(partitions[0].end_lba, 4);
    }

    #[tokio::test]
    async fn ntfs_mbr_entry_is_reported() {
        let mut data = vec![0u8; LBA_SIZE * 4];
        data[510] = 0x55;
        data[511] = 0xAA;
        let off = 0x1BE;
        data[off + 4] = 0x07; // NTFS/exFAT type byte
        data[off + 8..off + 12].copy_from_slice(&1u32.to_le_bytes());
        data[off + 12..off + 16].copy_from_slice(&2u32.to_le_bytes());
        let source = MemSource { data, pos: 0 };
        let mut translator = RawDiskTranslator::new(source);
        let partitions = PartitionFinder::find(&mut translator).await.unwrap();
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].start_lba, 1);
        assert_eq!(partitions[0].end_lba, 3);
    }
}
