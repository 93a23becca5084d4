use std::num::NonZeroUsize;

use lru::LruCache;
use rdimg_core::{DiskError, DiskResult};

use crate::VolumeReader;

use super::attributes::AttributeBody;
use super::boot_sector::NtfsBootSector;
use super::data_runs::{read_run_list_bytes, DataRun};
use super::filerecord::FileRecord;
use super::structures::ATTR_TYPE_DATA;

/// Default size of the file record cache; chosen to comfortably hold a
/// session's worth of directory and metadata lookups without unbounded
/// growth on large volumes.
pub const DEFAULT_RECORD_CACHE_CAPACITY: usize = 10_000;

/// Bootstraps and serves MFT records. Record #0 (`$MFT` itself) is read
/// directly from its boot-sector-given cluster; every other record is read
/// through record #0's own `DATA` attribute run list, exactly like any
/// other non-resident stream.
pub struct MftReader {
    record_size: u32,
    bytes_per_sector: u32,
    data_runs: Vec<DataRun>,
    cache: LruCache<u64, FileRecord>,
}

impl MftReader {
    pub async fn open(volume: &mut VolumeReader, boot: &NtfsBootSector) -> DiskResult<Self> {
        Self::open_with_capacity(volume, boot, DEFAULT_RECORD_CACHE_CAPACITY).await
    }

    pub async fn open_with_capacity(
        volume: &mut VolumeReader,
        boot: &NtfsBootSector,
        cache_capacity: usize,
    ) -> DiskResult<Self> {
        let record_size = boot.file_record_size();
        let bytes_per_sector = boot.bytes_per_sector as u32;
        let mft_offset = boot.mft_cluster * boot.bytes_per_cluster() as u64;

        let record0_bytes = volume.read_bytes(mft_offset, record_size as u64).await?;
        let record0 = FileRecord::parse(&record0_bytes, record_size as usize, bytes_per_sector)?;

        let data_attr = record0
            .attributes
            .iter()
            .find(|a| a.header.attr_type == ATTR_TYPE_DATA && a.header.name.is_none())
            .ok_or_else(|| DiskError::corrupt("$MFT record has no unnamed DATA attribute"))?;

        let data_runs = match &data_attr.body {
            AttributeBody::NonResident { runs, .. } => runs.clone(),
            AttributeBody::Resident { .. } => {
                return Err(DiskError::corrupt("$MFT DATA attribute is unexpectedly resident"))
            }
        };

        let capacity = NonZeroUsize::new(cache_capacity.max(1)).unwrap();
        Ok(MftReader {
            record_size,
            bytes_per_sector,
            data_runs,
            cache: LruCache::new(capacity),
        })
    }

    pub async fn get_record(
        &mut self,
        volume: &mut VolumeReader,
        record_number: u64,
    ) -> DiskResult<FileRecord> {
        if let Some(record) = self.cache.get(&record_number) {
            return Ok(record.clone());
        }

        let offset = record_number * self.record_size as u64;
        let raw = read_run_list_bytes(volume, &self.data_runs, offset, self.record_size as u64)
            .await?;
        let record = FileRecord::parse(&raw, self.record_size as usize, self.bytes_per_sector)?;
        self.cache.put(record_number, record.clone());
        Ok(record)
    }

    pub fn record_size(&self) -> u32 {
        self.record_size
    }
}
