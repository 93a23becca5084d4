use async_trait::async_trait;
use rdimg_core::{ByteSource, DiskResult};

use crate::{DiskTranslator, LBA_SIZE};

/// Passthrough translator for images with no block-mapping layer: LBA `i`
/// is simply the `i`-th 512-byte chunk of the source.
pub struct RawDiskTranslator<S: ByteSource> {
    source: S,
}

impl<S: ByteSource> RawDiskTranslator<S> {
    pub fn new(source: S) -> Self {
        RawDiskTranslator { source }
    }
}

#[async_trait]
impl<S: ByteSource> DiskTranslator for RawDiskTranslator<S> {
    async fn read_lba(&mut self, lba: u64) -> DiskResult<Vec<u8>> {
        self.source.read_at(lba * LBA_SIZE, LBA_SIZE as usize).await
    }

    async fn read_lbas(&mut self, lbas: &[u64]) -> DiskResult<Vec<u8>> {
        if lbas.is_empty() {
            return Ok(Vec::new());
        }
        let mut sorted = lbas.to_vec();
        sorted.sort_unstable();
        for pair in sorted.windows(2) {
            if pair[1] != pair[0] + 1 {
                return Err(rdimg_core::DiskError::invalid_argument(
                    "read_lbas requires a contiguous run of LBAs",
                ));
            }
        }
        let first = sorted[0];
        let count = sorted.len() as u64;
        self.source
            .read_at(first * LBA_SIZE, (count * LBA_SIZE) as usize)
            .await
    }

    async fn lba_count(&mut self) -> DiskResult<u64> {
        Ok(self.source.size().await? / LBA_SIZE)
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
            if pos >= self.data.len() && n > 0 {
                return Err(rdimg_core::DiskError::eof("mem source"));
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
    async fn reads_lba_as_512_byte_chunk() {
        let mut data = vec![0u8; 1024];
        data[512] = 0xAB;
        let source = MemSource { data, pos: 0 };
        let mut translator = RawDiskTranslator::new(source);
        let lba1 = translator.read_lba(1).await.unwrap();
        assert_eq!(lba1[0], 0xAB);
        assert_eq!(lba1.len(), 512);
    }

    #[tokio::test]
    async fn read_lbas_concatenates_contiguous_range() {
        let mut data = vec![0u8; 1536];
        data[0] = 1;
        data[512] = 2;
        data[1024] = 3;
        let source = MemSource { data, pos: 0 };
        let mut translator = RawDiskTranslator::new(source);
        let out = translator.read_lbas(&[0, 1, 2]).await.unwrap();
        assert_eq!(out.len(), 1536);
        assert_eq!(out[0], 1);
        assert_eq!(out[512], 2);
        assert_eq!(out[1024], 3);
    }
}
