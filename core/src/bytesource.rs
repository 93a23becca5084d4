use crate::error::DiskResult;
use async_trait::async_trait;

/// Seek origin, mirroring `std::io::SeekFrom` without committing callers to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

/// A byte-addressable source of image data: a regular file, a gzip stream,
/// a remote SMB/SFTP session, or anything else that can answer `read` and
/// `seek`. Every method is a suspension point -- implementations are free
/// to await network or disk I/O underneath.
///
/// It is legal to `seek` past the end of the source; a `read` that starts
/// past the end returns [`DiskError::Eof`](crate::error::DiskError::Eof).
#[async_trait]
pub trait ByteSource: Send {
    async fn read(&mut self, n: usize) -> DiskResult<Vec<u8>>;
    async fn seek(&mut self, offset: i64, whence: Whence) -> DiskResult<u64>;
    async fn tell(&mut self) -> DiskResult<u64>;
    async fn size(&mut self) -> DiskResult<u64>;

    /// Convenience helper used throughout the core: seek then read.
    async fn read_at(&mut self, offset: u64, n: usize) -> DiskResult<Vec<u8>> {
        self.seek(offset as i64, Whence::Start).await?;
        self.read(n).await
    }
}
