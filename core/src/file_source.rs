use crate::bytesource::{ByteSource, Whence};
use crate::error::{DiskError, DiskResult};
use async_trait::async_trait;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// A [`ByteSource`] backed by a plain local file.
///
/// This is the reference adapter used by the test suite and by simple CLI
/// tooling; gzip-compressed files, SMB shares and SFTP streams are
/// collaborators that implement the same trait but live outside the core.
pub struct FileByteSource {
    path: String,
    file: File,
    size: u64,
}

impl FileByteSource {
    pub fn open(path: impl AsRef<Path>) -> DiskResult<Self> {
        let path_ref = path.as_ref();
        let path_str = path_ref.display().to_string();
        let file = File::open(path_ref).map_err(|e| DiskError::io(path_str.clone(), e))?;
        let size = file
            .metadata()
            .map_err(|e| DiskError::io(path_str.clone(), e))?
            .len();
        Ok(FileByteSource {
            path: path_str,
            file,
            size,
        })
    }
}

#[async_trait]
impl ByteSource for FileByteSource {
    async fn read(&mut self, n: usize) -> DiskResult<Vec<u8>> {
        let pos = self
            .file
            .stream_position()
            .map_err(|e| DiskError::io(self.path.clone(), e))?;
        if pos >= self.size && n > 0 {
            return Err(DiskError::eof(self.path.clone()));
        }
        let mut buf = vec![0u8; n];
        let mut read_total = 0usize;
        while read_total < n {
            let got = self
                .file
                .read(&mut buf[read_total..])
                .map_err(|e| DiskError::io(self.path.clone(), e))?;
            if got == 0 {
                break;
            }
            read_total += got;
        }
        buf.truncate(read_total);
        Ok(buf)
    }

    async fn seek(&mut self, offset: i64, whence: Whence) -> DiskResult<u64> {
        let from = match whence {
            Whence::Start => SeekFrom::Start(offset.max(0) as u64),
            Whence::Current => SeekFrom::Current(offset),
            Whence::End => SeekFrom::End(offset),
        };
        self.file
            .seek(from)
            .map_err(|e| DiskError::io(self.path.clone(), e))
    }

    async fn tell(&mut self) -> DiskResult<u64> {
        self.file
            .stream_position()
            .map_err(|e| DiskError::io(self.path.clone(), e))
    }

    async fn size(&mut self) -> DiskResult<u64> {
        Ok(self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn reads_whole_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"hello world").unwrap();
        let mut src = FileByteSource::open(tmp.path()).unwrap();
        assert_eq!(src.size().await.unwrap(), 11);
        let data = src.read_at(0, 11).await.unwrap();
        assert_eq!(data, b"hello world");
    }

    #[tokio::test]
    async fn read_past_eof_errors() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"abc").unwrap();
        let mut src = FileByteSource::open(tmp.path()).unwrap();
        let err = src.read_at(10, 4).await.unwrap_err();
        assert!(matches!(err, DiskError::Eof { .. }));
    }

    #[tokio::test]
    async fn short_read_near_eof_truncates() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"abcde").unwrap();
        let mut src = FileByteSource::open(tmp.path()).unwrap();
        let data = src.read_at(2, 10).await.unwrap();
        assert_eq!(data, b"cde");
    }
}
