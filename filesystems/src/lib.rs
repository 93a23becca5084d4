//! Read-only forensic access to Windows disk images without mounting them
//! through the host operating system.
//!
//! The crate is organised as the five-layer stack described by the design:
//! a [`rdimg_core::ByteSource`] is wrapped by a [`vhdx`] disk translator (or
//! read raw), partitions are located by [`partition`], sector/cluster
//! caching is provided by [`volume`], and file-level semantics are
//! implemented by [`ntfs`].

pub mod partition;
pub mod raw;
pub mod vhdx;
pub mod volume;

pub mod ntfs;

pub use partition::{Partition, PartitionFinder};
pub use raw::RawDiskTranslator;
pub use vhdx::VhdxDiskTranslator;
pub use volume::VolumeReader;

pub use ntfs::engine::NtfsEngine;
pub use ntfs::file::{FileHandle, FileStat};

/// Disk-layer LBAs are always 512 bytes, independent of NTFS's own
/// `bytes_per_sector` (which is read from the boot sector and may differ).
pub const LBA_SIZE: u64 = 512;

/// Maps logical block addresses to bytes of the underlying image. Implemented
/// by [`RawDiskTranslator`] for pass-through images and [`VhdxDiskTranslator`]
/// for dynamic/sparse VHDX images.
#[async_trait::async_trait]
pub trait DiskTranslator: Send {
    async fn read_lba(&mut self, lba: u64) -> rdimg_core::DiskResult<Vec<u8>>;
    async fn read_lbas(&mut self, lbas: &[u64]) -> rdimg_core::DiskResult<Vec<u8>>;
    async fn lba_count(&mut self) -> rdimg_core::DiskResult<u64>;
}
