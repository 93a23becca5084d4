pub mod bytesource;
pub mod error;
pub mod file_source;

pub use bytesource::{ByteSource, Whence};
pub use error::{DiskError, DiskResult};
pub use file_source::FileByteSource;
