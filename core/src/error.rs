use thiserror::Error;

/// Error taxonomy for the disk-image stack.
///
/// Every variant carries enough context (path, record number, attribute
/// type, ...) for a caller to understand what was being read when the
/// error occurred. The engine never panics on malformed disk data -- a
/// panic here means an internal invariant was violated, i.e. a bug.
#[derive(Debug, Error)]
pub enum DiskError {
    #[error("I/O error reading {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("read past end of image at {context}")]
    Eof { context: String },

    #[error("corrupt image: {0}")]
    CorruptImage(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("not a file: {0}")]
    NotAFile(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("handle already closed: {0}")]
    Closed(String),
}

impl DiskError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        DiskError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn eof(context: impl Into<String>) -> Self {
        DiskError::Eof {
            context: context.into(),
        }
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        DiskError::CorruptImage(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        DiskError::Unsupported(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        DiskError::InvalidArgument(msg.into())
    }
}

pub type DiskResult<T> = Result<T, DiskError>;
