//! Error types for signing, diffing, applying and verifying.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors produced by the treepatch library.
#[derive(Error, Debug)]
pub enum Error {
    /// The file does not start with the magic number of the expected kind.
    #[error("invalid magic number: expected {expected:#010x}, found {found:#010x}")]
    InvalidMagic { expected: u32, found: u32 },

    /// The header could not be parsed or names an unknown setting.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// A varint, message or tagged value in the body could not be decoded.
    #[error("decode failed: {0}")]
    Decode(String),

    /// A message could not be serialized.
    #[error("encode failed: {0}")]
    Encode(#[source] bincode::Error),

    #[error("compression failed: {0}")]
    Compression(#[source] std::io::Error),

    #[error("decompression failed: {0}")]
    Decompression(#[source] std::io::Error),

    /// A declared but unsupported feature was selected (gzip, zstd, bsdiff).
    #[error("{0} is not implemented")]
    Unimplemented(&'static str),

    /// A filesystem operation failed.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A decoded file had no messages where at least one is required.
    #[error("no messages found in {0} body")]
    EmptyBody(&'static str),

    /// Sync operations arrived in an order the apply state machine rejects.
    #[error("sync operation out of sequence: {0}")]
    OutOfSequence(String),

    /// The patch references data that does not exist or does not fit.
    #[error("invalid patch: {0}")]
    InvalidPatch(String),

    /// A signature's block list does not line up with its container.
    #[error("signature has {actual} block hashes but its container needs {expected}")]
    BlockCountMismatch { expected: usize, actual: usize },

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for treepatch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Attach the offending path to an I/O failure.
pub trait PathContext<T> {
    fn with_path(self, path: &Path) -> Result<T>;
}

impl<T> PathContext<T> for std::io::Result<T> {
    fn with_path(self, path: &Path) -> Result<T> {
        self.map_err(|e| Error::io(path, e))
    }
}

impl<T> PathContext<T> for std::result::Result<T, walkdir::Error> {
    fn with_path(self, path: &Path) -> Result<T> {
        self.map_err(|e| {
            let at = e.path().map(Path::to_path_buf).unwrap_or_else(|| path.to_path_buf());
            Error::io(at, e.into())
        })
    }
}
