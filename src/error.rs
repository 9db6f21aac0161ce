//! Error taxonomy for the engine.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while driving a volume.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed path, disallowed character in a segment, or a segment
    /// whose length falls outside `1..=255`.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The target file or directory does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A name (case-insensitive) collides with a live directory entry.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A directory was expected where a file was found, or vice versa.
    #[error("wrong kind: {0}")]
    WrongKind(String),

    /// Block or node allocation could not satisfy the request.
    #[error("disk full")]
    DiskFull,

    /// A file's growth would exceed `D + P + P^2` blocks.
    #[error("maximum file size exceeded")]
    MaxFileSize,

    /// A node lock could not be acquired within the configured timeout.
    #[error("lock timeout")]
    LockTimeout,

    /// An on-disk structure is internally inconsistent.
    #[error("corruption: {0}")]
    Corruption(String),

    /// The backing store rejected a read or write.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation attempted on a disposed file, node, or volume.
    #[error("closed")]
    Closed,
}
