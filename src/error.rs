//! Error taxonomy for the I/O engine.
//!
//! Mirrors the five error kinds of the block-I/O contract: a caller mistake
//! (`InvalidArgument`), a failed transfer (`Io`), a short read past the end
//! of a file (`Eof`), a bad or unsupported backend configuration
//! (`Configuration`), and an internal double-completion or similar
//! impossible state (`Bug`), which production code should never construct
//! but which this type still names so tests can assert on it.

use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, IoError>;

#[derive(Debug, thiserror::Error)]
pub enum IoError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("short read: expected {expected} bytes at offset {offset}, got {actual}")]
    Eof {
        offset: u64,
        expected: usize,
        actual: usize,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal bug: {0}")]
    Bug(String),
}

impl IoError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        IoError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<io::Error> for IoError {
    fn from(source: io::Error) -> Self {
        IoError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}
