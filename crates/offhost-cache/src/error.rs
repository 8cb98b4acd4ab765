//! Error types for the disk cache

use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum CacheError {
    Io(std::io::Error),
    /// Copying a source file into the cache failed
    Copy {
        source: PathBuf,
        error: std::io::Error,
    },
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Io(err) => write!(f, "IO error: {}", err),
            CacheError::Copy { source, error } => {
                write!(f, "Failed to copy {} into cache: {}", source.display(), error)
            }
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Io(err) => Some(err),
            CacheError::Copy { error, .. } => Some(error),
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(err)
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
