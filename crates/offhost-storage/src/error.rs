//! Error types for the storage façade

use std::fmt;

#[derive(Debug)]
pub enum StorageError {
    Config(String),
    InvalidHash(offhost_cache::HashError),
    Transport(s3_object_client::S3Error),
    Cache(offhost_cache::CacheError),
    Io(Box<std::io::Error>),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Config(msg) => write!(f, "Configuration error: {}", msg),
            StorageError::InvalidHash(err) => write!(f, "Invalid content hash: {}", err),
            StorageError::Transport(err) => write!(f, "Transport error: {}", err),
            StorageError::Cache(err) => write!(f, "Cache error: {}", err),
            StorageError::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::InvalidHash(err) => Some(err),
            StorageError::Transport(err) => Some(err),
            StorageError::Cache(err) => Some(err),
            StorageError::Io(err) => Some(err.as_ref()),
            StorageError::Config(_) => None,
        }
    }
}

impl From<offhost_cache::HashError> for StorageError {
    fn from(err: offhost_cache::HashError) -> Self {
        StorageError::InvalidHash(err)
    }
}

impl From<s3_object_client::S3Error> for StorageError {
    fn from(err: s3_object_client::S3Error) -> Self {
        match err {
            s3_object_client::S3Error::Config(msg) => StorageError::Config(msg),
            other => StorageError::Transport(other),
        }
    }
}

impl From<offhost_cache::CacheError> for StorageError {
    fn from(err: offhost_cache::CacheError) -> Self {
        StorageError::Cache(err)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(Box::new(err))
    }
}

impl From<tracing_subscriber::filter::ParseError> for StorageError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        StorageError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
