//! Error types for the S3 object client

use std::fmt;

#[derive(Debug)]
pub enum S3Error {
    /// Missing or malformed endpoint/credential settings
    Config(String),
    /// Network-level failure (connect, timeout, body read)
    Http(Box<reqwest::Error>),
    Io(Box<std::io::Error>),
    /// The store answered with a non-2xx status
    Status {
        status: u16,
        body: String,
        /// Effective URL after redirects, when known
        url: Option<String>,
    },
}

impl S3Error {
    /// HTTP status of a rejected request
    pub fn status(&self) -> Option<u16> {
        match self {
            S3Error::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl fmt::Display for S3Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            S3Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            S3Error::Http(err) => write!(f, "HTTP error: {}", err),
            S3Error::Io(err) => write!(f, "IO error: {}", err),
            S3Error::Status { status, body, url } => {
                write!(f, "S3 returned status {}", status)?;
                if let Some(url) = url {
                    write!(f, " for {}", url)?;
                }
                if !body.is_empty() {
                    write!(f, ": {}", body)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for S3Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            S3Error::Http(err) => Some(err.as_ref()),
            S3Error::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for S3Error {
    fn from(err: reqwest::Error) -> Self {
        S3Error::Http(Box::new(err))
    }
}

impl From<std::io::Error> for S3Error {
    fn from(err: std::io::Error) -> Self {
        S3Error::Io(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, S3Error>;
