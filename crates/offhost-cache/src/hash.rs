//! SHA-1 content hashes used as cache and object keys

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tokio::io::AsyncReadExt;

/// Length of a hex-encoded SHA-1 digest
pub const HASH_LEN: usize = 40;

/// A lowercase hex SHA-1 digest identifying file content
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

/// Errors from parsing a content hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    InvalidLength(usize),
    InvalidHex,
}

impl fmt::Display for HashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLength(len) => {
                write!(f, "Invalid hash length: expected {HASH_LEN} hex chars, got {len}")
            }
            Self::InvalidHex => write!(f, "Invalid hex character in hash"),
        }
    }
}

impl std::error::Error for HashError {}

impl ContentHash {
    /// Hash an in-memory buffer
    pub fn of_bytes(data: &[u8]) -> Self {
        Self(hex::encode(Sha1::digest(data)))
    }

    /// Hash a file on disk without loading it whole
    pub async fn of_file(path: &Path) -> std::io::Result<Self> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut hasher = Sha1::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let read = file.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
        }
        Ok(Self(hex::encode(hasher.finalize())))
    }

    /// First shard directory (`h[0:2]`)
    pub fn shard1(&self) -> &str {
        &self.0[0..2]
    }

    /// Second shard directory (`h[2:4]`)
    pub fn shard2(&self) -> &str {
        &self.0[2..4]
    }

    /// Object key relative to the bucket: `{h[0:2]}/{h[2:4]}/{h}`
    pub fn object_key(&self) -> String {
        format!("{}/{}/{}", self.shard1(), self.shard2(), self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ContentHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != HASH_LEN {
            return Err(HashError::InvalidLength(s.len()));
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HashError::InvalidHex);
        }
        Ok(Self(s.to_ascii_lowercase()))
    }
}

impl TryFrom<String> for ContentHash {
    type Error = HashError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
