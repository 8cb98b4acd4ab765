//! Client configuration

use std::fmt;

/// Endpoint and credentials for an S3-compatible store
#[derive(Clone)]
pub struct S3ClientConfig {
    /// Base URL, e.g. `https://s3.eu-west-1.amazonaws.com`
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
}

impl fmt::Debug for S3ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3ClientConfig")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}
