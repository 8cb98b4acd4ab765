//! S3-compatible object transport
//!
//! Issues path-style PUT/GET/HEAD/DELETE requests authenticated with
//! Signature Version 4. Only single-object operations are supported; there is
//! no listing, multipart upload or presigning.

pub mod client;
pub mod error;
pub mod signer;
pub mod types;

pub use client::S3Client;
pub use error::{Result, S3Error};
pub use signer::{HeaderSet, RequestSigner, EMPTY_PAYLOAD_SHA256};
pub use types::S3ClientConfig;
