//! AWS Signature Version 4 request signing
//!
//! Requests are path-style (`/{bucket}/{key}`) with an empty query string, so
//! the canonical request only varies by method, URI, headers and payload hash.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::btree_map::{self, BTreeMap};

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";
const SCOPE_TERMINATOR: &str = "aws4_request";

/// Hex SHA-256 of an empty payload
pub const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

const CONTENT_SHA256_HEADER: &str = "x-amz-content-sha256";

type HmacSha256 = Hmac<Sha256>;

/// Request headers keyed by lowercase name, iterated in signing order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet(BTreeMap<String, String>);

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a header; the name is stored lowercased
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Signs requests for one set of credentials against one endpoint host
#[derive(Clone)]
pub struct RequestSigner {
    access_key: String,
    secret_key: String,
    region: String,
    /// Value of the `host` header, including a non-default port
    host: String,
}

impl RequestSigner {
    pub fn new(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        region: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            region: region.into(),
            host: host.into(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Sign a request at the current time
    ///
    /// Adds `host` and `x-amz-date` to `headers` and returns the value for the
    /// `Authorization` header.
    pub fn sign(&self, method: &str, bucket: &str, key: &str, headers: &mut HeaderSet) -> String {
        self.sign_at(method, bucket, key, headers, Utc::now())
    }

    /// Sign a request as of `now`
    pub fn sign_at(
        &self,
        method: &str,
        bucket: &str,
        key: &str,
        headers: &mut HeaderSet,
        now: DateTime<Utc>,
    ) -> String {
        let timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();
        headers.insert("host", self.host.clone());
        headers.insert("x-amz-date", timestamp.clone());

        let uri = format!("/{}/{}", bucket, key.trim_start_matches('/'));
        self.authorization(method, &uri, headers, &timestamp)
    }

    fn authorization(&self, method: &str, uri: &str, headers: &HeaderSet, timestamp: &str) -> String {
        let date = &timestamp[..8];
        let scope = format!("{}/{}/{}/{}", date, self.region, SERVICE, SCOPE_TERMINATOR);
        let (signed_headers, signature) = self.signature(method, uri, headers, timestamp, &scope);

        format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, self.access_key, scope, signed_headers, signature
        )
    }

    /// Returns (signed headers list, hex signature)
    fn signature(
        &self,
        method: &str,
        uri: &str,
        headers: &HeaderSet,
        timestamp: &str,
        scope: &str,
    ) -> (String, String) {
        let (canonical_request, signed_headers) = canonical_request(method, uri, headers);

        let string_to_sign = [
            ALGORITHM,
            timestamp,
            scope,
            &hex::encode(Sha256::digest(canonical_request.as_bytes())),
        ]
        .join("\n");

        let key = signing_key(&self.secret_key, &timestamp[..8], &self.region, SERVICE);
        let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes()));

        (signed_headers, signature)
    }
}

/// Build the canonical request and the `;`-joined signed header list
fn canonical_request(method: &str, uri: &str, headers: &HeaderSet) -> (String, String) {
    let mut canonical_headers = String::new();
    let mut signed_headers = Vec::with_capacity(headers.len());

    for (name, value) in headers.iter() {
        canonical_headers.push_str(name);
        canonical_headers.push(':');
        canonical_headers.push_str(value.trim());
        canonical_headers.push('\n');
        signed_headers.push(name.as_str());
    }
    let signed_headers = signed_headers.join(";");

    let payload_hash = headers
        .get(CONTENT_SHA256_HEADER)
        .unwrap_or(EMPTY_PAYLOAD_SHA256);

    let request = [
        method,
        uri,
        "",
        &canonical_headers,
        &signed_headers,
        payload_hash,
    ]
    .join("\n");

    (request, signed_headers)
}

/// Derive the per-day signing key: HMAC chain over date, region, service and terminator
fn signing_key(secret_key: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{}", secret_key).as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, SCOPE_TERMINATOR.as_bytes())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}
