//! Object transport for S3-compatible stores

use crate::error::{Result, S3Error};
use crate::signer::{HeaderSet, RequestSigner, EMPTY_PAYLOAD_SHA256};
use crate::types::S3ClientConfig;
use base64::Engine;
use md5::Md5;
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, RequestBuilder, Response, Url};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

/// Timeouts for PUT/GET/DELETE
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Timeouts for HEAD, which gates quick existence checks
const HEAD_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const HEAD_REQUEST_TIMEOUT: Duration = Duration::from_secs(8);

const MAX_REDIRECTS: usize = 10;
const UPLOAD_CONTENT_TYPE: &str = "application/octet-stream";
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Size and digests of a file about to be uploaded
struct PayloadDigest {
    size: u64,
    md5_base64: String,
    sha256_hex: String,
}

impl PayloadDigest {
    async fn of_file(path: &Path) -> Result<Self> {
        let mut file = fs::File::open(path).await?;
        let mut md5 = Md5::new();
        let mut sha256 = Sha256::new();
        let mut size = 0u64;
        let mut buf = vec![0u8; READ_CHUNK_SIZE];

        loop {
            let read = file.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            md5.update(&buf[..read]);
            sha256.update(&buf[..read]);
            size += read as u64;
        }

        Ok(Self {
            size,
            md5_base64: base64::engine::general_purpose::STANDARD.encode(md5.finalize()),
            sha256_hex: hex::encode(sha256.finalize()),
        })
    }
}

/// HTTP client for single-object operations against one S3-compatible endpoint
pub struct S3Client {
    http: reqwest::Client,
    head_http: reqwest::Client,
    /// `scheme://host[:port]` the object paths are appended to
    base_url: String,
    signer: RequestSigner,
}

impl S3Client {
    /// Create a client, rejecting missing credentials or an unparseable endpoint
    pub fn new(config: S3ClientConfig) -> Result<Self> {
        let required = [
            ("endpoint", &config.endpoint),
            ("region", &config.region),
            ("access key", &config.access_key),
            ("secret key", &config.secret_key),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(S3Error::Config(format!("missing {}", name)));
            }
        }

        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| S3Error::Config(format!("invalid endpoint {}: {}", config.endpoint, e)))?;
        let host = endpoint
            .host_str()
            .ok_or_else(|| S3Error::Config(format!("endpoint has no host: {}", config.endpoint)))?;
        // Url::port() is None for the scheme's default port, which is also omitted from Host
        let host = match endpoint.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        Ok(Self {
            http: build_http(CONNECT_TIMEOUT, REQUEST_TIMEOUT)?,
            head_http: build_http(HEAD_CONNECT_TIMEOUT, HEAD_REQUEST_TIMEOUT)?,
            base_url: format!("{}://{}", endpoint.scheme(), host),
            signer: RequestSigner::new(
                config.access_key,
                config.secret_key,
                config.region,
                host,
            ),
        })
    }

    /// URL for an object, path-style
    pub fn object_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/{}/{}", self.base_url, bucket, key.trim_start_matches('/'))
    }

    /// Upload a local file to `bucket/key`
    pub async fn put(&self, bucket: &str, key: &str, path: &Path) -> Result<()> {
        let digest = PayloadDigest::of_file(path).await?;

        let mut headers = HeaderSet::new();
        headers.insert("content-type", UPLOAD_CONTENT_TYPE);
        headers.insert("content-length", digest.size.to_string());
        headers.insert("content-md5", digest.md5_base64);
        headers.insert("x-amz-content-sha256", digest.sha256_hex);
        let authorization = self.signer.sign("PUT", bucket, key, &mut headers);

        let file = fs::File::open(path).await?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let url = self.object_url(bucket, key);
        debug!(url = %url, size = digest.size, "Uploading object");

        let response = signed(&self.http, Method::PUT, &url, &headers, &authorization)
            .body(body)
            .send()
            .await?;

        ensure_success(response, false).await?;
        debug!(url = %url, "Uploaded object");
        Ok(())
    }

    /// Download `bucket/key` into a local file, streaming the body
    ///
    /// The destination is deleted again if the request fails.
    pub async fn get(&self, bucket: &str, key: &str, path: &Path) -> Result<()> {
        let mut file = fs::File::create(path).await?;
        let result = self.download(bucket, key, &mut file).await;
        drop(file);

        if let Err(e) = &result {
            warn!(bucket, key, error = %e, "Download failed, removing partial file");
            let _ = fs::remove_file(path).await;
        }
        result
    }

    async fn download(&self, bucket: &str, key: &str, file: &mut fs::File) -> Result<()> {
        let mut headers = empty_payload_headers();
        let authorization = self.signer.sign("GET", bucket, key, &mut headers);
        let url = self.object_url(bucket, key);
        debug!(url = %url, "Downloading object");

        let response = signed(&self.http, Method::GET, &url, &headers, &authorization)
            .send()
            .await?;
        let mut response = ensure_success(response, true).await?;

        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        debug!(url = %url, size = written, "Downloaded object");
        Ok(())
    }

    /// Check whether `bucket/key` exists
    ///
    /// Any failure, including an unreachable endpoint, reads as "does not exist".
    pub async fn head(&self, bucket: &str, key: &str) -> bool {
        let mut headers = empty_payload_headers();
        let authorization = self.signer.sign("HEAD", bucket, key, &mut headers);
        let url = self.object_url(bucket, key);

        match signed(&self.head_http, Method::HEAD, &url, &headers, &authorization)
            .send()
            .await
        {
            Ok(response) => {
                let exists = response.status().is_success();
                debug!(url = %url, status = %response.status(), exists, "HEAD object");
                exists
            }
            Err(e) => {
                debug!(url = %url, error = %e, "HEAD object failed");
                false
            }
        }
    }

    /// Delete `bucket/key`
    pub async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        let mut headers = empty_payload_headers();
        let authorization = self.signer.sign("DELETE", bucket, key, &mut headers);
        let url = self.object_url(bucket, key);
        debug!(url = %url, "Deleting object");

        let response = signed(&self.http, Method::DELETE, &url, &headers, &authorization)
            .send()
            .await?;
        ensure_success(response, false).await?;
        Ok(())
    }
}

fn build_http(connect_timeout: Duration, timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(timeout)
        .http1_only()
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .build()
        .map_err(S3Error::from)
}

fn empty_payload_headers() -> HeaderSet {
    let mut headers = HeaderSet::new();
    headers.insert("x-amz-content-sha256", EMPTY_PAYLOAD_SHA256);
    headers
}

/// Attach the signed header set and authorization to a request
fn signed(
    client: &reqwest::Client,
    method: Method,
    url: &str,
    headers: &HeaderSet,
    authorization: &str,
) -> RequestBuilder {
    let mut builder = client.request(method, url);
    for (name, value) in headers.iter() {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder.header(AUTHORIZATION, authorization)
}

/// Pass 2xx responses through; turn anything else into `S3Error::Status`
async fn ensure_success(response: Response, with_url: bool) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = with_url.then(|| response.url().to_string());
    let body = response.text().await.unwrap_or_default();
    warn!(status = %status, url = ?url, "S3 request rejected");

    Err(S3Error::Status {
        status: status.as_u16(),
        body,
        url,
    })
}
