//! Storage configuration from environment variables or a TOML file
//!
//! Environment variables:
//! - `OFFHOST_ACCESS_KEY`, `OFFHOST_SECRET_KEY`: credentials (required)
//! - `OFFHOST_BUCKET`: target bucket (required)
//! - `OFFHOST_ENDPOINT`: base URL of the S3-compatible store (required)
//! - `OFFHOST_REGION`: signing region (default `us-east-1`)
//! - `OFFHOST_CDN_ENDPOINT`: optional CDN base URL, recorded but not used for reads
//! - `OFFHOST_CACHE_DIR`: cache root (default `./cache/objects`)
//! - `OFFHOST_MAX_CACHE_SIZE`: cache budget in bytes (default 1 GiB)
//! - `OFFHOST_EVICTION_HEADROOM`: eviction target as a fraction of the budget (default 0.8)

use crate::error::{Result, StorageError};
use offhost_cache::DEFAULT_HEADROOM;
use s3_object_client::S3ClientConfig;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_CACHE_DIR: &str = "./cache/objects";
const DEFAULT_MAX_CACHE_SIZE: u64 = 1024 * 1024 * 1024; // 1GB

/// Settings for the remote store and the local cache
#[derive(Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint: String,
    /// Public CDN base URL; reads always go through the signed endpoint
    #[serde(default)]
    pub cdn_endpoint: Option<String>,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_max_cache_size")]
    pub max_cache_size: u64,
    #[serde(default = "default_headroom")]
    pub eviction_headroom: f64,
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CACHE_DIR)
}

fn default_max_cache_size() -> u64 {
    DEFAULT_MAX_CACHE_SIZE
}

fn default_headroom() -> f64 {
    DEFAULT_HEADROOM
}

impl StorageConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let max_cache_size = match lookup("OFFHOST_MAX_CACHE_SIZE") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| {
                StorageError::Config(format!("invalid OFFHOST_MAX_CACHE_SIZE {:?}: {}", raw, e))
            })?,
            None => DEFAULT_MAX_CACHE_SIZE,
        };

        let eviction_headroom = match lookup("OFFHOST_EVICTION_HEADROOM") {
            Some(raw) => raw.trim().parse::<f64>().map_err(|e| {
                StorageError::Config(format!(
                    "invalid OFFHOST_EVICTION_HEADROOM {:?}: {}",
                    raw, e
                ))
            })?,
            None => DEFAULT_HEADROOM,
        };

        Ok(Self {
            access_key: lookup("OFFHOST_ACCESS_KEY").unwrap_or_default(),
            secret_key: lookup("OFFHOST_SECRET_KEY").unwrap_or_default(),
            bucket: lookup("OFFHOST_BUCKET").unwrap_or_default(),
            region: lookup("OFFHOST_REGION").unwrap_or_else(default_region),
            endpoint: lookup("OFFHOST_ENDPOINT").unwrap_or_default(),
            cdn_endpoint: lookup("OFFHOST_CDN_ENDPOINT").filter(|v| !v.is_empty()),
            cache_dir: lookup("OFFHOST_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_cache_dir),
            max_cache_size,
            eviction_headroom,
        })
    }

    /// Load configuration from the `[offhost]` table of a TOML file
    ///
    /// ```toml
    /// [offhost]
    /// access_key = "AKID"
    /// secret_key = "..."
    /// bucket = "files"
    /// endpoint = "https://s3.eu-west-1.amazonaws.com"
    /// region = "eu-west-1"
    /// cache_dir = "/var/cache/offhost"
    /// max_cache_size = 10737418240
    /// ```
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            StorageError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    fn from_toml_str(contents: &str) -> Result<Self> {
        let table: toml::Table = contents
            .parse()
            .map_err(|e| StorageError::Config(format!("failed to parse TOML: {}", e)))?;

        let section = table
            .get("offhost")
            .cloned()
            .ok_or_else(|| StorageError::Config("missing [offhost] section".to_string()))?;

        section
            .try_into()
            .map_err(|e| StorageError::Config(format!("invalid [offhost] section: {}", e)))
    }

    /// Check that every required value is present and the cache policy is sane
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("access_key", &self.access_key),
            ("secret_key", &self.secret_key),
            ("bucket", &self.bucket),
            ("region", &self.region),
            ("endpoint", &self.endpoint),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if !missing.is_empty() {
            return Err(StorageError::Config(format!(
                "missing required settings: {}",
                missing.join(", ")
            )));
        }

        self.validate_cache_policy()
    }

    /// Check the cache budget and eviction headroom alone
    ///
    /// Local cache maintenance needs no credentials, only a sane policy.
    pub fn validate_cache_policy(&self) -> Result<()> {
        if self.max_cache_size == 0 {
            return Err(StorageError::Config(
                "max_cache_size must be greater than zero".to_string(),
            ));
        }

        if !(self.eviction_headroom > 0.0 && self.eviction_headroom <= 1.0) {
            return Err(StorageError::Config(format!(
                "eviction_headroom must be in (0, 1], got {}",
                self.eviction_headroom
            )));
        }

        Ok(())
    }

    /// Connection settings for the object client
    pub fn client_config(&self) -> S3ClientConfig {
        S3ClientConfig {
            endpoint: self.endpoint.clone(),
            region: self.region.clone(),
            access_key: self.access_key.clone(),
            secret_key: self.secret_key.clone(),
        }
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("cdn_endpoint", &self.cdn_endpoint)
            .field("cache_dir", &self.cache_dir)
            .field("max_cache_size", &self.max_cache_size)
            .field("eviction_headroom", &self.eviction_headroom)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    fn complete_vars() -> Vec<(&'static str, &'static str)> {
        vec![
            ("OFFHOST_ACCESS_KEY", "AKID"),
            ("OFFHOST_SECRET_KEY", "secret"),
            ("OFFHOST_BUCKET", "files"),
            ("OFFHOST_ENDPOINT", "https://s3.example.com"),
        ]
    }

    #[test]
    fn test_from_lookup_applies_defaults() {
        let config = StorageConfig::from_lookup(lookup_from(&complete_vars())).unwrap();
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.cache_dir, PathBuf::from("./cache/objects"));
        assert_eq!(config.max_cache_size, 1024 * 1024 * 1024);
        assert_eq!(config.eviction_headroom, 0.8);
        assert!(config.cdn_endpoint.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_from_lookup_reads_overrides() {
        let mut vars = complete_vars();
        vars.push(("OFFHOST_REGION", "eu-west-1"));
        vars.push(("OFFHOST_CACHE_DIR", "/var/cache/offhost"));
        vars.push(("OFFHOST_MAX_CACHE_SIZE", "4096"));
        vars.push(("OFFHOST_EVICTION_HEADROOM", "0.5"));
        vars.push(("OFFHOST_CDN_ENDPOINT", "https://cdn.example.com"));

        let config = StorageConfig::from_lookup(lookup_from(&vars)).unwrap();
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.cache_dir, PathBuf::from("/var/cache/offhost"));
        assert_eq!(config.max_cache_size, 4096);
        assert_eq!(config.eviction_headroom, 0.5);
        assert_eq!(config.cdn_endpoint.as_deref(), Some("https://cdn.example.com"));
    }

    #[test]
    fn test_from_lookup_rejects_bad_size() {
        let mut vars = complete_vars();
        vars.push(("OFFHOST_MAX_CACHE_SIZE", "lots"));
        let result = StorageConfig::from_lookup(lookup_from(&vars));
        assert!(matches!(result, Err(StorageError::Config(_))));
    }

    #[test]
    fn test_validate_lists_missing_settings() {
        let config = StorageConfig::from_lookup(lookup_from(&[])).unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("access_key"));
        assert!(err.contains("secret_key"));
        assert!(err.contains("bucket"));
        assert!(err.contains("endpoint"));
        assert!(!err.contains("region"));
    }

    #[test]
    fn test_validate_rejects_headroom_out_of_range() {
        let mut config = StorageConfig::from_lookup(lookup_from(&complete_vars())).unwrap();
        config.eviction_headroom = 1.5;
        assert!(config.validate().is_err());
        config.eviction_headroom = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cache_policy_check_ignores_credentials() {
        let mut config = StorageConfig::from_lookup(lookup_from(&[])).unwrap();
        config.validate_cache_policy().unwrap();

        config.eviction_headroom = 5.0;
        let err = config.validate_cache_policy().unwrap_err().to_string();
        assert!(err.contains("eviction_headroom"));
    }

    #[test]
    fn test_from_toml_section() {
        let config = StorageConfig::from_toml_str(
            r#"
            [offhost]
            access_key = "AKID"
            secret_key = "secret"
            bucket = "files"
            endpoint = "http://localhost:9000"
            max_cache_size = 1000
            "#,
        )
        .unwrap();

        assert_eq!(config.bucket, "files");
        assert_eq!(config.max_cache_size, 1000);
        assert_eq!(config.region, "us-east-1");
        config.validate().unwrap();
    }

    #[test]
    fn test_from_toml_requires_section() {
        let result = StorageConfig::from_toml_str("[other]\nkey = 1\n");
        assert!(matches!(result, Err(StorageError::Config(msg)) if msg.contains("[offhost]")));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = StorageConfig::from_lookup(lookup_from(&complete_vars())).unwrap();
        let debug_str = format!("{:?}", config);
        assert!(!debug_str.contains("\"secret\""));
        assert!(debug_str.contains("<redacted>"));
    }
}
