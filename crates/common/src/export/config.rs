use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use s3ns_store::{normalize_endpoint, ObjectStoreConfig, RetryPolicy};

use crate::error::ExportError;

pub const MAX_HOST_LEN: usize = 255;
pub const MAX_BUCKET_NAME_LEN: usize = 255;
pub const MAX_CREDENTIAL_LEN: usize = 128;

/// One bucket mount.
#[derive(Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Display name; defaults to the bucket name
    #[serde(default)]
    pub name: String,
    /// Store host, with or without a scheme (e.g. "localhost:9000")
    pub host: String,
    pub bucket_name: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Use https for a host given without a scheme
    #[serde(default)]
    pub use_https: bool,
    #[serde(flatten)]
    pub retry: RetryPolicy,
    /// Upper bound on keys read per directory listing; 0 is unbounded
    #[serde(default)]
    pub list_max_keys: u32,
    /// How long a confirmed miss is remembered; 0 disables the cache
    #[serde(default = "default_negative_ttl_secs")]
    pub negative_ttl_secs: u64,
}

fn default_negative_ttl_secs() -> u64 {
    10
}

impl fmt::Debug for ExportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportConfig")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("bucket_name", &self.bucket_name)
            .field("access_key_id", &"<redacted>")
            .field("secret_access_key", &"<redacted>")
            .field("region", &self.region)
            .field("use_https", &self.use_https)
            .field("retry", &self.retry)
            .field("list_max_keys", &self.list_max_keys)
            .field("negative_ttl_secs", &self.negative_ttl_secs)
            .finish()
    }
}

impl ExportConfig {
    pub fn new(
        host: impl Into<String>,
        bucket_name: impl Into<String>,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        Self {
            name: String::new(),
            host: host.into(),
            bucket_name: bucket_name.into(),
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            region: None,
            use_https: false,
            retry: RetryPolicy::default(),
            list_max_keys: 0,
            negative_ttl_secs: default_negative_ttl_secs(),
        }
    }

    /// The configured name, or the bucket name when none was given.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.bucket_name
        } else {
            &self.name
        }
    }

    pub fn negative_ttl(&self) -> Duration {
        Duration::from_secs(self.negative_ttl_secs)
    }

    /// Check every mandatory setting.
    pub fn validate(&self) -> Result<(), ExportError> {
        bounded("host", &self.host, MAX_HOST_LEN)?;
        bounded("bucket_name", &self.bucket_name, MAX_BUCKET_NAME_LEN)?;
        bounded("access_key_id", &self.access_key_id, MAX_CREDENTIAL_LEN)?;
        bounded("secret_access_key", &self.secret_access_key, MAX_CREDENTIAL_LEN)?;
        if self.bucket_name.contains('/') {
            return Err(ExportError::ConfigInvalid(format!(
                "bucket_name '{}' must not contain '/'",
                self.bucket_name
            )));
        }
        normalize_endpoint(&self.host, self.use_https)
            .map_err(|e| ExportError::ConfigInvalid(e.to_string()))?;
        Ok(())
    }

    /// Backend settings for the store client.
    pub fn store_config(&self) -> Result<ObjectStoreConfig, ExportError> {
        let endpoint = normalize_endpoint(&self.host, self.use_https)
            .map_err(|e| ExportError::ConfigInvalid(e.to_string()))?;
        Ok(ObjectStoreConfig::S3 {
            endpoint: endpoint.as_str().trim_end_matches('/').to_string(),
            access_key: self.access_key_id.clone(),
            secret_key: self.secret_access_key.clone(),
            bucket: self.bucket_name.clone(),
            region: self.region.clone(),
        })
    }
}

fn bounded(field: &str, value: &str, max: usize) -> Result<(), ExportError> {
    if value.trim().is_empty() {
        return Err(ExportError::ConfigInvalid(format!("{} is required", field)));
    }
    if value.len() > max {
        return Err(ExportError::ConfigInvalid(format!(
            "{} is {} bytes, limit is {}",
            field,
            value.len(),
            max
        )));
    }
    Ok(())
}
