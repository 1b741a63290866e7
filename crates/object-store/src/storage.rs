//! [`ObjectStoreClient`] backed by the `object_store` crate (S3/MinIO/memory).

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectMeta, ObjectStore, RetryConfig};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::client::{BucketStatus, ListEntry, ListRequest, ObjectStoreClient, Page};
use crate::error::{Result, StoreError};

const DEFAULT_REGION: &str = "us-east-1";
const MEMORY_BUCKET: &str = "memory";

/// Configuration for the object storage backend.
#[derive(Clone, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectStoreConfig {
    /// In-memory storage (for testing)
    #[default]
    Memory,

    /// S3-compatible storage (AWS S3, MinIO, etc.)
    S3 {
        /// S3 endpoint URL (e.g., "http://localhost:9000" for MinIO)
        endpoint: String,
        access_key: String,
        secret_key: String,
        bucket: String,
        /// Optional region (defaults to "us-east-1")
        region: Option<String>,
    },
}

impl fmt::Debug for ObjectStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectStoreConfig::Memory => f.write_str("Memory"),
            ObjectStoreConfig::S3 {
                endpoint,
                bucket,
                region,
                ..
            } => f
                .debug_struct("S3")
                .field("endpoint", endpoint)
                .field("bucket", bucket)
                .field("region", region)
                .field("access_key", &"<redacted>")
                .field("secret_key", &"<redacted>")
                .finish(),
        }
    }
}

/// Turn a configured host (`"minio:9000"`, `"https://s3.example.com"`) into an
/// endpoint URL. A bare host gets `https://` when `use_https` is set and
/// `http://` otherwise.
pub fn normalize_endpoint(host: &str, use_https: bool) -> Result<Url> {
    let host = host.trim();
    let candidate = if host.contains("://") {
        host.to_string()
    } else if use_https {
        format!("https://{}", host)
    } else {
        format!("http://{}", host)
    };

    let url = Url::parse(&candidate)
        .map_err(|e| StoreError::InvalidRequest(format!("invalid host '{}': {}", host, e)))?;
    if url.host_str().map_or(true, str::is_empty) {
        return Err(StoreError::InvalidRequest(format!(
            "host '{}' has no authority",
            host
        )));
    }
    Ok(url)
}

/// Wrapper around different object storage backends.
///
/// `object_store`'s own retry loop is disabled so that every failure
/// reaches the [`RetryingClient`](crate::RetryingClient) policy.
#[derive(Clone)]
pub struct Storage {
    inner: Arc<dyn ObjectStore>,
    bucket: String,
    region: Option<String>,
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .finish()
    }
}

impl Storage {
    /// Create a new storage backend from configuration.
    ///
    /// No request is made here; use [`ObjectStoreClient::probe_bucket`] to
    /// check the bucket.
    pub fn new(config: &ObjectStoreConfig) -> Result<Self> {
        match config {
            ObjectStoreConfig::Memory => Ok(Self::memory()),

            ObjectStoreConfig::S3 {
                endpoint,
                access_key,
                secret_key,
                bucket,
                region,
            } => {
                let region = region.as_deref().unwrap_or(DEFAULT_REGION);
                let builder = AmazonS3Builder::new()
                    .with_endpoint(endpoint)
                    .with_access_key_id(access_key)
                    .with_secret_access_key(secret_key)
                    .with_bucket_name(bucket)
                    .with_region(region)
                    .with_allow_http(endpoint.starts_with("http://"))
                    .with_retry(RetryConfig {
                        max_retries: 0,
                        ..Default::default()
                    });

                let store = builder
                    .build()
                    .map_err(|e| StoreError::InvalidRequest(e.to_string()))?;

                tracing::debug!(bucket = %bucket, endpoint = %endpoint, "s3 client initialized");

                Ok(Self {
                    inner: Arc::new(store),
                    bucket: bucket.clone(),
                    region: Some(region.to_string()),
                })
            }
        }
    }

    /// An empty in-memory bucket.
    pub fn memory() -> Self {
        Self::from_store(Arc::new(InMemory::new()), MEMORY_BUCKET)
    }

    /// Wrap an already constructed store.
    pub fn from_store(inner: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            inner,
            bucket: bucket.into(),
            region: None,
        }
    }

    /// Direct access to the underlying store (seeding, tests).
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.inner
    }

    fn map_error(&self, err: object_store::Error) -> StoreError {
        match err {
            object_store::Error::NotFound { path, .. } => {
                if path.is_empty() || path == self.bucket {
                    StoreError::NoSuchBucket(self.bucket.clone())
                } else {
                    StoreError::NotFound(path)
                }
            }
            object_store::Error::InvalidPath { source } => {
                StoreError::InvalidRequest(source.to_string())
            }
            e @ (object_store::Error::NotSupported { .. }
            | object_store::Error::NotImplemented
            | object_store::Error::UnknownConfigurationKey { .. }) => {
                StoreError::InvalidRequest(e.to_string())
            }
            e => classify_message(&self.bucket, e.to_string()),
        }
    }

    async fn list_delimited(&self, request: &ListRequest) -> Result<Page> {
        let prefix = ObjectPath::from(request.prefix_str());
        let prefix = (!prefix.as_ref().is_empty()).then_some(prefix);
        let delimiter = request.delimiter.as_deref().unwrap_or("/");

        let listing = self
            .inner
            .list_with_delimiter(prefix.as_ref())
            .await
            .map_err(|e| self.map_error(e))?;

        // Merge both kinds into one key-ordered stream so the page can be cut
        // at any marker.
        let mut keyed: Vec<(String, Option<ObjectMeta>)> = listing
            .common_prefixes
            .into_iter()
            .map(|p| (format!("{}{}", p.as_ref(), delimiter), None))
            .chain(
                listing
                    .objects
                    .into_iter()
                    .map(|m| (m.location.to_string(), Some(m))),
            )
            .filter(|(key, _)| match request.marker.as_deref() {
                Some(marker) => key.as_str() > marker,
                None => true,
            })
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));

        let limit = page_limit(request.max_keys, keyed.len());
        let is_truncated = keyed.len() > limit;
        keyed.truncate(limit);

        let next_marker = if is_truncated {
            keyed.last().map(|(key, _)| key.clone())
        } else {
            None
        };

        let mut page = Page {
            is_truncated,
            next_marker,
            ..Default::default()
        };
        for (key, meta) in keyed {
            match meta {
                Some(meta) => page.entries.push(to_entry(meta)),
                None => page.common_prefixes.push(key),
            }
        }
        Ok(page)
    }

    async fn list_flat(&self, request: &ListRequest) -> Result<Page> {
        let prefix = ObjectPath::from(request.prefix_str());
        let prefix = (!prefix.as_ref().is_empty()).then_some(prefix);

        let stream = match request.marker.as_deref() {
            Some(marker) => self
                .inner
                .list_with_offset(prefix.as_ref(), &ObjectPath::from(marker)),
            None => self.inner.list(prefix.as_ref()),
        };

        let mut metas: Vec<ObjectMeta> = stream.try_collect().await.map_err(|e| self.map_error(e))?;
        metas.sort_by(|a, b| a.location.cmp(&b.location));

        let limit = page_limit(request.max_keys, metas.len());
        let is_truncated = metas.len() > limit;
        metas.truncate(limit);

        // Flat listings leave the marker to the caller, like S3 v1 without a
        // delimiter.
        Ok(Page {
            entries: metas.into_iter().map(to_entry).collect(),
            common_prefixes: Vec::new(),
            is_truncated,
            next_marker: None,
        })
    }
}

#[async_trait]
impl ObjectStoreClient for Storage {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list_page(&self, request: &ListRequest) -> Result<Page> {
        if request.delimiter.is_some() {
            self.list_delimited(request).await
        } else {
            self.list_flat(request).await
        }
    }

    async fn probe_bucket(&self) -> Result<BucketStatus> {
        let mut stream = self.inner.list(None);
        match stream.try_next().await {
            Ok(_) => Ok(BucketStatus::Exists {
                location: self.region.clone(),
            }),
            Err(e) => match self.map_error(e) {
                StoreError::NoSuchBucket(_) => Ok(BucketStatus::DoesNotExist),
                StoreError::AccessDenied(_) => Ok(BucketStatus::AccessDenied),
                other => Err(other),
            },
        }
    }
}

fn page_limit(max_keys: u32, available: usize) -> usize {
    if max_keys == 0 {
        available
    } else {
        max_keys as usize
    }
}

fn to_entry(meta: ObjectMeta) -> ListEntry {
    ListEntry {
        key: meta.location.to_string(),
        size: meta.size as u64,
        last_modified: meta.last_modified,
        etag: meta.e_tag,
    }
}

const NETWORK_PHRASES: &[&str] = &[
    "error sending request",
    "connection reset",
    "connection refused",
    "connection closed",
    "broken pipe",
    "dns error",
];

/// Classify the errors `object_store` only reports as generic failures by
/// the S3 error code or HTTP status phrase embedded in the message.
/// Anything unrecognised is terminal.
fn classify_message(bucket: &str, msg: String) -> StoreError {
    let lower = msg.to_ascii_lowercase();
    if msg.contains("NoSuchBucket") {
        StoreError::NoSuchBucket(bucket.to_string())
    } else if msg.contains("AccessDenied")
        || msg.contains("InvalidAccessKeyId")
        || msg.contains("SignatureDoesNotMatch")
        || msg.contains("403 Forbidden")
    {
        StoreError::AccessDenied(msg)
    } else if msg.contains("SlowDown") || msg.contains("503 Service Unavailable") {
        StoreError::ServiceUnavailable(msg)
    } else if msg.contains("InternalError") || msg.contains("500 Internal Server Error") {
        StoreError::Internal(msg)
    } else if lower.contains("timed out")
        || NETWORK_PHRASES.iter().any(|phrase| lower.contains(phrase))
    {
        StoreError::Network(msg)
    } else if msg.contains("NoSuchKey") || msg.contains("404 Not Found") {
        StoreError::NotFound(msg)
    } else if msg.contains("400 Bad Request") || msg.contains("InvalidArgument") {
        StoreError::InvalidRequest(msg)
    } else {
        StoreError::Backend(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use object_store::PutPayload;

    async fn seeded(keys: &[&str]) -> Storage {
        let storage = Storage::memory();
        for key in keys {
            storage
                .store()
                .put(
                    &ObjectPath::from(*key),
                    PutPayload::from(Bytes::from(key.to_string())),
                )
                .await
                .unwrap();
        }
        storage
    }

    #[tokio::test]
    async fn test_delimited_listing_groups_prefixes() {
        let storage = seeded(&["readme.txt", "photos/a.jpg", "photos/b.jpg", "docs/x.md"]).await;

        let page = storage
            .list_page(&ListRequest::directory("", "/"))
            .await
            .unwrap();

        assert!(!page.is_truncated);
        assert_eq!(page.common_prefixes, vec!["docs/", "photos/"]);
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].key, "readme.txt");
        assert_eq!(page.entries[0].size, "readme.txt".len() as u64);
    }

    #[tokio::test]
    async fn test_delimited_listing_under_prefix() {
        let storage = seeded(&["photos/a.jpg", "photos/2024/b.jpg", "docs/x.md"]).await;

        let page = storage
            .list_page(&ListRequest::directory("photos/", "/"))
            .await
            .unwrap();

        assert_eq!(page.common_prefixes, vec!["photos/2024/"]);
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].key, "photos/a.jpg");
    }

    #[tokio::test]
    async fn test_delimited_listing_pages_by_marker() {
        let storage = seeded(&["a", "b", "c", "d/e"]).await;

        let first = storage
            .list_page(&ListRequest::directory("", "/").with_max_keys(2))
            .await
            .unwrap();
        assert!(first.is_truncated);
        assert_eq!(first.next_marker.as_deref(), Some("b"));

        let second = storage
            .list_page(
                &ListRequest::directory("", "/")
                    .with_max_keys(2)
                    .with_marker(first.next_marker.clone()),
            )
            .await
            .unwrap();
        assert!(!second.is_truncated);
        assert_eq!(second.entries.len(), 1);
        assert_eq!(second.entries[0].key, "c");
        assert_eq!(second.common_prefixes, vec!["d/"]);
    }

    #[tokio::test]
    async fn test_flat_listing_leaves_marker_unset() {
        let storage = seeded(&["a", "b", "c"]).await;

        let request = ListRequest {
            max_keys: 2,
            ..Default::default()
        };
        let page = storage.list_page(&request).await.unwrap();
        assert!(page.is_truncated);
        assert!(page.next_marker.is_none());
        assert_eq!(page.entries.len(), 2);
    }

    #[tokio::test]
    async fn test_probe_memory_bucket() {
        let storage = Storage::memory();
        let status = storage.probe_bucket().await.unwrap();
        assert_eq!(status, BucketStatus::Exists { location: None });
    }

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(
            normalize_endpoint("localhost:9000", false).unwrap().as_str(),
            "http://localhost:9000/"
        );
        assert_eq!(
            normalize_endpoint("s3.example.com", true).unwrap().scheme(),
            "https"
        );
        assert_eq!(
            normalize_endpoint("https://s3.example.com/", false)
                .unwrap()
                .host_str(),
            Some("s3.example.com")
        );
        assert!(normalize_endpoint("http://", false).is_err());
    }

    #[test]
    fn test_classify_message() {
        assert_eq!(
            classify_message("b", "NoSuchBucket: nope".into()),
            StoreError::NoSuchBucket("b".into())
        );
        assert!(matches!(
            classify_message("b", "AccessDenied".into()),
            StoreError::AccessDenied(_)
        ));
        assert!(classify_message("b", "503 SlowDown".into()).is_retryable());
        assert!(classify_message("b", "connection reset by peer".into()).is_retryable());
        assert!(matches!(
            classify_message("b", "status 500 Internal Server Error".into()),
            StoreError::Internal(_)
        ));
    }

    #[test]
    fn test_unrecognised_errors_are_terminal() {
        let redirect = classify_message(
            "b",
            "Generic S3 error: Received redirect without LOCATION, this normally indicates an incorrectly configured region".into(),
        );
        assert!(matches!(redirect, StoreError::Backend(_)));
        assert!(!redirect.is_retryable());
    }

    #[test]
    fn test_status_digits_in_keys_are_ignored() {
        let err = classify_message(
            "b",
            "Client error with status 404 Not Found: NoSuchKey photos/img_500.jpg".into(),
        );
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(!err.is_retryable());

        let err = classify_message("b", "bad key logs/503/a.txt".into());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_config_debug_redacts_secrets() {
        let config = ObjectStoreConfig::S3 {
            endpoint: "http://localhost:9000".into(),
            access_key: "AKIAEXAMPLE".into(),
            secret_key: "supersecret".into(),
            bucket: "photos".into(),
            region: None,
        };
        let rendered = format!("{:?}", config);
        assert!(rendered.contains("photos"));
        assert!(!rendered.contains("supersecret"));
        assert!(!rendered.contains("AKIAEXAMPLE"));
    }
}
