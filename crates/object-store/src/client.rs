//! The object store client interface and the listing vocabulary it speaks.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Result, StoreError};

/// One bucket-listing request.
///
/// `max_keys == 0` leaves the page size to the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListRequest {
    pub prefix: Option<String>,
    pub marker: Option<String>,
    pub delimiter: Option<String>,
    pub max_keys: u32,
}

impl ListRequest {
    /// A delimited listing of the "directory" at `prefix`.
    pub fn directory(prefix: impl Into<String>, delimiter: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            prefix: (!prefix.is_empty()).then_some(prefix),
            marker: None,
            delimiter: Some(delimiter.into()),
            max_keys: 0,
        }
    }

    pub fn with_marker(mut self, marker: Option<String>) -> Self {
        self.marker = marker;
        self
    }

    pub fn with_max_keys(mut self, max_keys: u32) -> Self {
        self.max_keys = max_keys;
        self
    }

    pub fn prefix_str(&self) -> &str {
        self.prefix.as_deref().unwrap_or("")
    }
}

/// A leaf object returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub etag: Option<String>,
}

/// One page of a bucket listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub entries: Vec<ListEntry>,
    /// Folder-like groupings, each ending with the request's delimiter
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_marker: Option<String>,
}

impl Page {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.common_prefixes.is_empty()
    }

    /// Number of keys this page contributes towards a `max_keys` bound.
    pub fn key_count(&self) -> usize {
        self.entries.len() + self.common_prefixes.len()
    }
}

/// Outcome of probing the configured bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketStatus {
    /// The bucket answered; carries its location when the store reports one
    Exists { location: Option<String> },
    DoesNotExist,
    AccessDenied,
}

impl fmt::Display for BucketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketStatus::Exists { location: Some(l) } => write!(f, "exists ({})", l),
            BucketStatus::Exists { location: None } => write!(f, "exists"),
            BucketStatus::DoesNotExist => write!(f, "does not exist"),
            BucketStatus::AccessDenied => write!(f, "access denied"),
        }
    }
}

/// A client bound to a single bucket.
///
/// Implementations only translate requests; retries and pagination live in
/// [`RetryingClient`](crate::RetryingClient) and
/// [`ListingPages`](crate::ListingPages).
#[async_trait]
pub trait ObjectStoreClient: Send + Sync + fmt::Debug {
    /// Name of the bucket this client talks to.
    fn bucket(&self) -> &str;

    async fn list_page(&self, request: &ListRequest) -> Result<Page>;

    async fn probe_bucket(&self) -> Result<BucketStatus>;

    /// Classifies a failure as transient. Stores with their own notion of
    /// throttling may override this.
    fn is_retryable(&self, error: &StoreError) -> bool {
        error.is_retryable()
    }
}
