//! Bucket listing client for s3ns
//!
//! This crate is the store-facing half of s3ns: it issues bucket listings and
//! bucket probes, classifies failures, retries transient ones and walks
//! paginated listings.
//!
//! # Features
//!
//! - [`ObjectStoreClient`]: one trait, bound to one bucket
//! - [`Storage`]: S3/MinIO and in-memory backends via the `object_store` crate
//! - [`RetryingClient`]: bounded attempts with linear backoff
//! - [`ListingPages`]: marker-driven pagination that always makes progress
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use s3ns_store::{ListRequest, ListingPages, RetryPolicy, RetryingClient, Storage};
//!
//! # async fn example() -> Result<(), s3ns_store::StoreError> {
//! let client = RetryingClient::new(Arc::new(Storage::memory()), RetryPolicy::default());
//! let listing = ListingPages::new(&client, ListRequest::directory("photos/", "/"))
//!     .collect()
//!     .await?;
//! println!("{} objects", listing.entries.len());
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod pager;
mod retry;
mod storage;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use client::{BucketStatus, ListEntry, ListRequest, ObjectStoreClient, Page};
pub use error::{Result, StoreError};
pub use pager::ListingPages;
pub use retry::{RetryPolicy, RetryingClient};
pub use storage::{normalize_endpoint, ObjectStoreConfig, Storage};
