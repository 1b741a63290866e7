//! A scripted [`ObjectStoreClient`] for deterministic tests.
//!
//! Responses are consumed in the order they were pushed. Once a queue is
//! empty, listings fall back to the static pages registered per prefix
//! (or an empty page) and probes report an existing bucket.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::client::{BucketStatus, ListRequest, ObjectStoreClient, Page};
use crate::error::Result;

#[derive(Debug)]
struct Scripted<T> {
    delay: Option<Duration>,
    result: Result<T>,
}

#[derive(Debug, Default)]
pub struct ScriptedClient {
    bucket: String,
    lists: Mutex<VecDeque<Scripted<Page>>>,
    probes: Mutex<VecDeque<Scripted<BucketStatus>>>,
    listings: Mutex<HashMap<String, Page>>,
    requests: Mutex<Vec<ListRequest>>,
    list_calls: AtomicUsize,
    probe_calls: AtomicUsize,
}

impl ScriptedClient {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Default::default()
        }
    }

    pub fn push_list(&self, result: Result<Page>) {
        self.lists.lock().push_back(Scripted {
            delay: None,
            result,
        });
    }

    /// Queue a listing response that only arrives after `delay`.
    pub fn push_list_delayed(&self, delay: Duration, result: Result<Page>) {
        self.lists.lock().push_back(Scripted {
            delay: Some(delay),
            result,
        });
    }

    pub fn push_probe(&self, result: Result<BucketStatus>) {
        self.probes.lock().push_back(Scripted {
            delay: None,
            result,
        });
    }

    /// Serve `page` for every unscripted listing of `prefix`.
    pub fn set_listing(&self, prefix: impl Into<String>, page: Page) {
        self.listings.lock().insert(prefix.into(), page);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    /// Every listing request received, in order.
    pub fn list_requests(&self) -> Vec<ListRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ObjectStoreClient for ScriptedClient {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list_page(&self, request: &ListRequest) -> Result<Page> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        let next = self.lists.lock().pop_front();
        match next {
            Some(scripted) => {
                if let Some(delay) = scripted.delay {
                    tokio::time::sleep(delay).await;
                }
                scripted.result
            }
            None => Ok(self
                .listings
                .lock()
                .get(request.prefix_str())
                .cloned()
                .unwrap_or_default()),
        }
    }

    async fn probe_bucket(&self) -> Result<BucketStatus> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);

        let next = self.probes.lock().pop_front();
        match next {
            Some(scripted) => {
                if let Some(delay) = scripted.delay {
                    tokio::time::sleep(delay).await;
                }
                scripted.result
            }
            None => Ok(BucketStatus::Exists { location: None }),
        }
    }
}
