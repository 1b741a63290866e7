//! Paginated listings as a lazy, restartable sequence of pages.

use crate::client::{ListRequest, Page};
use crate::error::{Result, StoreError};
use crate::retry::RetryingClient;

/// Walks a listing page by page through a [`RetryingClient`].
///
/// Stops once the store reports an untruncated page, or once `max_keys`
/// keys have been seen when the request carries a bound. After an error the
/// pager can be rebuilt with [`ListingPages::resume`] from
/// [`ListingPages::marker`] to continue where it left off.
#[derive(Debug)]
pub struct ListingPages<'a> {
    client: &'a RetryingClient,
    request: ListRequest,
    seen: usize,
    done: bool,
    /// Set when the last page was truncated but could not be continued
    stalled_after: Option<String>,
}

impl<'a> ListingPages<'a> {
    pub fn new(client: &'a RetryingClient, request: ListRequest) -> Self {
        Self {
            client,
            request,
            seen: 0,
            done: false,
            stalled_after: None,
        }
    }

    /// Restart a listing after `marker`.
    pub fn resume(client: &'a RetryingClient, request: ListRequest, marker: String) -> Self {
        Self::new(client, request.with_marker(Some(marker)))
    }

    /// Marker the next page will be requested with.
    pub fn marker(&self) -> Option<&str> {
        self.request.marker.as_deref()
    }

    /// Keys returned so far.
    pub fn seen(&self) -> usize {
        self.seen
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Fetch the next page, or `None` once the listing is complete.
    ///
    /// A failed request leaves the pager where it was; it does not end it.
    /// A truncated page that cannot be continued is still returned, and the
    /// call after it fails with [`StoreError::MissingContinuation`].
    pub async fn next_page(&mut self) -> Option<Result<Page>> {
        if let Some(after) = self.stalled_after.take() {
            self.done = true;
            return Some(Err(StoreError::MissingContinuation { after }));
        }
        if self.done {
            return None;
        }

        let mut page = match self.client.list_page(&self.request).await {
            Ok(page) => page,
            Err(e) => return Some(Err(e)),
        };

        self.seen += page.key_count();
        let next = match continuation(&page) {
            Ok(next) => next,
            Err(()) => {
                self.stalled_after = Some(self.request.marker.clone().unwrap_or_default());
                page.next_marker = None;
                return Some(Ok(page));
            }
        };

        let bounded = self.request.max_keys != 0 && self.seen >= self.request.max_keys as usize;
        match next {
            Some(marker) if !bounded => {
                page.next_marker = Some(marker.clone());
                self.request.marker = Some(marker);
            }
            _ => self.done = true,
        }

        Some(Ok(page))
    }

    /// Drain every remaining page into one.
    pub async fn collect(mut self) -> Result<Page> {
        let mut all = Page::default();
        while let Some(page) = self.next_page().await {
            let page = page?;
            all.entries.extend(page.entries);
            all.common_prefixes.extend(page.common_prefixes);
        }
        Ok(all)
    }
}

/// The marker to continue a listing after `page`, or `None` when the listing
/// is complete.
///
/// Without an explicit marker from the store, the last content key stands in.
/// A truncated page with neither cannot make progress.
fn continuation(page: &Page) -> std::result::Result<Option<String>, ()> {
    if !page.is_truncated {
        return Ok(None);
    }
    if let Some(marker) = page.next_marker.as_ref().filter(|m| !m.is_empty()) {
        return Ok(Some(marker.clone()));
    }
    match page.entries.last() {
        Some(last) => Ok(Some(last.key.clone())),
        None => Err(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ListEntry;
    use crate::retry::RetryPolicy;
    use crate::testkit::ScriptedClient;
    use std::sync::Arc;

    fn entry(key: &str) -> ListEntry {
        ListEntry {
            key: key.to_string(),
            size: 1,
            last_modified: chrono::Utc::now(),
            etag: None,
        }
    }

    fn retrying(client: &Arc<ScriptedClient>) -> RetryingClient {
        RetryingClient::new(client.clone(), RetryPolicy::default())
    }

    #[tokio::test]
    async fn test_synthesizes_marker_from_last_content_key() {
        let client = Arc::new(ScriptedClient::new("b"));
        client.push_list(Ok(Page {
            entries: vec![entry("a"), entry("b")],
            is_truncated: true,
            ..Default::default()
        }));
        client.push_list(Ok(Page {
            entries: vec![entry("c")],
            ..Default::default()
        }));
        let retrying = retrying(&client);

        let page = ListingPages::new(&retrying, ListRequest::default())
            .collect()
            .await
            .unwrap();

        assert_eq!(page.entries.len(), 3);
        let requests = client.list_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].marker, None);
        assert_eq!(requests[1].marker.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_explicit_marker_wins_over_last_key() {
        let client = Arc::new(ScriptedClient::new("b"));
        client.push_list(Ok(Page {
            entries: vec![entry("a")],
            common_prefixes: vec!["z/".into()],
            is_truncated: true,
            next_marker: Some("z/".into()),
        }));
        client.push_list(Ok(Page::default()));
        let retrying = retrying(&client);

        let mut pages = ListingPages::new(&retrying, ListRequest::directory("", "/"));
        pages.next_page().await.unwrap().unwrap();
        assert_eq!(pages.marker(), Some("z/"));
        assert!(pages.next_page().await.unwrap().unwrap().is_empty());
        assert!(pages.next_page().await.is_none());
    }

    #[tokio::test]
    async fn test_truncated_page_without_any_marker_fails_after_yielding_it() {
        let client = Arc::new(ScriptedClient::new("b"));
        client.push_list(Ok(Page {
            common_prefixes: vec!["a/".into()],
            is_truncated: true,
            ..Default::default()
        }));
        let retrying = retrying(&client);

        let mut pages = ListingPages::new(&retrying, ListRequest::directory("", "/"));
        let page = pages.next_page().await.unwrap().unwrap();
        assert_eq!(page.common_prefixes, vec!["a/"]);
        assert_eq!(page.next_marker, None);

        let err = pages.next_page().await.unwrap().unwrap_err();
        assert_eq!(
            err,
            StoreError::MissingContinuation {
                after: String::new()
            }
        );
        assert!(pages.next_page().await.is_none());
        assert_eq!(client.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_max_keys_bounds_the_walk() {
        let client = Arc::new(ScriptedClient::new("b"));
        client.push_list(Ok(Page {
            entries: vec![entry("a"), entry("b")],
            is_truncated: true,
            ..Default::default()
        }));
        client.push_list(Ok(Page {
            entries: vec![entry("c"), entry("d")],
            is_truncated: true,
            ..Default::default()
        }));
        let retrying = retrying(&client);

        let page = ListingPages::new(&retrying, ListRequest::default().with_max_keys(2))
            .collect()
            .await
            .unwrap();

        assert_eq!(page.entries.len(), 2);
        assert_eq!(client.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_bucket_is_one_empty_page() {
        let client = Arc::new(ScriptedClient::new("b"));
        client.push_list(Ok(Page::default()));
        let retrying = retrying(&client);

        let page = ListingPages::new(&retrying, ListRequest::directory("", "/"))
            .collect()
            .await
            .unwrap();
        assert!(page.is_empty());
    }

    #[tokio::test]
    async fn test_resume_requests_from_marker() {
        let client = Arc::new(ScriptedClient::new("b"));
        client.push_list(Ok(Page::default()));
        let retrying = retrying(&client);

        let mut pages =
            ListingPages::resume(&retrying, ListRequest::directory("", "/"), "m".to_string());
        pages.next_page().await.unwrap().unwrap();

        assert_eq!(client.list_requests()[0].marker.as_deref(), Some("m"));
    }
}
