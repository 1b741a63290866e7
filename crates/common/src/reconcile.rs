//! Namespace reconciliation
//!
//! Merges a directory's bucket listing into the handle graph. Pages are
//! fetched without holding the graph lock; each page is then merged under
//! the write lock. Names already present are left alone, so re-listing
//! never duplicates an entry, and two concurrent reconciliations of the
//! same directory converge on one dirent per name.

use parking_lot::RwLock;
use s3ns_store::{ListRequest, ListingPages, Page, RetryingClient};

use crate::error::NamespaceError;
use crate::graph::{
    validate_name, Attributes, ContentRef, HandleGraph, HandleId, NodeKind, DEFAULT_DIR_MODE,
    DEFAULT_FILE_MODE, DELIMITER,
};
use crate::lookup_cache::NegativeCache;

const DELIMITER_STR: &str = "/";

/// What a reconciliation pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub pages: usize,
    pub created_dirs: usize,
    pub created_files: usize,
    /// Entries whose name was already present
    pub skipped_existing: usize,
    /// Keys that cannot name a child (the prefix itself, nested delimiters)
    pub skipped_invalid: usize,
}

impl ReconcileStats {
    pub fn created(&self) -> usize {
        self.created_dirs + self.created_files
    }
}

/// A failed pass. Everything counted in `stats` was merged and stays in
/// the graph.
#[derive(Debug, thiserror::Error)]
#[error("reconciling '{dir}' failed after {} new entries: {source}", .stats.created())]
pub struct ReconcileError {
    pub dir: String,
    pub stats: ReconcileStats,
    pub source: NamespaceError,
}

/// Listing prefix of the directory at `path`.
pub fn directory_prefix(path: &str) -> String {
    if path.is_empty() {
        String::new()
    } else {
        format!("{}{}", path, DELIMITER)
    }
}

pub struct Reconciler<'a> {
    graph: &'a RwLock<HandleGraph>,
    client: &'a RetryingClient,
    negative: Option<&'a NegativeCache>,
    max_keys: u32,
}

impl<'a> Reconciler<'a> {
    pub fn new(graph: &'a RwLock<HandleGraph>, client: &'a RetryingClient) -> Self {
        Self {
            graph,
            client,
            negative: None,
            max_keys: 0,
        }
    }

    /// Drop negative entries for every name this reconciler creates.
    pub fn with_negative_cache(mut self, cache: &'a NegativeCache) -> Self {
        self.negative = Some(cache);
        self
    }

    /// Stop after `max_keys` listed keys; zero walks the whole listing.
    pub fn with_max_keys(mut self, max_keys: u32) -> Self {
        self.max_keys = max_keys;
        self
    }

    /// Run one pass over `dir`. Marks the directory populated on success.
    pub async fn reconcile(&self, dir: HandleId) -> Result<ReconcileStats, ReconcileError> {
        let prefix = {
            let graph = self.graph.read();
            let fail = |source: NamespaceError| ReconcileError {
                dir: dir.to_string(),
                stats: ReconcileStats::default(),
                source,
            };
            if graph.root().is_none() {
                return Err(fail(NamespaceError::Released));
            }
            let handle = graph.handle(dir).map_err(|e| fail(e.into()))?;
            graph.directory(dir).map_err(|e| fail(e.into()))?;
            directory_prefix(handle.path())
        };

        let request = ListRequest::directory(prefix.clone(), DELIMITER_STR).with_max_keys(self.max_keys);
        let mut pages = ListingPages::new(self.client, request);
        let mut stats = ReconcileStats::default();

        tracing::debug!(bucket = %self.client.bucket(), prefix = %prefix, "reconciling directory");

        while let Some(page) = pages.next_page().await {
            let page = match page {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(
                        bucket = %self.client.bucket(),
                        prefix = %prefix,
                        merged = stats.created(),
                        error = %e,
                        "listing failed, keeping entries merged so far"
                    );
                    return Err(ReconcileError {
                        dir: prefix,
                        stats,
                        source: e.into(),
                    });
                }
            };
            stats.pages += 1;

            let merged = {
                let mut graph = self.graph.write();
                merge_page(&mut graph, dir, &prefix, &page, &mut stats, self.negative)
            };
            if let Err(e) = merged {
                return Err(ReconcileError {
                    dir: prefix,
                    stats,
                    source: e,
                });
            }
        }

        {
            let mut graph = self.graph.write();
            if let Ok(directory) = graph.directory_mut(dir) {
                directory.set_populated();
            }
        }

        tracing::debug!(
            bucket = %self.client.bucket(),
            prefix = %prefix,
            pages = stats.pages,
            dirs = stats.created_dirs,
            files = stats.created_files,
            skipped = stats.skipped_existing,
            "directory reconciled"
        );
        Ok(stats)
    }
}

/// Merge one listing page into `dir`. The caller holds the write lock.
///
/// Content keys become regular files, common prefixes become directories.
pub fn merge_page(
    graph: &mut HandleGraph,
    dir: HandleId,
    prefix: &str,
    page: &Page,
    stats: &mut ReconcileStats,
    negative: Option<&NegativeCache>,
) -> Result<(), NamespaceError> {
    if graph.root().is_none() {
        return Err(NamespaceError::Released);
    }

    for entry in &page.entries {
        let Some(name) = child_name(&entry.key, prefix) else {
            stats.skipped_invalid += 1;
            continue;
        };
        if graph.directory(dir)?.contains(name) {
            stats.skipped_existing += 1;
            continue;
        }
        let attrs = Attributes::new(DEFAULT_FILE_MODE)
            .with_size(entry.size)
            .with_mtime(entry.last_modified);
        let content = ContentRef {
            key: entry.key.clone(),
            etag: entry.etag.clone(),
        };
        graph.create_handle(dir, NodeKind::RegularFile(content), name, attrs)?;
        forget_miss(negative, dir, name);
        stats.created_files += 1;
        tracing::trace!(key = %entry.key, size = entry.size, "file discovered");
    }

    for common in &page.common_prefixes {
        let trimmed = common.strip_suffix(DELIMITER).unwrap_or(common);
        let Some(name) = child_name(trimmed, prefix) else {
            stats.skipped_invalid += 1;
            continue;
        };
        if graph.directory(dir)?.contains(name) {
            stats.skipped_existing += 1;
            continue;
        }
        graph.create_handle(dir, NodeKind::Directory, name, Attributes::new(DEFAULT_DIR_MODE))?;
        forget_miss(negative, dir, name);
        stats.created_dirs += 1;
        tracing::trace!(prefix = %common, "directory discovered");
    }

    Ok(())
}

fn forget_miss(negative: Option<&NegativeCache>, dir: HandleId, name: &str) {
    if let Some(cache) = negative {
        cache.forget(dir, name);
    }
}

/// Name of the child `key` denotes under `prefix`, if it denotes one.
fn child_name<'k>(key: &'k str, prefix: &str) -> Option<&'k str> {
    let name = key.strip_prefix(prefix)?;
    validate_name(name).ok()?;
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ExportId;
    use chrono::Utc;
    use s3ns_store::ListEntry;

    fn entry(key: &str, size: u64) -> ListEntry {
        ListEntry {
            key: key.to_string(),
            size,
            last_modified: Utc::now(),
            etag: Some(format!("\"{}\"", size)),
        }
    }

    #[test]
    fn test_child_name() {
        assert_eq!(child_name("photos/a.jpg", "photos/"), Some("a.jpg"));
        assert_eq!(child_name("readme.txt", ""), Some("readme.txt"));
        assert_eq!(child_name("photos/", "photos/"), None);
        assert_eq!(child_name("photos/x/y", "photos/"), None);
        assert_eq!(child_name("docs/a", "photos/"), None);
    }

    #[test]
    fn test_directory_prefix() {
        assert_eq!(directory_prefix(""), "");
        assert_eq!(directory_prefix("photos/2024"), "photos/2024/");
    }

    #[test]
    fn test_merge_page_is_idempotent() {
        let mut graph = HandleGraph::new(ExportId::new());
        let root = graph.root().unwrap();
        let page = Page {
            entries: vec![entry("readme.txt", 12)],
            common_prefixes: vec!["photos/".into(), "docs/".into()],
            ..Default::default()
        };

        let mut first = ReconcileStats::default();
        merge_page(&mut graph, root, "", &page, &mut first, None).unwrap();
        assert_eq!(first.created_files, 1);
        assert_eq!(first.created_dirs, 2);

        let mut second = ReconcileStats::default();
        merge_page(&mut graph, root, "", &page, &mut second, None).unwrap();
        assert_eq!(second.created(), 0);
        assert_eq!(second.skipped_existing, 3);
        assert_eq!(graph.directory(root).unwrap().len(), 3);
        graph.check_invariants().unwrap();
    }

    #[test]
    fn test_merge_skips_prefix_marker_object() {
        let mut graph = HandleGraph::new(ExportId::new());
        let root = graph.root().unwrap();
        let photos = graph
            .create_handle(root, NodeKind::Directory, "photos", Attributes::new(0o755))
            .unwrap();
        let page = Page {
            entries: vec![entry("photos/", 0), entry("photos/a.jpg", 3)],
            ..Default::default()
        };

        let mut stats = ReconcileStats::default();
        merge_page(&mut graph, photos, "photos/", &page, &mut stats, None).unwrap();

        assert_eq!(stats.created_files, 1);
        assert_eq!(stats.skipped_invalid, 1);
        assert_eq!(graph.directory(photos).unwrap().len(), 1);
    }

    #[test]
    fn test_merge_clears_negative_entries() {
        let mut graph = HandleGraph::new(ExportId::new());
        let root = graph.root().unwrap();
        let cache = NegativeCache::new(std::time::Duration::from_secs(60));
        cache.insert(root, "late.txt");

        let page = Page {
            entries: vec![entry("late.txt", 1)],
            ..Default::default()
        };
        let mut stats = ReconcileStats::default();
        merge_page(&mut graph, root, "", &page, &mut stats, Some(&cache)).unwrap();

        assert!(!cache.contains(root, "late.txt"));
    }
}
