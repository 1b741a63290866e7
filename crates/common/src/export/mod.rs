//! Exports: one bucket bound to one handle graph.
//!
//! The graph sits behind a `parking_lot` reader/writer lock. Readers are
//! lookups, directory enumeration and the daemon's sampling scan; writers
//! are handle creation, attribute changes and teardown. The lock is never
//! held across an await: store requests run unlocked and their results are
//! merged afterwards.

mod config;
mod registry;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{RwLock, RwLockReadGuard};
use rand::Rng;
use s3ns_store::{BucketStatus, ObjectStoreClient, RetryingClient, StoreError};

use crate::error::NamespaceError;
use crate::graph::{
    validate_name, Attributes, ExportId, HandleGraph, HandleId, HandleKey, NodeKind, DELIMITER,
};
use crate::lookup_cache::NegativeCache;
use crate::reconcile::{ReconcileError, ReconcileStats, Reconciler};
use crate::upcall::{sample_one, ChangedAttrs, UpstreamConsumer};

pub use config::{ExportConfig, MAX_BUCKET_NAME_LEN, MAX_CREDENTIAL_LEN, MAX_HOST_LEN};
pub use registry::Registry;

pub const MAX_NAME_LEN: usize = 1024;
pub const MAX_PATH_LEN: usize = 1024;

/// Static capabilities advertised for every export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsInfo {
    pub max_name_len: usize,
    pub max_path_len: usize,
    pub lease_time: Duration,
    pub symlink_support: bool,
    pub link_support: bool,
    pub unique_handles: bool,
}

pub const FS_INFO: FsInfo = FsInfo {
    max_name_len: MAX_NAME_LEN,
    max_path_len: MAX_PATH_LEN,
    lease_time: Duration::from_secs(10),
    symlink_support: false,
    link_support: false,
    unique_handles: true,
};

/// One entry of a directory enumeration.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub handle: HandleId,
    /// Pass back to `read_dir` to continue after this entry
    pub cookie: u64,
    pub attrs: Attributes,
}

/// A page of directory entries.
///
/// `error` is set when populating the directory failed part way; `entries`
/// then holds whatever was discovered before the failure.
#[derive(Debug, Clone, Default)]
pub struct DirListing {
    pub entries: Vec<DirEntry>,
    pub eof: bool,
    pub error: Option<StoreError>,
}

#[derive(Debug)]
pub struct Export {
    id: ExportId,
    config: ExportConfig,
    client: RetryingClient,
    graph: RwLock<HandleGraph>,
    negative: NegativeCache,
    upstream: Arc<dyn UpstreamConsumer>,
}

impl Export {
    /// Build an export around an existing client. The root directory exists
    /// right away; nothing is listed until the tree is traversed.
    pub(crate) fn new(
        config: ExportConfig,
        client: Arc<dyn ObjectStoreClient>,
        upstream: Arc<dyn UpstreamConsumer>,
    ) -> Self {
        let id = ExportId::new();
        Self {
            id,
            client: RetryingClient::new(client, config.retry),
            negative: NegativeCache::new(config.negative_ttl()),
            graph: RwLock::new(HandleGraph::new(id)),
            upstream,
            config,
        }
    }

    pub fn id(&self) -> ExportId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.config.display_name()
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket_name
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    pub fn fs_info(&self) -> FsInfo {
        FS_INFO
    }

    pub fn upstream(&self) -> &Arc<dyn UpstreamConsumer> {
        &self.upstream
    }

    /// Read access to the graph. Do not hold the guard across an await.
    pub fn read(&self) -> RwLockReadGuard<'_, HandleGraph> {
        self.graph.read()
    }

    pub fn root(&self) -> Option<HandleId> {
        self.graph.read().root()
    }

    /// Size of the live-handle set, root included.
    pub fn live_handles(&self) -> usize {
        self.graph.read().len()
    }

    pub fn is_released(&self) -> bool {
        self.root().is_none()
    }

    /// Ask the store whether the bucket exists.
    pub async fn probe(&self) -> Result<BucketStatus, StoreError> {
        self.client.probe_bucket().await
    }

    /// Re-list `dir` and merge the result, populated or not.
    pub async fn refresh(&self, dir: HandleId) -> Result<ReconcileStats, ReconcileError> {
        Reconciler::new(&self.graph, &self.client)
            .with_negative_cache(&self.negative)
            .with_max_keys(self.config.list_max_keys)
            .reconcile(dir)
            .await
    }

    /// Look `name` up in `dir`, listing the directory on a miss.
    pub async fn lookup(&self, dir: HandleId, name: &str) -> Result<HandleId, NamespaceError> {
        if name.len() > MAX_NAME_LEN {
            return Err(NamespaceError::NameTooLong {
                len: name.len(),
                max: MAX_NAME_LEN,
            });
        }
        match name {
            "." => return self.ensure_directory(dir).map(|_| dir),
            ".." => {
                return self
                    .ensure_directory(dir)
                    .map(|parent| parent.unwrap_or(dir))
            }
            _ => validate_name(name)?,
        }

        if let Some(id) = self.cached_child(dir, name)? {
            return Ok(id);
        }
        if self.negative.contains(dir, name) {
            return Err(NamespaceError::NotFound(name.to_string()));
        }

        let refreshed = self.refresh(dir).await;
        if let Some(id) = self.cached_child(dir, name)? {
            return Ok(id);
        }
        match refreshed {
            Ok(_) => {
                self.negative.insert(dir, name);
                Err(NamespaceError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.source),
        }
    }

    /// Resolve a `/`-separated path from the root.
    pub async fn lookup_path(&self, path: &str) -> Result<HandleId, NamespaceError> {
        if path.len() > MAX_PATH_LEN {
            return Err(NamespaceError::NameTooLong {
                len: path.len(),
                max: MAX_PATH_LEN,
            });
        }
        let mut current = self.root().ok_or(NamespaceError::Released)?;
        for component in path.split(DELIMITER).filter(|c| !c.is_empty()) {
            current = self.lookup(current, component).await?;
        }
        Ok(current)
    }

    /// Enumerate `dir` from `cookie` on, at most `limit` entries (0 for
    /// all). The first enumeration of a directory populates it.
    pub async fn read_dir(
        &self,
        dir: HandleId,
        cookie: u64,
        limit: usize,
    ) -> Result<DirListing, NamespaceError> {
        let populated = {
            let graph = self.graph.read();
            self.check_live(&graph)?;
            graph.directory(dir)?.is_populated()
        };

        let mut error = None;
        if !populated {
            if let Err(e) = self.refresh(dir).await {
                match e.source {
                    NamespaceError::Store(store) => error = Some(store),
                    other => return Err(other),
                }
            }
        }

        let graph = self.graph.read();
        self.check_live(&graph)?;
        let directory = graph.directory(dir)?;

        let mut listing = DirListing {
            eof: true,
            error,
            ..Default::default()
        };
        for dirent in directory.from_ordinal(cookie) {
            if limit != 0 && listing.entries.len() == limit {
                listing.eof = false;
                break;
            }
            let child = graph.handle(dirent.child)?;
            listing.entries.push(DirEntry {
                name: dirent.name.clone(),
                handle: dirent.child,
                cookie: dirent.ordinal + 1,
                attrs: child.attrs().clone(),
            });
        }
        Ok(listing)
    }

    pub fn getattr(&self, id: HandleId) -> Result<Attributes, NamespaceError> {
        let graph = self.graph.read();
        self.check_live(&graph)?;
        Ok(graph.handle(id)?.attrs().clone())
    }

    pub fn handle_key(&self, id: HandleId) -> Result<HandleKey, NamespaceError> {
        let graph = self.graph.read();
        Ok(*graph.handle(id)?.key())
    }

    /// Map a wire handle back to a live handle of this export.
    pub fn resolve_key(&self, wire: &[u8]) -> Result<HandleId, NamespaceError> {
        let key = HandleKey::from_wire(wire)?;
        if key.export_id() != self.id {
            return Err(NamespaceError::ForeignHandle(key.export_id()));
        }
        let graph = self.graph.read();
        self.check_live(&graph)?;
        graph
            .lookup_key(&key)
            .ok_or_else(|| NamespaceError::NotFound(key.to_string()))
    }

    /// Create a node directly, without consulting the store.
    pub fn create(
        &self,
        dir: HandleId,
        kind: NodeKind,
        name: &str,
        attrs: Attributes,
    ) -> Result<HandleId, NamespaceError> {
        if name.len() > MAX_NAME_LEN {
            return Err(NamespaceError::NameTooLong {
                len: name.len(),
                max: MAX_NAME_LEN,
            });
        }
        let id = {
            let mut graph = self.graph.write();
            self.check_live(&graph)?;
            graph.create_handle(dir, kind, name, attrs)?
        };
        self.negative.forget(dir, name);
        Ok(id)
    }

    /// Pick a live handle uniformly at random. The read lock is held for
    /// exactly the scan.
    pub fn sample_handle<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<HandleId> {
        let graph = self.graph.read();
        sample_one(graph.live(), rng).map(|h| h.id())
    }

    /// Advance a handle's change counter and times under the write lock.
    pub fn touch(&self, id: HandleId) -> Option<(HandleKey, ChangedAttrs)> {
        let mut graph = self.graph.write();
        let attrs = ChangedAttrs::from(graph.mark_changed(id, Utc::now())?);
        let key = *graph.get(id)?.key();
        Some((key, attrs))
    }

    /// Free every handle, leaves first. Idempotent.
    ///
    /// Returns the freed handles in teardown order.
    pub fn release(&self) -> Vec<HandleId> {
        let freed = {
            let mut graph = self.graph.write();
            graph.release()
        };
        self.negative.clear();
        if !freed.is_empty() {
            tracing::info!(export = %self.name(), handles = freed.len(), "export released");
        }
        freed
    }

    fn check_live(&self, graph: &HandleGraph) -> Result<(), NamespaceError> {
        if graph.root().is_none() {
            return Err(NamespaceError::Released);
        }
        Ok(())
    }

    fn cached_child(&self, dir: HandleId, name: &str) -> Result<Option<HandleId>, NamespaceError> {
        let graph = self.graph.read();
        self.check_live(&graph)?;
        Ok(graph.directory(dir)?.get(name).map(|d| d.child))
    }

    /// Confirms `dir` is a live directory and returns its parent.
    fn ensure_directory(&self, dir: HandleId) -> Result<Option<HandleId>, NamespaceError> {
        let graph = self.graph.read();
        self.check_live(&graph)?;
        graph.directory(dir)?;
        Ok(graph.handle(dir)?.parent())
    }
}
