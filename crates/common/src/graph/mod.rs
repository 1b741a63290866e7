//! In-memory handle graph for one export.
//!
//! Handles live in an arena keyed by [`HandleId`]. Directories, the parent
//! back-reference and the live set all hold ids rather than references, so
//! there are no ownership cycles between parents, children and the export.
//!
//! Every mutating method takes `&mut self`. The graph is only reachable
//! mutably through its export's write lock, which makes "caller holds the
//! write lock" a compile-time property.

mod directory;
mod handle;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

pub use directory::{Directory, Dirent};
pub use handle::{
    Attributes, ContentRef, DeviceId, DirentRef, ExportId, FileType, Handle, HandleId,
    HandleKey, HandleKind, NodeKind, SpecialType, DEFAULT_DIR_MODE, DEFAULT_FILE_MODE,
    HANDLE_KEY_LEN, ROOT_INODE,
};

/// Path component separator used when building handle paths.
pub const DELIMITER: char = '/';

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("an entry named '{name}' already exists")]
    NameConflict { name: String },
    #[error("no live handle {0}")]
    NoSuchHandle(HandleId),
    #[error("handle {0} is not a directory")]
    NotADirectory(HandleId),
    #[error("directory {0} still has children")]
    NotEmpty(HandleId),
    #[error("invalid entry name '{0}'")]
    InvalidName(String),
    #[error("handle key must be {expected} bytes, got {len}", expected = HANDLE_KEY_LEN)]
    InvalidHandleKey { len: usize },
    #[error("graph invariant violated: {0}")]
    Corrupted(String),
}

#[derive(Debug)]
pub struct HandleGraph {
    export: ExportId,
    handles: BTreeMap<HandleId, Handle>,
    root: Option<HandleId>,
    next_inode: u64,
}

impl HandleGraph {
    /// A graph holding only the root directory.
    pub fn new(export: ExportId) -> Self {
        let root = HandleId::ROOT;
        let mut attrs = Attributes::new(DEFAULT_DIR_MODE);
        attrs.file_type = FileType::Directory;
        attrs.fileid = ROOT_INODE;
        attrs.numlinks = 2;

        let mut handles = BTreeMap::new();
        handles.insert(
            root,
            Handle {
                id: root,
                key: HandleKey::new(export, ROOT_INODE),
                attrs,
                parent: None,
                name: String::new(),
                path: String::new(),
                dirents: Vec::new(),
                kind: HandleKind::Directory(Directory::default()),
            },
        );

        Self {
            export,
            handles,
            root: Some(root),
            next_inode: ROOT_INODE + 1,
        }
    }

    pub fn export_id(&self) -> ExportId {
        self.export
    }

    /// `None` once the graph has been released.
    pub fn root(&self) -> Option<HandleId> {
        self.root
    }

    /// Number of live handles, root included.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// The live-handle set, in inode order.
    pub fn live(&self) -> impl Iterator<Item = &Handle> {
        self.handles.values()
    }

    pub fn get(&self, id: HandleId) -> Option<&Handle> {
        self.handles.get(&id)
    }

    pub fn handle(&self, id: HandleId) -> Result<&Handle, GraphError> {
        self.handles.get(&id).ok_or(GraphError::NoSuchHandle(id))
    }

    pub fn directory(&self, id: HandleId) -> Result<&Directory, GraphError> {
        self.handle(id)?
            .as_directory()
            .ok_or(GraphError::NotADirectory(id))
    }

    pub(crate) fn directory_mut(&mut self, id: HandleId) -> Result<&mut Directory, GraphError> {
        self.handles
            .get_mut(&id)
            .ok_or(GraphError::NoSuchHandle(id))?
            .as_directory_mut()
            .ok_or(GraphError::NotADirectory(id))
    }

    /// Resolve a key minted by this graph.
    pub fn lookup_key(&self, key: &HandleKey) -> Option<HandleId> {
        if key.export_id() != self.export {
            return None;
        }
        let id = HandleId::from_inode(key.inode());
        self.handles.contains_key(&id).then_some(id)
    }

    /// Create a child of `parent` named `name`.
    ///
    /// The new handle takes the directory's next ordinal and joins the live
    /// set. `attrs.file_type`, `attrs.fileid` and `attrs.numlinks` are
    /// overwritten from `kind` and the new inode.
    pub fn create_handle(
        &mut self,
        parent: HandleId,
        kind: NodeKind,
        name: &str,
        mut attrs: Attributes,
    ) -> Result<HandleId, GraphError> {
        validate_name(name)?;

        let parent_path = {
            let parent_handle = self.handle(parent)?;
            let dir = parent_handle
                .as_directory()
                .ok_or(GraphError::NotADirectory(parent))?;
            if dir.contains(name) {
                return Err(GraphError::NameConflict {
                    name: name.to_string(),
                });
            }
            parent_handle.path.clone()
        };

        let inode = self.next_inode;
        let id = HandleId::from_inode(inode);
        let ordinal = self.directory_mut(parent)?.insert(name, id)?;
        self.next_inode += 1;

        attrs.file_type = kind.file_type();
        attrs.fileid = inode;
        attrs.numlinks = if matches!(kind, NodeKind::Directory) { 2 } else { 1 };
        if let NodeKind::Special { rdev, .. } = &kind {
            attrs.rawdev = *rdev;
        }

        let path = if parent_path.is_empty() {
            name.to_string()
        } else {
            format!("{}{}{}", parent_path, DELIMITER, name)
        };

        self.handles.insert(
            id,
            Handle {
                id,
                key: HandleKey::new(self.export, inode),
                attrs,
                parent: Some(parent),
                name: name.to_string(),
                path,
                dirents: vec![DirentRef {
                    dir: parent,
                    ordinal,
                }],
                kind: kind.into(),
            },
        );

        tracing::trace!(export = %self.export, parent = %parent, handle = %id, name, "handle created");
        debug_assert!(self.check_invariants().is_ok());
        Ok(id)
    }

    pub fn lookup_by_name(&self, parent: HandleId, name: &str) -> Option<HandleId> {
        self.directory(parent).ok()?.get(name).map(|d| d.child)
    }

    pub fn lookup_by_index(&self, parent: HandleId, ordinal: u64) -> Option<HandleId> {
        self.directory(parent).ok()?.at(ordinal).map(|d| d.child)
    }

    /// Advance a handle's change counter and stamp its change times with `now`.
    pub fn mark_changed(&mut self, id: HandleId, now: DateTime<Utc>) -> Option<&Attributes> {
        let handle = self.handles.get_mut(&id)?;
        handle.attrs.ctime = now;
        handle.attrs.chgtime = now;
        handle.attrs.change += 1;
        Some(&handle.attrs)
    }

    /// Remove a handle from every directory referencing it and from the live
    /// set. Directories must already be empty.
    pub fn detach_and_free(&mut self, id: HandleId) -> Result<Handle, GraphError> {
        let handle = self.handle(id)?;
        if handle.as_directory().is_some_and(|d| !d.is_empty()) {
            return Err(GraphError::NotEmpty(id));
        }
        let dirents = handle.dirents.clone();

        for dirent in dirents {
            // A parent freed out of order would already be gone; nothing to
            // unlink in that case.
            if let Ok(dir) = self.directory_mut(dirent.dir) {
                dir.remove(dirent.ordinal);
            }
        }
        if self.root == Some(id) {
            self.root = None;
        }

        let freed = self.handles.remove(&id).ok_or(GraphError::NoSuchHandle(id));
        debug_assert!(self.check_invariants().is_ok());
        freed
    }

    /// Free `id` and everything below it, children before parents.
    ///
    /// Returns the freed ids in the order they were freed.
    pub fn free_subtree(&mut self, id: HandleId) -> Result<Vec<HandleId>, GraphError> {
        let order = self.post_order(id)?;
        for &handle in &order {
            self.detach_and_free(handle)?;
        }
        Ok(order)
    }

    /// Tear the whole graph down from the root. A no-op once released.
    pub fn release(&mut self) -> Vec<HandleId> {
        let Some(root) = self.root else {
            return Vec::new();
        };
        match self.free_subtree(root) {
            Ok(order) => order,
            Err(e) => {
                tracing::error!(export = %self.export, error = %e, "teardown failed, dropping graph");
                let order: Vec<_> = self.handles.keys().rev().copied().collect();
                self.handles.clear();
                self.root = None;
                order
            }
        }
    }

    fn post_order(&self, id: HandleId) -> Result<Vec<HandleId>, GraphError> {
        self.handle(id)?;
        let mut order = Vec::new();
        let mut stack = vec![(id, false)];
        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                order.push(current);
                continue;
            }
            stack.push((current, true));
            if let Some(dir) = self.handle(current)?.as_directory() {
                // Reverse so that children come out in ordinal order.
                for dirent in dir.iter().rev() {
                    stack.push((dirent.child, false));
                }
            }
        }
        Ok(order)
    }

    /// Verify the structural invariants of every live handle.
    pub fn check_invariants(&self) -> Result<(), GraphError> {
        for handle in self.handles.values() {
            let corrupted = |msg: String| GraphError::Corrupted(format!("{}: {}", handle.id, msg));

            if let Some(dir) = handle.as_directory() {
                dir.check().map_err(corrupted)?;
                for dirent in dir.iter() {
                    let child = self
                        .handles
                        .get(&dirent.child)
                        .ok_or_else(|| corrupted(format!("dangling child {}", dirent.child)))?;
                    let back = DirentRef {
                        dir: handle.id,
                        ordinal: dirent.ordinal,
                    };
                    if !child.dirents.contains(&back) {
                        return Err(corrupted(format!(
                            "child {} does not reference dirent {}",
                            child.id, dirent.ordinal
                        )));
                    }
                }
            }

            for dirent in &handle.dirents {
                let listed = self
                    .directory(dirent.dir)
                    .ok()
                    .and_then(|d| d.at(dirent.ordinal))
                    .is_some_and(|d| d.child == handle.id);
                if !listed {
                    return Err(corrupted(format!(
                        "dirent {}@{} missing from its directory",
                        dirent.dir, dirent.ordinal
                    )));
                }
            }

            match handle.parent {
                None if self.root != Some(handle.id) => {
                    return Err(corrupted("non-root handle without a parent".into()));
                }
                Some(parent) if !self.handles.contains_key(&parent) => {
                    return Err(corrupted(format!("parent {} is not live", parent)));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// A single path component: non-empty, no delimiter, not `.` or `..`.
pub fn validate_name(name: &str) -> Result<(), GraphError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(DELIMITER) {
        return Err(GraphError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> HandleGraph {
        HandleGraph::new(ExportId::new())
    }

    fn file(graph: &mut HandleGraph, parent: HandleId, name: &str) -> HandleId {
        graph
            .create_handle(
                parent,
                NodeKind::RegularFile(ContentRef {
                    key: name.to_string(),
                    etag: None,
                }),
                name,
                Attributes::new(DEFAULT_FILE_MODE),
            )
            .unwrap()
    }

    fn dir(graph: &mut HandleGraph, parent: HandleId, name: &str) -> HandleId {
        graph
            .create_handle(
                parent,
                NodeKind::Directory,
                name,
                Attributes::new(DEFAULT_DIR_MODE),
            )
            .unwrap()
    }

    #[test]
    fn test_new_graph_has_root() {
        let g = graph();
        let root = g.root().unwrap();
        assert_eq!(root, HandleId::ROOT);
        assert_eq!(g.len(), 1);
        assert!(g.handle(root).unwrap().is_directory());
        assert_eq!(g.handle(root).unwrap().parent(), None);
        g.check_invariants().unwrap();
    }

    #[test]
    fn test_create_and_lookup() {
        let mut g = graph();
        let root = g.root().unwrap();
        let photos = dir(&mut g, root, "photos");
        let a = file(&mut g, photos, "a.jpg");

        assert_eq!(g.lookup_by_name(root, "photos"), Some(photos));
        assert_eq!(g.lookup_by_name(photos, "a.jpg"), Some(a));
        assert_eq!(g.lookup_by_index(photos, 0), Some(a));
        assert_eq!(g.lookup_by_name(root, "missing"), None);

        let handle = g.handle(a).unwrap();
        assert_eq!(handle.path(), "photos/a.jpg");
        assert_eq!(handle.parent(), Some(photos));
        assert_eq!(handle.attrs().fileid, a.inode());
        assert_eq!(handle.attrs().file_type, FileType::RegularFile);
        assert_eq!(g.handle(photos).unwrap().attrs().numlinks, 2);
        g.check_invariants().unwrap();
    }

    #[test]
    fn test_create_rejects_conflicts_and_bad_names() {
        let mut g = graph();
        let root = g.root().unwrap();
        let a = file(&mut g, root, "a");

        let err = g
            .create_handle(root, NodeKind::Directory, "a", Attributes::new(0o755))
            .unwrap_err();
        assert_eq!(err, GraphError::NameConflict { name: "a".into() });

        for bad in ["", ".", "..", "x/y"] {
            let err = g
                .create_handle(root, NodeKind::Directory, bad, Attributes::new(0o755))
                .unwrap_err();
            assert!(matches!(err, GraphError::InvalidName(_)));
        }

        let err = g
            .create_handle(a, NodeKind::Directory, "b", Attributes::new(0o755))
            .unwrap_err();
        assert_eq!(err, GraphError::NotADirectory(a));
        assert_eq!(g.len(), 2);
    }

    #[test]
    fn test_special_and_symlink_nodes() {
        let mut g = graph();
        let root = g.root().unwrap();
        let dev = g
            .create_handle(
                root,
                NodeKind::Special {
                    node_type: SpecialType::CharDevice,
                    rdev: DeviceId { major: 1, minor: 3 },
                },
                "null",
                Attributes::new(0o666),
            )
            .unwrap();
        let link = g
            .create_handle(
                root,
                NodeKind::Symlink("null".into()),
                "link",
                Attributes::new(0o777),
            )
            .unwrap();

        assert_eq!(g.handle(dev).unwrap().attrs().file_type, FileType::CharDevice);
        assert_eq!(g.handle(dev).unwrap().attrs().rawdev.minor, 3);
        assert!(matches!(
            g.handle(link).unwrap().kind(),
            HandleKind::Symlink { target } if target == "null"
        ));
    }

    #[test]
    fn test_detach_requires_empty_directory() {
        let mut g = graph();
        let root = g.root().unwrap();
        let d = dir(&mut g, root, "d");
        let f = file(&mut g, d, "f");

        assert_eq!(g.detach_and_free(d).unwrap_err(), GraphError::NotEmpty(d));

        let freed = g.detach_and_free(f).unwrap();
        assert_eq!(freed.name(), "f");
        assert!(g.directory(d).unwrap().is_empty());
        g.detach_and_free(d).unwrap();
        assert_eq!(g.len(), 1);
        g.check_invariants().unwrap();
    }

    #[test]
    fn test_free_subtree_is_post_order() {
        let mut g = graph();
        let root = g.root().unwrap();
        let sub = dir(&mut g, root, "sub");
        let leaf = file(&mut g, root, "leaf");
        let grandchild = file(&mut g, sub, "grandchild");

        let order = g.free_subtree(root).unwrap();

        assert_eq!(order, vec![grandchild, sub, leaf, root]);
        assert!(g.is_empty());
        assert_eq!(g.root(), None);
        assert!(g.release().is_empty());
    }

    #[test]
    fn test_free_subtree_follows_ordinals_not_names() {
        let mut g = graph();
        let root = g.root().unwrap();
        let z = file(&mut g, root, "z");
        let m = dir(&mut g, root, "m");
        let a = file(&mut g, root, "a");
        let inner = file(&mut g, m, "inner");

        g.detach_and_free(z).unwrap();
        g.check_invariants().unwrap();
        let z2 = file(&mut g, root, "z");

        let order = g.free_subtree(root).unwrap();

        assert_eq!(order, vec![inner, m, a, z2, root]);
        assert!(g.is_empty());
    }

    #[test]
    fn test_lookup_key_rejects_foreign_and_stale() {
        let mut g = graph();
        let root = g.root().unwrap();
        let f = file(&mut g, root, "f");
        let key = *g.handle(f).unwrap().key();

        assert_eq!(g.lookup_key(&key), Some(f));
        assert_eq!(g.lookup_key(&HandleKey::new(ExportId::new(), f.inode())), None);

        g.detach_and_free(f).unwrap();
        assert_eq!(g.lookup_key(&key), None);
    }

    #[test]
    fn test_mark_changed() {
        let mut g = graph();
        let root = g.root().unwrap();
        let f = file(&mut g, root, "f");
        let now = Utc::now();

        let attrs = g.mark_changed(f, now).unwrap();
        assert_eq!(attrs.change, 1);
        assert_eq!(attrs.ctime, now);
        assert_eq!(attrs.chgtime, now);
    }
}
