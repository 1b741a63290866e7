//! Handles: the nodes of the namespace graph and their identities.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::directory::Directory;
use super::GraphError;

/// Inode of every export's root directory.
pub const ROOT_INODE: u64 = 1;

/// Size in bytes of a [`HandleKey`] on the wire.
pub const HANDLE_KEY_LEN: usize = 24;

/// Default mode for objects discovered in a listing.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Default mode for folders discovered in a listing, and for the root.
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// Identifies an export for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExportId(Uuid);

impl ExportId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ExportId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Arena identifier of a handle within one export's graph. Equal to the
/// handle's inode number, which is never reused within a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandleId(u64);

impl HandleId {
    pub const ROOT: HandleId = HandleId(ROOT_INODE);

    pub(crate) fn from_inode(inode: u64) -> Self {
        Self(inode)
    }

    pub fn inode(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque, fixed-size handle blob handed to upstream consumers.
///
/// Layout: 16 bytes of export id followed by the inode, big-endian.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleKey([u8; HANDLE_KEY_LEN]);

impl HandleKey {
    pub fn new(export: ExportId, inode: u64) -> Self {
        let mut bytes = [0u8; HANDLE_KEY_LEN];
        bytes[..16].copy_from_slice(export.as_uuid().as_bytes());
        bytes[16..].copy_from_slice(&inode.to_be_bytes());
        Self(bytes)
    }

    /// Parse a key received from the wire.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, GraphError> {
        let bytes: [u8; HANDLE_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| GraphError::InvalidHandleKey { len: bytes.len() })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn export_id(&self) -> ExportId {
        let mut id = [0u8; 16];
        id.copy_from_slice(&self.0[..16]);
        ExportId::from_uuid(Uuid::from_bytes(id))
    }

    pub fn inode(&self) -> u64 {
        let mut inode = [0u8; 8];
        inode.copy_from_slice(&self.0[16..]);
        u64::from_be_bytes(inode)
    }
}

impl fmt::Debug for HandleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandleKey({}/{})", self.export_id(), self.inode())
    }
}

impl fmt::Display for HandleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.export_id(), self.inode())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Directory,
    RegularFile,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialType {
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
}

impl From<SpecialType> for FileType {
    fn from(t: SpecialType) -> Self {
        match t {
            SpecialType::CharDevice => FileType::CharDevice,
            SpecialType::BlockDevice => FileType::BlockDevice,
            SpecialType::Fifo => FileType::Fifo,
            SpecialType::Socket => FileType::Socket,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceId {
    pub major: u32,
    pub minor: u32,
}

/// Attribute snapshot of a handle.
///
/// `file_type`, `fileid` and `numlinks` are owned by the graph and set when
/// the handle is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    pub file_type: FileType,
    pub mode: u32,
    pub size: u64,
    pub space_used: u64,
    pub numlinks: u32,
    pub fileid: u64,
    pub rawdev: DeviceId,
    pub atime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
    pub ctime: DateTime<Utc>,
    /// Last time the change counter moved
    pub chgtime: DateTime<Utc>,
    pub change: u64,
}

impl Attributes {
    /// Fresh attributes stamped with the current time.
    pub fn new(mode: u32) -> Self {
        let now = Utc::now();
        Self {
            file_type: FileType::RegularFile,
            mode,
            size: 0,
            space_used: 0,
            numlinks: 1,
            fileid: 0,
            rawdev: DeviceId::default(),
            atime: now,
            mtime: now,
            ctime: now,
            chgtime: now,
            change: 0,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self.space_used = size;
        self
    }

    /// Stamp every timestamp with `t`, the only time a listing reports.
    pub fn with_mtime(mut self, t: DateTime<Utc>) -> Self {
        self.atime = t;
        self.mtime = t;
        self.ctime = t;
        self.chgtime = t;
        self
    }
}

/// Where a regular file's bytes live in the bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRef {
    pub key: String,
    pub etag: Option<String>,
}

/// What to create; the graph turns this into a [`HandleKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    RegularFile(ContentRef),
    Symlink(String),
    Special {
        node_type: SpecialType,
        rdev: DeviceId,
    },
}

impl NodeKind {
    pub(crate) fn file_type(&self) -> FileType {
        match self {
            NodeKind::Directory => FileType::Directory,
            NodeKind::RegularFile(_) => FileType::RegularFile,
            NodeKind::Symlink(_) => FileType::Symlink,
            NodeKind::Special { node_type, .. } => (*node_type).into(),
        }
    }
}

#[derive(Debug)]
pub enum HandleKind {
    Directory(Directory),
    RegularFile { content: ContentRef },
    Symlink { target: String },
    Special { node_type: SpecialType, rdev: DeviceId },
}

impl From<NodeKind> for HandleKind {
    fn from(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Directory => HandleKind::Directory(Directory::default()),
            NodeKind::RegularFile(content) => HandleKind::RegularFile { content },
            NodeKind::Symlink(target) => HandleKind::Symlink { target },
            NodeKind::Special { node_type, rdev } => HandleKind::Special { node_type, rdev },
        }
    }
}

/// A directory entry referring to a handle: which directory, at which
/// ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirentRef {
    pub dir: HandleId,
    pub ordinal: u64,
}

/// One namespace node.
#[derive(Debug)]
pub struct Handle {
    pub(crate) id: HandleId,
    pub(crate) key: HandleKey,
    pub(crate) attrs: Attributes,
    pub(crate) parent: Option<HandleId>,
    pub(crate) name: String,
    pub(crate) path: String,
    pub(crate) dirents: Vec<DirentRef>,
    pub(crate) kind: HandleKind,
}

impl Handle {
    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn key(&self) -> &HandleKey {
        &self.key
    }

    pub fn attrs(&self) -> &Attributes {
        &self.attrs
    }

    /// `None` only for the root.
    pub fn parent(&self) -> Option<HandleId> {
        self.parent
    }

    /// Debug name; the last path component.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path relative to the bucket root, without a trailing delimiter. Empty
    /// for the root.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn dirents(&self) -> &[DirentRef] {
        &self.dirents
    }

    pub fn kind(&self) -> &HandleKind {
        &self.kind
    }

    pub fn as_directory(&self) -> Option<&Directory> {
        match &self.kind {
            HandleKind::Directory(dir) => Some(dir),
            _ => None,
        }
    }

    pub(crate) fn as_directory_mut(&mut self) -> Option<&mut Directory> {
        match &mut self.kind {
            HandleKind::Directory(dir) => Some(dir),
            _ => None,
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, HandleKind::Directory(_))
    }
}
