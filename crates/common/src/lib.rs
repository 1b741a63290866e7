/**
 * Error types shared by exports and namespace
 *  operations.
 */
pub mod error;
/**
 * Exports: a bucket bound to a handle graph,
 *  plus the process-wide registry of exports.
 */
pub mod export;
/**
 * The in-memory handle graph: handles, dirents
 *  and the per-directory dual index.
 */
pub mod graph;
pub mod lookup_cache;
/**
 * Merging paginated bucket listings into
 *  the handle graph.
 */
pub mod reconcile;
/**
 * Upcall interface to the upstream consumer and
 *  the periodic invalidation daemon.
 */
pub mod upcall;

pub mod prelude {
    pub use crate::error::{ExportError, NamespaceError};
    pub use crate::export::{DirEntry, DirListing, Export, ExportConfig, Registry};
    pub use crate::graph::{Attributes, ExportId, HandleGraph, HandleId, HandleKey, NodeKind};
    pub use crate::reconcile::{ReconcileError, ReconcileStats};
    pub use crate::upcall::{
        ChannelConsumer, InvalidationDaemon, ShutdownOutcome, Upcall, UpstreamConsumer,
    };
}
