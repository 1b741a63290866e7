//! Error types shared across the namespace cache.

use s3ns_store::StoreError;

use crate::graph::{ExportId, GraphError};

/// Failures creating an export. Creation is atomic: on error nothing is
/// registered.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("invalid export configuration: {0}")]
    ConfigInvalid(String),
    #[error("failed to initialize the store client: {0}")]
    BackendInitFailed(#[source] StoreError),
}

/// Failures of namespace operations on a live export.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NamespaceError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no entry named '{0}'")]
    NotFound(String),
    #[error("name of {len} bytes exceeds the {max} byte limit")]
    NameTooLong { len: usize, max: usize },
    #[error("export has been released")]
    Released,
    #[error("handle belongs to export {0}")]
    ForeignHandle(ExportId),
}
