use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use s3ns_store::{ObjectStoreClient, Storage};

use super::{Export, ExportConfig};
use crate::error::ExportError;
use crate::graph::ExportId;
use crate::upcall::UpstreamConsumer;

/// Process-wide set of live exports.
///
/// Create the registry before any export and drop it after every export
/// has been released. Anything still registered on drop is released then.
#[derive(Debug, Default)]
pub struct Registry {
    exports: RwLock<BTreeMap<ExportId, Arc<Export>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `config`, build an S3 client for it and register the export.
    pub fn create_export(
        &self,
        config: ExportConfig,
        upstream: Arc<dyn UpstreamConsumer>,
    ) -> Result<Arc<Export>, ExportError> {
        config.validate()?;
        let store_config = config.store_config()?;
        let storage = Storage::new(&store_config).map_err(|e| {
            tracing::error!(bucket = %config.bucket_name, error = %e, "store client initialization failed");
            ExportError::BackendInitFailed(e)
        })?;
        self.register(config, Arc::new(storage), upstream)
    }

    /// Register an export over an already built client.
    pub fn create_export_with_client(
        &self,
        config: ExportConfig,
        client: Arc<dyn ObjectStoreClient>,
        upstream: Arc<dyn UpstreamConsumer>,
    ) -> Result<Arc<Export>, ExportError> {
        config.validate()?;
        self.register(config, client, upstream)
    }

    fn register(
        &self,
        config: ExportConfig,
        client: Arc<dyn ObjectStoreClient>,
        upstream: Arc<dyn UpstreamConsumer>,
    ) -> Result<Arc<Export>, ExportError> {
        let mut exports = self.exports.write();
        if exports
            .values()
            .any(|e| e.name() == config.display_name())
        {
            return Err(ExportError::ConfigInvalid(format!(
                "an export named '{}' already exists",
                config.display_name()
            )));
        }

        let export = Arc::new(Export::new(config, client, upstream));
        exports.insert(export.id(), export.clone());

        tracing::info!(
            export = %export.name(),
            export_id = %export.id(),
            bucket = %export.bucket(),
            "export created"
        );
        Ok(export)
    }

    pub fn get(&self, id: ExportId) -> Option<Arc<Export>> {
        self.exports.read().get(&id).cloned()
    }

    pub fn find(&self, name: &str) -> Option<Arc<Export>> {
        self.exports
            .read()
            .values()
            .find(|e| e.name() == name)
            .cloned()
    }

    /// Snapshot of the live exports.
    pub fn exports(&self) -> Vec<Arc<Export>> {
        self.exports.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.exports.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.exports.read().is_empty()
    }

    /// Unregister and tear down an export. Returns the number of handles
    /// freed, or `None` if no such export was registered.
    pub fn release_export(&self, id: ExportId) -> Option<usize> {
        let export = self.exports.write().remove(&id)?;
        Some(export.release().len())
    }

    /// Release every export. Returns the total number of handles freed.
    pub fn release_all(&self) -> usize {
        let exports = std::mem::take(&mut *self.exports.write());
        exports.values().map(|e| e.release().len()).sum()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        let remaining = self.exports.get_mut();
        if !remaining.is_empty() {
            tracing::warn!(
                exports = remaining.len(),
                "registry dropped with live exports, releasing them"
            );
            for export in remaining.values() {
                export.release();
            }
            remaining.clear();
        }
    }
}
