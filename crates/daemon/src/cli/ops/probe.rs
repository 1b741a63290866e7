use std::sync::Arc;

use anyhow::Context;
use clap::Args;

use common::upcall::ChannelConsumer;
use s3ns_daemon::process::{build_registry, probe_exports};

#[derive(Args, Debug, Clone)]
pub struct Probe {
    /// Only probe this export
    #[arg(long)]
    pub export: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Probe {
    type Error = ProbeError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let config = ctx.config().context("failed to load config")?;
        let exports = match &self.export {
            Some(name) => vec![config
                .export(name)
                .cloned()
                .with_context(|| format!("no export named '{}'", name))?],
            None => config.exports.clone(),
        };
        if exports.is_empty() {
            return Ok("No exports configured".to_string());
        }

        // Nothing runs the daemon here, so upcalls are never sent.
        let (consumer, _upcalls) = ChannelConsumer::unbounded();
        let registry =
            build_registry(&exports, Arc::new(consumer)).context("failed to create exports")?;

        let lines = probe_exports(&registry)
            .await
            .into_iter()
            .map(|(export, status)| match status {
                Ok(status) => format!("{} ({}): {}", export.name(), export.bucket(), status),
                Err(e) => format!("{} ({}): probe failed: {}", export.name(), export.bucket(), e),
            })
            .collect::<Vec<_>>();

        registry.release_all();
        Ok(lines.join("\n"))
    }
}
