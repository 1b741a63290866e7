use std::path::PathBuf;

use clap::Args;

use s3ns_daemon::{spawn_service, ConfigError, ServiceError};

#[derive(Args, Debug, Clone)]
pub struct Run {
    /// Override the invalidation daemon period in seconds (0 disables it)
    #[arg(long)]
    pub up_interval: Option<u64>,

    /// Directory for log files (logs to stdout only if not set)
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Run {
    type Error = RunError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut config = ctx.config()?;
        if let Some(secs) = self.up_interval {
            config.up_interval_secs = secs;
        }
        if self.log_dir.is_some() {
            config.log_dir = self.log_dir.clone();
        }

        let report = spawn_service(&config).await?;
        Ok(format!(
            "service stopped: {} handles released, {} upcalls issued",
            report.released_handles, report.upcalls_logged
        ))
    }
}
