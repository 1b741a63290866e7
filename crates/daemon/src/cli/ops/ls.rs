use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Args;

use common::export::{DirEntry, Export};
use common::graph::{Attributes, FileType};
use common::upcall::ChannelConsumer;
use s3ns_daemon::process::build_registry;

#[derive(Args, Debug, Clone)]
pub struct Ls {
    /// Export to list (may be omitted when only one is configured)
    #[arg(long)]
    pub export: Option<String>,

    /// Path inside the bucket (defaults to the root)
    #[arg(default_value = "/")]
    pub path: String,

    /// Entries fetched per enumeration call
    #[arg(long, default_value_t = 256)]
    pub page_size: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum LsError {
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Ls {
    type Error = LsError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let config = ctx.config().context("failed to load config")?;
        let export_config = match &self.export {
            Some(name) => config
                .export(name)
                .with_context(|| format!("no export named '{}'", name))?,
            None => match config.exports.as_slice() {
                [only] => only,
                [] => return Err(anyhow!("no exports configured").into()),
                _ => return Err(anyhow!("several exports configured, pick one with --export").into()),
            },
        };

        let (consumer, _upcalls) = ChannelConsumer::unbounded();
        let registry = build_registry(std::slice::from_ref(export_config), Arc::new(consumer))
            .context("failed to create export")?;
        let export = registry
            .find(export_config.display_name())
            .context("export vanished from the registry")?;

        let output = list(&export, &self.path, self.page_size).await;
        registry.release_all();
        Ok(output?)
    }
}

async fn list(export: &Export, path: &str, page_size: usize) -> anyhow::Result<String> {
    let target = export
        .lookup_path(path)
        .await
        .with_context(|| format!("cannot resolve '{}'", path))?;
    let attrs = export.getattr(target)?;
    if attrs.file_type != FileType::Directory {
        return Ok(render_line(path.trim_matches('/'), &attrs));
    }

    let mut entries = Vec::new();
    let mut cookie = 0;
    loop {
        let listing = export.read_dir(target, cookie, page_size).await?;
        if let Some(last) = listing.entries.last() {
            cookie = last.cookie;
        }
        entries.extend(listing.entries);
        if let Some(e) = listing.error {
            let mut output = render(&entries);
            output.push_str(&format!("\n(listing incomplete: {})", e));
            return Ok(output);
        }
        if listing.eof {
            break;
        }
    }

    if entries.is_empty() {
        return Ok("No items found".to_string());
    }
    Ok(render(&entries))
}

fn render(entries: &[DirEntry]) -> String {
    entries
        .iter()
        .map(|e| render_line(&e.name, &e.attrs))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_line(name: &str, attrs: &Attributes) -> String {
    let kind = match attrs.file_type {
        FileType::Directory => "dir",
        FileType::RegularFile => "file",
        FileType::Symlink => "link",
        _ => "special",
    };
    if attrs.file_type == FileType::Directory {
        format!("{:<7} {:>12}  {}/", kind, "-", name)
    } else {
        format!(
            "{:<7} {:>12}  {}  {}",
            kind,
            attrs.size,
            attrs.mtime.format("%Y-%m-%d %H:%M"),
            name
        )
    }
}
