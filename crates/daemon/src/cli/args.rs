pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "s3ns")]
#[command(about = "Serve S3 buckets as cached directory trees")]
pub struct Args {
    /// Path to the config file (defaults to ~/.s3ns/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: crate::Command,
}
