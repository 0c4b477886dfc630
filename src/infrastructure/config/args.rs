use super::app_config::LogLevel;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "fitfeed",
    version,
    about = "Image cache and feed prefetcher for social fitness feeds",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH", global = true)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum, global = true)]
    pub log_level: Option<LogLevel>,

    /// Memory cache budget in MiB.
    #[arg(long, value_name = "MB", global = true)]
    pub cost_limit_mb: Option<usize>,

    /// Expire cached images after this many seconds.
    #[arg(long, value_name = "SECS", global = true)]
    pub max_age_secs: Option<u64>,

    /// Pixels per point used to size thumbnails.
    #[arg(long, global = true)]
    pub display_scale: Option<f32>,

    /// Posts prefetched per batch.
    #[arg(long, global = true)]
    pub max_items: Option<usize>,

    /// `host:port` probed for reachability.
    #[arg(long, value_name = "ADDR", global = true)]
    pub probe_addr: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Subcommand)]
pub enum Command {
    /// Load one image through the cache and print its size.
    Load {
        /// Absolute http(s) image URL.
        url: String,

        /// Edge length in points; scaled by the display scale.
        #[arg(long, default_value_t = 40.0)]
        points: f32,

        /// Load the image this many times to show cache reuse.
        #[arg(long, default_value_t = 2)]
        repeat: u32,
    },
    /// Download a feed page and warm the cache for its posts.
    Prefetch {
        /// Path to a JSON file or an http(s) URL returning a JSON array of posts.
        feed: String,
    },
}
