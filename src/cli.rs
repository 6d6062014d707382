//! Shared CLI helpers and small reusable Clap fragments

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use crate::net::Config;

/// Default listen port; also what the interactive port prompt falls back
/// to on unparseable input.
pub const DEFAULT_PORT: u16 = 8080;

/// Common daemon options used by hopperd and the monolithic binary
#[derive(Clone, Debug, Parser)]
pub struct DaemonOpts {
    /// Bind host
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// TCP port for uploads
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Storage root for sender directories
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Worker threads draining the admission queue (0 = logical CPUs)
    #[arg(long, default_value_t = 0)]
    pub workers: usize,

    /// Admission queue depth
    #[arg(long, default_value_t = 5)]
    pub queue_depth: usize,

    /// Per-sender stored-file cap; uploads beyond it are dropped
    #[arg(long, default_value_t = 5)]
    pub max_files: usize,

    /// Payload size ceiling in MiB
    #[arg(long, default_value_t = 512)]
    pub max_payload_mb: u64,

    /// Socket read timeout in seconds (0 disables)
    #[arg(long, default_value_t = 30)]
    pub read_timeout_secs: u64,

    /// Seconds a worker spends in the display step after each store (0 disables)
    #[arg(long, default_value_t = 10)]
    pub display_secs: u64,

    /// Write JSONL upload log entries to file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Load settings from a TOML file; replaces the flags above, and fields
    /// the file omits take their defaults
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl DaemonOpts {
    pub fn to_config(&self) -> Result<Config> {
        if let Some(path) = &self.config {
            return Config::load(path);
        }
        Ok(Config {
            host: self.host.clone(),
            port: self.port,
            root: self.root.clone(),
            workers: self.workers,
            queue_depth: self.queue_depth,
            max_files: self.max_files,
            max_payload_mb: self.max_payload_mb,
            read_timeout_secs: self.read_timeout_secs,
            display_secs: self.display_secs,
            log_file: self.log_file.clone(),
        })
    }
}
