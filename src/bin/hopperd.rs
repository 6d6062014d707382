use anyhow::{Context, Result};
use clap::Parser;

use hopper::cli::DaemonOpts;
use hopper::net::IngestServer;

fn main() -> Result<()> {
    let opts = DaemonOpts::parse();
    let mut config = opts.to_config()?;

    // Validate root directory exists and is a directory
    if !config.root.exists() {
        anyhow::bail!("Error: Root directory does not exist: {}", config.root.display());
    }
    if !config.root.is_dir() {
        anyhow::bail!("Error: Root path is not a directory: {}", config.root.display());
    }

    // Canonicalize the path for better logging
    config.root = std::fs::canonicalize(&config.root)
        .with_context(|| format!("Failed to canonicalize root path: {}", config.root.display()))?;

    println!("Starting hopper daemon:");
    println!("  Root: {}", config.root.display());
    println!("  Bind: {}:{}", config.host, config.port);
    println!("  Workers: {}", config.worker_count());
    println!(
        "  Queue depth: {} / per-sender cap: {}",
        config.queue_depth, config.max_files
    );
    if config.display_secs > 0 {
        println!("  Display step: {}s per stored upload", config.display_secs);
    }
    if let Some(ref log_file) = config.log_file {
        println!("  Upload log: {}", log_file.display());
    }

    // Managed daemon: no interactive port prompting, a taken port is fatal
    let server = IngestServer::bind(config, |_| None)?;

    let handle = server.handle();
    ctrlc::set_handler(move || {
        eprintln!("\nshutting down, draining in-flight uploads...");
        handle.shutdown();
    })
    .context("set Ctrl-C handler")?;

    server.run()
}
