//! Hopper - media upload ingest daemon and upload client
//!
//! Design goals:
//! - One upload per connection, bounded everywhere: header scan, payload
//!   size, admission queue depth, per-sender file count
//! - Drop under pressure instead of growing without bound
//! - Blocking I/O, a fixed worker pool, no per-connection threads

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};

use hopper::cli::{DaemonOpts, DEFAULT_PORT};
use hopper::net::{send_file, IngestServer};
use hopper::scan::scan_media;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Hopper - bounded-queue media upload ingest with per-sender storage caps"
)]
struct Args {
    /// File to upload (not required with --serve or --list)
    #[arg(required_unless_present_any = ["serve", "list"])]
    file: Option<PathBuf>,

    /// Run the ingest daemon
    #[arg(long)]
    serve: bool,

    /// List stored media under the root, newest first
    #[arg(long)]
    list: bool,

    /// Upload target address (client mode)
    #[arg(long, default_value = "127.0.0.1:8080")]
    to: String,

    /// Sender id to upload under (client mode)
    #[arg(long, default_value_t = 0)]
    sender: u64,

    /// Media extension for --list
    #[arg(long, default_value = "mp4")]
    ext: String,

    /// Hide the upload progress bar
    #[arg(short, long)]
    quiet: bool,

    #[command(flatten)]
    daemon: DaemonOpts,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.serve {
        return serve_main(&args.daemon);
    }
    if args.list {
        return list_main(&args.daemon.root, &args.ext);
    }

    let file = args
        .file
        .as_deref()
        .context("a file to upload is required")?;
    send_main(&args.to, args.sender, file, args.quiet)
}

fn serve_main(opts: &DaemonOpts) -> Result<()> {
    let config = opts.to_config()?;
    let server = IngestServer::bind(config, prompt_for_port)?;

    let handle = server.handle();
    ctrlc::set_handler(move || {
        eprintln!("\ninterrupted, draining in-flight uploads...");
        handle.shutdown();
    })
    .context("set Ctrl-C handler")?;

    server.run()
}

/// Interactive recovery for a taken port: ask the operator for a
/// replacement. Unparseable input falls back to the default port; a
/// closed stdin gives up and lets the bind error surface.
fn prompt_for_port(taken: u16) -> Option<u16> {
    eprintln!("Port {taken} is already in use. Please enter a different port number:");
    let mut line = String::new();
    match std::io::stdin().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => match line.trim().parse::<u16>() {
            Ok(port) => Some(port),
            Err(_) => {
                eprintln!("Invalid port number. Using default port {DEFAULT_PORT}.");
                Some(DEFAULT_PORT)
            }
        },
    }
}

fn list_main(root: &Path, extension: &str) -> Result<()> {
    let entries = scan_media(root, extension)?;
    if entries.is_empty() {
        println!("no .{} files under {}", extension, root.display());
        return Ok(());
    }
    for entry in entries {
        let modified = chrono::DateTime::<chrono::Local>::from(entry.modified);
        println!(
            "{:>12}  {}  {}",
            entry.size,
            modified.format("%Y-%m-%d %H:%M:%S"),
            entry.path.display()
        );
    }
    Ok(())
}

fn send_main(addr: &str, sender_id: u64, file: &Path, quiet: bool) -> Result<()> {
    let size = std::fs::metadata(file)
        .with_context(|| format!("stat {}", file.display()))?
        .len();

    let progress = if quiet {
        None
    } else {
        let pb = ProgressBar::new(size);
        pb.set_style(ProgressStyle::with_template(
            "{bar:40.green} {bytes}/{total_bytes} {msg}",
        )?);
        pb.set_message(
            file.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
        Some(pb)
    };

    let sent = send_file(addr, sender_id, file, progress.as_ref())?;

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }
    eprintln!("uploaded {} ({} bytes) to {} as sender {}", file.display(), sent, addr, sender_id);
    Ok(())
}
