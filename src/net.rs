//! TCP plumbing: the accepting listener, the stream-level frame reader,
//! and the upload client
//!
//! The daemon side is blocking throughout: one accept thread feeds the
//! admission queue, workers own one connection each from dequeue to close.
//! Backpressure is the queue itself; when it is full the accept loop
//! stalls and new peers wait in the OS backlog.

use anyhow::{bail, Context, Result};
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::hook::{DisplayHook, NoopHook, StoreHook};
use crate::log::UploadLog;
use crate::protocol::{UploadHeader, HEADER_TERMINATOR, MAX_HEADER_LEN, PAYLOAD_CHUNK};
use crate::queue::BoundedQueue;
use crate::store::SenderStore;
use crate::worker::{WorkerContext, WorkerPool};

/// Runtime configuration for the ingest daemon. Field defaults mirror the
/// CLI defaults, so a partial TOML file fills in sensibly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Storage root; sender directories are created beneath it.
    pub root: PathBuf,
    /// Worker threads draining the admission queue (0 = logical CPUs).
    pub workers: usize,
    /// Admission queue depth: pending connections buffered before the
    /// accept loop stalls.
    pub queue_depth: usize,
    /// Per-sender stored-file cap; uploads beyond it are dropped.
    pub max_files: usize,
    pub max_payload_mb: u64,
    /// Socket read timeout in seconds (0 disables).
    pub read_timeout_secs: u64,
    /// Seconds a worker spends in the display step after each store
    /// (0 disables).
    pub display_secs: u64,
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "0.0.0.0".to_string(),
            port: 8080,
            root: PathBuf::from("."),
            workers: 0,
            queue_depth: 5,
            max_files: 5,
            max_payload_mb: 512,
            read_timeout_secs: 30,
            display_secs: 10,
            log_file: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        toml::from_str(&data).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn max_payload_bytes(&self) -> u64 {
        self.max_payload_mb * 1024 * 1024
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_secs > 0).then(|| Duration::from_secs(self.read_timeout_secs))
    }

    pub fn display_delay(&self) -> Duration {
        Duration::from_secs(self.display_secs)
    }

    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }
}

/// An accepted, not-yet-processed connection. Owned by the admission queue
/// until exactly one worker takes it; dropping the stream closes the
/// transport.
#[derive(Debug)]
pub struct UploadRequest {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub accepted_at: Instant,
    pub upload_id: Uuid,
}

/// Bind, retrying with caller-supplied replacement ports while the address
/// is already taken. Any other bind failure, or a fallback that declines
/// to supply a port, is fatal. Ask the listener for its local address when
/// binding port 0.
pub fn bind_with_fallback(
    host: &str,
    port: u16,
    mut fallback: impl FnMut(u16) -> Option<u16>,
) -> Result<TcpListener> {
    let mut port = port;
    loop {
        match TcpListener::bind((host, port)) {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == ErrorKind::AddrInUse => match fallback(port) {
                Some(next) => {
                    eprintln!("port {} is already in use, retrying on {}", port, next);
                    port = next;
                }
                None => {
                    return Err(e).with_context(|| format!("bind {}:{}", host, port));
                }
            },
            Err(e) => return Err(e).with_context(|| format!("bind {}:{}", host, port)),
        }
    }
}

// Socket tuning: disable Nagle, bound reads, enlarge the receive buffer
#[allow(unused_variables)]
fn tune_socket(stream: &TcpStream, read_timeout: Option<Duration>) {
    let _ = stream.set_nodelay(true);
    let _ = stream.set_read_timeout(read_timeout);
    #[cfg(unix)]
    {
        use std::os::fd::AsRawFd;
        let fd = stream.as_raw_fd();
        unsafe {
            let sz: libc::c_int = 4 * 1024 * 1024;
            let p = &sz as *const _ as *const libc::c_void;
            let _ = libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_RCVBUF,
                p,
                std::mem::size_of_val(&sz) as libc::socklen_t,
            );
        }
    }
}

/// Scan the stream one byte at a time until the header terminator, then
/// parse. The scan is bounded by `MAX_HEADER_LEN`; a peer that closes
/// early, stalls past the read timeout, or never sends the terminator
/// fails here.
pub fn read_header<R: Read>(stream: &mut R) -> Result<UploadHeader> {
    let mut header = Vec::with_capacity(128);
    let mut byte = [0u8; 1];
    loop {
        let n = match stream.read(&mut byte) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("read header byte"),
        };
        if n == 0 {
            bail!("connection closed before header terminator");
        }
        if byte[0] == HEADER_TERMINATOR {
            break;
        }
        header.push(byte[0]);
        if header.len() > MAX_HEADER_LEN {
            bail!("no header terminator within {} bytes", MAX_HEADER_LEN);
        }
    }
    let text = std::str::from_utf8(&header).context("header is not UTF-8")?;
    UploadHeader::parse(text)
}

/// Drain the payload in fixed-size chunks until the peer closes. There is
/// no length prefix on the wire; `max_bytes` is the memory ceiling.
pub fn read_payload<R: Read>(stream: &mut R, max_bytes: u64) -> Result<Vec<u8>> {
    let mut payload = Vec::new();
    let mut buf = vec![0u8; PAYLOAD_CHUNK];
    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("read payload"),
        };
        if payload.len() as u64 + n as u64 > max_bytes {
            bail!("payload exceeds the {} byte ceiling", max_bytes);
        }
        payload.extend_from_slice(&buf[..n]);
    }
    Ok(payload)
}

/// Push one file to an ingest daemon under its own name. Returns bytes
/// sent. The server sends nothing back; closing the write side ends the
/// upload.
pub fn send_file(
    addr: &str,
    sender_id: u64,
    file: &Path,
    progress: Option<&ProgressBar>,
) -> Result<u64> {
    let name = file
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("{} has no usable file name", file.display()))?;
    let header = UploadHeader {
        sender_id,
        file_name: name.to_string(),
    }
    .encode()?;

    let mut stream =
        TcpStream::connect(addr).with_context(|| format!("connect {}", addr))?;
    let _ = stream.set_nodelay(true);
    stream.write_all(&header).context("send header")?;

    let mut reader = File::open(file).with_context(|| format!("open {}", file.display()))?;
    let mut buf = vec![0u8; PAYLOAD_CHUNK];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        stream.write_all(&buf[..n]).context("send payload")?;
        total += n as u64;
        if let Some(pb) = progress {
            pb.inc(n as u64);
        }
    }
    Ok(total)
}

/// Push an in-memory payload under an explicit file name.
pub fn send_bytes(addr: &str, sender_id: u64, file_name: &str, payload: &[u8]) -> Result<()> {
    let header = UploadHeader {
        sender_id,
        file_name: file_name.to_string(),
    }
    .encode()?;
    let mut stream =
        TcpStream::connect(addr).with_context(|| format!("connect {}", addr))?;
    stream.write_all(&header).context("send header")?;
    stream.write_all(payload).context("send payload")?;
    Ok(())
}

/// A bound ingest daemon: listener, admission queue, and the pieces the
/// worker pool needs. `run` consumes it.
pub struct IngestServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: Config,
    queue: Arc<BoundedQueue<UploadRequest>>,
    store: Arc<SenderStore>,
    hook: Arc<dyn StoreHook>,
    log: Option<Arc<UploadLog>>,
    shutting_down: Arc<AtomicBool>,
}

impl IngestServer {
    /// Validate the root, bind the port (consulting `fallback` while the
    /// requested port is taken), and assemble the pipeline. Startup
    /// failures here are the only fatal errors in the system.
    pub fn bind(config: Config, fallback: impl FnMut(u16) -> Option<u16>) -> Result<Self> {
        fs::create_dir_all(&config.root)
            .with_context(|| format!("invalid storage root {}", config.root.display()))?;

        let listener = bind_with_fallback(&config.host, config.port, fallback)?;
        let local_addr = listener.local_addr().context("listener local addr")?;

        let queue = Arc::new(BoundedQueue::new(config.queue_depth));
        let store = Arc::new(SenderStore::new(config.root.clone(), config.max_files));
        let hook: Arc<dyn StoreHook> = if config.display_secs > 0 {
            Arc::new(DisplayHook::new(config.display_delay()))
        } else {
            Arc::new(NoopHook)
        };
        let log = config
            .log_file
            .clone()
            .map(|path| Arc::new(UploadLog::new(path)));

        Ok(IngestServer {
            listener,
            local_addr,
            config,
            queue,
            store,
            hook,
            log,
            shutting_down: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle for triggering drain-and-exit from another thread (Ctrl-C
    /// handler, tests).
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            queue: Arc::clone(&self.queue),
            shutting_down: Arc::clone(&self.shutting_down),
            addr: self.local_addr,
        }
    }

    /// Accept until shutdown, then drain: close admissions, let workers
    /// finish queued uploads, join them, return.
    pub fn run(self) -> Result<()> {
        let workers = WorkerPool::spawn(
            self.config.worker_count(),
            WorkerContext {
                queue: Arc::clone(&self.queue),
                store: Arc::clone(&self.store),
                hook: Arc::clone(&self.hook),
                log: self.log.clone(),
                max_payload_bytes: self.config.max_payload_bytes(),
            },
        );
        eprintln!(
            "hopper listening on {} root={} workers={} queue={} cap={}",
            self.local_addr,
            self.store.root().display(),
            self.config.worker_count(),
            self.queue.capacity(),
            self.config.max_files,
        );

        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(conn) => conn,
                Err(e) => {
                    eprintln!("accept error: {}", e);
                    continue;
                }
            };
            if self.shutting_down.load(Ordering::SeqCst) {
                // The wake-up connection from shutdown, or a late peer.
                break;
            }
            tune_socket(&stream, self.config.read_timeout());
            let request = UploadRequest {
                stream,
                peer,
                accepted_at: Instant::now(),
                upload_id: Uuid::new_v4(),
            };
            if self.queue.push(request).is_err() {
                eprintln!("admission queue closed, draining");
                break;
            }
        }

        self.queue.close();
        workers.join();
        eprintln!("drained, exiting");
        Ok(())
    }
}

/// Cloneable trigger for graceful shutdown of a running server.
#[derive(Clone)]
pub struct ServerHandle {
    queue: Arc<BoundedQueue<UploadRequest>>,
    shutting_down: Arc<AtomicBool>,
    addr: SocketAddr,
}

impl ServerHandle {
    /// Close admissions and nudge the accept loop off its blocking
    /// `accept()`. Queued uploads still drain before the server exits.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.queue.close();
        let mut addr = self.addr;
        if addr.ip().is_unspecified() {
            addr.set_ip(IpAddr::V4(Ipv4Addr::LOCALHOST));
        }
        let _ = TcpStream::connect(addr);
    }
}
