//! Fixed worker pool draining the admission queue
//!
//! Each worker loops: dequeue one connection, process it end-to-end,
//! close the transport, take the next. Every per-connection failure is
//! contained in that iteration; nothing propagates to the listener, the
//! queue, or the other workers.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::hook::StoreHook;
use crate::log::{UploadLog, UploadLogEntry, UploadStatus};
use crate::net::{read_header, read_payload, UploadRequest};
use crate::protocol::UploadHeader;
use crate::queue::BoundedQueue;
use crate::store::{SenderStore, StoreOutcome};

/// Everything a worker needs to process uploads.
#[derive(Clone)]
pub struct WorkerContext {
    pub queue: Arc<BoundedQueue<UploadRequest>>,
    pub store: Arc<SenderStore>,
    pub hook: Arc<dyn StoreHook>,
    pub log: Option<Arc<UploadLog>>,
    pub max_payload_bytes: u64,
}

/// Fixed set of worker threads. `join` returns once the queue is closed
/// and drained and every worker has exited.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(count: usize, ctx: WorkerContext) -> Self {
        let handles = (0..count)
            .map(|_| {
                let ctx = ctx.clone();
                thread::spawn(move || worker_loop(ctx))
            })
            .collect();
        WorkerPool { handles }
    }

    pub fn join(self) {
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn worker_loop(ctx: WorkerContext) {
    while let Some(request) = ctx.queue.pop() {
        handle_upload(&ctx, request);
    }
}

/// Process one connection: header, payload, admission, hook. The transport
/// closes when `request.stream` drops at the end of this call, on every
/// path.
fn handle_upload(ctx: &WorkerContext, mut request: UploadRequest) {
    let queue_ms = request.accepted_at.elapsed().as_millis() as u64;

    let header = match read_header(&mut request.stream) {
        Ok(header) => header,
        Err(e) => {
            eprintln!("malformed header from {}: {:#}", request.peer, e);
            record(ctx, &request, queue_ms, UploadStatus::MalformedHeader, None, |entry| {
                entry.error = Some(format!("{e:#}"));
            });
            return;
        }
    };

    let payload = match read_payload(&mut request.stream, ctx.max_payload_bytes) {
        Ok(payload) => payload,
        Err(e) => {
            eprintln!(
                "upload {:?} from {} aborted mid-stream: {:#}",
                header.file_name, request.peer, e
            );
            record(ctx, &request, queue_ms, UploadStatus::TransportError, Some(&header), |entry| {
                entry.error = Some(format!("{e:#}"));
            });
            return;
        }
    };

    match ctx.store.store(header.sender_id, &header.file_name, &payload) {
        Ok(StoreOutcome::Stored { path, bytes }) => {
            let digest = blake3::hash(&payload).to_hex().to_string();
            eprintln!("saved {} ({} bytes) from {}", path.display(), bytes, request.peer);
            record(ctx, &request, queue_ms, UploadStatus::Stored, Some(&header), |entry| {
                entry.bytes = bytes;
                entry.path = Some(path.clone());
                entry.digest = Some(digest.clone());
            });
            ctx.hook.on_stored(&path);
        }
        Ok(StoreOutcome::Dropped) => {
            eprintln!(
                "thread{} is full, upload {:?} dropped",
                header.sender_id, header.file_name
            );
            record(ctx, &request, queue_ms, UploadStatus::Dropped, Some(&header), |entry| {
                entry.bytes = payload.len() as u64;
            });
        }
        Err(e) => {
            eprintln!(
                "storage error for {:?} from {}: {:#}",
                header.file_name, request.peer, e
            );
            record(ctx, &request, queue_ms, UploadStatus::StorageError, Some(&header), |entry| {
                entry.error = Some(format!("{e:#}"));
            });
        }
    }
}

fn record(
    ctx: &WorkerContext,
    request: &UploadRequest,
    queue_ms: u64,
    status: UploadStatus,
    header: Option<&UploadHeader>,
    fill: impl FnOnce(&mut UploadLogEntry),
) {
    let Some(log) = &ctx.log else {
        return;
    };
    let mut entry = UploadLogEntry::for_upload(request.upload_id, request.peer, status);
    entry.queue_ms = queue_ms;
    if let Some(header) = header {
        entry.sender_id = Some(header.sender_id);
        entry.file_name = Some(header.file_name.clone());
    }
    fill(&mut entry);
    if let Err(e) = log.add_entry(entry) {
        eprintln!("upload log write failed: {:#}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::NoopHook;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};
    use std::path::Path;
    use std::time::Instant;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    fn request_for(server: TcpStream) -> UploadRequest {
        let peer = server.peer_addr().unwrap();
        UploadRequest {
            stream: server,
            peer,
            accepted_at: Instant::now(),
            upload_id: Uuid::new_v4(),
        }
    }

    fn ctx_for(root: &Path, max_files: usize) -> WorkerContext {
        WorkerContext {
            queue: Arc::new(BoundedQueue::new(4)),
            store: Arc::new(SenderStore::new(root.to_path_buf(), max_files)),
            hook: Arc::new(NoopHook),
            log: None,
            max_payload_bytes: 1024 * 1024,
        }
    }

    #[test]
    fn stores_a_valid_upload() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx_for(dir.path(), 5);

        let (mut client, server) = loopback_pair();
        client.write_all(b"3|a.mp4\0hello").unwrap();
        drop(client);

        handle_upload(&ctx, request_for(server));
        assert_eq!(
            std::fs::read(dir.path().join("thread3/a.mp4")).unwrap(),
            b"hello"
        );
    }

    #[test]
    fn malformed_header_is_contained_and_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx_for(dir.path(), 5);

        let (mut client, server) = loopback_pair();
        client.write_all(b"no terminator here").unwrap();
        drop(client);

        handle_upload(&ctx, request_for(server));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn traversal_file_name_is_a_storage_error_not_a_panic() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx_for(dir.path(), 5);

        let (mut client, server) = loopback_pair();
        client.write_all(b"1|../escape.mp4\0data").unwrap();
        drop(client);

        handle_upload(&ctx, request_for(server));
        assert!(!dir.path().parent().unwrap().join("escape.mp4").exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn pool_drains_queue_then_exits() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx_for(dir.path(), 5);

        for i in 0..3 {
            let (mut client, server) = loopback_pair();
            client
                .write_all(format!("1|f{i}.mp4\0x").as_bytes())
                .unwrap();
            drop(client);
            ctx.queue.push(request_for(server)).unwrap();
        }
        ctx.queue.close();

        WorkerPool::spawn(2, ctx.clone()).join();
        assert_eq!(
            std::fs::read_dir(dir.path().join("thread1")).unwrap().count(),
            3
        );
    }
}
