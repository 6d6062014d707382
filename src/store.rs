//! Per-sender storage: collision-free naming, capacity-capped admission,
//! atomic writes
//!
//! Every sender owns the directory `{root}/thread{id}`. The capacity check
//! and the write run as one admission decision under a per-sender lock, so
//! two workers racing on the same sender cannot jointly exceed the cap.

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Outcome of one admission attempt.
#[derive(Debug)]
pub enum StoreOutcome {
    /// Payload written; final path and byte count.
    Stored { path: PathBuf, bytes: u64 },
    /// Sender directory at capacity; payload discarded.
    Dropped,
}

/// Storage root plus the per-sender admission locks shared by all workers.
pub struct SenderStore {
    root: PathBuf,
    max_files_per_sender: usize,
    locks: Mutex<HashMap<u64, Arc<Mutex<()>>>>,
}

impl SenderStore {
    pub fn new(root: PathBuf, max_files_per_sender: usize) -> Self {
        SenderStore {
            root,
            max_files_per_sender,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one sender's files.
    pub fn sender_dir(&self, sender_id: u64) -> PathBuf {
        self.root.join(format!("thread{sender_id}"))
    }

    fn sender_lock(&self, sender_id: u64) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.lock().entry(sender_id).or_default())
    }

    /// Admit and persist one payload. Creates the sender directory on first
    /// use, resolves a collision-free name, then writes atomically (temp
    /// file in the target directory, rename into place) while the sender's
    /// file count is strictly below the cap. At capacity the payload is
    /// discarded and `Dropped` is reported.
    pub fn store(&self, sender_id: u64, file_name: &str, payload: &[u8]) -> Result<StoreOutcome> {
        let name = sanitize_file_name(file_name)?;
        let dir = self.sender_dir(sender_id);
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;

        let lock = self.sender_lock(sender_id);
        let _guard = lock.lock();

        if count_files(&dir)? >= self.max_files_per_sender {
            return Ok(StoreOutcome::Dropped);
        }

        let dest = unique_path(&dir, name);
        let mut tmp = NamedTempFile::new_in(&dir)
            .with_context(|| format!("create temp file in {}", dir.display()))?;
        tmp.write_all(payload).context("write payload")?;
        tmp.persist(&dest)
            .with_context(|| format!("rename into {}", dest.display()))?;

        Ok(StoreOutcome::Stored {
            path: dest,
            bytes: payload.len() as u64,
        })
    }
}

/// Reject names that could escape the sender directory. Senders control
/// only the final component; anything resembling a path is refused.
pub fn sanitize_file_name(name: &str) -> Result<&str> {
    if name.is_empty() {
        bail!("empty file name");
    }
    if name.contains('\0') {
        bail!("file name contains NUL");
    }
    if name.contains('/') || name.contains('\\') {
        bail!("file name contains a path separator");
    }
    if name == "." || name == ".." {
        bail!("file name is a directory reference");
    }
    Ok(name)
}

/// Count regular files directly inside `dir`. In-flight temp files (dot
/// prefixed) do not count against the cap.
fn count_files(dir: &Path) -> Result<usize> {
    let mut n = 0;
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if entry.file_name().to_string_lossy().starts_with(".tmp") {
            continue;
        }
        n += 1;
    }
    Ok(n)
}

/// First writer keeps the requested name; collisions take `"name (2).ext"`,
/// then `"name (3).ext"`, and so on.
fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = split_name(name);
    let mut n = 2usize;
    loop {
        let numbered = match ext {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        let candidate = dir.join(numbered);
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    }
}
