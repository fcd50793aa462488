//! Advisory file locks and atomic record writes.
//!
//! A store is shared by every tasklink process pointed at it. Lock files are
//! plain empty files held with `flock` (via fs2); the guard releases on drop,
//! including when a process dies mid-operation.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::error::{Error, Result};

/// Default lock timeout in milliseconds
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Exclusive lock on one lock file, held until dropped.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Poll for the lock until `timeout_ms` elapses, then fail with `LockFailed`.
    pub fn acquire(path: impl AsRef<Path>, timeout_ms: u64) -> Result<Self> {
        let path = path.as_ref();
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let file = open_lock_file(path)?;

        loop {
            if try_lock(&file)? {
                return Ok(Self::held(file, path));
            }
            if Instant::now() >= deadline {
                tracing::warn!(path = %path.display(), timeout_ms, "lock wait timed out");
                return Err(Error::LockFailed(path.to_path_buf()));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Single attempt; `None` when another holder has it.
    pub fn try_acquire(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        let file = open_lock_file(path)?;
        Ok(try_lock(&file)?.then(|| Self::held(file, path)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn held(file: File, path: &Path) -> Self {
        Self {
            file,
            path: path.to_path_buf(),
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Lock every path, in sorted order, deduplicated.
///
/// All callers sort identically so overlapping sets cannot deadlock. Locks
/// taken before a timeout are released when the partial vector drops.
pub fn acquire_ordered(paths: &[PathBuf], timeout_ms: u64) -> Result<Vec<FileLock>> {
    let mut sorted: Vec<&PathBuf> = paths.iter().collect();
    sorted.sort();
    sorted.dedup();

    sorted
        .into_iter()
        .map(|path| FileLock::acquire(path, timeout_ms))
        .collect()
}

/// Replace `path` with `data` via a synced temp file and rename.
///
/// Readers see the old or the new content, never a torn write. Takes no lock.
pub fn write_atomic(path: impl AsRef<Path>, data: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let dir = path
        .parent()
        .ok_or_else(|| Error::OperationFailed(format!("no parent for {}", path.display())))?;
    fs::create_dir_all(dir)?;

    let temp_path = temp_sibling(path);
    let written = File::create(&temp_path).and_then(|mut temp| {
        temp.write_all(data)?;
        temp.sync_all()
    });
    let result = written.and_then(|()| fs::rename(&temp_path, path));
    if let Err(err) = result {
        let _ = fs::remove_file(&temp_path);
        return Err(err.into());
    }
    Ok(())
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?)
}

/// `Ok(false)` on contention, `Err` on any other failure.
fn try_lock(file: &File) -> Result<bool> {
    match file.try_lock_exclusive() {
        Ok(()) => Ok(true),
        Err(err) if is_contended(&err) => Ok(false),
        Err(err) => Err(Error::Io(err)),
    }
}

fn is_contended(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::WouldBlock {
        return true;
    }
    // Windows reports sharing and lock violations as raw OS errors.
    cfg!(windows) && matches!(err.raw_os_error(), Some(32) | Some(33))
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(
        "{name}.tmp.{}.{}",
        std::process::id(),
        TEMP_SEQ.fetch_add(1, Ordering::Relaxed)
    ))
}
