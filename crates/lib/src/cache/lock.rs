//! Per-identity publish locks.
//!
//! Each package identity gets its own lock file under `<cache>/.locks/`.
//! Acquiring blocks until any other publisher of the same identity (in this or
//! another process) has released it.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::util::hash::{hash_bytes, truncate};

const LOCKS_DIR: &str = ".locks";

#[derive(Debug, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub started_at_unix: u64,
  pub key: String,
}

#[derive(Debug, Error)]
pub enum LockError {
  #[error("package is being published by another process: {key} (PID {pid}, started at Unix timestamp {started_at})")]
  Contention { key: String, pid: u32, started_at: u64 },

  #[error("package is being published by another process (lock file {lock_path})")]
  ContentionUnknown { lock_path: PathBuf },

  #[error("failed to create lock directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("failed to open lock file: {0}")]
  OpenFile(#[source] io::Error),

  #[error("failed to write lock metadata: {0}")]
  WriteMetadata(#[source] io::Error),

  #[error("failed to acquire lock: {0}")]
  LockFailed(#[source] io::Error),
}

/// An exclusive lock on one package identity, released on drop.
#[derive(Debug)]
pub struct PublishLock {
  file: File,
  lock_path: PathBuf,
}

impl PublishLock {
  /// Path of the lock file guarding `key` inside `cache_root`.
  pub fn path_for(cache_root: &Path, key: &str) -> PathBuf {
    let name = truncate(hash_bytes(key.as_bytes()));
    cache_root.join(LOCKS_DIR).join(format!("{}.lock", name))
  }

  /// Acquire the lock, waiting for any current holder.
  pub fn acquire(cache_root: &Path, key: &str) -> Result<Self, LockError> {
    let (file, lock_path) = open_lock_file(cache_root, key)?;
    debug!(key = %key, path = %lock_path.display(), "waiting for publish lock");
    lock(&file, true).map_err(LockError::LockFailed)?;
    Self::finish(file, lock_path, key)
  }

  /// Acquire the lock only if nobody holds it.
  pub fn try_acquire(cache_root: &Path, key: &str) -> Result<Self, LockError> {
    let (file, lock_path) = open_lock_file(cache_root, key)?;
    if let Err(err) = lock(&file, false) {
      if err.kind() == io::ErrorKind::WouldBlock {
        return Err(read_contention_error(&lock_path));
      }
      return Err(LockError::LockFailed(err));
    }
    Self::finish(file, lock_path, key)
  }

  fn finish(file: File, lock_path: PathBuf, key: &str) -> Result<Self, LockError> {
    write_metadata(&file, key)?;
    debug!(key = %key, "acquired publish lock");
    Ok(Self { file, lock_path })
  }

  /// Reads the lock metadata through the held handle.
  pub fn read_metadata(&self) -> io::Result<LockMetadata> {
    use std::io::{Seek, SeekFrom};

    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }
}

fn open_lock_file(cache_root: &Path, key: &str) -> Result<(File, PathBuf), LockError> {
  let lock_path = PublishLock::path_for(cache_root, key);
  if let Some(dir) = lock_path.parent() {
    std::fs::create_dir_all(dir).map_err(LockError::CreateDir)?;
  }

  let file = OpenOptions::new()
    .read(true)
    .write(true)
    .create(true)
    .truncate(false)
    .open(&lock_path)
    .map_err(LockError::OpenFile)?;
  Ok((file, lock_path))
}

fn write_metadata(file: &File, key: &str) -> Result<(), LockError> {
  let metadata = LockMetadata {
    version: 1,
    pid: std::process::id(),
    started_at_unix: SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .unwrap_or_default()
      .as_secs(),
    key: key.to_string(),
  };

  file.set_len(0).map_err(LockError::WriteMetadata)?;
  let mut writer = io::BufWriter::new(file);
  serde_json::to_writer_pretty(&mut writer, &metadata).map_err(|e| LockError::WriteMetadata(io::Error::other(e)))?;
  writer.flush().map_err(LockError::WriteMetadata)?;
  Ok(())
}

fn read_contention_error(lock_path: &Path) -> LockError {
  if let Ok(mut file) = File::open(lock_path) {
    let mut contents = String::new();
    if file.read_to_string(&mut contents).is_ok()
      && let Ok(metadata) = serde_json::from_str::<LockMetadata>(&contents)
    {
      return LockError::Contention {
        key: metadata.key,
        pid: metadata.pid,
        started_at: metadata.started_at_unix,
      };
    }
  }

  LockError::ContentionUnknown {
    lock_path: lock_path.to_path_buf(),
  }
}

#[cfg(unix)]
fn lock(file: &File, blocking: bool) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  let operation = if blocking {
    FlockOperation::LockExclusive
  } else {
    FlockOperation::NonBlockingLockExclusive
  };

  flock(file.as_fd(), operation).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn lock(file: &File, blocking: bool) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::HANDLE;
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;
  let flags = if blocking {
    LOCKFILE_EXCLUSIVE_LOCK
  } else {
    LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK
  };

  // SAFETY: OVERLAPPED is a plain data struct that is valid when zero-initialized.
  // LockFileEx is safe to call with a valid file handle and zeroed OVERLAPPED.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(handle, flags, 0, 1, 0, &mut overlapped)
  };

  if result == 0 {
    Err(io::Error::last_os_error())
  } else {
    Ok(())
  }
}
