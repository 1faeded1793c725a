//! Process-wide advisory lock over a sentinel file.
//!
//! This is the critical-section primitive every mutating repository
//! operation acquires before touching `.git/index` or `refs/heads/*`.
//! Acquisition is non-blocking: a caller that loses the race sees
//! [`StoreError::Locked`] immediately rather than queueing, since long-running
//! Git plumbing (receive-pack) runs outside this lock entirely.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{flock, FlockArg};

use crate::error::{StoreError, StoreResult};

/// A held advisory lock on `lockPath`. Releasing happens on drop, so it
/// happens on every exit path of `with_lock` - including panics unwinding
/// through the body, though we don't rely on that; we also unlock explicitly
/// after `body` returns.
struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Best-effort: failing to unlock here just means the OS will release
        // it when the fd is closed anyway (which it's about to be).
        let _ = flock(&self.file, FlockArg::Unlock);
    }
}

/// Open-or-create `lock_path`, acquire a non-blocking exclusive flock, run
/// `body`, then release. The lock file is never unlinked - stale lock files
/// left behind by a crashed process are harmless under advisory locking,
/// since a new process's flock attempt isn't affected by whether some other
/// process merely *has the file open*, only by whether it holds the lock.
pub fn with_lock<T>(lock_path: &Path, body: impl FnOnce() -> StoreResult<T>) -> StoreResult<T> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(lock_path)
        .map_err(|e| StoreError::generic(format!("opening lock file {lock_path:?}: {e}")))?;

    match flock(&file, FlockArg::LockExclusiveNonblock) {
        Ok(()) => {}
        Err(Errno::EWOULDBLOCK) => return Err(StoreError::Locked),
        Err(e) => {
            return Err(StoreError::generic(format!(
                "acquiring lock {lock_path:?}: {e}"
            )))
        }
    }
    let guard = LockGuard { file };

    let result = body();
    drop(guard);
    result
}

pub fn lock_path_for(repo_path: &Path) -> PathBuf {
    repo_path.join(".git").join("txn.lock")
}
