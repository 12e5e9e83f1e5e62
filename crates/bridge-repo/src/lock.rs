//! Per-`(userID, repoURL, path)` advisory file locks.
//!
//! Process-local only — no cross-process mutual exclusion is claimed.
//! Acquisition is cancellable by timing the wait out; `tokio::sync::Mutex`'s
//! lock future is cancel-safe, so a timed-out waiter is dropped cleanly off
//! the internal wait queue and leaks nothing.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use bridge_core::BridgeError;

type Key = (i64, String, String);

/// Process-wide singleton.
#[derive(Default)]
pub struct FileLockManager {
    locks: DashMap<Key, Arc<Mutex<()>>>,
}

/// A held lock. Releasing is just dropping the handle; `release()` is
/// provided for call sites that want the release to read explicitly.
pub struct FileLockHandle {
    _guard: OwnedMutexGuard<()>,
}

impl FileLockHandle {
    pub fn release(self) {}
}

impl FileLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire an exclusive lock on `(user_id, repo_url, path)`, waiting at
    /// most `ceiling`. Non-exclusive locking is not currently offered —
    /// every acquirer is exclusive.
    pub async fn acquire_file_lock(
        &self,
        user_id: i64,
        repo_url: &str,
        path: &str,
        ceiling: Duration,
    ) -> Result<FileLockHandle, BridgeError> {
        let key: Key = (user_id, repo_url.to_string(), path.to_string());
        let mutex = self.locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone();

        match tokio::time::timeout(ceiling, mutex.lock_owned()).await {
            Ok(guard) => Ok(FileLockHandle { _guard: guard }),
            Err(_) => Err(BridgeError::LockTimeout(format!("{repo_url}:{path}"))),
        }
    }

    /// Acquire `(user_id, repo_url, path)` immediately or fail. Used for
    /// fail-fast guards (e.g. a second concurrent `/sync`) where waiting out
    /// the normal ceiling would leave the caller hanging instead of telling
    /// them a sync is already running.
    pub fn try_acquire_file_lock(&self, user_id: i64, repo_url: &str, path: &str) -> Result<FileLockHandle, BridgeError> {
        let key: Key = (user_id, repo_url.to_string(), path.to_string());
        let mutex = self.locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone();
        mutex.try_lock_owned().map(|guard| FileLockHandle { _guard: guard }).map_err(|_| BridgeError::LockTimeout(format!("{repo_url}:{path}")))
    }
}
