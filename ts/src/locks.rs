//! `LockManager`: file locks with read/write compatibility, a global
//! executor semaphore, and sorted multi-lock acquisition.
//!
//! The state-guarding idiom (one `Mutex`-protected inner struct) is
//! grounded on `scheduler/core.rs`'s `Scheduler`; unlike the scheduler this
//! manager never queues — the global semaphore is a hard ceiling that fails
//! closed (`E404`) rather than waiting for a slot, per this spec's rules.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::ids::{generate_id, now_ms};

const GLOBAL_EXECUTOR_CAPACITY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockType {
    Read,
    Write,
}

impl LockType {
    /// READ/READ is the only compatible pairing; WRITE conflicts with
    /// everything, including another WRITE.
    fn compatible_with(self, other: Self) -> bool {
        matches!((self, other), (LockType::Read, LockType::Read))
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Lock {
    pub lock_id: String,
    pub file_path: String,
    pub holder_id: String,
    pub lock_type: LockType,
    pub acquired_at: i64,
    /// Informational only — auto-release by time is forbidden.
    pub expires_at: Option<i64>,
}

/// Normalize a path lexically (no filesystem access — the file may not
/// exist yet) so that equivalent references share one lock table entry.
fn normalize_path(path: &str) -> String {
    let mut out = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out.to_string_lossy().to_string()
}

struct Inner {
    held: HashMap<String, Vec<Lock>>,
    by_id: HashMap<String, String>, // lock_id -> normalized path
    global_executors: Vec<String>,
}

pub struct LockManager {
    inner: Mutex<Inner>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                held: HashMap::new(),
                by_id: HashMap::new(),
                global_executors: Vec::new(),
            }),
        }
    }

    pub async fn acquire_lock(&self, path: &str, holder: &str, lock_type: LockType) -> StoreResult<Lock> {
        let normalized = normalize_path(path);
        let mut inner = self.inner.lock().await;

        if let Some(existing) = inner.held.get(&normalized) {
            if let Some(conflict) = existing.iter().find(|l| !lock_type.compatible_with(l.lock_type)) {
                debug!(path = %normalized, holder = %conflict.holder_id, "LockManager::acquire_lock: conflict");
                return Err(StoreError::LockAcquisition {
                    path: normalized,
                    reason: format!("held by {} as {:?}", conflict.holder_id, conflict.lock_type),
                });
            }
        }

        let lock = Lock {
            lock_id: generate_id("lock", &normalized),
            file_path: normalized.clone(),
            holder_id: holder.to_string(),
            lock_type,
            acquired_at: now_ms(),
            expires_at: None,
        };

        inner.held.entry(normalized.clone()).or_default().push(lock.clone());
        inner.by_id.insert(lock.lock_id.clone(), normalized);
        Ok(lock)
    }

    /// Acquire every path, sorted first, so that any two callers lock the
    /// same set of paths in the same order and can never deadlock against
    /// each other.
    pub async fn acquire_multiple_locks(&self, paths: &[String], holder: &str, lock_type: LockType) -> StoreResult<Vec<Lock>> {
        let mut sorted = paths.to_vec();
        sorted.sort();

        let mut acquired = Vec::with_capacity(sorted.len());
        for path in &sorted {
            match self.acquire_lock(path, holder, lock_type).await {
                Ok(lock) => acquired.push(lock),
                Err(e) => {
                    warn!(path, "LockManager::acquire_multiple_locks: rolling back partial acquisition");
                    for lock in &acquired {
                        let _ = self.release_lock(&lock.lock_id).await;
                    }
                    return Err(e);
                }
            }
        }
        Ok(acquired)
    }

    pub async fn release_lock(&self, lock_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let Some(path) = inner.by_id.remove(lock_id) else {
            return Err(StoreError::LockRelease(lock_id.to_string()));
        };
        if let Some(locks) = inner.held.get_mut(&path) {
            locks.retain(|l| l.lock_id != lock_id);
            if locks.is_empty() {
                inner.held.remove(&path);
            }
        }
        Ok(())
    }

    pub async fn acquire_global_semaphore(&self, executor_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.global_executors.len() >= GLOBAL_EXECUTOR_CAPACITY {
            return Err(StoreError::SemaphoreExceeded {
                capacity: GLOBAL_EXECUTOR_CAPACITY,
            });
        }
        inner.global_executors.push(executor_id.to_string());
        debug!(%executor_id, count = inner.global_executors.len(), "LockManager::acquire_global_semaphore");
        Ok(())
    }

    pub async fn release_global_semaphore(&self, executor_id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(pos) = inner.global_executors.iter().position(|id| id == executor_id) {
            inner.global_executors.remove(pos);
        }
    }

    /// Expiration is informational only; this always fails closed.
    pub async fn auto_release_expired_locks(&self) -> StoreResult<()> {
        Err(StoreError::ForbiddenAutoRelease)
    }

    pub async fn global_executor_count(&self) -> usize {
        self.inner.lock().await.global_executors.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_read_compatible() {
        let mgr = LockManager::new();
        mgr.acquire_lock("/a", "x", LockType::Read).await.unwrap();
        assert!(mgr.acquire_lock("/a", "y", LockType::Read).await.is_ok());
    }

    #[tokio::test]
    async fn test_write_conflicts_with_read() {
        let mgr = LockManager::new();
        mgr.acquire_lock("/a", "x", LockType::Read).await.unwrap();
        assert!(mgr.acquire_lock("/a", "z", LockType::Write).await.is_err());
    }

    #[tokio::test]
    async fn test_scenario_lock_compatibility() {
        // End-to-end scenario 8 from the testable-properties list.
        let mgr = LockManager::new();
        let x = mgr.acquire_lock("/a", "X", LockType::Read).await.unwrap();
        let y = mgr.acquire_lock("/a", "Y", LockType::Read).await.unwrap();
        assert!(mgr.acquire_lock("/a", "Z", LockType::Write).await.is_err());

        mgr.release_lock(&x.lock_id).await.unwrap();
        assert!(mgr.acquire_lock("/a", "Z", LockType::Write).await.is_err());

        mgr.release_lock(&y.lock_id).await.unwrap();
        assert!(mgr.acquire_lock("/a", "Z", LockType::Write).await.is_ok());
    }

    #[tokio::test]
    async fn test_release_unknown_lock_fails() {
        let mgr = LockManager::new();
        assert!(matches!(mgr.release_lock("nope").await, Err(StoreError::LockRelease(_))));
    }

    #[tokio::test]
    async fn test_sorted_multi_acquire() {
        let mgr = LockManager::new();
        let paths = vec!["/z".to_string(), "/a".to_string(), "/m".to_string()];
        let locks = mgr.acquire_multiple_locks(&paths, "x", LockType::Write).await.unwrap();
        let acquired_paths: Vec<_> = locks.iter().map(|l| l.file_path.clone()).collect();
        assert_eq!(acquired_paths, vec!["/a", "/m", "/z"]);
    }

    #[tokio::test]
    async fn test_multi_acquire_rolls_back_on_conflict() {
        let mgr = LockManager::new();
        mgr.acquire_lock("/m", "other", LockType::Write).await.unwrap();

        let paths = vec!["/a".to_string(), "/m".to_string()];
        assert!(mgr.acquire_multiple_locks(&paths, "x", LockType::Write).await.is_err());

        // /a must have been rolled back, so a fresh writer can take it
        assert!(mgr.acquire_lock("/a", "fresh", LockType::Write).await.is_ok());
    }

    #[tokio::test]
    async fn test_global_semaphore_ceiling() {
        let mgr = LockManager::new();
        for i in 0..4 {
            mgr.acquire_global_semaphore(&format!("exec-{i}")).await.unwrap();
        }
        assert!(mgr.acquire_global_semaphore("exec-4").await.is_err());
        mgr.release_global_semaphore("exec-0").await;
        assert!(mgr.acquire_global_semaphore("exec-4").await.is_ok());
    }

    #[tokio::test]
    async fn test_auto_release_always_forbidden() {
        let mgr = LockManager::new();
        assert!(matches!(
            mgr.auto_release_expired_locks().await,
            Err(StoreError::ForbiddenAutoRelease)
        ));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("a/./b/../c"), "a/c");
    }
}
