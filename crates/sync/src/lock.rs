use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock backend error: {0}")]
    Backend(String),
}

/// Held lock. Releases on drop.
///
/// The release closure lets any backend (in-process map, Redis, SQL
/// advisory locks) plug into the same guard type.
pub struct LockGuard {
    key: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl LockGuard {
    pub fn new(key: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            key: key.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
        debug!(key = %self.key, "lock released");
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("key", &self.key).finish()
    }
}

/// Mutual exclusion keyed by an arbitrary string, shared by all workers.
///
/// `try_acquire` never blocks: contention returns `Ok(None)` and the caller
/// is expected to skip the item for now rather than spin. The `ttl` bounds
/// how long a crashed holder can wedge a key.
#[async_trait]
pub trait LockManager: Send + Sync {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockGuard>, LockError>;
}

#[derive(Default)]
struct LockTable {
    held: HashMap<String, (u64, Instant)>,
}

/// In-process lock manager.
///
/// Correct for a single-process deployment and for tests; multi-process
/// deployments substitute a shared-backend implementation of the same
/// trait.
pub struct InProcessLocks {
    table: Arc<Mutex<LockTable>>,
    next_token: AtomicU64,
}

impl InProcessLocks {
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(LockTable::default())),
            next_token: AtomicU64::new(1),
        }
    }
}

impl Default for InProcessLocks {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockManager for InProcessLocks {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockGuard>, LockError> {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        let now = Instant::now();

        {
            let mut table = self
                .table
                .lock()
                .map_err(|e| LockError::Backend(e.to_string()))?;

            if let Some((_, expires)) = table.held.get(key) {
                if *expires > now {
                    return Ok(None);
                }
                // Expired holder; take the key over
            }
            table.held.insert(key.to_string(), (token, now + ttl));
        }

        let table = Arc::clone(&self.table);
        let release_key = key.to_string();
        Ok(Some(LockGuard::new(key, move || {
            if let Ok(mut table) = table.lock() {
                // Only release if we still hold it; an expired lock may have
                // been taken over by another worker
                if matches!(table.held.get(&release_key), Some((t, _)) if *t == token) {
                    table.held.remove(&release_key);
                }
            }
        })))
    }
}
