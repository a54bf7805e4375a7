use crate::thread::state::ThreadState;
use chrono::Utc;
use quill_types::ThreadKey;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Owns every thread's state and its lock.
///
/// One instance per process, passed around by `Arc` and injected where
/// needed; there is no global registry. The per-thread mutex guards the
/// `ThreadState` itself, so holding the lock and being allowed to mutate the
/// state are the same capability.
pub struct ThreadStateManager {
    threads: RwLock<HashMap<ThreadKey, Arc<Mutex<ThreadState>>>>,
}

/// RAII lock over one thread's state.
///
/// Dropping the guard releases the thread on every exit path, including
/// panic unwinds, so a crashed handler can never leave a thread stuck busy.
pub struct ThreadGuard {
    guard: OwnedMutexGuard<ThreadState>,
}

impl Deref for ThreadGuard {
    type Target = ThreadState;

    fn deref(&self) -> &ThreadState {
        &self.guard
    }
}

impl DerefMut for ThreadGuard {
    fn deref_mut(&mut self) -> &mut ThreadState {
        &mut self.guard
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerStats {
    pub active_threads: usize,
    pub locked_threads: usize,
}

impl ThreadStateManager {
    pub fn new() -> Self {
        Self {
            threads: RwLock::new(HashMap::new()),
        }
    }

    /// Get the shared handle for a thread, creating an empty state on first
    /// sight. Idempotent: a second call returns the same handle.
    pub async fn get_or_create(&self, key: &ThreadKey) -> Arc<Mutex<ThreadState>> {
        {
            let threads = self.threads.read().await;
            if let Some(existing) = threads.get(key) {
                return Arc::clone(existing);
            }
        }

        let mut threads = self.threads.write().await;
        Arc::clone(
            threads
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(ThreadState::new(key.clone())))),
        )
    }

    /// Attempt to take the thread's lock.
    ///
    /// A zero timeout fails fast: contention returns `None` immediately (the
    /// Busy signal) without touching any state. A non-zero timeout waits at
    /// most that long. There is no queue; callers that receive `None` answer
    /// the user rather than park the request.
    pub async fn try_acquire(&self, key: &ThreadKey, timeout: Duration) -> Option<ThreadGuard> {
        let state = self.get_or_create(key).await;

        let guard = if timeout.is_zero() {
            state.try_lock_owned().ok()?
        } else {
            tokio::time::timeout(timeout, state.lock_owned()).await.ok()?
        };

        Some(ThreadGuard { guard })
    }

    /// Remove threads idle longer than `max_age`. Threads whose lock is held
    /// are skipped regardless of age: an in-flight request keeps its state.
    /// Returns the number of removed threads.
    pub async fn cleanup_old_threads(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::seconds(0));

        let mut threads = self.threads.write().await;
        let before = threads.len();

        threads.retain(|key, state| match state.try_lock() {
            Ok(guard) => {
                let keep = guard.last_activity >= cutoff;
                if !keep {
                    tracing::info!("Removing idle thread {}", key);
                }
                keep
            }
            // Locked means in use right now
            Err(_) => true,
        });

        before - threads.len()
    }

    pub async fn stats(&self) -> ManagerStats {
        let threads = self.threads.read().await;
        let locked_threads = threads
            .values()
            .filter(|state| state.try_lock().is_err())
            .count();

        ManagerStats {
            active_threads: threads.len(),
            locked_threads,
        }
    }
}

impl Default for ThreadStateManager {
    fn default() -> Self {
        Self::new()
    }
}
