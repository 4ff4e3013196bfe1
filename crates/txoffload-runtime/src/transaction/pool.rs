//! Connection pool contract and a blocking fixed-capacity pool.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;

use txoffload_kernel::InvocationError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("{pool} - connection is not available, request timed out after {waited_ms}ms")]
    Timeout { pool: String, waited_ms: u128 },
    #[error("{pool} - pool has been closed")]
    Closed { pool: String },
    #[error("commit failed: {0}")]
    Commit(String),
}

impl From<PoolError> for InvocationError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Commit(reason) => InvocationError::Transaction(reason),
            other => InvocationError::Resource(other.to_string()),
        }
    }
}

/// A pooled resource that can be committed or rolled back exactly once.
pub trait Connection: Send + 'static {
    fn commit(self) -> Result<(), PoolError>;
    fn rollback(self);
}

/// Resource pool contract.
///
/// `acquire` may block the calling thread for as long as the pool's own
/// timeout allows; callers are expected to keep it off the computation pool.
pub trait ConnectionPool: Send + Sync + 'static {
    type Connection: Connection;

    fn name(&self) -> &str;

    fn acquire(&self) -> Result<Self::Connection, PoolError>;
}

/// Counters exposed by [BlockingConnectionPool].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub acquired: u64,
    pub committed: u64,
    pub rolled_back: u64,
    pub timed_out: u64,
    pub in_use: usize,
}

struct PoolState {
    available: usize,
    closed: bool,
}

struct Shared {
    name: String,
    capacity: usize,
    connection_timeout: Duration,
    state: Mutex<PoolState>,
    released: Condvar,
    acquired: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
    timed_out: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release(&self) {
        let mut state = self.lock();
        state.available += 1;
        drop(state);
        self.released.notify_one();
    }
}

/// Fixed-capacity pool; `acquire` parks the calling thread until a connection
/// is released or the connection timeout elapses.
#[derive(Clone)]
pub struct BlockingConnectionPool {
    shared: Arc<Shared>,
}

impl BlockingConnectionPool {
    pub fn new(name: impl Into<String>, capacity: usize, connection_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                capacity,
                connection_timeout,
                state: Mutex::new(PoolState {
                    available: capacity,
                    closed: false,
                }),
                released: Condvar::new(),
                acquired: AtomicU64::new(0),
                committed: AtomicU64::new(0),
                rolled_back: AtomicU64::new(0),
                timed_out: AtomicU64::new(0),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Fails every pending and future acquisition.
    pub fn close(&self) {
        self.shared.lock().closed = true;
        self.shared.released.notify_all();
    }

    pub fn stats(&self) -> PoolStats {
        let available = self.shared.lock().available;
        PoolStats {
            acquired: self.shared.acquired.load(Ordering::SeqCst),
            committed: self.shared.committed.load(Ordering::SeqCst),
            rolled_back: self.shared.rolled_back.load(Ordering::SeqCst),
            timed_out: self.shared.timed_out.load(Ordering::SeqCst),
            in_use: self.shared.capacity - available,
        }
    }
}

impl ConnectionPool for BlockingConnectionPool {
    type Connection = PooledConnection;

    fn name(&self) -> &str {
        &self.shared.name
    }

    fn acquire(&self) -> Result<PooledConnection, PoolError> {
        let started = Instant::now();
        let deadline = started + self.shared.connection_timeout;
        let mut state = self.shared.lock();
        loop {
            if state.closed {
                return Err(PoolError::Closed {
                    pool: self.shared.name.clone(),
                });
            }
            if state.available > 0 {
                state.available -= 1;
                let number = self.shared.acquired.fetch_add(1, Ordering::SeqCst) + 1;
                return Ok(PooledConnection {
                    number,
                    shared: Some(Arc::clone(&self.shared)),
                });
            }
            let now = Instant::now();
            if now >= deadline {
                self.shared.timed_out.fetch_add(1, Ordering::SeqCst);
                return Err(PoolError::Timeout {
                    pool: self.shared.name.clone(),
                    waited_ms: started.elapsed().as_millis(),
                });
            }
            state = self
                .shared
                .released
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }
}

impl fmt::Debug for BlockingConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingConnectionPool")
            .field("name", &self.shared.name)
            .field("capacity", &self.shared.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Connection checked out of a [BlockingConnectionPool]; returns itself on drop.
pub struct PooledConnection {
    number: u64,
    shared: Option<Arc<Shared>>,
}

impl PooledConnection {
    /// Sequence number of the acquisition that produced this connection.
    pub fn number(&self) -> u64 {
        self.number
    }
}

impl Connection for PooledConnection {
    fn commit(mut self) -> Result<(), PoolError> {
        if let Some(shared) = self.shared.take() {
            shared.committed.fetch_add(1, Ordering::SeqCst);
            shared.release();
        }
        Ok(())
    }

    fn rollback(mut self) {
        if let Some(shared) = self.shared.take() {
            shared.rolled_back.fetch_add(1, Ordering::SeqCst);
            shared.release();
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.rolled_back.fetch_add(1, Ordering::SeqCst);
            shared.release();
        }
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("number", &self.number)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn acquire_and_release_updates_counters() {
        let pool = BlockingConnectionPool::new("p", 2, Duration::from_millis(50));
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_eq!((a.number(), b.number()), (1, 2));
        assert_eq!(pool.stats().in_use, 2);
        a.commit().unwrap();
        b.rollback();
        let stats = pool.stats();
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.committed, 1);
        assert_eq!(stats.rolled_back, 1);
    }

    #[test]
    fn exhausted_pool_times_out() {
        let pool = BlockingConnectionPool::new("tiny", 1, Duration::from_millis(30));
        let _held = pool.acquire().unwrap();
        let err = pool.acquire().unwrap_err();
        assert!(matches!(err, PoolError::Timeout { .. }));
        assert!(err.to_string().starts_with("tiny - connection is not available"));
        assert_eq!(pool.stats().timed_out, 1);
    }

    #[test]
    fn waiter_is_woken_by_release() {
        let pool = BlockingConnectionPool::new("p", 1, Duration::from_secs(5));
        let held = pool.acquire().unwrap();
        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.acquire().map(|c| c.number()))
        };
        thread::sleep(Duration::from_millis(20));
        drop(held);
        assert_eq!(waiter.join().unwrap(), Ok(2));
    }

    #[test]
    fn close_fails_waiters() {
        let pool = BlockingConnectionPool::new("p", 1, Duration::from_secs(5));
        let _held = pool.acquire().unwrap();
        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.acquire().map(|c| c.number()))
        };
        thread::sleep(Duration::from_millis(20));
        pool.close();
        assert!(matches!(
            waiter.join().unwrap(),
            Err(PoolError::Closed { .. })
        ));
    }

    #[test]
    fn pool_errors_convert_without_rewording() {
        let err = PoolError::Closed { pool: "db".into() };
        let message = err.to_string();
        assert_eq!(InvocationError::from(err), InvocationError::Resource(message));
        assert_eq!(
            InvocationError::from(PoolError::Commit("serialization failure".into())),
            InvocationError::Transaction("serialization failure".into())
        );
    }
}
