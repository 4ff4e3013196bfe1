//! Shared fixtures for the multi-executor scenarios.

#![allow(dead_code)]

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use txoffload_runtime::{
    BlockingConnectionPool, ConnectionPool, CoordinatorConfig, Executor, Invocation,
    InvocationError, MethodSignature, PoolError, PooledConnection, System,
    TransactionalInterceptor,
};

pub const SAVE: &str = "save_then_sleep";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Blocking pool that reports when a thread enters `acquire`.
pub struct SignallingPool {
    inner: BlockingConnectionPool,
    entered: Mutex<Option<mpsc::Sender<()>>>,
}

impl SignallingPool {
    pub fn new(inner: BlockingConnectionPool) -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel();
        let pool = Self {
            inner,
            entered: Mutex::new(Some(tx)),
        };
        (pool, rx)
    }

    pub fn inner(&self) -> &BlockingConnectionPool {
        &self.inner
    }
}

impl ConnectionPool for SignallingPool {
    type Connection = PooledConnection;

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn acquire(&self) -> Result<PooledConnection, PoolError> {
        if let Some(tx) = self.entered.lock().unwrap().take() {
            let _ = tx.send(());
        }
        self.inner.acquire()
    }
}

/// A bounded computation pool, a blocking connection pool and a wired system.
pub struct Harness {
    pub compute: Executor,
    pub pool: Arc<BlockingConnectionPool>,
    pub system: Arc<System<u32>>,
}

impl Harness {
    pub fn new(
        enabled: bool,
        workers: usize,
        capacity: usize,
        connection_timeout: Duration,
    ) -> Self {
        Self::with_offload_threads(enabled, workers, 8, capacity, connection_timeout)
    }

    pub fn with_offload_threads(
        enabled: bool,
        workers: usize,
        offload_threads: usize,
        capacity: usize,
        connection_timeout: Duration,
    ) -> Self {
        init_logging();
        let compute = Executor::computation("test-compute", workers).unwrap();
        let pool = Arc::new(BlockingConnectionPool::new(
            "test-db",
            capacity,
            connection_timeout,
        ));
        let config = CoordinatorConfig {
            enabled,
            offload_threads,
            offload_thread_name: "test-offload".to_string(),
        };
        let system = System::builder()
            .config(config)
            .transaction_boundary(Arc::new(TransactionalInterceptor::new(Arc::clone(&pool))))
            .computation_pool(compute.reference())
            .method(MethodSignature::transactional(SAVE))
            .build()
            .unwrap();
        Self {
            compute,
            pool,
            system: Arc::new(system),
        }
    }

    pub fn rerouted(&self) -> u64 {
        self.system.coordinator().map_or(0, |c| c.rerouted())
    }

    /// Spawns `calls` transactional calls on the computation pool; each one
    /// saves and then sleeps for `delay` while holding its connection.
    pub fn spawn_calls(
        &self,
        calls: usize,
        delay: Duration,
    ) -> Vec<JoinHandle<Result<u32, InvocationError>>> {
        (0..calls)
            .map(|i| {
                let system = Arc::clone(&self.system);
                let context = self.compute.context();
                self.compute.handle().spawn(async move {
                    let save = system.method(SAVE).unwrap();
                    let invocation = Invocation::suspendable(save, async move {
                        tokio::time::sleep(delay).await;
                        Ok(i as u32)
                    })
                    .with_context(context);
                    system.invoke(invocation).await
                })
            })
            .collect()
    }

    pub fn join(
        &self,
        handles: Vec<JoinHandle<Result<u32, InvocationError>>>,
    ) -> Vec<Result<u32, InvocationError>> {
        self.compute.block_on(async move {
            let mut results = Vec::with_capacity(handles.len());
            for handle in handles {
                results.push(handle.await.unwrap());
            }
            results
        })
    }
}

/// Waits until `check` holds, polling every few milliseconds.
pub fn eventually(timeout: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    check()
}
