//! Dedicated executors.
//!
//! Two kinds of executor take part in every rerouted call: the bounded
//! computation pool that runs cooperative continuations, and the blocking
//! offload executor whose threads may park inside resource acquisition. Both
//! are tokio multi-thread runtimes built here, sized independently, with
//! their threads tagged by [ExecutorId].
//!
//! A blocking executor runs its work on the runtime's blocking pool, capped
//! at the configured thread count. Its single async worker never blocks, so
//! the runtime's time and I/O drivers keep running while every blocking
//! thread is parked.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::thread;

use tokio::runtime::{Builder, Handle, Runtime};

use txoffload_kernel::{ExecutorId, ExecutorRef, SchedulingContext, WiringError};

/// Which role an executor was built for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutorKind {
    Computation,
    Blocking,
}

/// An owned runtime plus the reference handed out to contexts.
///
/// Dropping an executor shuts its runtime down in the background: threads
/// still parked in blocking calls are abandoned rather than joined.
pub struct Executor {
    runtime: Option<Runtime>,
    reference: ExecutorRef,
    kind: ExecutorKind,
    threads: usize,
}

impl Executor {
    /// Bounded computation pool with exactly `workers` threads.
    pub fn computation(name: &str, workers: usize) -> Result<Self, WiringError> {
        Self::build(name, workers, ExecutorKind::Computation)
    }

    /// Computation pool sized to the available parallelism, at least two threads.
    pub fn computation_default(name: &str) -> Result<Self, WiringError> {
        let workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .max(2);
        Self::computation(name, workers)
    }

    /// Blocking offload executor with up to `threads` threads that may block.
    ///
    /// Blocking work must go through [ExecutorRef::spawn_blocking].
    pub fn blocking(name: &str, threads: usize) -> Result<Self, WiringError> {
        Self::build(name, threads, ExecutorKind::Blocking)
    }

    fn build(name: &str, threads: usize, kind: ExecutorKind) -> Result<Self, WiringError> {
        if threads == 0 {
            return Err(WiringError::ExecutorStart {
                name: name.to_string(),
                reason: "thread count must be positive".to_string(),
            });
        }
        let id = ExecutorId::allocate();
        let mut builder = Builder::new_multi_thread();
        match kind {
            ExecutorKind::Computation => builder.worker_threads(threads),
            ExecutorKind::Blocking => builder.worker_threads(1).max_blocking_threads(threads),
        };
        let runtime = builder
            .thread_name(name)
            .on_thread_start(move || id.enter_thread())
            .enable_all()
            .build()
            .map_err(|e| WiringError::ExecutorStart {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        let reference = ExecutorRef::new(id, Arc::<str>::from(name), runtime.handle().clone());
        log::debug!("started {kind:?} executor `{name}` ({id}) with {threads} threads");
        Ok(Self {
            runtime: Some(runtime),
            reference,
            kind,
            threads,
        })
    }

    pub fn reference(&self) -> &ExecutorRef {
        &self.reference
    }

    pub fn id(&self) -> ExecutorId {
        self.reference.id()
    }

    pub fn handle(&self) -> &Handle {
        self.reference.handle()
    }

    pub fn kind(&self) -> ExecutorKind {
        self.kind
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// A scheduling context resuming on this executor.
    pub fn context(&self) -> SchedulingContext {
        SchedulingContext::new(self.reference.clone())
            .with_attribute("executor", self.reference.name())
    }

    /// Runs `future` to completion from a thread outside this executor.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.reference.handle().block_on(future)
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            log::debug!("shutting down executor `{}`", self.reference.name());
            runtime.shutdown_background();
        }
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("reference", &self.reference)
            .field("kind", &self.kind)
            .field("threads", &self.threads)
            .finish()
    }
}
