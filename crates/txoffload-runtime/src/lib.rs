//! # txoffload-runtime
//!
//! Anti-deadlock coordinator for suspendable transactional calls.
//!
//! A transactional method that returns a deferred result acquires its
//! database connection when the call enters the transactional boundary, on
//! whatever thread happens to be running it. When that thread belongs to a
//! small computation pool and connections are scarce, every worker can end up
//! parked in acquisition while the continuation that would release a
//! connection waits for a free worker.
//!
//! The [AntiDeadlockInterceptor](coordinator::AntiDeadlockInterceptor) runs
//! immediately before the boundary and moves the blocking prefix of such
//! calls onto a dedicated [blocking executor](executor::Executor::blocking).
//! After the first suspension the continuation resumes on the caller's
//! executor and the result is delivered through a
//! [CompletionHandle](txoffload_kernel::CompletionHandle).
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use txoffload_runtime::{
//!     BlockingConnectionPool, CoordinatorConfig, Executor, Invocation, MethodSignature, System,
//!     TransactionalInterceptor,
//! };
//!
//! let compute = Executor::computation("compute", 2).unwrap();
//! let pool = Arc::new(BlockingConnectionPool::new("db", 1, Duration::from_secs(5)));
//! let system = System::<u64>::builder()
//!     .config(CoordinatorConfig::enabled())
//!     .transaction_boundary(Arc::new(TransactionalInterceptor::new(pool)))
//!     .computation_pool(compute.reference())
//!     .method(MethodSignature::transactional("save"))
//!     .build()
//!     .unwrap();
//!
//! let save = system.method("save").unwrap();
//! let reply = system.invoke(
//!     Invocation::suspendable(save, async { Ok(1) }).with_context(compute.context()),
//! );
//! assert_eq!(compute.block_on(async { reply.await }), Ok(1));
//! ```

pub mod config;
pub mod coordinator;
pub mod executor;
pub mod system;
pub mod transaction;

pub use config::{ConfigError, CoordinatorConfig};
pub use coordinator::{
    AntiDeadlockInterceptor, BoundaryPosition, ComposedContext, ContextComposer, Eligibility,
    Ineligible, InterceptionGate, InvocationDescriptor, COORDINATOR_INTERCEPTOR,
};
pub use executor::{Executor, ExecutorKind};
pub use system::{System, SystemBuilder};
pub use transaction::{
    BlockingConnectionPool, Connection, ConnectionPool, PoolError, PoolStats, PooledConnection,
    TransactionalInterceptor, TRANSACTIONAL_INTERCEPTOR, TRANSACTION_ORDER,
};

pub use txoffload_kernel::{
    CancelOutcome, CompletionHandle, ExecutorId, ExecutorRef, Interceptor, InterceptorChain,
    Invocation, InvocationError, InvocationId, Marker, MethodSignature, Next, Reply, ResultShape,
    SchedulingContext, WiringError,
};
