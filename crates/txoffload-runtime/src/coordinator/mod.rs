//! Anti-deadlock coordinator for transactional suspendable calls.
//!
//! How it works:
//! - the gate picks out calls that are both suspendable and transactional;
//! - the composer builds a context that starts on the blocking offload
//!   executor and resumes on the caller's executor;
//! - an offload task proceeds the chain there, so the transactional boundary
//!   acquires its connection off the computation pool;
//! - at the first suspension the continuation moves back to the caller's
//!   executor and the offload thread is released;
//! - the completion bridge delivers the outcome to the caller exactly once.

pub mod composer;
pub mod gate;
pub mod offload;

use std::sync::atomic::{AtomicU64, Ordering};

use txoffload_kernel::{channel, ExecutorRef, Interceptor, Invocation, Marker, Next, Reply};

use crate::config::CoordinatorConfig;

pub use composer::{ComposedContext, ContextComposer, PHASE_ATTRIBUTE};
pub use gate::{Eligibility, Ineligible, InterceptionGate};
pub use offload::InvocationDescriptor;

use offload::OffloadTask;

pub const COORDINATOR_INTERCEPTOR: &str = "anti-deadlock-transactional";

/// Name and precedence of the stage the coordinator must run right before.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoundaryPosition {
    pub name: String,
    pub order: i32,
}

impl BoundaryPosition {
    pub fn new(name: impl Into<String>, order: i32) -> Self {
        Self {
            name: name.into(),
            order,
        }
    }
}

/// Runs immediately before the transactional boundary and reroutes its
/// blocking acquisition onto the offload executor.
pub struct AntiDeadlockInterceptor {
    gate: InterceptionGate,
    composer: ContextComposer,
    boundary: BoundaryPosition,
    order: i32,
    rerouted: AtomicU64,
}

impl AntiDeadlockInterceptor {
    pub fn new(
        config: &CoordinatorConfig,
        offload_executor: ExecutorRef,
        boundary: BoundaryPosition,
    ) -> Self {
        Self {
            gate: InterceptionGate::new(config.enabled),
            composer: ContextComposer::new(offload_executor),
            order: boundary.order.saturating_sub(1),
            boundary,
            rerouted: AtomicU64::new(0),
        }
    }

    /// Overrides the default precedence (boundary order - 1).
    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn gate(&self) -> &InterceptionGate {
        &self.gate
    }

    pub fn offload_executor(&self) -> &ExecutorRef {
        self.composer.offload_executor()
    }

    /// Number of calls rerouted so far.
    pub fn rerouted(&self) -> u64 {
        self.rerouted.load(Ordering::Relaxed)
    }
}

impl<T: Send + 'static> Interceptor<T> for AntiDeadlockInterceptor {
    fn name(&self) -> &str {
        COORDINATOR_INTERCEPTOR
    }

    fn order(&self) -> i32 {
        self.order
    }

    fn binding(&self) -> Option<Marker> {
        Some(Marker::Transactional)
    }

    fn precedes(&self) -> Option<&str> {
        Some(&self.boundary.name)
    }

    fn intercept(&self, invocation: Invocation<T>, next: Next<T>) -> Reply<T> {
        if !self.gate.classify(&invocation).is_eligible() {
            return next.proceed(invocation);
        }

        let composed = match self
            .composer
            .compose(invocation.signature(), invocation.context())
        {
            Ok(composed) => composed,
            Err(defect) => {
                log::error!("{}: {defect}; delegating without rerouting", invocation.id());
                return next.proceed(invocation);
            }
        };

        let (completer, handle) = channel(invocation.id());
        self.rerouted.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "{}: rerouting `{}` from `{}` to `{}`",
            invocation.id(),
            invocation.signature().name(),
            composed.resume_executor().name(),
            composed.start_executor().name()
        );
        OffloadTask::new(InvocationDescriptor::new(invocation, composed, completer), next).start();
        Reply::Rerouted(handle)
    }
}

impl std::fmt::Debug for AntiDeadlockInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AntiDeadlockInterceptor")
            .field("enabled", &self.gate.is_enabled())
            .field("order", &self.order)
            .field("boundary", &self.boundary)
            .field("offload", self.composer.offload_executor())
            .field("rerouted", &self.rerouted())
            .finish()
    }
}
