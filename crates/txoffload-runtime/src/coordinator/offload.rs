//! Offload task: run the blocking prefix on the offload executor's blocking
//! pool, hand the rest of the continuation back to the caller's executor at
//! its first suspension point.
//!
//! The first poll happens inside the resume executor's runtime context, so
//! timers and sockets created before the first suspension register with the
//! drivers of the executor that will wait on them.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::task::{Context, Poll};

use futures::task::noop_waker_ref;

use txoffload_kernel::{Completer, Deferred, ExecutorRef, Invocation, InvocationError, Next, Reply};

use super::composer::ComposedContext;

/// Everything the coordinator owns for one rerouted call.
pub struct InvocationDescriptor<T> {
    invocation: Invocation<T>,
    context: ComposedContext,
    completer: Completer<T>,
}

impl<T> InvocationDescriptor<T> {
    pub fn new(
        invocation: Invocation<T>,
        context: ComposedContext,
        completer: Completer<T>,
    ) -> Self {
        Self {
            invocation,
            context,
            completer,
        }
    }

    pub fn context(&self) -> &ComposedContext {
        &self.context
    }
}

enum Prefix<T> {
    Finished(Result<T, InvocationError>),
    Suspended(Deferred<T>),
}

/// Polls `deferred` exactly once from the resume executor's runtime context.
///
/// The waker is a no-op: whoever polls the returned future next registers
/// the real one.
fn first_poll<T>(mut deferred: Deferred<T>, resume: &ExecutorRef) -> Prefix<T> {
    let _entered = resume.handle().enter();
    let mut cx = Context::from_waker(noop_waker_ref());
    match deferred.as_mut().poll(&mut cx) {
        Poll::Ready(result) => Prefix::Finished(result),
        Poll::Pending => Prefix::Suspended(deferred),
    }
}

pub(crate) struct OffloadTask<T> {
    descriptor: InvocationDescriptor<T>,
    next: Next<T>,
}

impl<T: Send + 'static> OffloadTask<T> {
    pub(crate) fn new(descriptor: InvocationDescriptor<T>, next: Next<T>) -> Self {
        Self { descriptor, next }
    }

    /// Submits the task to the start executor's blocking pool. Returns immediately.
    pub(crate) fn start(self) {
        let executor = self.descriptor.context.start_executor().clone();
        executor.spawn_blocking(move || self.run());
    }

    fn run(self) {
        let OffloadTask { descriptor, next } = self;
        let InvocationDescriptor {
            invocation,
            context,
            completer,
        } = descriptor;
        let id = invocation.id();

        if !completer.begin_prefix() {
            log::debug!("{id}: cancelled before the blocking prefix, nothing acquired");
            completer.deliver_cancelled();
            return;
        }

        log::debug!(
            "{id}: running blocking prefix of `{}` on `{}`",
            invocation.signature().name(),
            context.start_executor().name()
        );
        let reply = match panic::catch_unwind(AssertUnwindSafe(|| next.proceed(invocation))) {
            Ok(reply) => reply,
            Err(payload) => {
                completer.complete_panicked(payload);
                return;
            }
        };

        let deferred = match reply {
            Reply::Ready(result) => {
                completer.complete(result);
                return;
            }
            other => other.into_deferred(),
        };
        if completer.is_cancelled() {
            drop(deferred);
            log::debug!("{id}: cancelled during the blocking prefix, result discarded");
            completer.deliver_cancelled();
            return;
        }

        let resume = context.resume_executor();
        match panic::catch_unwind(AssertUnwindSafe(|| first_poll(deferred, resume))) {
            Err(payload) => completer.complete_panicked(payload),
            Ok(Prefix::Finished(result)) => completer.complete(result),
            Ok(Prefix::Suspended(rest)) => {
                log::debug!("{id}: suspended, resuming on `{}`", resume.name());
                resume.spawn(completer.finish(rest));
            }
        }
    }
}
