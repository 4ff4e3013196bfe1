//! Completion bridge between a rerouted continuation and its caller.
//!
//! [channel] creates a single-use [Completer] (kept by whoever runs the
//! continuation) and a [CompletionHandle] (returned to the caller). Exactly one
//! delivery happens per channel: a result, a forwarded panic, `Cancelled`, or
//! `Shutdown` when the continuation was dropped without anyone asking.
//! Delivery is recorded with the executor it happened on.
//!
//! Cancellation has two regimes. Before the blocking prefix begins it is clean:
//! the prefix never starts. Once the prefix has begun it is advisory: the
//! prefix runs to completion, later suspension points observe the request, and
//! whatever the continuation produced is discarded instead of delivered.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::FutureExt;
use tokio::sync::{oneshot, Notify};

use crate::context::ExecutorId;
use crate::error::InvocationError;
use crate::invocation::{Deferred, InvocationId};

const PENDING: u8 = 0;
const STARTED: u8 = 1;
const PREVENTED: u8 = 2;
const REQUESTED: u8 = 3;
const DELIVERED: u8 = 4;

/// Result of [CompletionHandle::cancel].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The blocking prefix had not started and never will.
    Prevented,
    /// The prefix is in flight; its result will be discarded.
    Requested,
    /// Cancellation was already requested.
    AlreadyCancelled,
    /// The outcome was already delivered.
    TooLate,
}

struct CancelState {
    state: AtomicU8,
    notify: Notify,
}

impl CancelState {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(PENDING),
            notify: Notify::new(),
        }
    }

    fn transition(&self, from: u8, to: u8) -> bool {
        self.state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn begin(&self) -> bool {
        self.transition(PENDING, STARTED)
    }

    fn cancel(&self) -> CancelOutcome {
        loop {
            match self.state.load(Ordering::Acquire) {
                PENDING => {
                    if self.transition(PENDING, PREVENTED) {
                        self.notify.notify_one();
                        return CancelOutcome::Prevented;
                    }
                }
                STARTED => {
                    if self.transition(STARTED, REQUESTED) {
                        self.notify.notify_one();
                        return CancelOutcome::Requested;
                    }
                }
                PREVENTED | REQUESTED => return CancelOutcome::AlreadyCancelled,
                _ => return CancelOutcome::TooLate,
            }
        }
    }

    /// Claims the right to deliver a real outcome. False once cancelled.
    fn settle(&self) -> bool {
        loop {
            match self.state.load(Ordering::Acquire) {
                current @ (PENDING | STARTED) => {
                    if self.transition(current, DELIVERED) {
                        return true;
                    }
                }
                _ => return false,
            }
        }
    }

    fn is_prevented(&self) -> bool {
        self.state.load(Ordering::Acquire) == PREVENTED
    }

    fn is_cancelled(&self) -> bool {
        matches!(self.state.load(Ordering::Acquire), PREVENTED | REQUESTED)
    }

    async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            self.notify.notified().await;
        }
    }
}

enum Outcome<T> {
    Returned(Result<T, InvocationError>),
    Panicked(Box<dyn Any + Send>),
}

struct Delivery<T> {
    outcome: Outcome<T>,
    executor: Option<ExecutorId>,
}

/// Creates the two ends of a completion bridge for one invocation.
pub fn channel<T>(id: InvocationId) -> (Completer<T>, CompletionHandle<T>) {
    let (sender, receiver) = oneshot::channel();
    let state = Arc::new(CancelState::new());
    (
        Completer {
            id,
            sender: Some(sender),
            state: Arc::clone(&state),
        },
        CompletionHandle {
            id,
            receiver,
            state,
            delivered_on: None,
            resolved: false,
        },
    )
}

/// Resumption handle: delivers the outcome to the caller exactly once.
pub struct Completer<T> {
    id: InvocationId,
    sender: Option<oneshot::Sender<Delivery<T>>>,
    state: Arc<CancelState>,
}

impl<T> Completer<T> {
    pub fn invocation_id(&self) -> InvocationId {
        self.id
    }

    /// Marks the blocking prefix as started. False if the caller cancelled first.
    pub fn begin_prefix(&self) -> bool {
        self.state.begin()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }

    /// Delivers `result`, or `Cancelled` if the caller cancelled meanwhile.
    pub fn complete(mut self, result: Result<T, InvocationError>) {
        if self.state.settle() {
            self.deliver(Outcome::Returned(result));
        } else {
            log::debug!("{}: discarding outcome of cancelled invocation", self.id);
            self.deliver(Outcome::Returned(Err(InvocationError::Cancelled)));
        }
    }

    /// Forwards a panic raised by the continuation to the caller.
    pub fn complete_panicked(mut self, payload: Box<dyn Any + Send>) {
        if self.state.settle() {
            self.deliver(Outcome::Panicked(payload));
        } else {
            self.deliver(Outcome::Returned(Err(InvocationError::Cancelled)));
        }
    }

    pub fn deliver_cancelled(mut self) {
        self.deliver(Outcome::Returned(Err(InvocationError::Cancelled)));
    }

    fn deliver(&mut self, outcome: Outcome<T>) {
        let Some(sender) = self.sender.take() else {
            return;
        };
        let executor = ExecutorId::current();
        log::debug!(
            "{}: delivering outcome on {}",
            self.id,
            executor.map_or_else(|| "untagged thread".to_string(), |id| id.to_string())
        );
        if sender.send(Delivery { outcome, executor }).is_err() {
            log::debug!("{}: caller is gone, outcome dropped", self.id);
        }
    }
}

impl<T: Send + 'static> Completer<T> {
    /// Drives the rest of a continuation on the current executor, racing it
    /// against cancellation, then delivers the outcome from here.
    pub async fn finish(self, rest: Deferred<T>) {
        let state = Arc::clone(&self.state);
        let outcome = tokio::select! {
            biased;
            _ = state.cancelled() => None,
            caught = AssertUnwindSafe(rest).catch_unwind() => Some(caught),
        };
        match outcome {
            None => {
                log::debug!("{}: continuation dropped after cancellation", self.id);
                self.deliver_cancelled();
            }
            Some(Ok(result)) => self.complete(result),
            Some(Err(payload)) => self.complete_panicked(payload),
        }
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if self.sender.is_some() {
            let err = if self.state.is_cancelled() {
                InvocationError::Cancelled
            } else {
                log::warn!("{}: completer dropped without delivering", self.id);
                InvocationError::Shutdown
            };
            self.deliver(Outcome::Returned(Err(err)));
        }
    }
}

impl<T> fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("id", &self.id)
            .field("pending", &self.sender.is_some())
            .finish()
    }
}

/// Caller side of the bridge.
///
/// Resolves to the continuation's result. Dropping an unresolved handle
/// cancels the invocation.
pub struct CompletionHandle<T> {
    id: InvocationId,
    receiver: oneshot::Receiver<Delivery<T>>,
    state: Arc<CancelState>,
    delivered_on: Option<ExecutorId>,
    resolved: bool,
}

impl<T> CompletionHandle<T> {
    pub fn invocation_id(&self) -> InvocationId {
        self.id
    }

    pub fn cancel(&self) -> CancelOutcome {
        let outcome = self.state.cancel();
        log::debug!("{}: cancel requested -> {:?}", self.id, outcome);
        outcome
    }

    /// Executor the outcome was delivered on, once resolved.
    pub fn delivered_on(&self) -> Option<ExecutorId> {
        self.delivered_on
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }
}

impl<T> Future for CompletionHandle<T> {
    type Output = Result<T, InvocationError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.resolved {
            panic!("CompletionHandle polled after completion");
        }
        if self.state.is_prevented() {
            self.resolved = true;
            return Poll::Ready(Err(InvocationError::Cancelled));
        }
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(delivery)) => {
                self.resolved = true;
                self.delivered_on = delivery.executor;
                match delivery.outcome {
                    Outcome::Returned(result) => Poll::Ready(result),
                    Outcome::Panicked(payload) => panic::resume_unwind(payload),
                }
            }
            Poll::Ready(Err(_)) => {
                self.resolved = true;
                Poll::Ready(Err(InvocationError::Cancelled))
            }
        }
    }
}

impl<T> Drop for CompletionHandle<T> {
    fn drop(&mut self) {
        if !self.resolved {
            self.state.cancel();
        }
    }
}

impl<T> fmt::Debug for CompletionHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionHandle")
            .field("id", &self.id)
            .field("resolved", &self.resolved)
            .field("delivered_on", &self.delivered_on)
            .finish()
    }
}
