//! Scheduling contexts: where a continuation runs next.
//!
//! A [SchedulingContext] pairs an optional executor reference with diagnostic
//! attributes. Contexts are immutable values; [SchedulingContext::combine] is
//! a pure function whose right-hand executor wins.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

static NEXT_EXECUTOR_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_EXECUTOR: Cell<Option<ExecutorId>> = const { Cell::new(None) };
}

/// Process-unique executor identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutorId(u64);

impl ExecutorId {
    /// Allocates a fresh id.
    pub fn allocate() -> Self {
        Self(NEXT_EXECUTOR_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Tags the calling thread as a worker of this executor.
    ///
    /// Meant for `on_thread_start` hooks of runtimes that back an [ExecutorRef].
    pub fn enter_thread(self) {
        CURRENT_EXECUTOR.with(|current| current.set(Some(self)));
    }

    /// Executor the calling thread belongs to, if it was tagged.
    pub fn current() -> Option<Self> {
        CURRENT_EXECUTOR.with(Cell::get)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ExecutorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "executor#{}", self.0)
    }
}

/// Cloneable reference to an executor: identity, name and a runtime handle.
#[derive(Clone)]
pub struct ExecutorRef {
    id: ExecutorId,
    name: Arc<str>,
    handle: Handle,
}

impl ExecutorRef {
    pub fn new(id: ExecutorId, name: impl Into<Arc<str>>, handle: Handle) -> Self {
        Self {
            id,
            name: name.into(),
            handle,
        }
    }

    /// Wraps a runtime handle that was not built with an [ExecutorId] tag.
    pub fn from_handle(name: impl Into<Arc<str>>, handle: Handle) -> Self {
        Self::new(ExecutorId::allocate(), name, handle)
    }

    pub fn id(&self) -> ExecutorId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// True when the calling thread is a tagged worker of this executor.
    pub fn is_current(&self) -> bool {
        ExecutorId::current() == Some(self.id)
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Runs `f` on the executor's blocking thread pool.
    pub fn spawn_blocking<F, R>(&self, f: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.handle.spawn_blocking(f)
    }
}

impl PartialEq for ExecutorRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ExecutorRef {}

impl fmt::Debug for ExecutorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorRef")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Where code runs next, plus diagnostic key/value attributes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SchedulingContext {
    executor: Option<ExecutorRef>,
    attributes: BTreeMap<String, String>,
}

impl SchedulingContext {
    pub fn new(executor: ExecutorRef) -> Self {
        Self {
            executor: Some(executor),
            attributes: BTreeMap::new(),
        }
    }

    /// A context that only carries attributes.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn executor(&self) -> Option<&ExecutorRef> {
        self.executor.as_ref()
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Returns `self` overlaid with `other`.
    ///
    /// `other`'s executor wins when it has one; attributes of `self` are kept
    /// unless `other` sets the same key.
    pub fn combine(&self, other: &SchedulingContext) -> SchedulingContext {
        let executor = other.executor.clone().or_else(|| self.executor.clone());
        let mut attributes = self.attributes.clone();
        attributes.extend(
            other
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        SchedulingContext {
            executor,
            attributes,
        }
    }
}
