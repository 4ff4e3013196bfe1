//! Structural view of an intercepted call.

use std::borrow::Cow;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::sync::Arc;

use futures::future::{self, BoxFuture};
use uuid::Uuid;

use crate::completion::CompletionHandle;
use crate::context::SchedulingContext;
use crate::error::InvocationError;

/// A result that becomes available later: eventually a value or an error.
pub type Deferred<T> = BoxFuture<'static, Result<T, InvocationError>>;

/// Annotation-like marker carried by a method; interceptors bind to markers.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Marker {
    /// Wrapped by a transactional boundary (acquire/commit/rollback).
    Transactional,
    Named(Cow<'static, str>),
}

/// What a method ultimately produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResultShape {
    /// A plain value, returned synchronously.
    Value,
    /// Eventually a value or an error (completion-style).
    Deferred,
    /// A stream of values.
    Stream,
    /// Could not be determined while wiring.
    Unresolved,
}

/// Static description of an interceptable method.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodSignature {
    name: Cow<'static, str>,
    markers: Vec<Marker>,
    result_shape: ResultShape,
}

impl MethodSignature {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            markers: Vec::new(),
            result_shape: ResultShape::Value,
        }
    }

    /// Shorthand for a transactional method returning a deferred result.
    pub fn transactional(name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(name)
            .marked(Marker::Transactional)
            .returning(ResultShape::Deferred)
    }

    pub fn marked(mut self, marker: Marker) -> Self {
        if !self.markers.contains(&marker) {
            self.markers.push(marker);
        }
        self
    }

    pub fn returning(mut self, shape: ResultShape) -> Self {
        self.result_shape = shape;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn result_shape(&self) -> ResultShape {
        self.result_shape
    }

    pub fn has_marker(&self, marker: &Marker) -> bool {
        self.markers.contains(marker)
    }

    pub fn is_transactional(&self) -> bool {
        self.has_marker(&Marker::Transactional)
    }
}

/// Identifier of one intercepted call, used in logs and delivery records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InvocationId(Uuid);

impl InvocationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InvocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "inv-{}", self.0.simple())
    }
}

/// The target of an invocation.
pub enum Body<T> {
    /// Runs to completion on the calling thread.
    Immediate(Box<dyn FnOnce() -> Result<T, InvocationError> + Send>),
    /// Cooperatively suspendable; yields control at its suspension points.
    Suspendable(Deferred<T>),
}

/// One intercepted call travelling through the chain.
pub struct Invocation<T> {
    id: InvocationId,
    signature: Arc<MethodSignature>,
    context: Option<SchedulingContext>,
    body: Body<T>,
}

impl<T> Invocation<T> {
    pub fn immediate<F>(signature: Arc<MethodSignature>, f: F) -> Self
    where
        F: FnOnce() -> Result<T, InvocationError> + Send + 'static,
    {
        Self {
            id: InvocationId::new(),
            signature,
            context: None,
            body: Body::Immediate(Box::new(f)),
        }
    }

    pub fn suspendable<F>(signature: Arc<MethodSignature>, future: F) -> Self
    where
        F: Future<Output = Result<T, InvocationError>> + Send + 'static,
    {
        Self {
            id: InvocationId::new(),
            signature,
            context: None,
            body: Body::Suspendable(Box::pin(future)),
        }
    }

    /// Attaches the caller's scheduling context, captured at call time.
    pub fn with_context(mut self, context: SchedulingContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn id(&self) -> InvocationId {
        self.id
    }

    pub fn signature(&self) -> &MethodSignature {
        &self.signature
    }

    pub fn context(&self) -> Option<&SchedulingContext> {
        self.context.as_ref()
    }

    pub fn is_suspendable(&self) -> bool {
        matches!(self.body, Body::Suspendable(_))
    }

    /// Invokes the target itself; the end of every chain.
    pub fn call(self) -> Reply<T> {
        match self.body {
            Body::Immediate(f) => Reply::Ready(f()),
            Body::Suspendable(future) => Reply::Deferred(future),
        }
    }
}

impl<T> fmt::Debug for Invocation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("id", &self.id)
            .field("method", &self.signature.name())
            .field("suspendable", &self.is_suspendable())
            .field("context", &self.context)
            .finish()
    }
}

/// What an interceptor hands back to its caller.
pub enum Reply<T> {
    /// Produced synchronously.
    Ready(Result<T, InvocationError>),
    /// Produced by polling the future to completion.
    Deferred(Deferred<T>),
    /// Rerouted through another executor; resolves through the completion bridge.
    Rerouted(CompletionHandle<T>),
}

impl<T: Send + 'static> Reply<T> {
    /// Erases the variant into a single future.
    pub fn into_deferred(self) -> Deferred<T> {
        match self {
            Reply::Ready(result) => Box::pin(future::ready(result)),
            Reply::Deferred(future) => future,
            Reply::Rerouted(handle) => Box::pin(handle),
        }
    }
}

impl<T> fmt::Debug for Reply<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ready(Ok(_)) => f.write_str("Ready(Ok(..))"),
            Reply::Ready(Err(err)) => f.debug_tuple("Ready").field(err).finish(),
            Reply::Deferred(_) => f.write_str("Deferred"),
            Reply::Rerouted(handle) => f.debug_tuple("Rerouted").field(handle).finish(),
        }
    }
}

impl<T: Send + 'static> IntoFuture for Reply<T> {
    type Output = Result<T, InvocationError>;
    type IntoFuture = Deferred<T>;

    fn into_future(self) -> Self::IntoFuture {
        self.into_deferred()
    }
}
