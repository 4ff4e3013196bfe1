//! txoffload kernel contracts.
//!
//! Minimal set of types shared by the coordinator and its collaborators:
//! scheduling contexts (where code runs next), the invocation model (what is
//! being intercepted), the completion bridge (how a rerouted result reaches
//! its caller), and the ordered interceptor chain resolved once at wiring
//! time. Nothing in this crate starts a runtime.

pub mod completion;
pub mod context;
pub mod error;
pub mod interceptor;
pub mod invocation;

pub use completion::{channel, CancelOutcome, CompletionHandle, Completer};
pub use context::{ExecutorId, ExecutorRef, SchedulingContext};
pub use error::{ClassificationDefect, InvocationError, WiringError};
pub use interceptor::{Interceptor, InterceptorChain, InterceptorChainBuilder, Next};
pub use invocation::{
    Body, Deferred, Invocation, InvocationId, Marker, MethodSignature, Reply, ResultShape,
};
