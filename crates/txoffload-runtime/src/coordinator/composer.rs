//! Context composer: where the rerouted continuation starts and where it resumes.

use txoffload_kernel::{ClassificationDefect, ExecutorRef, MethodSignature, SchedulingContext};

/// Attribute set on the start context so logs can tell the phases apart.
pub const PHASE_ATTRIBUTE: &str = "txoffload.phase";

/// Execution context of one rerouted continuation.
///
/// `start` runs the blocking prefix on the offload executor; `resume` is the
/// caller's context, untouched, used from the first suspension onwards.
#[derive(Clone, Debug)]
pub struct ComposedContext {
    start: SchedulingContext,
    resume: SchedulingContext,
    start_executor: ExecutorRef,
    resume_executor: ExecutorRef,
}

impl ComposedContext {
    pub fn start(&self) -> &SchedulingContext {
        &self.start
    }

    pub fn resume(&self) -> &SchedulingContext {
        &self.resume
    }

    pub fn start_executor(&self) -> &ExecutorRef {
        &self.start_executor
    }

    pub fn resume_executor(&self) -> &ExecutorRef {
        &self.resume_executor
    }
}

#[derive(Clone, Debug)]
pub struct ContextComposer {
    offload: SchedulingContext,
    offload_executor: ExecutorRef,
}

impl ContextComposer {
    pub fn new(offload_executor: ExecutorRef) -> Self {
        let offload = SchedulingContext::new(offload_executor.clone())
            .with_attribute(PHASE_ATTRIBUTE, "blocking-prefix");
        Self {
            offload,
            offload_executor,
        }
    }

    pub fn offload_executor(&self) -> &ExecutorRef {
        &self.offload_executor
    }

    /// Fails closed when the origin gives no executor to resume on; there is
    /// no default context to fall back to.
    pub fn compose(
        &self,
        signature: &MethodSignature,
        origin: Option<&SchedulingContext>,
    ) -> Result<ComposedContext, ClassificationDefect> {
        let origin = origin.ok_or_else(|| {
            ClassificationDefect::new(signature.name(), "no scheduling context captured")
        })?;
        let resume_executor = origin.executor().cloned().ok_or_else(|| {
            ClassificationDefect::new(signature.name(), "captured context has no executor")
        })?;
        Ok(ComposedContext {
            start: origin.combine(&self.offload),
            resume: origin.clone(),
            start_executor: self.offload_executor.clone(),
            resume_executor,
        })
    }
}
