//! Error taxonomy.
//!
//! Per-call failures travel as [InvocationError] and reach the caller exactly
//! as they were raised. Startup-time defects are [WiringError] and stop the
//! system from being built.

use thiserror::Error;

/// Outcome error of a single intercepted call.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InvocationError {
    /// The blocking resource (e.g. a pooled connection) could not be acquired.
    #[error("{0}")]
    Resource(String),
    /// The transactional boundary failed to commit.
    #[error("transaction failed: {0}")]
    Transaction(String),
    /// Error raised by the intercepted call itself.
    #[error("{0}")]
    Application(String),
    /// The caller cancelled the call.
    #[error("invocation cancelled")]
    Cancelled,
    /// The executor running the call shut down before it completed.
    #[error("executor shut down before the invocation completed")]
    Shutdown,
}

impl InvocationError {
    pub fn application(message: impl Into<String>) -> Self {
        Self::Application(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// The shape or scheduling context of an invocation could not be determined.
///
/// Fatal when found at wiring time; when observed per call it signals a
/// programming defect and the call is delegated without rerouting.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("classification defect in `{method}`: {reason}")]
pub struct ClassificationDefect {
    pub method: String,
    pub reason: String,
}

impl ClassificationDefect {
    pub fn new(method: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            reason: reason.into(),
        }
    }
}

/// Startup-time failure. A system that reports one of these accepts no calls.
#[derive(Debug, Error)]
pub enum WiringError {
    #[error(transparent)]
    Classification(#[from] ClassificationDefect),

    #[error("ordering violation: `{stage}` must run immediately before `{target}`: {reason}")]
    OrderingViolation {
        stage: String,
        target: String,
        reason: String,
    },

    #[error("executor `{0}` is used both as computation pool and as blocking offload executor")]
    CoupledExecutors(String),

    #[error("executor `{name}` failed to start: {reason}")]
    ExecutorStart { name: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}
