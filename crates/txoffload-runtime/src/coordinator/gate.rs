//! Interception gate: decides per call whether rerouting applies.

use txoffload_kernel::{Invocation, ResultShape};

/// Why a call is left on its original path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ineligible {
    Disabled,
    NotTransactional,
    NotSuspendable,
    Shape(ResultShape),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    Ineligible(Ineligible),
}

impl Eligibility {
    pub fn is_eligible(self) -> bool {
        self == Eligibility::Eligible
    }
}

/// Only the suspendable + transactional combination can deadlock the
/// computation pool; everything else is delegated untouched.
#[derive(Clone, Copy, Debug)]
pub struct InterceptionGate {
    enabled: bool,
}

impl InterceptionGate {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn classify<T>(&self, invocation: &Invocation<T>) -> Eligibility {
        let signature = invocation.signature();
        let verdict = if !self.enabled {
            Eligibility::Ineligible(Ineligible::Disabled)
        } else if !signature.is_transactional() {
            Eligibility::Ineligible(Ineligible::NotTransactional)
        } else if !invocation.is_suspendable() {
            Eligibility::Ineligible(Ineligible::NotSuspendable)
        } else if signature.result_shape() != ResultShape::Deferred {
            Eligibility::Ineligible(Ineligible::Shape(signature.result_shape()))
        } else {
            Eligibility::Eligible
        };
        log::trace!(
            "{}: `{}` classified as {:?}",
            invocation.id(),
            signature.name(),
            verdict
        );
        verdict
    }
}
