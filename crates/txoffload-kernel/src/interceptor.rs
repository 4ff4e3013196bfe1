//! Ordered interceptor chain.
//!
//! Stages are sorted once by [Interceptor::order] (lower runs first, ties keep
//! registration order) and frozen into an [InterceptorChain]. Ordering
//! constraints declared through [Interceptor::precedes] are checked at that
//! point; a violated constraint is a wiring error, never a per-call condition.

use std::fmt;
use std::sync::Arc;

use crate::error::WiringError;
use crate::invocation::{Invocation, Marker, Reply};

/// One stage of the chain.
pub trait Interceptor<T>: Send + Sync {
    fn name(&self) -> &str;

    /// Precedence; lower values run first.
    fn order(&self) -> i32 {
        0
    }

    /// Marker a method must carry for this stage to apply. `None` applies to all.
    fn binding(&self) -> Option<Marker> {
        None
    }

    /// Name of the stage this one must run immediately before.
    fn precedes(&self) -> Option<&str> {
        None
    }

    fn intercept(&self, invocation: Invocation<T>, next: Next<T>) -> Reply<T>;
}

type Stages<T> = Arc<[Arc<dyn Interceptor<T>>]>;

/// Owned cursor into a resolved chain. `'static`, so it can be moved onto
/// another executor and proceeded there.
pub struct Next<T> {
    stages: Stages<T>,
    index: usize,
}

impl<T> Next<T> {
    /// Runs the next applicable stage, or the target itself at the end of the chain.
    pub fn proceed(self, invocation: Invocation<T>) -> Reply<T> {
        let position = self.stages[self.index..]
            .iter()
            .position(|stage| applies(stage.as_ref(), &invocation))
            .map(|offset| self.index + offset);
        match position {
            Some(index) => {
                let stage = Arc::clone(&self.stages[index]);
                let next = Next {
                    stages: self.stages,
                    index: index + 1,
                };
                stage.intercept(invocation, next)
            }
            None => invocation.call(),
        }
    }
}

impl<T> fmt::Debug for Next<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("index", &self.index)
            .field("stages", &self.stages.len())
            .finish()
    }
}

fn applies<T>(stage: &dyn Interceptor<T>, invocation: &Invocation<T>) -> bool {
    stage
        .binding()
        .map_or(true, |marker| invocation.signature().has_marker(&marker))
}

/// A resolved, immutable chain.
pub struct InterceptorChain<T> {
    stages: Stages<T>,
}

impl<T> InterceptorChain<T> {
    pub fn builder() -> InterceptorChainBuilder<T> {
        InterceptorChainBuilder::default()
    }

    pub fn invoke(&self, invocation: Invocation<T>) -> Reply<T> {
        Next {
            stages: Arc::clone(&self.stages),
            index: 0,
        }
        .proceed(invocation)
    }

    /// Stage names in execution order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stages.iter().any(|stage| stage.name() == name)
    }
}

impl<T> Clone for InterceptorChain<T> {
    fn clone(&self) -> Self {
        Self {
            stages: Arc::clone(&self.stages),
        }
    }
}

impl<T> fmt::Debug for InterceptorChain<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("stages", &self.stage_names())
            .finish()
    }
}

pub struct InterceptorChainBuilder<T> {
    stages: Vec<Arc<dyn Interceptor<T>>>,
}

impl<T> Default for InterceptorChainBuilder<T> {
    fn default() -> Self {
        Self { stages: Vec::new() }
    }
}

impl<T> InterceptorChainBuilder<T> {
    pub fn stage(mut self, stage: Arc<dyn Interceptor<T>>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn push(&mut self, stage: Arc<dyn Interceptor<T>>) {
        self.stages.push(stage);
    }

    /// Sorts the stages and validates every ordering constraint.
    pub fn build(mut self) -> Result<InterceptorChain<T>, WiringError> {
        self.stages.sort_by_key(|stage| stage.order());

        for (index, stage) in self.stages.iter().enumerate() {
            let Some(target) = stage.precedes() else {
                continue;
            };
            let violation = |reason: String| WiringError::OrderingViolation {
                stage: stage.name().to_string(),
                target: target.to_string(),
                reason,
            };
            let Some(target_index) = self.stages.iter().position(|s| s.name() == target) else {
                return Err(violation("target stage is not registered".to_string()));
            };
            let target_stage = &self.stages[target_index];
            if stage.order() >= target_stage.order() {
                return Err(violation(format!(
                    "order {} is not strictly lower than {}",
                    stage.order(),
                    target_stage.order()
                )));
            }
            if target_index != index + 1 {
                let interlopers: Vec<&str> = self.stages[index + 1..target_index]
                    .iter()
                    .map(|s| s.name())
                    .collect();
                return Err(violation(format!(
                    "stages in between: {}",
                    interlopers.join(", ")
                )));
            }
        }

        log::debug!(
            "interceptor chain resolved: [{}]",
            self.stages
                .iter()
                .map(|s| format!("{}({})", s.name(), s.order()))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(InterceptorChain {
            stages: self.stages.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::invocation::MethodSignature;

    struct Recording {
        name: &'static str,
        order: i32,
        binding: Option<Marker>,
        precedes: Option<&'static str>,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Recording {
        fn new(name: &'static str, order: i32, log: &Arc<Mutex<Vec<&'static str>>>) -> Self {
            Self {
                name,
                order,
                binding: None,
                precedes: None,
                log: Arc::clone(log),
            }
        }
    }

    impl Interceptor<u32> for Recording {
        fn name(&self) -> &str {
            self.name
        }

        fn order(&self) -> i32 {
            self.order
        }

        fn binding(&self) -> Option<Marker> {
            self.binding.clone()
        }

        fn precedes(&self) -> Option<&str> {
            self.precedes
        }

        fn intercept(&self, invocation: Invocation<u32>, next: Next<u32>) -> Reply<u32> {
            self.log.lock().unwrap().push(self.name);
            next.proceed(invocation)
        }
    }

    fn call(chain: &InterceptorChain<u32>, sig: MethodSignature) -> Reply<u32> {
        chain.invoke(Invocation::immediate(Arc::new(sig), || Ok(1)))
    }

    #[test]
    fn stages_run_in_order_and_respect_bindings() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut tx = Recording::new("tx", -300, &log);
        tx.binding = Some(Marker::Transactional);
        let chain = InterceptorChain::builder()
            .stage(Arc::new(Recording::new("metrics", 10, &log)))
            .stage(Arc::new(tx))
            .stage(Arc::new(Recording::new("trace", -500, &log)))
            .build()
            .unwrap();
        assert_eq!(chain.stage_names(), vec!["trace", "tx", "metrics"]);

        assert!(matches!(
            call(&chain, MethodSignature::transactional("save")),
            Reply::Ready(Ok(1))
        ));
        assert_eq!(*log.lock().unwrap(), vec!["trace", "tx", "metrics"]);

        log.lock().unwrap().clear();
        call(&chain, MethodSignature::new("plain"));
        assert_eq!(*log.lock().unwrap(), vec!["trace", "metrics"]);
    }

    #[test]
    fn precedence_constraint_accepts_adjacent_lower_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut guard = Recording::new("guard", -301, &log);
        guard.precedes = Some("tx");
        let chain = InterceptorChain::builder()
            .stage(Arc::new(Recording::new("tx", -300, &log)))
            .stage(Arc::new(guard))
            .build()
            .unwrap();
        assert_eq!(chain.stage_names(), vec!["guard", "tx"]);
    }

    #[test]
    fn equal_or_higher_order_is_rejected() {
        for order in [-300, -299, 0] {
            let log = Arc::new(Mutex::new(Vec::new()));
            let mut guard = Recording::new("guard", order, &log);
            guard.precedes = Some("tx");
            let err = InterceptorChain::builder()
                .stage(Arc::new(guard))
                .stage(Arc::new(Recording::new("tx", -300, &log)))
                .build()
                .unwrap_err();
            assert!(
                matches!(&err, WiringError::OrderingViolation { stage, .. } if stage == "guard"),
                "order {order}: {err}"
            );
        }
    }

    #[test]
    fn missing_target_is_rejected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut guard = Recording::new("guard", -301, &log);
        guard.precedes = Some("tx");
        let err = InterceptorChain::builder()
            .stage(Arc::new(guard))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("not registered"));
    }

    #[test]
    fn interloper_between_stage_and_target_is_rejected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut guard = Recording::new("guard", -400, &log);
        guard.precedes = Some("tx");
        let err = InterceptorChain::builder()
            .stage(Arc::new(guard))
            .stage(Arc::new(Recording::new("audit", -350, &log)))
            .stage(Arc::new(Recording::new("tx", -300, &log)))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("audit"), "{err}");
    }
}
