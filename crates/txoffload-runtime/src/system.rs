//! Startup wiring.
//!
//! Everything that can be decided before the first call is decided here:
//! method classification, whether the coordinator is installed, which
//! executor it offloads to, and the final stage order. Any failure aborts
//! startup with a [WiringError].

use std::collections::BTreeMap;
use std::sync::Arc;

use txoffload_kernel::{
    ClassificationDefect, ExecutorRef, Interceptor, InterceptorChain, Invocation, MethodSignature,
    Reply, ResultShape, WiringError,
};

use crate::config::CoordinatorConfig;
use crate::coordinator::{AntiDeadlockInterceptor, BoundaryPosition};
use crate::executor::Executor;
use crate::transaction::{ConnectionPool, TransactionalInterceptor};

pub struct SystemBuilder<T> {
    config: CoordinatorConfig,
    stages: Vec<Arc<dyn Interceptor<T>>>,
    boundary: Option<BoundaryPosition>,
    methods: Vec<Arc<MethodSignature>>,
    computation_pools: Vec<ExecutorRef>,
    offload_executor: Option<ExecutorRef>,
    coordinator_order: Option<i32>,
}

impl<T: Send + 'static> Default for SystemBuilder<T> {
    fn default() -> Self {
        Self {
            config: CoordinatorConfig::default(),
            stages: Vec::new(),
            boundary: None,
            methods: Vec::new(),
            computation_pools: Vec::new(),
            offload_executor: None,
            coordinator_order: None,
        }
    }
}

impl<T: Send + 'static> SystemBuilder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers an arbitrary stage.
    pub fn interceptor(mut self, stage: Arc<dyn Interceptor<T>>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Registers the transactional boundary the coordinator will precede.
    pub fn transaction_boundary<P: ConnectionPool>(
        mut self,
        boundary: Arc<TransactionalInterceptor<P>>,
    ) -> Self {
        let stage: &dyn Interceptor<T> = boundary.as_ref();
        self.boundary = Some(BoundaryPosition::new(stage.name(), stage.order()));
        self.stages.push(boundary);
        self
    }

    /// Declares a method so its signature is classified at startup.
    pub fn method(mut self, signature: MethodSignature) -> Self {
        self.methods.push(Arc::new(signature));
        self
    }

    /// Declares a computation pool the offload executor must never coincide with.
    pub fn computation_pool(mut self, executor: &ExecutorRef) -> Self {
        self.computation_pools.push(executor.clone());
        self
    }

    /// Uses an existing executor for offloading instead of building one from config.
    pub fn offload_executor(mut self, executor: ExecutorRef) -> Self {
        self.offload_executor = Some(executor);
        self
    }

    pub fn coordinator_order(mut self, order: i32) -> Self {
        self.coordinator_order = Some(order);
        self
    }

    pub fn build(self) -> Result<System<T>, WiringError> {
        for signature in &self.methods {
            if signature.is_transactional() && signature.result_shape() == ResultShape::Unresolved
            {
                return Err(ClassificationDefect::new(
                    signature.name(),
                    "result shape could not be determined",
                )
                .into());
            }
        }

        let mut stages = self.stages;
        let mut owned_offload = None;
        let mut coordinator = None;

        match (self.config.enabled, self.boundary) {
            (false, _) => log::debug!("anti-deadlock coordinator disabled"),
            (true, None) => log::warn!(
                "anti-deadlock coordinator enabled but no transactional boundary is \
                 registered; calls will not be rerouted"
            ),
            (true, Some(boundary)) => {
                let offload = match self.offload_executor {
                    Some(executor) => executor,
                    None => {
                        if self.config.offload_threads == 0 {
                            return Err(WiringError::Config(
                                "offload executor needs at least one thread".to_string(),
                            ));
                        }
                        let executor = Executor::blocking(
                            &self.config.offload_thread_name,
                            self.config.offload_threads,
                        )?;
                        let reference = executor.reference().clone();
                        owned_offload = Some(executor);
                        reference
                    }
                };
                if let Some(pool) = self.computation_pools.iter().find(|p| **p == offload) {
                    return Err(WiringError::CoupledExecutors(pool.name().to_string()));
                }

                let mut interceptor = AntiDeadlockInterceptor::new(&self.config, offload, boundary);
                if let Some(order) = self.coordinator_order {
                    interceptor = interceptor.with_order(order);
                }
                let interceptor = Arc::new(interceptor);
                stages.push(interceptor.clone());
                coordinator = Some(interceptor);
            }
        }

        let mut builder = InterceptorChain::builder();
        for stage in stages {
            builder.push(stage);
        }
        let chain = builder.build()?;

        let methods = self
            .methods
            .into_iter()
            .map(|signature| (signature.name().to_string(), signature))
            .collect();
        Ok(System {
            chain,
            coordinator,
            methods,
            offload: owned_offload,
        })
    }
}

/// A wired system: the resolved chain plus the executors it owns.
pub struct System<T> {
    chain: InterceptorChain<T>,
    coordinator: Option<Arc<AntiDeadlockInterceptor>>,
    methods: BTreeMap<String, Arc<MethodSignature>>,
    offload: Option<Executor>,
}

impl<T: Send + 'static> System<T> {
    pub fn builder() -> SystemBuilder<T> {
        SystemBuilder::new()
    }

    pub fn invoke(&self, invocation: Invocation<T>) -> Reply<T> {
        self.chain.invoke(invocation)
    }

    /// Signature registered under `name`, shared by every call to that method.
    pub fn method(&self, name: &str) -> Option<Arc<MethodSignature>> {
        self.methods.get(name).cloned()
    }

    pub fn chain(&self) -> &InterceptorChain<T> {
        &self.chain
    }

    /// The installed coordinator, if any.
    pub fn coordinator(&self) -> Option<&Arc<AntiDeadlockInterceptor>> {
        self.coordinator.as_ref()
    }

    /// The offload executor created from config, when the system owns one.
    pub fn offload(&self) -> Option<&Executor> {
        self.offload.as_ref()
    }
}

impl<T> std::fmt::Debug for System<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("System")
            .field("chain", &self.chain)
            .field("coordinator", &self.coordinator)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}
