//! Saturate a small computation pool with transactional calls that save and
//! then sleep while holding their connection, with the coordinator off and on.
//!
//! Run with: cargo run -p txoffload-runtime --example anti_deadlock_demo

use std::sync::Arc;
use std::time::{Duration, Instant};

use txoffload_runtime::{
    BlockingConnectionPool, CoordinatorConfig, Executor, Invocation, InvocationError,
    MethodSignature, System, TransactionalInterceptor,
};

const WORKERS: usize = 2;
const CONNECTIONS: usize = 1;
const HOLD: Duration = Duration::from_millis(300);
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(1);

fn run(enabled: bool) -> Result<(), Box<dyn std::error::Error>> {
    let compute = Executor::computation("demo-compute", WORKERS)?;
    let pool = Arc::new(BlockingConnectionPool::new(
        "demo-db",
        CONNECTIONS,
        CONNECTION_TIMEOUT,
    ));
    let config = CoordinatorConfig {
        enabled,
        ..CoordinatorConfig::default()
    };
    let system = Arc::new(
        System::builder()
            .config(config)
            .transaction_boundary(Arc::new(TransactionalInterceptor::new(Arc::clone(&pool))))
            .computation_pool(compute.reference())
            .method(MethodSignature::transactional("save_then_sleep"))
            .build()?,
    );

    let calls = WORKERS + 1;
    let started = Instant::now();
    let handles: Vec<_> = (0..calls)
        .map(|i| {
            let system = Arc::clone(&system);
            let context = compute.context();
            compute.handle().spawn(async move {
                let signature = system
                    .method("save_then_sleep")
                    .ok_or_else(|| InvocationError::application("method not registered"))?;
                let body = async move {
                    tokio::time::sleep(HOLD).await;
                    Ok(i)
                };
                system
                    .invoke(Invocation::suspendable(signature, body).with_context(context))
                    .await
            })
        })
        .collect();

    let results = compute.block_on(async move {
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await);
        }
        results
    });

    println!(
        "anti-deadlock {}: {calls} calls in {:?}",
        if enabled { "on" } else { "off" },
        started.elapsed()
    );
    for (i, result) in results.into_iter().enumerate() {
        match result {
            Ok(Ok(value)) => println!("  call {i}: saved {value}"),
            Ok(Err(err)) => println!("  call {i}: failed: {err}"),
            Err(join) => println!("  call {i}: task failed: {join}"),
        }
    }
    println!("  pool: {:?}", pool.stats());
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    run(false)?;
    run(true)?;
    Ok(())
}
