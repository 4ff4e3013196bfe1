mod support;

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use support::{eventually, init_logging, SignallingPool};
use txoffload_runtime::{
    BlockingConnectionPool, CancelOutcome, CompletionHandle, ConnectionPool, CoordinatorConfig,
    Executor, Invocation, InvocationError, MethodSignature, Reply, System,
    TransactionalInterceptor,
};

fn rerouted(reply: Reply<u32>) -> CompletionHandle<u32> {
    match reply {
        Reply::Rerouted(handle) => handle,
        other => panic!("call was not rerouted: {other:?}"),
    }
}

fn system_over<P: ConnectionPool>(
    pool: Arc<P>,
    compute: &Executor,
    offload: &Executor,
) -> System<u32> {
    System::builder()
        .config(CoordinatorConfig::enabled())
        .transaction_boundary(Arc::new(TransactionalInterceptor::new(pool)))
        .computation_pool(compute.reference())
        .offload_executor(offload.reference().clone())
        .build()
        .unwrap()
}

fn save() -> Arc<MethodSignature> {
    Arc::new(MethodSignature::transactional("save"))
}

#[test]
fn cancel_before_prefix_prevents_acquisition() {
    init_logging();
    let compute = Executor::computation("cancel-compute", 1).unwrap();
    let offload = Executor::blocking("cancel-offload", 1).unwrap();
    let pool = Arc::new(BlockingConnectionPool::new("db", 1, Duration::from_secs(1)));
    let system = system_over(Arc::clone(&pool), &compute, &offload);

    // Park the only offload thread so the rerouted task stays queued.
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    offload.reference().spawn_blocking(move || {
        let _ = started_tx.send(());
        let _ = release_rx.recv();
    });
    started_rx.recv().unwrap();

    let handle = rerouted(system.invoke(
        Invocation::suspendable(save(), async { Ok(1) }).with_context(compute.context()),
    ));
    assert_eq!(handle.cancel(), CancelOutcome::Prevented);
    assert_eq!(handle.cancel(), CancelOutcome::AlreadyCancelled);
    release_tx.send(()).unwrap();

    assert_eq!(compute.block_on(handle), Err(InvocationError::Cancelled));
    assert_eq!(pool.stats().acquired, 0);
}

#[test]
fn cancel_during_acquisition_discards_the_result() {
    init_logging();
    let compute = Executor::computation("cancel-compute", 1).unwrap();
    let offload = Executor::blocking("cancel-offload", 1).unwrap();
    let (pool, entered) =
        SignallingPool::new(BlockingConnectionPool::new("db", 1, Duration::from_secs(5)));
    let pool = Arc::new(pool);
    let system = system_over(Arc::clone(&pool), &compute, &offload);

    let held = pool.inner().acquire().unwrap();
    let handle = rerouted(system.invoke(
        Invocation::suspendable(save(), async { Ok(1) }).with_context(compute.context()),
    ));
    entered.recv().unwrap();
    assert_eq!(handle.cancel(), CancelOutcome::Requested);
    drop(held);

    assert_eq!(compute.block_on(handle), Err(InvocationError::Cancelled));
    let stats = pool.inner().stats();
    assert_eq!(stats.acquired, 2);
    assert_eq!(stats.committed, 0);
    assert_eq!(stats.in_use, 0);
}

#[test]
fn cancel_after_prefix_drops_continuation_and_rolls_back() {
    init_logging();
    let compute = Executor::computation("cancel-compute", 1).unwrap();
    let offload = Executor::blocking("cancel-offload", 1).unwrap();
    let pool = Arc::new(BlockingConnectionPool::new("db", 1, Duration::from_secs(1)));
    let system = system_over(Arc::clone(&pool), &compute, &offload);

    let (polled_tx, polled_rx) = mpsc::channel();
    let body = async move {
        let _ = polled_tx.send(());
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(1)
    };
    let handle = rerouted(system.invoke(
        Invocation::suspendable(save(), body).with_context(compute.context()),
    ));
    polled_rx.recv().unwrap();
    assert_eq!(pool.stats().acquired, 1);
    assert_eq!(handle.cancel(), CancelOutcome::Requested);

    assert_eq!(compute.block_on(handle), Err(InvocationError::Cancelled));
    let stats = pool.stats();
    assert_eq!((stats.rolled_back, stats.committed, stats.in_use), (1, 0, 0));
}

#[test]
fn dropping_the_handle_cancels_the_call() {
    init_logging();
    let compute = Executor::computation("cancel-compute", 1).unwrap();
    let offload = Executor::blocking("cancel-offload", 1).unwrap();
    let pool = Arc::new(BlockingConnectionPool::new("db", 1, Duration::from_secs(1)));
    let system = system_over(Arc::clone(&pool), &compute, &offload);

    let (polled_tx, polled_rx) = mpsc::channel();
    let body = async move {
        let _ = polled_tx.send(());
        futures::future::pending::<()>().await;
        Ok(1)
    };
    let handle = rerouted(system.invoke(
        Invocation::suspendable(save(), body).with_context(compute.context()),
    ));
    polled_rx.recv().unwrap();
    drop(handle);

    assert!(eventually(Duration::from_secs(2), || {
        pool.stats().rolled_back == 1
    }));
    assert_eq!(pool.stats().in_use, 0);
}

#[test]
fn cancel_after_delivery_is_too_late() {
    init_logging();
    let compute = Executor::computation("cancel-compute", 1).unwrap();
    let offload = Executor::blocking("cancel-offload", 1).unwrap();
    let pool = Arc::new(BlockingConnectionPool::new("db", 1, Duration::from_secs(1)));
    let system = system_over(Arc::clone(&pool), &compute, &offload);

    let mut handle = rerouted(system.invoke(
        Invocation::suspendable(save(), async { Ok(3) }).with_context(compute.context()),
    ));
    assert_eq!(compute.block_on(&mut handle), Ok(3));
    assert_eq!(handle.cancel(), CancelOutcome::TooLate);
    assert_eq!(pool.stats().committed, 1);
}
