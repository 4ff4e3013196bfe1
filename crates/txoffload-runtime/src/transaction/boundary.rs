//! Transactional boundary interceptor.
//!
//! Acquires a connection when the call enters the boundary, on whatever thread
//! proceeds the chain, then commits on success and rolls back on error. For a
//! deferred result the connection is held until the future finishes; dropping
//! the future rolls back.

use std::sync::Arc;

use futures::FutureExt;

use txoffload_kernel::{Interceptor, Invocation, InvocationError, Marker, Next, Reply};

use super::pool::{Connection, ConnectionPool};

pub const TRANSACTIONAL_INTERCEPTOR: &str = "transactional";

/// Default precedence of the transactional boundary.
pub const TRANSACTION_ORDER: i32 = -300;

pub struct TransactionalInterceptor<P: ConnectionPool> {
    pool: Arc<P>,
    order: i32,
}

impl<P: ConnectionPool> TransactionalInterceptor<P> {
    pub fn new(pool: Arc<P>) -> Self {
        Self {
            pool,
            order: TRANSACTION_ORDER,
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn pool(&self) -> &Arc<P> {
        &self.pool
    }
}

fn settle<C: Connection, T>(
    connection: C,
    result: Result<T, InvocationError>,
) -> Result<T, InvocationError> {
    match result {
        Ok(value) => {
            connection.commit()?;
            log::debug!("transaction committed");
            Ok(value)
        }
        Err(err) => {
            connection.rollback();
            log::debug!("transaction rolled back: {err}");
            Err(err)
        }
    }
}

impl<T, P> Interceptor<T> for TransactionalInterceptor<P>
where
    T: Send + 'static,
    P: ConnectionPool,
{
    fn name(&self) -> &str {
        TRANSACTIONAL_INTERCEPTOR
    }

    fn order(&self) -> i32 {
        self.order
    }

    fn binding(&self) -> Option<Marker> {
        Some(Marker::Transactional)
    }

    fn intercept(&self, invocation: Invocation<T>, next: Next<T>) -> Reply<T> {
        let id = invocation.id();
        log::debug!(
            "{id}: beginning transaction for `{}` on pool `{}`",
            invocation.signature().name(),
            self.pool.name()
        );
        let connection = match self.pool.acquire() {
            Ok(connection) => connection,
            Err(err) => {
                log::debug!("{id}: acquisition failed: {err}");
                return Reply::Ready(Err(err.into()));
            }
        };
        match next.proceed(invocation) {
            Reply::Ready(result) => Reply::Ready(settle(connection, result)),
            deferred => Reply::Deferred(
                deferred
                    .into_deferred()
                    .map(move |result| settle(connection, result))
                    .boxed(),
            ),
        }
    }
}
