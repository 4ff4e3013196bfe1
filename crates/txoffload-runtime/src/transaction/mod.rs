//! Transactional collaborators: a blocking connection pool and the boundary
//! interceptor that acquires from it.

pub mod boundary;
pub mod pool;

pub use boundary::{TransactionalInterceptor, TRANSACTIONAL_INTERCEPTOR, TRANSACTION_ORDER};
pub use pool::{
    BlockingConnectionPool, Connection, ConnectionPool, PoolError, PoolStats, PooledConnection,
};
