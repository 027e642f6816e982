//! PostgreSQL connection pool.
//!
//! A bounded, fair dispenser of ready connections. Capacity is enforced by
//! a FIFO semaphore; the idle queue, live count, and closed flag live under
//! one short, non-suspending critical section.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::{PgConfig, PgPoolConfig};
use crate::connection::{PgConnection, Phase, QueryResult};
use crate::error::{PgError, PgResult};
use crate::protocol::TransactionStatus;
use crate::types::PgValue;

/// Successive validation failures tolerated before a borrow gives up.
const MAX_VALIDATION_FAILURES: u32 = 3;

/// Factory for new pool connections; the default one dials the configured
/// host. Swappable for custom transports.
pub type Connector = Arc<
    dyn Fn(PgConfig) -> Pin<Box<dyn Future<Output = PgResult<PgConnection>> + Send>>
        + Send
        + Sync,
>;

/// Error from returning a connection to a closed pool.
///
/// When the pool is configured to leave returned connections open
/// (`close_returned_connection_on_closed_pool = false`), the connection
/// comes back to the caller in `connection`.
pub struct ReturnToClosedPool {
    pub connection: Option<PgConnection>,
}

impl fmt::Debug for ReturnToClosedPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReturnToClosedPool")
            .field("connection_retained", &self.connection.is_some())
            .finish()
    }
}

impl From<ReturnToClosedPool> for PgError {
    fn from(_: ReturnToClosedPool) -> Self {
        PgError::PoolClosed
    }
}

struct IdleConn {
    conn: PgConnection,
    /// Freshly created connections skip the validation query
    used: bool,
}

struct PoolState {
    idle: VecDeque<IdleConn>,
    live: usize,
    closed: bool,
}

struct PgPoolInner {
    config: PgPoolConfig,
    connector: Connector,
    state: Mutex<PoolState>,
    semaphore: Arc<Semaphore>,
}

/// A PostgreSQL connection pool.
///
/// Invariants: `idle + in_use == live <= size`; a connection is owned by
/// exactly one of the idle queue or a borrower; once closed, the idle queue
/// is empty and no new connections are made.
#[derive(Clone)]
pub struct PgPool {
    inner: Arc<PgPoolInner>,
}

impl PgPool {
    /// Create a pool; with `connect_eagerly` all connections are
    /// established before this returns.
    pub async fn connect(config: PgPoolConfig) -> PgResult<Self> {
        let connector: Connector = Arc::new(|config: PgConfig| {
            Box::pin(PgConnection::connect_with_config(config))
        });
        Self::with_connector(config, connector).await
    }

    /// Create a pool around a custom connection factory.
    pub async fn with_connector(config: PgPoolConfig, connector: Connector) -> PgResult<Self> {
        let size = config.size;
        let eager = config.connect_eagerly;
        let inner = Arc::new(PgPoolInner {
            semaphore: Arc::new(Semaphore::new(size)),
            state: Mutex::new(PoolState {
                idle: VecDeque::with_capacity(size),
                live: 0,
                closed: false,
            }),
            connector,
            config,
        });
        let pool = Self { inner };

        if eager {
            for _ in 0..size {
                match pool.create_connection().await {
                    Ok(conn) => {
                        let mut state = pool.inner.state.lock();
                        state.idle.push_back(IdleConn { conn, used: false });
                        state.live += 1;
                    }
                    Err(e) => {
                        // Tear down the partially filled pool
                        pool.close().await;
                        return Err(e);
                    }
                }
            }
        }

        Ok(pool)
    }

    /// Borrow a connection, waiting at most `timeout` (default from the
    /// pool configuration). The caller owns the connection until
    /// `return_connection`.
    pub async fn borrow_connection(&self, timeout: Option<Duration>) -> PgResult<PgConnection> {
        let timeout = timeout.unwrap_or(self.inner.config.borrow_timeout);
        let deadline = tokio::time::Instant::now() + timeout;

        // FIFO waiter queue: the semaphore serves acquisitions in order
        let permit = match tokio::time::timeout_at(
            deadline,
            Arc::clone(&self.inner.semaphore).acquire_owned(),
        )
        .await
        {
            Err(_) => return Err(PgError::BorrowTimeout),
            Ok(Err(_)) => return Err(PgError::PoolClosed),
            Ok(Ok(permit)) => permit,
        };

        let mut validation_failures = 0u32;
        loop {
            let popped = {
                let mut state = self.inner.state.lock();
                if state.closed {
                    return Err(PgError::PoolClosed);
                }
                state.idle.pop_front()
            };

            match popped {
                Some(IdleConn { mut conn, used }) => {
                    let needs_validation =
                        used && self.inner.config.validation_query.is_some();
                    if needs_validation {
                        let query = self
                            .inner
                            .config
                            .validation_query
                            .clone()
                            .unwrap_or_default();
                        match tokio::time::timeout_at(deadline, conn.simple_query(&query)).await
                        {
                            Ok(Ok(_)) => {
                                permit.forget();
                                return Ok(conn);
                            }
                            Ok(Err(e)) => {
                                warn!(error = %e, "pool validation query failed; discarding connection");
                                self.discard(conn).await;
                                validation_failures += 1;
                                if validation_failures >= MAX_VALIDATION_FAILURES {
                                    return Err(PgError::ValidationFailed);
                                }
                                continue;
                            }
                            Err(_) => {
                                self.discard(conn).await;
                                return Err(PgError::BorrowTimeout);
                            }
                        }
                    }
                    permit.forget();
                    return Ok(conn);
                }
                None => {
                    // No idle connection; the held permit guarantees
                    // live < size, so create one
                    let conn = match tokio::time::timeout_at(deadline, self.create_connection())
                        .await
                    {
                        Err(_) => return Err(PgError::BorrowTimeout),
                        Ok(Err(e)) => return Err(e),
                        Ok(Ok(conn)) => conn,
                    };
                    let pool_closed = {
                        let mut state = self.inner.state.lock();
                        if state.closed {
                            true
                        } else {
                            state.live += 1;
                            false
                        }
                    };
                    if pool_closed {
                        let mut conn = conn;
                        let _ = conn.close().await;
                        return Err(PgError::PoolClosed);
                    }
                    permit.forget();
                    return Ok(conn);
                }
            }
        }
    }

    /// Return a previously borrowed connection.
    ///
    /// Fatal or non-idle (mid-transaction) connections are closed rather
    /// than reinserted. Returning to a closed pool fails; whether the
    /// connection is closed then follows
    /// `close_returned_connection_on_closed_pool`.
    pub async fn return_connection(
        &self,
        conn: PgConnection,
    ) -> Result<(), ReturnToClosedPool> {
        if self.inner.state.lock().closed {
            return self.return_to_closed(conn).await;
        }

        if conn.phase() != Phase::Ready
            || conn.transaction_status() != TransactionStatus::Idle
        {
            debug!("discarding returned connection in non-reusable state");
            self.discard(conn).await;
            self.inner.semaphore.add_permits(1);
            return Ok(());
        }

        let conn = {
            let mut state = self.inner.state.lock();
            if state.closed {
                Some(conn)
            } else {
                state.idle.push_back(IdleConn { conn, used: true });
                None
            }
        };
        if let Some(conn) = conn {
            // Pool closed while we were checking; take the closed path
            return self.return_to_closed(conn).await;
        }
        // Release capacity only after the connection is visible in the
        // idle queue, so the woken waiter finds it
        self.inner.semaphore.add_permits(1);
        Ok(())
    }

    async fn return_to_closed(&self, conn: PgConnection) -> Result<(), ReturnToClosedPool> {
        self.inner.state.lock().live -= 1;
        self.inner.semaphore.add_permits(1);
        if self.inner.config.close_returned_connection_on_closed_pool {
            let mut conn = conn;
            let _ = conn.close().await;
            return Err(ReturnToClosedPool { connection: None });
        }
        Err(ReturnToClosedPool {
            connection: Some(conn),
        })
    }

    /// Borrow a connection, run `body` on it, return the connection on
    /// every exit path, and propagate the body's result.
    pub async fn with_connection<T, F>(&self, body: F) -> PgResult<T>
    where
        F: for<'c> FnOnce(
            &'c mut PgConnection,
        ) -> Pin<Box<dyn Future<Output = PgResult<T>> + Send + 'c>>,
    {
        let mut conn = self.borrow_connection(None).await?;
        let result = body(&mut conn).await;
        if let Err(e) = self.return_connection(conn).await {
            debug!(error = ?e, "connection returned after pool close");
        }
        result
    }

    /// Guard-style borrow: the connection rides back into the pool when
    /// the guard drops.
    pub async fn acquire(&self) -> PgResult<PooledConnection> {
        let conn = self.borrow_connection(None).await?;
        Ok(PooledConnection {
            conn: Some(conn),
            inner: Arc::clone(&self.inner),
        })
    }

    /// Close the pool: no new borrows, idle connections are closed, and
    /// waiters are woken with `PoolClosed`. Idempotent.
    pub async fn close(&self) {
        let drained = {
            let mut state = self.inner.state.lock();
            if state.closed {
                Vec::new()
            } else {
                state.closed = true;
                state.live -= state.idle.len();
                state.idle.drain(..).collect::<Vec<_>>()
            }
        };
        self.inner.semaphore.close();
        for idle in drained {
            let mut conn = idle.conn;
            let _ = conn.close().await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Connections currently parked in the pool.
    pub fn idle_count(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    /// Connections in existence (idle plus borrowed).
    pub fn live_count(&self) -> usize {
        self.inner.state.lock().live
    }

    pub fn config(&self) -> &PgPoolConfig {
        &self.inner.config
    }

    // ========================================================================
    // Convenience passthroughs
    // ========================================================================

    /// Execute a simple query on a pooled connection.
    pub async fn simple_query(&self, query: &str) -> PgResult<Vec<QueryResult>> {
        let mut conn = self.borrow_connection(None).await?;
        let result = conn.simple_query(query).await;
        let _ = self.return_connection(conn).await;
        result
    }

    /// Execute a parameterized query on a pooled connection.
    pub async fn query(&self, query: &str, params: &[PgValue]) -> PgResult<QueryResult> {
        let mut conn = self.borrow_connection(None).await?;
        let result = conn.query(query, params).await;
        let _ = self.return_connection(conn).await;
        result
    }

    /// Execute a statement and report rows affected.
    pub async fn execute(&self, query: &str, params: &[PgValue]) -> PgResult<u64> {
        Ok(self.query(query, params).await?.rows_affected())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn create_connection(&self) -> PgResult<PgConnection> {
        (self.inner.connector)(self.inner.config.config.clone()).await
    }

    /// Drop a connection out of the pool's accounting.
    async fn discard(&self, mut conn: PgConnection) {
        let _ = conn.close().await;
        self.inner.state.lock().live -= 1;
    }
}

/// A connection checked out from the pool via `acquire`.
///
/// Dropping the guard returns a healthy idle connection to the pool;
/// fatal or mid-transaction connections are dropped and deducted instead.
pub struct PooledConnection {
    conn: Option<PgConnection>,
    inner: Arc<PgPoolInner>,
}

impl Deref for PooledConnection {
    type Target = PgConnection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let reusable = conn.phase() == Phase::Ready
            && conn.transaction_status() == TransactionStatus::Idle;
        {
            let mut state = self.inner.state.lock();
            if !state.closed && reusable {
                state.idle.push_back(IdleConn { conn, used: true });
            } else {
                // Dropping the connection closes its socket; Terminate is
                // best-effort only on explicit close paths
                state.live -= 1;
            }
        }
        self.inner.semaphore.add_permits(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_to_closed_pool_error_maps_to_pool_closed() {
        let err: PgError = ReturnToClosedPool { connection: None }.into();
        assert!(matches!(err, PgError::PoolClosed));
    }

    #[test]
    fn return_to_closed_pool_debug_does_not_dump_connection() {
        let repr = format!("{:?}", ReturnToClosedPool { connection: None });
        assert!(repr.contains("connection_retained: false"));
    }
}
