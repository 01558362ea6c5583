//! Bounded pool of SQLite connections for one logical store.

use crate::config::{PoolSettings, StoreKind};
use crate::{functions, Result, StoreError};
use biomass_metrics::metric_defs;
use parking_lot::{Condvar, Mutex};
use rusqlite::{Connection, OpenFlags};
use std::ops::{Deref, DerefMut};
use std::time::Instant;
use tracing::{debug, info, warn};

struct PoolState {
    idle: Vec<Connection>,
    /// Connections alive, idle or checked out.
    open: usize,
}

/// Connection pool with a fixed upper bound.
///
/// `acquire` hands out an idle connection, opens a new one while under
/// `max_connections`, and otherwise waits up to `acquire_timeout` for a
/// connection to be returned.
pub struct ConnectionPool {
    kind: StoreKind,
    settings: PoolSettings,
    state: Mutex<PoolState>,
    returned: Condvar,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ConnectionPool")
            .field("kind", &self.kind)
            .field("path", &self.settings.path)
            .field("open", &state.open)
            .field("idle", &state.idle.len())
            .finish()
    }
}

impl ConnectionPool {
    /// Open the pool and its `min_connections` eagerly, so a bad path fails
    /// at startup rather than mid-run.
    pub fn open(kind: StoreKind, settings: PoolSettings) -> Result<Self> {
        let pool = Self {
            kind,
            settings,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                open: 0,
            }),
            returned: Condvar::new(),
        };
        let mut idle = Vec::with_capacity(pool.settings.min_connections);
        for _ in 0..pool.settings.min_connections {
            idle.push(pool.connect_with_retry()?);
        }
        {
            let mut state = pool.state.lock();
            state.open = idle.len();
            state.idle = idle;
        }
        info!(
            store = %kind,
            path = %pool.settings.path.display(),
            min = pool.settings.min_connections,
            max = pool.settings.max_connections,
            "Connection pool ready"
        );
        Ok(pool)
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// `(open, idle)` connection counts.
    pub fn counts(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.open, state.idle.len())
    }

    /// Check out a connection. It returns to the pool when the guard drops.
    pub fn acquire(&self) -> Result<PooledConnection<'_>> {
        let started = Instant::now();
        let deadline = started + self.settings.acquire_timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(conn) = state.idle.pop() {
                drop(state);
                return Ok(self.checked_out(conn));
            }
            if state.open < self.settings.max_connections {
                state.open += 1;
                drop(state);
                return match self.connect_with_retry() {
                    Ok(conn) => Ok(self.checked_out(conn)),
                    Err(e) => {
                        self.state.lock().open -= 1;
                        self.returned.notify_one();
                        Err(e)
                    }
                };
            }
            if self.returned.wait_until(&mut state, deadline).timed_out() {
                warn!(store = %self.kind, open = state.open, "Connection pool exhausted");
                return Err(StoreError::PoolTimeout {
                    store: self.kind,
                    waited: started.elapsed(),
                });
            }
        }
    }

    fn checked_out(&self, conn: Connection) -> PooledConnection<'_> {
        metrics::gauge!(metric_defs::DB_CONNECTIONS_IN_USE.name, "store" => self.kind.as_str())
            .increment(1.0);
        PooledConnection {
            pool: self,
            conn: Some(conn),
        }
    }

    fn release(&self, conn: Connection) {
        metrics::gauge!(metric_defs::DB_CONNECTIONS_IN_USE.name, "store" => self.kind.as_str())
            .decrement(1.0);
        let conn = if conn.is_autocommit() {
            Some(conn)
        } else {
            // A guard dropped mid-transaction; discard rather than reuse.
            match conn.execute_batch("ROLLBACK") {
                Ok(()) => Some(conn),
                Err(e) => {
                    warn!(store = %self.kind, error = %e, "Dropping connection after failed rollback");
                    None
                }
            }
        };
        let mut state = self.state.lock();
        match conn {
            Some(conn) => state.idle.push(conn),
            None => state.open -= 1,
        }
        drop(state);
        self.returned.notify_one();
    }

    fn connect_with_retry(&self) -> Result<Connection> {
        self.settings.retry.run(self.kind.as_str(), |attempt| {
            if attempt > 0 {
                metrics::counter!(
                    metric_defs::DB_CONNECTION_RETRIES.name,
                    "store" => self.kind.as_str()
                )
                .increment(1);
            }
            self.connect()
        })
    }

    fn connect(&self) -> Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
            | OpenFlags::SQLITE_OPEN_URI;
        let conn = Connection::open_with_flags(&self.settings.path, flags)?;
        conn.busy_timeout(self.settings.busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode = wal; PRAGMA synchronous = normal;")?;
        functions::register(&conn)?;
        debug!(store = %self.kind, "Opened connection");
        Ok(conn)
    }
}

/// A checked-out connection.
pub struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    conn: Option<Connection>,
}

impl std::fmt::Debug for PooledConnection<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("store", &self.pool.kind)
            .finish()
    }
}

impl PooledConnection<'_> {
    pub fn store(&self) -> StoreKind {
        self.pool.kind
    }
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only `Drop` takes the connection out.
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        match &mut self.conn {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreSettings;
    use std::time::Duration;

    fn pool(dir: &tempfile::TempDir, max: usize) -> ConnectionPool {
        let mut settings = StoreSettings::at(dir.path().join("pool.db")).resolve(StoreKind::Output);
        settings.max_connections = max;
        settings.acquire_timeout = Duration::from_millis(50);
        ConnectionPool::open(StoreKind::Output, settings).unwrap()
    }

    #[test]
    fn test_connections_are_reused() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(&dir, 2);
        assert_eq!(pool.counts(), (1, 1));
        {
            let conn = pool.acquire().unwrap();
            conn.execute_batch("CREATE TABLE t (x INTEGER)").unwrap();
            assert_eq!(pool.counts(), (1, 0));
        }
        assert_eq!(pool.counts(), (1, 1));
        let conn = pool.acquire().unwrap();
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn test_exhausted_pool_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(&dir, 2);
        let _a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();
        assert_eq!(pool.counts(), (2, 0));
        match pool.acquire() {
            Err(StoreError::PoolTimeout { store, .. }) => assert_eq!(store, StoreKind::Output),
            other => panic!("expected timeout, got {other:?}"),
        };
    }

    #[test]
    fn test_waiter_gets_returned_connection() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = StoreSettings::at(dir.path().join("pool.db")).resolve(StoreKind::Output);
        settings.max_connections = 1;
        settings.acquire_timeout = Duration::from_secs(5);
        let pool = ConnectionPool::open(StoreKind::Output, settings).unwrap();

        let held = pool.acquire().unwrap();
        std::thread::scope(|scope| {
            let waiter = scope.spawn(|| pool.acquire().map(|_| ()));
            std::thread::sleep(Duration::from_millis(20));
            drop(held);
            assert!(waiter.join().unwrap().is_ok());
        });
        assert_eq!(pool.counts(), (1, 1));
    }

    #[test]
    fn test_open_transaction_is_rolled_back_on_release() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(&dir, 1);
        {
            let conn = pool.acquire().unwrap();
            conn.execute_batch("CREATE TABLE t (x INTEGER); BEGIN; INSERT INTO t VALUES (1);")
                .unwrap();
        }
        let conn = pool.acquire().unwrap();
        assert!(conn.is_autocommit());
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 0);
    }
}
