//! Bounded, intent-tagged connection pool with scoped leases.
//!
//! Connections are created up front and handed out through move-only
//! [`Lease`] handles that return them on drop. Waiters block on a condvar
//! up to a deadline. With writer priority enabled, readers are held back
//! while writers wait so a write-heavy deployment (one SQLITE connection)
//! cannot be starved.

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::driver::Connection;
use crate::error::{AcquireError, DriverError};

/// What the caller intends to do with the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Read,
    Write,
}

/// Pool acquisition policy.
#[derive(Debug, Clone, Copy)]
pub struct AcquirePolicy {
    /// Default wait when `acquire` is called without an override.
    pub acquire_timeout: Duration,
    /// Guardrail: leases held longer log a warning on release
    /// (zero disables the check).
    pub max_lease_time: Duration,
    /// Hold readers back while writers are waiting.
    pub writer_priority: bool,
}

impl Default for AcquirePolicy {
    fn default() -> Self {
        AcquirePolicy {
            acquire_timeout: Duration::from_millis(1500),
            max_lease_time: Duration::ZERO,
            writer_priority: true,
        }
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub size: usize,
    pub in_use: usize,
    pub waiters: usize,
}

/// Factory producing connected backend connections for one DSN.
pub type ConnectionFactory =
    Box<dyn Fn(&str) -> Result<Box<dyn Connection>, DriverError> + Send + Sync>;

struct PoolState {
    free: VecDeque<Box<dyn Connection>>,
    in_use: usize,
    waiters: usize,
    writers_waiting: usize,
    shutdown: bool,
}

struct PoolShared {
    capacity: usize,
    policy: AcquirePolicy,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl PoolShared {
    fn release(&self, conn: Box<dyn Connection>, leased_at: Instant) {
        let max_lease = self.policy.max_lease_time;
        if max_lease > Duration::ZERO && leased_at.elapsed() > max_lease {
            tracing::warn!(held_ms = leased_at.elapsed().as_millis() as u64, "lease held past the guardrail");
        }
        let mut state = self.state.lock();
        if !state.shutdown {
            state.free.push_back(conn);
        }
        // a shut-down pool drops the connection instead of recycling it
        if state.in_use > 0 {
            state.in_use -= 1;
        }
        if self.policy.writer_priority && state.writers_waiting > 0 {
            // a single notify could wake a gated reader and strand the writer
            self.available.notify_all();
        } else {
            self.available.notify_one();
        }
    }
}

/// Bounded pool of backend connections.
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
    dsn: String,
}

impl ConnectionPool {
    /// Create a pool of `capacity` connections to `dsn`, all connected up
    /// front through `factory`.
    pub fn new(
        capacity: usize,
        dsn: impl Into<String>,
        factory: ConnectionFactory,
        policy: AcquirePolicy,
    ) -> Result<Self, DriverError> {
        let dsn = dsn.into();
        let mut free = VecDeque::with_capacity(capacity);
        for _ in 0..capacity {
            free.push_back(factory(&dsn)?);
        }
        Ok(ConnectionPool {
            shared: Arc::new(PoolShared {
                capacity,
                policy,
                state: Mutex::new(PoolState {
                    free,
                    in_use: 0,
                    waiters: 0,
                    writers_waiting: 0,
                    shutdown: false,
                }),
                available: Condvar::new(),
            }),
            dsn,
        })
    }

    /// Acquire a connection, waiting up to `timeout` (the policy default
    /// when `None`).
    pub fn acquire(&self, intent: Intent, timeout: Option<Duration>) -> Result<Lease, AcquireError> {
        let timeout = timeout.unwrap_or(self.shared.policy.acquire_timeout);
        let deadline = Instant::now() + timeout;
        let writer_priority = self.shared.policy.writer_priority;

        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Err(AcquireError::Shutdown);
        }
        state.waiters += 1;
        if intent == Intent::Write {
            state.writers_waiting += 1;
        }

        let outcome = loop {
            if state.shutdown {
                break Err(AcquireError::Shutdown);
            }
            let gated = intent == Intent::Read && writer_priority && state.writers_waiting > 0;
            if !gated && !state.free.is_empty() {
                break Ok(());
            }
            if self
                .shared
                .available
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                break Err(AcquireError::Timeout);
            }
        };

        state.waiters -= 1;
        if intent == Intent::Write {
            state.writers_waiting -= 1;
        }
        outcome?;

        let conn = state
            .free
            .pop_front()
            .ok_or(AcquireError::Timeout)?;
        state.in_use += 1;
        drop(state);

        Ok(Lease {
            shared: Arc::clone(&self.shared),
            conn: Some(conn),
            intent,
            leased_at: Instant::now(),
        })
    }

    /// Snapshot the pool counters.
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        PoolStats {
            size: self.shared.capacity,
            in_use: state.in_use,
            waiters: state.waiters,
        }
    }

    /// Shut the pool down: fail new acquires, wake every waiter, and drop
    /// connections as their leases end. Idempotent.
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        state.shutdown = true;
        state.free.clear();
        self.shared.available.notify_all();
        tracing::info!(dsn = %self.dsn, "connection pool shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.state.lock().shutdown
    }
}

/// A scoped, move-only lease over a pooled connection. Dropping it returns
/// the connection to the pool unless the pool has shut down, in which case
/// the connection is closed.
pub struct Lease {
    shared: Arc<PoolShared>,
    conn: Option<Box<dyn Connection>>,
    intent: Intent,
    leased_at: Instant,
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("intent", &self.intent)
            .field("leased_at", &self.leased_at)
            .finish()
    }
}

impl Lease {
    pub fn intent(&self) -> Intent {
        self.intent
    }

    /// The leased connection.
    pub fn conn(&self) -> &(dyn Connection + 'static) {
        // invariant: the option is only emptied on drop
        self.conn.as_deref().unwrap()
    }
}

impl Deref for Lease {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.conn()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.shared.release(conn, self.leased_at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use crate::driver::SqliteConnection;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn sqlite_factory() -> ConnectionFactory {
        Box::new(|_dsn| {
            let conn = SqliteConnection::connect(":memory:")?;
            Ok(Box::new(conn) as Box<dyn Connection>)
        })
    }

    fn pool(capacity: usize, policy: AcquirePolicy) -> ConnectionPool {
        ConnectionPool::new(capacity, ":memory:", sqlite_factory(), policy).unwrap()
    }

    #[test]
    fn test_acquire_and_release_recycles() {
        let p = pool(2, AcquirePolicy::default());
        {
            let a = p.acquire(Intent::Write, None).unwrap();
            let _b = p.acquire(Intent::Write, None).unwrap();
            assert_eq!(p.stats().in_use, 2);
            assert_eq!(a.intent(), Intent::Write);
        }
        let stats = p.stats();
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.waiters, 0);
        assert_eq!(stats.size, 2);
        // capacity invariant held through the whole cycle
        let _c = p.acquire(Intent::Read, None).unwrap();
        assert_eq!(p.stats().in_use, 1);
    }

    #[test]
    fn test_lease_gives_working_connection() {
        let p = pool(1, AcquirePolicy::default());
        let lease = p.acquire(Intent::Write, None).unwrap();
        assert_eq!(lease.dialect(), Dialect::Sqlite);
        lease.exec_ddl("CREATE TABLE t(a TEXT);").unwrap();
    }

    #[test]
    fn test_acquire_timeout_on_empty_pool() {
        let p = pool(0, AcquirePolicy::default());
        let started = Instant::now();
        let err = p
            .acquire(Intent::Read, Some(Duration::from_millis(100)))
            .unwrap_err();
        assert_eq!(err, AcquireError::Timeout);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(90), "waited {:?}", waited);
        assert!(waited < Duration::from_millis(1000), "waited {:?}", waited);
        assert_eq!(p.stats().waiters, 0);
    }

    #[test]
    fn test_shutdown_rejects_new_acquires() {
        let p = pool(1, AcquirePolicy::default());
        p.shutdown();
        let started = Instant::now();
        let err = p.acquire(Intent::Write, None).unwrap_err();
        assert_eq!(err, AcquireError::Shutdown);
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_shutdown_wakes_waiters() {
        let p = Arc::new(pool(0, AcquirePolicy::default()));
        let waiter = {
            let p = Arc::clone(&p);
            thread::spawn(move || p.acquire(Intent::Read, Some(Duration::from_secs(10))))
        };
        // give the waiter time to block
        thread::sleep(Duration::from_millis(50));
        p.shutdown();
        let err = waiter.join().unwrap().unwrap_err();
        assert_eq!(err, AcquireError::Shutdown);
    }

    #[test]
    fn test_existing_lease_survives_shutdown() {
        let p = pool(1, AcquirePolicy::default());
        let lease = p.acquire(Intent::Write, None).unwrap();
        p.shutdown();
        // the lease stays usable; on drop the connection is closed, not recycled
        lease.exec_ddl("CREATE TABLE t(a TEXT);").unwrap();
        drop(lease);
        assert_eq!(p.stats().in_use, 0);
        assert!(p.acquire(Intent::Read, None).is_err());
    }

    #[test]
    fn test_writer_priority_gates_readers() {
        let p = Arc::new(pool(1, AcquirePolicy::default()));
        let held = p.acquire(Intent::Write, None).unwrap();

        let writer_turn = Arc::new(AtomicUsize::new(0));
        let writer = {
            let p = Arc::clone(&p);
            let turn = Arc::clone(&writer_turn);
            thread::spawn(move || {
                let lease = p.acquire(Intent::Write, Some(Duration::from_secs(5))).unwrap();
                turn.store(1, Ordering::SeqCst);
                drop(lease);
            })
        };
        thread::sleep(Duration::from_millis(50));
        let reader = {
            let p = Arc::clone(&p);
            let turn = Arc::clone(&writer_turn);
            thread::spawn(move || {
                let _lease = p.acquire(Intent::Read, Some(Duration::from_secs(5))).unwrap();
                // by the time a reader gets through, the writer has had its turn
                assert_eq!(turn.load(Ordering::SeqCst), 1);
            })
        };
        thread::sleep(Duration::from_millis(50));
        drop(held);
        writer.join().unwrap();
        reader.join().unwrap();
    }

    #[test]
    fn test_concurrent_acquire_respects_capacity() {
        let p = Arc::new(pool(3, AcquirePolicy::default()));
        let peak = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..12 {
            let p = Arc::clone(&p);
            let peak = Arc::clone(&peak);
            let current = Arc::clone(&current);
            handles.push(thread::spawn(move || {
                for _ in 0..20 {
                    let lease = p.acquire(Intent::Write, Some(Duration::from_secs(10))).unwrap();
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    current.fetch_sub(1, Ordering::SeqCst);
                    drop(lease);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
        let stats = p.stats();
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.waiters, 0);
    }
}
