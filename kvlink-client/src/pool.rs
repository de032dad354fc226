//! # Connection Pool
//!
//! Purpose: Reuse connections across operations, bound how many are open at
//! once, and decide what happens when the bound is reached.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable connections;
//!    the most recently released one is handed out first.
//! 2. **Minimal Locking**: The mutex is released while dialing or health checking.
//! 3. **Explicit Backpressure**: At `max_active` the caller either waits on a
//!    condition variable (no timeout) or gets `PoolExhausted` immediately.
//! 4. **Lazy Health Checks**: A borrowed connection is only health checked when it
//!    has been idle for at least `check_frequency`.
//! 5. **RAII Release**: `PooledConnection` returns itself on drop, so every
//!    exit path releases exactly once.
//!
//! ## Accounting
//!
//! ```text
//! active = idle.len() + checked out
//!
//! acquire:  idle.pop_front()  ──ping ok───>  checked out
//!                 │ ping failed: close, active -= 1, retry
//!           else active < max_active (or max_active == 0): active += 1, dial
//!           else wait_on_exhaustion ? wait for release : PoolExhausted
//!
//! release:  reusable && max_idle > 0 ? idle.push_front : close, active -= 1
//!           idle.len() > max_idle ? close oldest, active -= 1
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::config::PoolSettings;
use crate::connection::Connection;
use crate::error::{ClientError, ClientResult};
use crate::resp::RespValue;

/// Connection factory used by the pool.
pub type DialFn<C> = Box<dyn Fn() -> ClientResult<C> + Send + Sync>;

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Open connections, idle or checked out.
    pub active: usize,
    /// Connections waiting in the idle set.
    pub idle: usize,
}

impl PoolStats {
    /// Connections currently checked out.
    pub fn in_use(&self) -> usize {
        self.active - self.idle
    }
}

struct IdleConnection<C> {
    conn: C,
    released_at: Instant,
}

struct PoolState<C> {
    idle: VecDeque<IdleConnection<C>>,
    active: usize,
}

struct PoolInner<C> {
    settings: PoolSettings,
    dial: DialFn<C>,
    state: Mutex<PoolState<C>>,
    released: Condvar,
}

/// Connection pool handle.
pub struct ConnectionPool<C> {
    inner: Arc<PoolInner<C>>,
}

impl<C> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        ConnectionPool {
            inner: self.inner.clone(),
        }
    }
}

impl<C> ConnectionPool<C> {
    /// Returns current occupancy.
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            active: state.active,
            idle: state.idle.len(),
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.inner.settings
    }
}

impl<C> fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("settings", &self.inner.settings)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<C: Connection> ConnectionPool<C> {
    /// Creates a pool that opens connections through `dial`.
    ///
    /// No connection is opened until the first `acquire`.
    pub fn new<F>(settings: PoolSettings, dial: F) -> Self
    where
        F: Fn() -> ClientResult<C> + Send + Sync + 'static,
    {
        let state = PoolState {
            idle: VecDeque::with_capacity(settings.max_idle),
            active: 0,
        };
        ConnectionPool {
            inner: Arc::new(PoolInner {
                settings,
                dial: Box::new(dial),
                state: Mutex::new(state),
                released: Condvar::new(),
            }),
        }
    }

    /// Acquires a connection from the pool.
    ///
    /// When `max_active` connections are open and `wait_on_exhaustion` is
    /// set, this blocks until another caller releases one. There is no
    /// timeout; bound the wait externally if needed.
    pub fn acquire(&self) -> ClientResult<PooledConnection<C>> {
        let settings = &self.inner.settings;
        let mut state = self.inner.state.lock();

        loop {
            self.evict_stale(&mut state);

            if let Some(candidate) = state.idle.pop_front() {
                let checked = MutexGuard::unlocked(&mut state, || {
                    let slot = SlotGuard::new(&self.inner);
                    let conn = self.check(candidate)?;
                    slot.keep();
                    Some(conn)
                });
                match checked {
                    Some(conn) => return Ok(PooledConnection::new(self.inner.clone(), conn)),
                    // the failed connection's slot was returned by its guard
                    None => continue,
                }
            }

            if settings.max_active == 0 || state.active < settings.max_active {
                state.active += 1;
                let dialed = MutexGuard::unlocked(&mut state, || {
                    let slot = SlotGuard::new(&self.inner);
                    let conn = (self.inner.dial)()?;
                    slot.keep();
                    Ok(conn)
                });
                return dialed.map(|conn| PooledConnection::new(self.inner.clone(), conn));
            }

            if !settings.wait_on_exhaustion {
                return Err(ClientError::PoolExhausted {
                    max_active: settings.max_active,
                });
            }
            trace!(active = state.active, "pool exhausted, waiting for a release");
            self.inner.released.wait(&mut state);
        }
    }

    /// Closes idle connections that outlived `idle_timeout`. Oldest are at the back.
    fn evict_stale(&self, state: &mut PoolState<C>) {
        let timeout = self.inner.settings.idle_timeout;
        if timeout.is_zero() {
            return;
        }
        while let Some(oldest) = state.idle.back() {
            if oldest.released_at.elapsed() < timeout {
                break;
            }
            state.idle.pop_back();
            state.active -= 1;
            debug!(idle_timeout = ?timeout, "closed stale idle connection");
        }
    }

    /// Health checks a borrowed idle connection when it has been idle long enough.
    fn check(&self, candidate: IdleConnection<C>) -> Option<C> {
        let frequency = self.inner.settings.check_frequency;
        let IdleConnection { mut conn, released_at } = candidate;
        if frequency.is_zero() || released_at.elapsed() < frequency {
            return Some(conn);
        }

        match conn.ping() {
            Ok(()) => Some(conn),
            Err(err) => {
                debug!(error = %err, "idle connection failed health check, closing");
                None
            }
        }
    }
}

/// One `active` slot held while the pool lock is released.
///
/// Unless `keep` is called, dropping the guard gives the slot back and wakes
/// a waiter. This covers a failed dial or health check as well as a panic in
/// either. It must be dropped while the pool mutex is unlocked.
struct SlotGuard<'a, C> {
    inner: &'a PoolInner<C>,
    armed: bool,
}

impl<'a, C> SlotGuard<'a, C> {
    fn new(inner: &'a PoolInner<C>) -> Self {
        SlotGuard { inner, armed: true }
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl<C> Drop for SlotGuard<'_, C> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.state.lock().active -= 1;
            self.inner.released.notify_one();
        }
    }
}

impl<C> PoolInner<C> {
    fn release(&self, conn: C, reusable: bool) {
        let mut state = self.state.lock();
        if reusable && self.settings.max_idle > 0 {
            state.idle.push_front(IdleConnection {
                conn,
                released_at: Instant::now(),
            });
            if state.idle.len() > self.settings.max_idle {
                state.idle.pop_back();
                state.active -= 1;
            }
        } else {
            if !reusable {
                debug!("discarding connection after transport error");
            }
            drop(conn);
            state.active -= 1;
        }
        self.released.notify_one();
    }
}

/// RAII wrapper returning a connection to the pool on drop.
pub struct PooledConnection<C> {
    pool: Arc<PoolInner<C>>,
    conn: Option<C>,
    reusable: bool,
}

impl<C> PooledConnection<C> {
    fn new(pool: Arc<PoolInner<C>>, conn: C) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
            reusable: true,
        }
    }

    /// Marks the connection as broken so it is closed instead of reused.
    pub fn discard(&mut self) {
        self.reusable = false;
    }
}

impl<C: Connection> Connection for PooledConnection<C> {
    fn exec(&mut self, args: &[&[u8]]) -> ClientResult<RespValue> {
        let conn = match self.conn.as_mut() {
            Some(conn) => conn,
            None => return Err(ClientError::Protocol),
        };
        let response = conn.exec(args);
        if matches!(&response, Err(err) if err.is_transport()) {
            // The stream may hold a half-read reply; never hand it to another caller.
            self.reusable = false;
        }
        response
    }
}

impl<C> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn, self.reusable);
        }
    }
}
