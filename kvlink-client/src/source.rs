//! # Connection Sources
//!
//! Purpose: Give the storage client one way to check out a connection,
//! whether it is backed by a pool or by a single shared connection.
//!
//! ## Design Principles
//! 1. **One Capability, Two Variants**: `ConnectionSource` is chosen at
//!    construction; callers never branch on the mode.
//! 2. **Scoped Checkout**: `Checkout` releases on drop (returns to the pool,
//!    or unlocks the mutex), so release cannot be skipped on an error path.
//! 3. **Deliberate Serialization**: Single-connection mode runs every
//!    operation under one lock. It trades throughput for simplicity.

use parking_lot::{Mutex, MutexGuard};

use crate::connection::Connection;
use crate::error::ClientResult;
use crate::pool::{ConnectionPool, PooledConnection};
use crate::resp::RespValue;

/// One externally supplied connection guarded by a mutex.
pub struct SingleConnection<C> {
    conn: Mutex<C>,
}

impl<C: Connection> SingleConnection<C> {
    pub fn new(conn: C) -> Self {
        SingleConnection {
            conn: Mutex::new(conn),
        }
    }

    /// Blocks until no other operation holds the connection.
    pub fn acquire(&self) -> MutexGuard<'_, C> {
        self.conn.lock()
    }

    /// Hands the connection back to its owner.
    pub fn into_inner(self) -> C {
        self.conn.into_inner()
    }
}

/// Where a storage client gets its connections from.
pub enum ConnectionSource<C> {
    /// Bounded pool of reusable connections.
    Pool(ConnectionPool<C>),
    /// One connection shared under mutual exclusion.
    Single(SingleConnection<C>),
}

impl<C: Connection> ConnectionSource<C> {
    /// Wraps an externally owned connection.
    pub fn single(conn: C) -> Self {
        ConnectionSource::Single(SingleConnection::new(conn))
    }

    /// Checks out a connection; it is released when the `Checkout` drops.
    ///
    /// Fails only in pool mode, with `PoolExhausted` or a dial error.
    pub fn acquire(&self) -> ClientResult<Checkout<'_, C>> {
        match self {
            ConnectionSource::Pool(pool) => pool.acquire().map(Checkout::Pooled),
            ConnectionSource::Single(single) => Ok(Checkout::Single(single.acquire())),
        }
    }

    /// Returns the pool when running in pool mode.
    pub fn pool(&self) -> Option<&ConnectionPool<C>> {
        match self {
            ConnectionSource::Pool(pool) => Some(pool),
            ConnectionSource::Single(_) => None,
        }
    }
}

impl<C: Connection> From<ConnectionPool<C>> for ConnectionSource<C> {
    fn from(pool: ConnectionPool<C>) -> Self {
        ConnectionSource::Pool(pool)
    }
}

/// A checked-out connection.
pub enum Checkout<'a, C> {
    Pooled(PooledConnection<C>),
    Single(MutexGuard<'a, C>),
}

impl<C: Connection> Connection for Checkout<'_, C> {
    fn exec(&mut self, args: &[&[u8]]) -> ClientResult<RespValue> {
        match self {
            Checkout::Pooled(conn) => conn.exec(args),
            Checkout::Single(conn) => conn.exec(args),
        }
    }
}
