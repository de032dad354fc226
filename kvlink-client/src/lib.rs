//! # KVLink Storage Client
//!
//! Purpose: Provide a blocking, pooled client for a Redis-compatible store,
//! covering string, hash and set commands, cursor scans and TTL policies.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse TCP connections to avoid repeated connects.
//! 2. **Scoped Checkout**: Every operation holds a connection only for its own
//!    duration and releases it on drop.
//! 3. **Minimal Allocation**: Reuse buffers for RESP framing and parsing.
//! 4. **Protocol Clarity**: Encode/parse RESP2 explicitly for correctness.
//!
//! ## Layout
//!
//! ```text
//! StorageClient ──> ConnectionSource ──┬─> ConnectionPool ──> Dialer ──> TcpConnection
//!       │                              └─> SingleConnection            (Sentinel lookup)
//!       └─> ScanIterator (one checkout per fetch)
//! ```

mod client;
mod config;
mod connection;
mod error;
#[cfg(test)]
mod mock;
mod pool;
mod resp;
mod scan;
mod sentinel;
mod source;
mod ttl;

pub use client::{StorageBuilder, StorageClient, KEYS_BATCH_SIZE};
pub use config::{
    format_duration, parse_duration, ConnectionConfig, PoolSettings, DEFAULT_MASTER_NAME,
    DEFAULT_POOL_SIZE,
};
pub use connection::{Connection, Dialer, TcpConnection, Timeouts};
pub use error::{ClientError, ClientResult};
pub use pool::{ConnectionPool, DialFn, PoolStats, PooledConnection};
pub use resp::RespValue;
pub use scan::{Cursor, ScanIterator, ScanKind, ScanSession, ScanState, DEFAULT_BATCH_SIZE};
pub use sentinel::Sentinel;
pub use source::{Checkout, ConnectionSource, SingleConnection};
pub use ttl::{TtlFn, TtlPolicy};
