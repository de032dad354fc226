//! # Client Errors
//!
//! Purpose: One error type for every layer of the client, from the socket up
//! to the storage facade.
//!
//! ## Design Principles
//! 1. **Propagate, Don't Swallow**: Errors go back to the immediate caller;
//!    the library never retries or logs them on its own.
//! 2. **Distinct Backpressure**: Pool exhaustion is its own variant so callers
//!    can back off and retry without string matching.
//! 3. **Not-Found Is Not An Error**: nil replies are normalized by read
//!    operations and never reach this type.

use thiserror::Error;

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or IO failure while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// RESP2 framing or parse error.
    #[error("protocol error")]
    Protocol,

    /// Server returned an error reply.
    #[error("server error: {}", String::from_utf8_lossy(.message))]
    Server { message: Vec<u8> },

    /// Response type did not match the expected command response.
    #[error("unexpected response")]
    UnexpectedResponse,

    /// Pool is at capacity, no idle connection is available and waiting is disabled.
    #[error("connection pool exhausted (max active: {max_active})")]
    PoolExhausted { max_active: usize },

    /// Address could not be resolved into a socket address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// No Sentinel node could report the current master.
    #[error("sentinel error: {0}")]
    Sentinel(String),

    /// A storage client was built with neither a pool nor a connection.
    #[error("no connection source provided")]
    NoConnectionSource,
}

impl ClientError {
    /// Returns true for failures that leave the connection in an unknown state.
    ///
    /// Such connections must be closed rather than handed to the next caller.
    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Io(_) | ClientError::Protocol)
    }
}
