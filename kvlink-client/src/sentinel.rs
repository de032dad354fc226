//! # Sentinel Master Discovery
//!
//! Purpose: Ask Sentinel nodes which address currently serves as master for
//! a monitored name.
//!
//! ## Notes
//! - Nodes are tried in order; the first node that answers is moved to the
//!   front so later lookups ask it first.
//! - A node that does not know the master (nil reply) counts as a miss, not
//!   as a failure of the whole lookup.

use std::fmt;

use parking_lot::Mutex;
use tracing::debug;

use crate::config::join_host_port;
use crate::connection::{Connection, TcpConnection, Timeouts};
use crate::error::{ClientError, ClientResult};
use crate::resp::RespValue;

/// Sentinel node list for one master name.
pub struct Sentinel {
    addrs: Mutex<Vec<String>>,
    master_name: String,
    timeouts: Timeouts,
}

impl fmt::Debug for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sentinel")
            .field("addrs", &*self.addrs.lock())
            .field("master_name", &self.master_name)
            .finish()
    }
}

impl Sentinel {
    pub fn new(addrs: Vec<String>, master_name: impl Into<String>, timeouts: Timeouts) -> Self {
        Sentinel {
            addrs: Mutex::new(addrs),
            master_name: master_name.into(),
            timeouts,
        }
    }

    pub fn master_name(&self) -> &str {
        &self.master_name
    }

    /// Returns the master address as `host:port`, asking nodes over TCP.
    pub fn master_addr(&self) -> ClientResult<String> {
        let timeouts = self.timeouts;
        self.master_addr_with(|addr| TcpConnection::connect(addr, timeouts))
    }

    /// Returns the master address, opening node connections through `connect`.
    pub fn master_addr_with<C, F>(&self, mut connect: F) -> ClientResult<String>
    where
        C: Connection,
        F: FnMut(&str) -> ClientResult<C>,
    {
        let addrs = self.addrs.lock().clone();
        if addrs.is_empty() {
            return Err(ClientError::Sentinel("no sentinel addresses configured".to_string()));
        }

        let mut last_error = None;
        for (index, addr) in addrs.iter().enumerate() {
            match connect(addr).and_then(|mut conn| self.query(&mut conn)) {
                Ok(Some(master)) => {
                    self.promote(index);
                    debug!(sentinel = %addr, master = %master, "resolved master address");
                    return Ok(master);
                }
                Ok(None) => {
                    last_error = Some(format!("{addr}: master {} unknown", self.master_name));
                }
                Err(err) => {
                    debug!(sentinel = %addr, error = %err, "sentinel lookup failed");
                    last_error = Some(format!("{addr}: {err}"));
                }
            }
        }

        Err(ClientError::Sentinel(last_error.unwrap_or_default()))
    }

    fn query<C: Connection>(&self, conn: &mut C) -> ClientResult<Option<String>> {
        let reply = conn.exec(&[b"SENTINEL", b"get-master-addr-by-name", self.master_name.as_bytes()])?;
        match reply.into_result()? {
            RespValue::Array(None) | RespValue::Bulk(None) => Ok(None),
            RespValue::Array(Some(parts)) if parts.len() == 2 => {
                let mut parts = parts.into_iter().map(RespValue::into_bytes);
                let host = parts.next().ok_or(ClientError::UnexpectedResponse)??;
                let port = parts.next().ok_or(ClientError::UnexpectedResponse)??;
                let host = std::str::from_utf8(&host).map_err(|_| ClientError::UnexpectedResponse)?;
                let port = std::str::from_utf8(&port).map_err(|_| ClientError::UnexpectedResponse)?;
                Ok(Some(join_host_port(host, port)))
            }
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    fn promote(&self, index: usize) {
        if index == 0 {
            return;
        }
        let mut addrs = self.addrs.lock();
        if index < addrs.len() {
            let addr = addrs.remove(index);
            addrs.insert(0, addr);
        }
    }

    /// Current node order.
    pub fn addrs(&self) -> Vec<String> {
        self.addrs.lock().clone()
    }
}
