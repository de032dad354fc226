//! # Connections and Dialing
//!
//! Purpose: Define the `Connection` capability the rest of the client is
//! written against, and provide the TCP implementation plus the dialer that
//! acts as the pool's connection factory.
//!
//! ## Design Principles
//! 1. **One Capability**: Anything that can execute a command and return a
//!    reply is a connection; pools, guards and test doubles all implement it.
//! 2. **Buffer Reuse**: Each TCP connection owns its read/write buffers.
//! 3. **Setup At Dial Time**: Address resolution, AUTH and SELECT happen once
//!    when the connection is created, never on the request path.

use std::io::{self, BufReader, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tracing::debug;

use crate::config::ConnectionConfig;
use crate::error::{ClientError, ClientResult};
use crate::resp::{encode_command, format_decimal, read_response, RespValue};
use crate::sentinel::Sentinel;

/// A stateful session to the backend.
///
/// Connections are not thread-safe; a connection is held by one operation at
/// a time.
pub trait Connection {
    /// Sends one command and reads its reply.
    fn exec(&mut self, args: &[&[u8]]) -> ClientResult<RespValue>;

    /// Sends `PING` and expects a non-error reply.
    fn ping(&mut self) -> ClientResult<()> {
        match self.exec(&[b"PING"])?.into_result()? {
            RespValue::Simple(_) | RespValue::Bulk(Some(_)) => Ok(()),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn exec(&mut self, args: &[&[u8]]) -> ClientResult<RespValue> {
        (**self).exec(args)
    }
}

/// Socket timeouts applied to a freshly dialed stream. `None` blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Option<Duration>,
    pub read: Option<Duration>,
    pub write: Option<Duration>,
}

impl Timeouts {
    /// Resolves the effective timeouts from a connection config.
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Timeouts {
            connect: config.effective_connect_timeout(),
            read: config.effective_read_timeout(),
            write: config.effective_write_timeout(),
        }
    }
}

/// Transport failure that left a stream mid-reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    Io(io::ErrorKind),
    Protocol,
}

impl Fault {
    fn of(err: &ClientError) -> Option<Fault> {
        match err {
            ClientError::Io(err) => Some(Fault::Io(err.kind())),
            ClientError::Protocol => Some(Fault::Protocol),
            _ => None,
        }
    }

    fn to_error(self) -> ClientError {
        match self {
            Fault::Io(kind) => ClientError::Io(io::Error::new(
                kind,
                "connection unusable after an earlier transport error",
            )),
            Fault::Protocol => ClientError::Protocol,
        }
    }
}

/// Single TCP connection speaking RESP2.
///
/// After a transport error the stream may still carry a late or partial
/// reply, so the connection refuses every later command with the same kind
/// of error instead of reading someone else's answer.
pub struct TcpConnection {
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: BytesMut,
    fault: Option<Fault>,
}

impl TcpConnection {
    /// Opens a TCP connection to `addr` with the given socket timeouts.
    pub fn connect(addr: &str, timeouts: Timeouts) -> ClientResult<Self> {
        let addr = resolve(addr)?;
        let stream = match timeouts.connect {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout)?,
            None => TcpStream::connect(addr)?,
        };
        stream.set_read_timeout(timeouts.read)?;
        stream.set_write_timeout(timeouts.write)?;
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;

        Ok(TcpConnection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: BytesMut::with_capacity(256),
            fault: None,
        })
    }

    /// Returns true once a transport error has made the connection unusable.
    pub fn is_broken(&self) -> bool {
        self.fault.is_some()
    }

    fn round_trip(&mut self, args: &[&[u8]]) -> ClientResult<RespValue> {
        self.write_buf.clear();
        encode_command(args, &mut self.write_buf);

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;

        read_response(&mut self.reader, &mut self.line_buf)
    }

    /// Remote address of the underlying socket.
    pub fn peer_addr(&self) -> ClientResult<SocketAddr> {
        Ok(self.reader.get_ref().peer_addr()?)
    }
}

impl Connection for TcpConnection {
    fn exec(&mut self, args: &[&[u8]]) -> ClientResult<RespValue> {
        if let Some(fault) = self.fault {
            return Err(fault.to_error());
        }
        let response = self.round_trip(args);
        if let Err(err) = &response {
            self.fault = Fault::of(err);
        }
        response
    }
}

fn resolve(addr: &str) -> ClientResult<SocketAddr> {
    addr.to_socket_addrs()
        .map_err(|_| ClientError::InvalidAddress(addr.to_string()))?
        .next()
        .ok_or_else(|| ClientError::InvalidAddress(addr.to_string()))
}

/// Connection factory built from a [`ConnectionConfig`].
///
/// Resolves the master address (directly or through Sentinel) on every dial,
/// then authenticates and selects the configured database.
#[derive(Debug, Clone)]
pub struct Dialer {
    config: Arc<ConnectionConfig>,
    sentinel: Option<Arc<Sentinel>>,
}

impl Dialer {
    pub fn new(config: ConnectionConfig) -> Self {
        let sentinel = config.uses_sentinel().then(|| {
            Arc::new(Sentinel::new(
                config.sentinel_addresses.clone(),
                config.master_name.clone(),
                Timeouts::from_config(&config),
            ))
        });
        Dialer {
            config: Arc::new(config),
            sentinel,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Current master address.
    pub fn address(&self) -> ClientResult<String> {
        match &self.sentinel {
            Some(sentinel) => sentinel.master_addr(),
            None => Ok(self.config.address.clone()),
        }
    }

    /// Resolves the address and dials it.
    pub fn connect(&self) -> ClientResult<TcpConnection> {
        let address = self.address()?;
        self.dial(&address)
    }

    /// Dials `address`, then runs AUTH and SELECT as configured.
    pub fn dial(&self, address: &str) -> ClientResult<TcpConnection> {
        let mut conn = TcpConnection::connect(address, Timeouts::from_config(&self.config))?;
        debug!(address, database = self.config.database, "dialed connection");

        if let Some(password) = &self.config.password {
            conn.exec(&[b"AUTH", password.as_bytes()])?.into_ok()?;
        }
        if self.config.database != 0 {
            let mut buf = [0u8; 20];
            let database = format_decimal(self.config.database as u64, &mut buf);
            conn.exec(&[b"SELECT", database])?.into_ok()?;
        }
        Ok(conn)
    }

    /// Turns the dialer into a factory closure suitable for a pool.
    pub fn into_factory(self) -> impl Fn() -> ClientResult<TcpConnection> + Send + Sync + 'static {
        move || self.connect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBackend;

    #[test]
    fn ping_accepts_pong() {
        let backend = MockBackend::new();
        let mut conn = backend.connection();
        conn.ping().unwrap();
        assert_eq!(backend.pings(), 1);
    }

    #[test]
    fn ping_surfaces_failure() {
        let backend = MockBackend::new();
        backend.fail_pings(true);
        let mut conn = backend.connection();
        assert!(conn.ping().is_err());
    }

    #[test]
    fn boxed_connections_forward() {
        let backend = MockBackend::new();
        backend.reply(RespValue::Integer(3));
        let mut conn: Box<dyn Connection> = Box::new(backend.connection());
        assert_eq!(conn.exec(&[b"DEL", b"a"]).unwrap(), RespValue::Integer(3));
        assert_eq!(backend.commands(), vec![vec!["DEL".to_string(), "a".to_string()]]);
    }

    #[test]
    fn unresolvable_address_is_invalid() {
        let err = TcpConnection::connect("not an address", Timeouts::default()).err().unwrap();
        assert!(matches!(err, ClientError::InvalidAddress(_)));
    }

    #[test]
    fn dialer_uses_static_address_without_sentinel() {
        let config = ConnectionConfig {
            address: "127.0.0.1:7000".to_string(),
            ..ConnectionConfig::default()
        };
        let dialer = Dialer::new(config);
        assert_eq!(dialer.address().unwrap(), "127.0.0.1:7000");
    }
}
