//! # Storage Client
//!
//! Purpose: Expose a compact, blocking API for string, hash and set commands
//! on top of a connection source.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `StorageClient` hides pooling, locking and RESP.
//! 2. **Acquire, Execute, Release**: Every call checks out one connection for
//!    its own duration; the checkout guard releases it on every exit path.
//! 3. **Absent Is Empty**: Read operations turn nil replies into empty values.
//! 4. **No Empty Commands**: Variadic operations with nothing to send return
//!    immediately instead of issuing a malformed request.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;

use crate::config::{ConnectionConfig, PoolSettings};
use crate::connection::{Connection, Dialer, TcpConnection};
use crate::error::{ClientError, ClientResult};
use crate::pool::ConnectionPool;
use crate::resp::{format_decimal, RespValue};
use crate::scan::{ScanIterator, ScanSession};
use crate::source::ConnectionSource;
use crate::ttl::TtlPolicy;

/// Batch size hint used by [`StorageClient::keys`].
pub const KEYS_BATCH_SIZE: usize = 32;

/// Builder for [`StorageClient`].
///
/// A pool takes precedence over a single connection when both are supplied.
pub struct StorageBuilder<C> {
    namespace: String,
    key_ttl: TtlPolicy,
    pool: Option<ConnectionPool<C>>,
    connection: Option<C>,
}

impl<C: Connection> Default for StorageBuilder<C> {
    fn default() -> Self {
        StorageBuilder {
            namespace: String::new(),
            key_ttl: TtlPolicy::NoExpiry,
            pool: None,
            connection: None,
        }
    }
}

impl<C: Connection> StorageBuilder<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Label carried by the client. Keys are not prefixed with it.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Default TTL policy applied by [`StorageClient::set`].
    pub fn key_ttl(mut self, policy: impl Into<TtlPolicy>) -> Self {
        self.key_ttl = policy.into();
        self
    }

    pub fn pool(mut self, pool: ConnectionPool<C>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Single externally owned connection; every operation is serialized on it.
    pub fn connection(mut self, conn: C) -> Self {
        self.connection = Some(conn);
        self
    }

    /// Builds the client, or fails when no connection source was supplied.
    pub fn try_build(self) -> ClientResult<StorageClient<C>> {
        let source = match (self.pool, self.connection) {
            (Some(pool), _) => ConnectionSource::Pool(pool),
            (None, Some(conn)) => ConnectionSource::single(conn),
            (None, None) => return Err(ClientError::NoConnectionSource),
        };
        Ok(StorageClient {
            namespace: self.namespace,
            key_ttl: self.key_ttl,
            source,
        })
    }

    /// Builds the client.
    ///
    /// # Panics
    /// Panics when neither a pool nor a connection was supplied; such a
    /// client could never execute a command.
    pub fn build(self) -> StorageClient<C> {
        match self.try_build() {
            Ok(client) => client,
            Err(err) => panic!("storage client: {err}"),
        }
    }
}

/// Blocking storage client.
///
/// Each call acquires a connection from its source, runs its command(s), and
/// releases the connection before returning.
pub struct StorageClient<C = TcpConnection> {
    namespace: String,
    key_ttl: TtlPolicy,
    source: ConnectionSource<C>,
}

impl<C> fmt::Debug for StorageClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match &self.source {
            ConnectionSource::Pool(_) => "pool",
            ConnectionSource::Single(_) => "single",
        };
        f.debug_struct("StorageClient")
            .field("namespace", &self.namespace)
            .field("key_ttl", &self.key_ttl)
            .field("source", &mode)
            .finish()
    }
}

impl StorageClient<TcpConnection> {
    /// Builds a pooled TCP client from `{prefix}_REDIS_*` environment variables.
    pub fn from_env(prefix: &str) -> Self {
        let dialer = Dialer::new(ConnectionConfig::from_env(prefix));
        let pool = ConnectionPool::new(PoolSettings::from_env(prefix), dialer.into_factory());
        StorageClient::with_source(ConnectionSource::Pool(pool))
    }
}

impl<C: Connection> StorageClient<C> {
    pub fn builder() -> StorageBuilder<C> {
        StorageBuilder::new()
    }

    /// Creates a client with no namespace and no default expiry.
    pub fn with_source(source: ConnectionSource<C>) -> Self {
        StorageClient {
            namespace: String::new(),
            key_ttl: TtlPolicy::NoExpiry,
            source,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn key_ttl(&self) -> &TtlPolicy {
        &self.key_ttl
    }

    pub fn source(&self) -> &ConnectionSource<C> {
        &self.source
    }

    fn exec(&self, args: &[&[u8]]) -> ClientResult<RespValue> {
        let mut conn = self.source.acquire()?;
        conn.exec(args)
    }

    /// Pings the server.
    pub fn ping(&self) -> ClientResult<()> {
        self.source.acquire()?.ping()
    }

    /// Applies `policy` to an existing key and reports whether its expiry
    /// changed.
    ///
    /// A positive policy issues EXPIRE, which is true when the key exists. A
    /// policy resolving to zero issues PERSIST, which is true only when the
    /// key existed and had a timeout to remove.
    pub fn expire(&self, key: &str, policy: &TtlPolicy) -> ClientResult<bool> {
        let seconds = policy.resolve(key);
        if seconds == 0 {
            return self.exec(&[b"PERSIST", key.as_bytes()])?.into_bool();
        }
        let mut buf = [0u8; 20];
        let seconds = format_decimal(seconds, &mut buf);
        self.exec(&[b"EXPIRE", key.as_bytes(), seconds])?.into_bool()
    }

    /// Writes `value` using the client's default TTL policy.
    pub fn set(&self, key: &str, value: &[u8]) -> ClientResult<()> {
        self.set_with_ttl(key, value, &self.key_ttl)
    }

    /// Writes `value` with an explicit TTL policy.
    ///
    /// The policy is resolved once for `key`; zero issues SET, anything else
    /// SETEX with exactly that many seconds.
    pub fn set_with_ttl(&self, key: &str, value: &[u8], policy: &TtlPolicy) -> ClientResult<()> {
        let seconds = policy.resolve(key);
        if seconds == 0 {
            return self.exec(&[b"SET", key.as_bytes(), value])?.into_ok();
        }
        let mut buf = [0u8; 20];
        let seconds = format_decimal(seconds, &mut buf);
        self.exec(&[b"SETEX", key.as_bytes(), seconds, value])?.into_ok()
    }

    /// Adds `delta` to an integer value and returns the result.
    pub fn increment(&self, key: &str, delta: i64) -> ClientResult<i64> {
        let delta = delta.to_string();
        self.exec(&[b"INCRBY", key.as_bytes(), delta.as_bytes()])?.into_integer()
    }

    /// Fetches a value. A missing key yields an empty value.
    pub fn get(&self, key: &str) -> ClientResult<Bytes> {
        self.exec(&[b"GET", key.as_bytes()])?.into_bytes()
    }

    /// Fetches several values in one round trip.
    ///
    /// The result has one entry per key, in input order; missing keys yield
    /// empty placeholders.
    pub fn multi_get(&self, keys: &[&str]) -> ClientResult<Vec<Bytes>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut args: Vec<&[u8]> = Vec::with_capacity(keys.len() + 1);
        args.push(b"MGET");
        args.extend(keys.iter().map(|key| key.as_bytes()));
        self.exec(&args)?.into_bytes_vec()
    }

    /// Publishes a message and returns the number of receivers.
    pub fn publish(&self, channel: &str, message: &[u8]) -> ClientResult<i64> {
        self.exec(&[b"PUBLISH", channel.as_bytes(), message])?.into_integer()
    }

    /// Lists keys matching a glob pattern by draining a SCAN traversal.
    ///
    /// Keys added or removed during the traversal may be missed or repeated.
    /// Keys are returned as raw bytes; binary keys round-trip unchanged.
    pub fn keys(&self, pattern: &str) -> ClientResult<Vec<Bytes>> {
        let mut keys = Vec::new();
        self.scan()
            .pattern(pattern)
            .batch_size(KEYS_BATCH_SIZE)
            .drain(|batch| keys.extend(batch))?;
        Ok(keys)
    }

    /// Starts a keyspace traversal (SCAN).
    pub fn scan(&self) -> ScanIterator<'_, C> {
        ScanIterator::new(self, ScanSession::keys())
    }

    /// Starts a traversal over the members of the set at `key` (SSCAN).
    pub fn scan_set(&self, key: &str) -> ScanIterator<'_, C> {
        ScanIterator::new(self, ScanSession::set_members(key))
    }

    /// Sets one hash field.
    pub fn set_field(&self, key: &str, field: &str, value: &[u8]) -> ClientResult<()> {
        self.exec(&[b"HSET", key.as_bytes(), field.as_bytes(), value])?
            .into_integer()
            .map(|_| ())
    }

    /// Fetches one hash field. A missing key or field yields an empty value.
    pub fn get_field(&self, key: &str, field: &str) -> ClientResult<Bytes> {
        self.exec(&[b"HGET", key.as_bytes(), field.as_bytes()])?.into_bytes()
    }

    /// Sets several hash fields at once. An empty map is a no-op.
    pub fn set_fields<K, V>(&self, key: &str, fields: &HashMap<K, V>) -> ClientResult<()>
    where
        K: AsRef<str>,
        V: AsRef<[u8]>,
    {
        if fields.is_empty() {
            return Ok(());
        }
        let mut args: Vec<&[u8]> = Vec::with_capacity(fields.len() * 2 + 2);
        args.push(b"HMSET");
        args.push(key.as_bytes());
        for (field, value) in fields {
            args.push(field.as_ref().as_bytes());
            args.push(value.as_ref());
        }
        self.exec(&args)?.into_ok()
    }

    /// Fetches several hash fields, keyed by field name. Missing fields map
    /// to empty values. No fields means no request.
    pub fn get_fields(&self, key: &str, fields: &[&str]) -> ClientResult<HashMap<String, Bytes>> {
        if fields.is_empty() {
            return Ok(HashMap::new());
        }
        let mut args: Vec<&[u8]> = Vec::with_capacity(fields.len() + 2);
        args.push(b"HMGET");
        args.push(key.as_bytes());
        args.extend(fields.iter().map(|field| field.as_bytes()));

        let values = self.exec(&args)?.into_bytes_vec()?;
        if values.len() != fields.len() {
            return Err(ClientError::UnexpectedResponse);
        }
        Ok(fields
            .iter()
            .map(|field| field.to_string())
            .zip(values)
            .collect())
    }

    /// Adds `delta` to a hash field and returns the result.
    pub fn increment_field(&self, key: &str, field: &str, delta: i64) -> ClientResult<i64> {
        let delta = delta.to_string();
        self.exec(&[b"HINCRBY", key.as_bytes(), field.as_bytes(), delta.as_bytes()])?
            .into_integer()
    }

    pub fn field_exists(&self, key: &str, field: &str) -> ClientResult<bool> {
        self.exec(&[b"HEXISTS", key.as_bytes(), field.as_bytes()])?.into_bool()
    }

    /// All values of a hash. A missing key yields an empty vector.
    pub fn get_values(&self, key: &str) -> ClientResult<Vec<Bytes>> {
        self.exec(&[b"HVALS", key.as_bytes()])?.into_bytes_vec()
    }

    /// Removes hash fields and returns how many existed.
    pub fn remove_fields(&self, key: &str, fields: &[&str]) -> ClientResult<i64> {
        if fields.is_empty() {
            return Ok(0);
        }
        let mut args: Vec<&[u8]> = Vec::with_capacity(fields.len() + 2);
        args.push(b"HDEL");
        args.push(key.as_bytes());
        args.extend(fields.iter().map(|field| field.as_bytes()));
        self.exec(&args)?.into_integer()
    }

    /// Number of members in a set.
    pub fn cardinality(&self, key: &str) -> ClientResult<i64> {
        self.exec(&[b"SCARD", key.as_bytes()])?.into_integer()
    }

    /// Adds members to a set and returns how many were new.
    pub fn add_to_set(&self, key: &str, values: &[&[u8]]) -> ClientResult<i64> {
        self.set_command(b"SADD", key, values)
    }

    /// Removes members from a set and returns how many were present.
    pub fn remove_from_set(&self, key: &str, values: &[&[u8]]) -> ClientResult<i64> {
        self.set_command(b"SREM", key, values)
    }

    fn set_command(&self, command: &[u8], key: &str, values: &[&[u8]]) -> ClientResult<i64> {
        if values.is_empty() {
            return Ok(0);
        }
        let mut args: Vec<&[u8]> = Vec::with_capacity(values.len() + 2);
        args.push(command);
        args.push(key.as_bytes());
        args.extend_from_slice(values);
        self.exec(&args)?.into_integer()
    }

    /// All members of a set. A missing key yields an empty vector.
    pub fn get_all_from_set(&self, key: &str) -> ClientResult<Vec<Bytes>> {
        self.exec(&[b"SMEMBERS", key.as_bytes()])?.into_bytes_vec()
    }

    pub fn is_member_of_set(&self, key: &str, value: &[u8]) -> ClientResult<bool> {
        self.exec(&[b"SISMEMBER", key.as_bytes(), value])?.into_bool()
    }

    /// Stores the union of `keys` at `destination` and returns its size.
    pub fn store_union_set(&self, destination: &str, keys: &[&str]) -> ClientResult<i64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut args: Vec<&[u8]> = Vec::with_capacity(keys.len() + 2);
        args.push(b"SUNIONSTORE");
        args.push(destination.as_bytes());
        args.extend(keys.iter().map(|key| key.as_bytes()));
        self.exec(&args)?.into_integer()
    }

    /// Deletes keys and returns how many existed.
    pub fn delete(&self, keys: &[&str]) -> ClientResult<i64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut args: Vec<&[u8]> = Vec::with_capacity(keys.len() + 1);
        args.push(b"DEL");
        args.extend(keys.iter().map(|key| key.as_bytes()));
        self.exec(&args)?.into_integer()
    }
}
