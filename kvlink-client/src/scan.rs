//! # Scan Iterator
//!
//! Purpose: Walk the keyspace (SCAN) or the members of one set (SSCAN) in
//! batches without blocking the server.
//!
//! ## Design Principles
//! 1. **Owned Session**: Cursor, pattern and batch hint live in one
//!    `ScanSession` owned by the iterator; fetches are strictly sequential.
//! 2. **Short Checkouts**: Each fetch acquires and releases its own
//!    connection, so a slow consumer never pins a pooled connection.
//! 3. **Explicit States**: `Fresh -> InProgress -> Done`. The `"0"` cursor
//!    means both "start" and "finished"; the state tells them apart.
//!
//! ## Cursor Protocol
//!
//! ```text
//! Fresh("0") --fetch--> next == "0" ? Done : InProgress(next)
//! InProgress(c) --fetch--> next == "0" ? Done : InProgress(next)
//! Done --fetch--> empty batch, no request
//! ```
//!
//! Items added or removed during a traversal may be returned zero, one or
//! several times.

use std::fmt;

use bytes::Bytes;
use tracing::trace;

use crate::client::StorageClient;
use crate::connection::Connection;
use crate::error::{ClientError, ClientResult};
use crate::resp::RespValue;

/// Batch size hint used when none is configured.
pub const DEFAULT_BATCH_SIZE: usize = 32;

const START_CURSOR: &str = "0";

/// Opaque server cursor. `"0"` is both the start and the end of a traversal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cursor(String);

impl Cursor {
    pub fn start() -> Self {
        Cursor(START_CURSOR.to_string())
    }

    /// Wraps a cursor value; an empty value is the start cursor.
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        if value.is_empty() {
            Cursor::start()
        } else {
            Cursor(value)
        }
    }

    pub fn is_start(&self) -> bool {
        self.0 == START_CURSOR
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Cursor {
    fn default() -> Self {
        Cursor::start()
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Cursor {
    fn from(value: &str) -> Self {
        Cursor::new(value)
    }
}

impl From<String> for Cursor {
    fn from(value: String) -> Self {
        Cursor::new(value)
    }
}

/// What a traversal enumerates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanKind {
    /// Every key in the selected database.
    Keys,
    /// Members of the set stored at the given key.
    SetMembers(String),
}

/// Traversal progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// No fetch issued yet.
    Fresh,
    /// At least one fetch issued; the cursor is not `"0"`.
    InProgress,
    /// A fetch returned `"0"`.
    Done,
}

/// Mutable state of one traversal.
#[derive(Debug, Clone)]
pub struct ScanSession {
    kind: ScanKind,
    cursor: Cursor,
    pattern: Option<String>,
    batch_size: usize,
    state: ScanState,
}

impl ScanSession {
    pub(crate) fn keys() -> Self {
        Self::with_kind(ScanKind::Keys)
    }

    pub(crate) fn set_members(key: &str) -> Self {
        Self::with_kind(ScanKind::SetMembers(key.to_string()))
    }

    fn with_kind(kind: ScanKind) -> Self {
        ScanSession {
            kind,
            cursor: Cursor::start(),
            pattern: None,
            batch_size: DEFAULT_BATCH_SIZE,
            state: ScanState::Fresh,
        }
    }

    pub fn kind(&self) -> &ScanKind {
        &self.kind
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_deref()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    fn is_finished(&self) -> bool {
        self.batch_size == 0 || self.state == ScanState::Done
    }

    fn advance(&mut self, next: Cursor) {
        self.state = if next.is_start() {
            ScanState::Done
        } else {
            ScanState::InProgress
        };
        self.cursor = next;
    }
}

/// Batch iterator over a SCAN or SSCAN traversal.
///
/// Configure with the builder methods, then consume with [`fetch`],
/// [`drain`], or as an `Iterator` of batches.
///
/// [`fetch`]: ScanIterator::fetch
/// [`drain`]: ScanIterator::drain
pub struct ScanIterator<'a, C> {
    client: &'a StorageClient<C>,
    session: ScanSession,
    failed: bool,
}

impl<'a, C: Connection> ScanIterator<'a, C> {
    pub(crate) fn new(client: &'a StorageClient<C>, session: ScanSession) -> Self {
        ScanIterator {
            client,
            session,
            failed: false,
        }
    }

    /// Only return items matching the glob `pattern`.
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.session.pattern = Some(pattern.into());
        self
    }

    /// Hint for how many items each fetch should return. Zero disables the
    /// traversal: nothing is fetched.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.session.batch_size = batch_size;
        self
    }

    /// Resumes from a cursor saved from an earlier traversal.
    pub fn cursor(mut self, cursor: impl Into<Cursor>) -> Self {
        let cursor = cursor.into();
        self.session.state = if cursor.is_start() {
            ScanState::Fresh
        } else {
            ScanState::InProgress
        };
        self.session.cursor = cursor;
        self
    }

    pub fn session(&self) -> &ScanSession {
        &self.session
    }

    pub fn state(&self) -> ScanState {
        self.session.state
    }

    pub fn is_done(&self) -> bool {
        self.session.state == ScanState::Done
    }

    /// Issues one request and advances the cursor.
    ///
    /// Returns an empty batch without a request once the traversal is done
    /// or when the batch size is zero.
    pub fn fetch(&mut self) -> ClientResult<Vec<Bytes>> {
        if self.session.is_finished() {
            return Ok(Vec::new());
        }

        let count = self.session.batch_size.to_string();
        let mut args: Vec<&[u8]> = Vec::with_capacity(7);
        match &self.session.kind {
            ScanKind::Keys => args.push(b"SCAN"),
            ScanKind::SetMembers(key) => {
                args.push(b"SSCAN");
                args.push(key.as_bytes());
            }
        }
        args.push(self.session.cursor.as_str().as_bytes());
        if let Some(pattern) = &self.session.pattern {
            args.push(b"MATCH");
            args.push(pattern.as_bytes());
        }
        args.push(b"COUNT");
        args.push(count.as_bytes());

        let reply = {
            let mut conn = self.client.source().acquire()?;
            conn.exec(&args)?
        };
        let (next, items) = parse_scan_reply(reply)?;
        trace!(cursor = %self.session.cursor, next = %next, items = items.len(), "scan fetch");
        self.session.advance(next);
        Ok(items)
    }

    /// Fetches until the traversal is done, handing every batch to `on_batch`.
    ///
    /// A failed fetch stops the drain and returns the error; batches already
    /// delivered stay delivered.
    pub fn drain<F>(&mut self, mut on_batch: F) -> ClientResult<()>
    where
        F: FnMut(Vec<Bytes>),
    {
        while !self.session.is_finished() {
            let batch = self.fetch()?;
            on_batch(batch);
        }
        Ok(())
    }
}

impl<C: Connection> Iterator for ScanIterator<'_, C> {
    type Item = ClientResult<Vec<Bytes>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.session.is_finished() {
            return None;
        }
        match self.fetch() {
            Ok(batch) => Some(Ok(batch)),
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

fn parse_scan_reply(reply: RespValue) -> ClientResult<(Cursor, Vec<Bytes>)> {
    let parts = match reply.into_result()? {
        RespValue::Array(Some(parts)) if parts.len() == 2 => parts,
        _ => return Err(ClientError::UnexpectedResponse),
    };
    let mut parts = parts.into_iter();
    let cursor = parts.next().ok_or(ClientError::UnexpectedResponse)?.into_bytes()?;
    let items = match parts.next() {
        Some(items @ RespValue::Array(_)) => items.into_bytes_vec()?,
        _ => return Err(ClientError::UnexpectedResponse),
    };
    let cursor = std::str::from_utf8(&cursor).map_err(|_| ClientError::UnexpectedResponse)?;
    Ok((Cursor::new(cursor), items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolSettings;
    use crate::mock::{array, bulk, scan_reply, MockBackend, MockConnection};
    use crate::pool::ConnectionPool;

    fn client(backend: &MockBackend) -> StorageClient<MockConnection> {
        StorageClient::builder().connection(backend.connection()).build()
    }

    fn strings(batch: &[Bytes]) -> Vec<String> {
        batch.iter().map(|item| String::from_utf8_lossy(item).into_owned()).collect()
    }

    #[test]
    fn cursor_normalizes_empty_to_start() {
        assert!(Cursor::new("").is_start());
        assert_eq!(Cursor::default(), Cursor::from("0"));
        assert!(!Cursor::from("17").is_start());
        assert_eq!(Cursor::from("17").to_string(), "17");
    }

    #[test]
    fn drain_follows_cursor_chain_until_zero() {
        let backend = MockBackend::new();
        backend.reply(scan_reply("5", &["a", "b"]));
        backend.reply(scan_reply("9", &["c"]));
        backend.reply(scan_reply("0", &["d", "e"]));

        let client = client(&backend);
        let mut scan = client.scan().batch_size(2);
        assert_eq!(scan.state(), ScanState::Fresh);

        let mut seen = Vec::new();
        scan.drain(|batch| seen.extend(strings(&batch))).unwrap();
        assert_eq!(seen, vec!["a", "b", "c", "d", "e"]);
        assert!(scan.is_done());

        let cursors: Vec<String> = backend.commands().iter().map(|cmd| cmd[1].clone()).collect();
        assert_eq!(cursors, vec!["0", "5", "9"]);

        assert!(scan.fetch().unwrap().is_empty());
        assert_eq!(backend.commands().len(), 3);
    }

    #[test]
    fn fetch_sends_pattern_and_count() {
        let backend = MockBackend::new();
        backend.reply(scan_reply("3", &["user:1"]));

        let client = client(&backend);
        let mut scan = client.scan().pattern("user:*").batch_size(10);
        assert_eq!(strings(&scan.fetch().unwrap()), vec!["user:1"]);
        assert_eq!(scan.state(), ScanState::InProgress);
        assert_eq!(scan.session().cursor().as_str(), "3");
        assert_eq!(
            backend.commands()[0],
            vec!["SCAN", "0", "MATCH", "user:*", "COUNT", "10"]
        );
    }

    #[test]
    fn set_scan_uses_sscan() {
        let backend = MockBackend::new();
        backend.reply(scan_reply("0", &["m1", "m2"]));

        let client = client(&backend);
        let batches: Vec<_> = client
            .scan_set("members")
            .map(|batch| strings(&batch.unwrap()))
            .collect();
        assert_eq!(batches, vec![vec!["m1", "m2"]]);
        assert_eq!(backend.commands()[0], vec!["SSCAN", "members", "0", "COUNT", "32"]);
    }

    #[test]
    fn zero_batch_size_disables_traversal() {
        let backend = MockBackend::new();
        let client = client(&backend);

        let mut calls = 0;
        client.scan().batch_size(0).drain(|_| calls += 1).unwrap();
        assert_eq!(calls, 0);
        assert!(client.scan().batch_size(0).fetch().unwrap().is_empty());
        assert_eq!(client.scan().batch_size(0).count(), 0);
        assert!(backend.commands().is_empty());
    }

    #[test]
    fn error_mid_drain_keeps_delivered_batches() {
        let backend = MockBackend::new();
        backend.reply(scan_reply("4", &["a"]));
        backend.fail(ClientError::Io(std::io::ErrorKind::ConnectionReset.into()));

        let client = client(&backend);
        let mut seen = Vec::new();
        let err = client
            .scan()
            .drain(|batch| seen.extend(strings(&batch)))
            .unwrap_err();
        assert!(matches!(err, ClientError::Io(_)));
        assert_eq!(seen, vec!["a"]);
    }

    #[test]
    fn iterator_fuses_after_error() {
        let backend = MockBackend::new();
        backend.reply(RespValue::Integer(1));

        let client = client(&backend);
        let mut scan = client.scan();
        assert!(matches!(scan.next(), Some(Err(ClientError::UnexpectedResponse))));
        assert!(scan.next().is_none());
        assert_eq!(backend.commands().len(), 1);
    }

    #[test]
    fn resumes_from_saved_cursor() {
        let backend = MockBackend::new();
        backend.reply(scan_reply("0", &["z"]));

        let client = client(&backend);
        let mut scan = client.scan().cursor("42");
        assert_eq!(scan.state(), ScanState::InProgress);
        scan.fetch().unwrap();
        assert_eq!(backend.commands()[0][1], "42");
        assert!(scan.is_done());
    }

    #[test]
    fn nil_items_and_malformed_replies() {
        let backend = MockBackend::new();
        backend.reply(array(vec![bulk("0"), RespValue::Array(None)]));
        backend.reply(array(vec![bulk("0")]));

        let client = client(&backend);
        assert!(client.scan().fetch().unwrap().is_empty());
        assert!(matches!(
            client.scan().fetch(),
            Err(ClientError::UnexpectedResponse)
        ));
    }

    #[test]
    fn each_fetch_releases_its_connection() {
        let backend = MockBackend::new();
        backend.reply(scan_reply("8", &["a"]));
        backend.reply(scan_reply("0", &["b"]));
        let settings = PoolSettings {
            max_active: 1,
            wait_on_exhaustion: false,
            ..PoolSettings::default()
        };
        let pool = ConnectionPool::new(settings, backend.factory());
        let client = StorageClient::builder().pool(pool.clone()).build();

        let mut scan = client.scan();
        scan.fetch().unwrap();
        assert_eq!(pool.stats().in_use(), 0);
        // the only connection is free, so an unrelated checkout succeeds mid-scan
        drop(pool.acquire().unwrap());
        scan.fetch().unwrap();
        assert!(scan.is_done());
        assert_eq!(backend.dials(), 1);
    }
}
