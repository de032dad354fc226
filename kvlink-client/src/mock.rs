//! Scripted in-memory backend for unit tests.
//!
//! Every connection handed out by a `MockBackend` shares one command log and
//! one reply queue. `PING` is answered automatically and counted separately.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::connection::Connection;
use crate::error::{ClientError, ClientResult};
use crate::resp::RespValue;

#[derive(Default)]
struct MockState {
    commands: Vec<Vec<String>>,
    replies: VecDeque<ClientResult<RespValue>>,
    pings: usize,
    fail_pings: bool,
    dials: usize,
    closed: usize,
}

#[derive(Clone, Default)]
pub(crate) struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub(crate) fn new() -> Self {
        MockBackend::default()
    }

    pub(crate) fn connection(&self) -> MockConnection {
        let mut state = self.state.lock();
        state.dials += 1;
        MockConnection {
            id: state.dials,
            state: self.state.clone(),
        }
    }

    /// Factory closure for `ConnectionPool::new`.
    pub(crate) fn factory(&self) -> impl Fn() -> ClientResult<MockConnection> + Send + Sync + 'static {
        let backend = self.clone();
        move || Ok(backend.connection())
    }

    pub(crate) fn reply(&self, value: RespValue) {
        self.state.lock().replies.push_back(Ok(value));
    }

    pub(crate) fn fail(&self, err: ClientError) {
        self.state.lock().replies.push_back(Err(err));
    }

    pub(crate) fn fail_pings(&self, fail: bool) {
        self.state.lock().fail_pings = fail;
    }

    pub(crate) fn commands(&self) -> Vec<Vec<String>> {
        self.state.lock().commands.clone()
    }

    pub(crate) fn pings(&self) -> usize {
        self.state.lock().pings
    }

    pub(crate) fn dials(&self) -> usize {
        self.state.lock().dials
    }

    pub(crate) fn closed(&self) -> usize {
        self.state.lock().closed
    }
}

pub(crate) struct MockConnection {
    pub(crate) id: usize,
    state: Arc<Mutex<MockState>>,
}

impl Connection for MockConnection {
    fn exec(&mut self, args: &[&[u8]]) -> ClientResult<RespValue> {
        let mut state = self.state.lock();
        if args.first() == Some(&&b"PING"[..]) {
            state.pings += 1;
            if state.fail_pings {
                return Err(ClientError::Io(std::io::ErrorKind::BrokenPipe.into()));
            }
            return Ok(RespValue::Simple(Bytes::from_static(b"PONG")));
        }

        let command = args
            .iter()
            .map(|arg| String::from_utf8_lossy(arg).into_owned())
            .collect::<Vec<_>>();
        state.commands.push(command.clone());
        match state.replies.pop_front() {
            Some(reply) => reply,
            None => panic!("no scripted reply for {command:?}"),
        }
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.state.lock().closed += 1;
    }
}

pub(crate) fn bulk(data: &str) -> RespValue {
    RespValue::Bulk(Some(Bytes::copy_from_slice(data.as_bytes())))
}

pub(crate) fn ok() -> RespValue {
    RespValue::Simple(Bytes::from_static(b"OK"))
}

pub(crate) fn array(items: Vec<RespValue>) -> RespValue {
    RespValue::Array(Some(items))
}

/// Builds a `[cursor, [items...]]` scan reply.
pub(crate) fn scan_reply(cursor: &str, items: &[&str]) -> RespValue {
    array(vec![bulk(cursor), array(items.iter().map(|item| bulk(item)).collect())])
}
