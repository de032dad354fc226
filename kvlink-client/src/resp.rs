//! # RESP2 Encoding and Parsing
//!
//! Purpose: Encode commands as RESP2 arrays of bulk strings and parse server
//! replies, then convert replies into the typed results the storage facade
//! returns.
//!
//! ## Design Principles
//! 1. **State-Free Parsing**: Replies are parsed top-down with minimal state.
//! 2. **Buffer Reuse**: Callers own the line and write buffers.
//! 3. **Binary-Safe**: Bulk strings are raw bytes (`Bytes`), never UTF-8 checked.
//! 4. **Nil Is Data**: Null bulk/array replies are kept distinct here; the
//!    conversion helpers are where "not found" becomes an empty value.

use std::io::{BufRead, Read};

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ClientError, ClientResult};

/// Largest bulk string accepted from the server (the Redis proto-max-bulk-len default).
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

// Upper bound for allocations sized from a length the server announced.
const PREALLOC_LIMIT: usize = 4096;

/// RESP reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// +OK or +PONG style replies.
    Simple(Bytes),
    /// -ERR ... replies.
    Error(Bytes),
    /// :123 replies.
    Integer(i64),
    /// $... bulk strings, `None` for the null bulk string.
    Bulk(Option<Bytes>),
    /// *... arrays, `None` for the null array.
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// Converts an error reply into `ClientError::Server`.
    pub fn into_result(self) -> ClientResult<RespValue> {
        match self {
            RespValue::Error(message) => Err(ClientError::Server {
                message: message.to_vec(),
            }),
            other => Ok(other),
        }
    }

    /// Expects a status reply such as `+OK`.
    pub fn into_ok(self) -> ClientResult<()> {
        match self.into_result()? {
            RespValue::Simple(_) => Ok(()),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Expects a bulk string; nil becomes an empty value.
    pub fn into_bytes(self) -> ClientResult<Bytes> {
        match self.into_result()? {
            RespValue::Bulk(data) => Ok(data.unwrap_or_default()),
            RespValue::Simple(data) => Ok(data),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Expects an integer reply.
    pub fn into_integer(self) -> ClientResult<i64> {
        match self.into_result()? {
            RespValue::Integer(value) => Ok(value),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Expects a 0/1 integer reply.
    pub fn into_bool(self) -> ClientResult<bool> {
        Ok(self.into_integer()? != 0)
    }

    /// Expects an array of bulk strings.
    ///
    /// A nil array becomes an empty vector and nil elements become empty
    /// placeholders, so positions line up with the request arguments.
    pub fn into_bytes_vec(self) -> ClientResult<Vec<Bytes>> {
        match self.into_result()? {
            RespValue::Array(None) | RespValue::Bulk(None) => Ok(Vec::new()),
            RespValue::Array(Some(items)) => items.into_iter().map(RespValue::into_bytes).collect(),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }
}

/// Encodes a RESP2 array command into the provided buffer.
pub fn encode_command(args: &[&[u8]], out: &mut BytesMut) {
    out.put_u8(b'*');
    put_decimal(out, args.len());
    out.put_slice(b"\r\n");
    for arg in args {
        out.put_u8(b'$');
        put_decimal(out, arg.len());
        out.put_slice(b"\r\n");
        out.put_slice(arg);
        out.put_slice(b"\r\n");
    }
}

/// Reads one RESP value from the buffered reader.
pub fn read_response<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> ClientResult<RespValue> {
    read_line(reader, line_buf)?;
    let (&marker, rest) = line_buf.split_first().ok_or(ClientError::Protocol)?;

    match marker {
        b'+' => Ok(RespValue::Simple(Bytes::copy_from_slice(rest))),
        b'-' => Ok(RespValue::Error(Bytes::copy_from_slice(rest))),
        b':' => Ok(RespValue::Integer(parse_i64(rest)?)),
        b'$' => {
            let len = parse_i64(rest)?;
            read_bulk(reader, len)
        }
        b'*' => {
            let len = parse_i64(rest)?;
            read_array(reader, len, line_buf)
        }
        _ => Err(ClientError::Protocol),
    }
}

fn read_bulk<R: BufRead>(reader: &mut R, len: i64) -> ClientResult<RespValue> {
    if len < 0 {
        return Ok(RespValue::Bulk(None));
    }
    if len > MAX_BULK_LEN {
        return Err(ClientError::Protocol);
    }
    let len = len as usize;
    let mut data = Vec::with_capacity(len.min(PREALLOC_LIMIT));
    reader.by_ref().take(len as u64).read_to_end(&mut data)?;
    if data.len() != len {
        return Err(ClientError::Protocol);
    }

    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf)?;
    if crlf != *b"\r\n" {
        return Err(ClientError::Protocol);
    }
    Ok(RespValue::Bulk(Some(Bytes::from(data))))
}

fn read_array<R: BufRead>(
    reader: &mut R,
    len: i64,
    line_buf: &mut Vec<u8>,
) -> ClientResult<RespValue> {
    if len < 0 {
        return Ok(RespValue::Array(None));
    }

    // The count is only a claim; a short stream fails while reading elements.
    let mut items = Vec::with_capacity((len as usize).min(PREALLOC_LIMIT));
    for _ in 0..len {
        items.push(read_response(reader, line_buf)?);
    }
    Ok(RespValue::Array(Some(items)))
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> ClientResult<()> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        return Err(ClientError::Protocol);
    }
    if !buf.ends_with(b"\r\n") {
        return Err(ClientError::Protocol);
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_i64(data: &[u8]) -> ClientResult<i64> {
    let (negative, digits) = match data.split_first() {
        Some((b'-', rest)) => (true, rest),
        Some(_) => (false, data),
        None => return Err(ClientError::Protocol),
    };
    if digits.is_empty() {
        return Err(ClientError::Protocol);
    }

    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(ClientError::Protocol);
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as i64);
    }

    Ok(if negative { -value } else { value })
}

/// Writes `value` in decimal without going through a heap-allocated string.
pub(crate) fn put_decimal(out: &mut BytesMut, value: usize) {
    let mut buf = [0u8; 20];
    out.put_slice(format_decimal(value as u64, &mut buf));
}

/// Formats `value` into the stack buffer and returns the used digits.
pub(crate) fn format_decimal(mut value: u64, buf: &mut [u8; 20]) -> &[u8] {
    let mut start = buf.len();
    loop {
        start -= 1;
        buf[start] = b'0' + (value % 10) as u8;
        value /= 10;
        if value == 0 {
            break;
        }
    }
    &buf[start..]
}
