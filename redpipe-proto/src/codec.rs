//! # RESP2 Encoding and Parsing
//!
//! Purpose: Frame client commands and parse server replies, binary-safe and
//! with allocations kept under control.
//!
//! ## Design Principles
//! 1. **Two Read Paths**: A blocking recursive reader for the sync session
//!    and an incremental decoder over `BytesMut` for the async engine.
//! 2. **All-or-Nothing Decode**: The incremental decoder consumes nothing
//!    from the buffer until a complete reply is available.
//! 3. **Binary-Safe**: Bulk strings are raw bytes end to end.
//! 4. **Fail Fast**: Invalid framing surfaces a protocol error immediately.

use std::io::{self, BufRead};

use bytes::{Buf, BytesMut};
use thiserror::Error;

use crate::command::Command;
use crate::node::ReplyNode;

/// Errors produced while framing or parsing RESP2.
#[derive(Debug, Error)]
pub enum WireError {
    /// RESP2 framing violation.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Network or IO failure while reading.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

fn protocol(message: impl Into<String>) -> WireError {
    WireError::Protocol(message.into())
}

// Framing limits. Servers cap bulk payloads at 512 MiB; a length header
// beyond these bounds is a framing violation, not a real payload, and must
// be rejected before any allocation is sized from it.
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;
const MAX_ARRAY_LEN: i64 = 1024 * 1024;
const MAX_NESTING: usize = 32;

/// Encodes a command as a RESP2 array of bulk strings into `out`.
pub fn encode_command(command: &Command, out: &mut Vec<u8>) {
    out.push(b'*');
    push_decimal(out, command.len() as i64);
    out.extend_from_slice(b"\r\n");
    for part in command.parts() {
        out.push(b'$');
        push_decimal(out, part.len() as i64);
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(part);
        out.extend_from_slice(b"\r\n");
    }
}

/// Blocks until one complete reply has been read from `reader`.
pub fn read_reply<R: BufRead>(reader: &mut R) -> Result<ReplyNode, WireError> {
    let mut line = Vec::with_capacity(64);
    read_node(reader, &mut line, 0)
}

fn read_node<R: BufRead>(
    reader: &mut R,
    line: &mut Vec<u8>,
    depth: usize,
) -> Result<ReplyNode, WireError> {
    read_line(reader, line)?;
    if line.is_empty() {
        return Err(protocol("empty reply line"));
    }

    match line[0] {
        b'+' => Ok(ReplyNode::Status(decode_text(&line[1..]))),
        b'-' => Ok(ReplyNode::Error(decode_text(&line[1..]))),
        b':' => Ok(ReplyNode::Integer(parse_i64(&line[1..])?)),
        b'$' => {
            let len = parse_i64(&line[1..])?;
            if len < 0 {
                return Ok(ReplyNode::Nil);
            }
            if len > MAX_BULK_LEN {
                return Err(protocol("bulk string length exceeds limit"));
            }
            let mut data = vec![0u8; len as usize];
            reader.read_exact(&mut data)?;
            let mut crlf = [0u8; 2];
            reader.read_exact(&mut crlf)?;
            if crlf != [b'\r', b'\n'] {
                return Err(protocol("bulk string missing trailing CRLF"));
            }
            Ok(ReplyNode::Bulk(data))
        }
        b'*' => {
            let len = parse_i64(&line[1..])?;
            if len < 0 {
                return Ok(ReplyNode::Nil);
            }
            if len > MAX_ARRAY_LEN {
                return Err(protocol("array length exceeds limit"));
            }
            if depth >= MAX_NESTING {
                return Err(protocol("reply nesting too deep"));
            }
            let mut items = Vec::with_capacity(len as usize);
            for _ in 0..len {
                items.push(read_node(reader, line, depth + 1)?);
            }
            Ok(ReplyNode::Array(items))
        }
        other => Err(protocol(format!("unknown reply marker 0x{:02x}", other))),
    }
}

/// Incremental RESP2 reply decoder for event-driven reads.
///
/// Feed it the connection's read buffer after every successful read; it
/// returns `Ok(None)` until a whole reply is buffered and only then consumes
/// the reply's bytes.
#[derive(Debug, Default)]
pub struct ReplyDecoder;

impl ReplyDecoder {
    pub fn new() -> Self {
        ReplyDecoder
    }

    /// Tries to decode one reply from the front of `buf`.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ReplyNode>, WireError> {
        match parse_node(&buf[..], 0)? {
            Some((node, used)) => {
                buf.advance(used);
                Ok(Some(node))
            }
            None => Ok(None),
        }
    }
}

fn parse_node(input: &[u8], depth: usize) -> Result<Option<(ReplyNode, usize)>, WireError> {
    let (line, mut used) = match parse_line(input)? {
        Some(parsed) => parsed,
        None => return Ok(None),
    };
    if line.is_empty() {
        return Err(protocol("empty reply line"));
    }

    match line[0] {
        b'+' => Ok(Some((ReplyNode::Status(decode_text(&line[1..])), used))),
        b'-' => Ok(Some((ReplyNode::Error(decode_text(&line[1..])), used))),
        b':' => Ok(Some((ReplyNode::Integer(parse_i64(&line[1..])?), used))),
        b'$' => {
            let len = parse_i64(&line[1..])?;
            if len < 0 {
                return Ok(Some((ReplyNode::Nil, used)));
            }
            if len > MAX_BULK_LEN {
                return Err(protocol("bulk string length exceeds limit"));
            }
            let len = len as usize;
            if input.len() < used + len + 2 {
                return Ok(None);
            }
            if &input[used + len..used + len + 2] != b"\r\n" {
                return Err(protocol("bulk string missing trailing CRLF"));
            }
            let data = input[used..used + len].to_vec();
            Ok(Some((ReplyNode::Bulk(data), used + len + 2)))
        }
        b'*' => {
            let len = parse_i64(&line[1..])?;
            if len < 0 {
                return Ok(Some((ReplyNode::Nil, used)));
            }
            if len > MAX_ARRAY_LEN {
                return Err(protocol("array length exceeds limit"));
            }
            if depth >= MAX_NESTING {
                return Err(protocol("reply nesting too deep"));
            }
            let mut items = Vec::with_capacity(len as usize);
            for _ in 0..len {
                match parse_node(&input[used..], depth + 1)? {
                    Some((item, item_used)) => {
                        items.push(item);
                        used += item_used;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((ReplyNode::Array(items), used)))
        }
        other => Err(protocol(format!("unknown reply marker 0x{:02x}", other))),
    }
}

/// Returns the line without CRLF plus the byte count consumed, or `None`
/// when the terminator has not arrived yet.
fn parse_line(input: &[u8]) -> Result<Option<(&[u8], usize)>, WireError> {
    match input.iter().position(|&b| b == b'\n') {
        Some(pos) => {
            if pos == 0 || input[pos - 1] != b'\r' {
                return Err(protocol("reply line not terminated by CRLF"));
            }
            Ok(Some((&input[..pos - 1], pos + 1)))
        }
        None => Ok(None),
    }
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> Result<(), WireError> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Err(protocol("unexpected end of stream"));
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(protocol("reply line not terminated by CRLF"));
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

// Status and error lines are defined as text; bulk payloads never pass
// through here.
fn decode_text(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}

fn parse_i64(data: &[u8]) -> Result<i64, WireError> {
    if data.is_empty() {
        return Err(protocol("empty integer field"));
    }
    let mut negative = false;
    let mut idx = 0;
    if data[0] == b'-' {
        negative = true;
        idx = 1;
        if data.len() == 1 {
            return Err(protocol("bare minus in integer field"));
        }
    }

    let mut value: i64 = 0;
    while idx < data.len() {
        let b = data[idx];
        if !b.is_ascii_digit() {
            return Err(protocol("non-digit in integer field"));
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as i64);
        idx += 1;
    }

    if negative {
        Ok(-value)
    } else {
        Ok(value)
    }
}

fn push_decimal(out: &mut Vec<u8>, mut value: i64) {
    // Digits go into a small stack buffer to avoid heap allocations.
    if value < 0 {
        out.push(b'-');
        value = -value;
    }
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    for idx in (0..len).rev() {
        out.push(buf[idx]);
    }
}
