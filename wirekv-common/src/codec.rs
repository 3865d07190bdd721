//! # RESP2 Encoding and Parsing
//!
//! Purpose: Encode command frames and parse server replies with explicit,
//! allocation-conscious code paths.
//!
//! ## Design Principles
//! 1. **Recursive Descent**: One call reads one reply; arrays recurse into
//!    their children, so nesting depth is the only state.
//! 2. **Buffer Reuse**: Caller provides the line buffer to avoid per-call allocations.
//! 3. **Length-Prefixed Payloads**: Bulk data is read by its declared length into
//!    `Bytes`, never scanned for delimiters, so CR, LF and NUL pass through.
//! 4. **EOF Is Not Corruption**: A stream that ends early is an I/O error the
//!    caller may retry; bytes that break the grammar are a protocol error.
//!
//! ## Wire Grammar
//!
//! ```text
//! command : *<argc>\r\n ( $<len>\r\n <bytes> \r\n ){argc}
//! reply   : +<status>\r\n | -<error>\r\n | :<i64>\r\n
//!         | $<len>\r\n <bytes> \r\n | $-1\r\n
//!         | *<count>\r\n <reply>{count} | *-1\r\n
//! ```

use std::io::BufRead;

use bytes::BytesMut;

use crate::error::{WireError, WireResult};
use crate::frame::CommandFrame;
use crate::reply::Reply;

/// Largest bulk payload accepted from the server (512 MiB, the server default).
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

const CRLF: &[u8; 2] = b"\r\n";

/// Destination for encoded command bytes.
///
/// Implemented for `Vec<u8>` and for the client's chunked send buffer so a
/// frame is encoded straight into whatever will be flushed.
pub trait FrameSink {
    /// Appends raw bytes.
    fn put(&mut self, bytes: &[u8]);
}

impl FrameSink for Vec<u8> {
    fn put(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// Encodes a command frame into the sink.
pub fn encode_frame<S: FrameSink + ?Sized>(frame: &CommandFrame, out: &mut S) {
    let mut digits = [0u8; 20];
    out.put(b"*");
    out.put(format_usize(frame.argc(), &mut digits));
    out.put(CRLF);
    for arg in frame.args() {
        out.put(b"$");
        out.put(format_usize(arg.len(), &mut digits));
        out.put(CRLF);
        out.put(arg);
        out.put(CRLF);
    }
}

/// Exact number of bytes `encode_frame` produces for `frame`.
pub fn encoded_len(frame: &CommandFrame) -> usize {
    let mut total = 1 + digit_count(frame.argc()) + 2;
    for arg in frame.args() {
        total += 1 + digit_count(arg.len()) + 2 + arg.len() + 2;
    }
    total
}

/// Reads one reply from the buffered reader.
///
/// A stream that ends mid-reply yields `WireError::Io` with
/// `UnexpectedEof`; bytes that break the grammar yield `WireError::Protocol`.
pub fn read_reply<R: BufRead + ?Sized>(
    reader: &mut R,
    line_buf: &mut Vec<u8>,
) -> WireResult<Reply> {
    read_line(reader, line_buf)?;
    if line_buf.is_empty() {
        return Err(WireError::protocol("empty reply line"));
    }

    match line_buf[0] {
        b'+' => Ok(Reply::Status(String::from_utf8_lossy(&line_buf[1..]).into_owned())),
        b'-' => Ok(Reply::Error(String::from_utf8_lossy(&line_buf[1..]).into_owned())),
        b':' => Ok(Reply::Integer(parse_i64(&line_buf[1..])?)),
        b'$' => {
            let len = parse_i64(&line_buf[1..])?;
            parse_bulk_len(reader, len, line_buf)
        }
        b'*' => {
            let len = parse_i64(&line_buf[1..])?;
            parse_array_len(reader, len, line_buf)
        }
        other => Err(WireError::protocol(format!(
            "unknown reply prefix 0x{:02x}",
            other
        ))),
    }
}

fn parse_bulk_len<R: BufRead + ?Sized>(
    reader: &mut R,
    len: i64,
    line_buf: &mut Vec<u8>,
) -> WireResult<Reply> {
    if len == -1 {
        return Ok(Reply::Bulk(None));
    }
    if len < 0 || len as u64 > MAX_BULK_LEN as u64 {
        return Err(WireError::protocol(format!("invalid bulk length {}", len)));
    }

    let mut data = BytesMut::zeroed(len as usize);
    reader.read_exact(&mut data)?;

    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf)?;
    if &crlf != CRLF {
        return Err(WireError::protocol("bulk payload not terminated by CRLF"));
    }

    line_buf.clear();
    Ok(Reply::Bulk(Some(data.freeze())))
}

fn parse_array_len<R: BufRead + ?Sized>(
    reader: &mut R,
    len: i64,
    line_buf: &mut Vec<u8>,
) -> WireResult<Reply> {
    if len == -1 {
        return Ok(Reply::Array(None));
    }
    if len < 0 {
        return Err(WireError::protocol(format!("invalid array length {}", len)));
    }

    // Cap the pre-allocation; a hostile count must not reserve gigabytes.
    let mut items = Vec::with_capacity((len as usize).min(1024));
    for _ in 0..len {
        items.push(read_reply(reader, line_buf)?);
    }
    Ok(Reply::Array(Some(items)))
}

fn read_line<R: BufRead + ?Sized>(reader: &mut R, buf: &mut Vec<u8>) -> WireResult<()> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 || buf.last() != Some(&b'\n') {
        return Err(WireError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "stream ended before reply line was complete",
        )));
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(WireError::protocol("reply line not terminated by CRLF"));
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_i64(data: &[u8]) -> WireResult<i64> {
    let (negative, digits) = match data.first() {
        Some(b'-') => (true, &data[1..]),
        Some(_) => (false, data),
        None => return Err(WireError::protocol("empty integer")),
    };
    if digits.is_empty() {
        return Err(WireError::protocol("empty integer"));
    }

    // Accumulate negatively so i64::MIN parses without overflow.
    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(WireError::protocol(format!(
                "invalid integer {:?}",
                String::from_utf8_lossy(data)
            )));
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_sub((b - b'0') as i64))
            .ok_or_else(|| WireError::protocol("integer overflow"))?;
    }

    if negative {
        Ok(value)
    } else {
        value
            .checked_neg()
            .ok_or_else(|| WireError::protocol("integer overflow"))
    }
}

fn format_usize(mut value: usize, buf: &mut [u8; 20]) -> &[u8] {
    // Write digits into a small stack buffer to avoid heap allocations.
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

fn digit_count(mut value: usize) -> usize {
    let mut count = 1;
    while value >= 10 {
        value /= 10;
        count += 1;
    }
    count
}
