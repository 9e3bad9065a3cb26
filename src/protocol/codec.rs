//! Wire encoding primitives.
//!
//! PostgreSQL uses network byte order for every integer.

use crate::error::{Error, Result};

fn take<'a, const N: usize>(data: &'a [u8], what: &str) -> Result<([u8; N], &'a [u8])> {
    match data.split_first_chunk::<N>() {
        Some((head, rest)) => Ok((*head, rest)),
        None => Err(Error::Protocol(format!(
            "{what}: buffer too short: {} < {N}",
            data.len()
        ))),
    }
}

/// Read 2-byte big-endian unsigned integer.
#[inline]
pub fn read_u16(data: &[u8]) -> Result<(u16, &[u8])> {
    let (bytes, rest) = take::<2>(data, "read_u16")?;
    Ok((u16::from_be_bytes(bytes), rest))
}

/// Read 4-byte big-endian signed integer.
#[inline]
pub fn read_i32(data: &[u8]) -> Result<(i32, &[u8])> {
    let (bytes, rest) = take::<4>(data, "read_i32")?;
    Ok((i32::from_be_bytes(bytes), rest))
}

/// Read 4-byte big-endian unsigned integer.
#[inline]
pub fn read_u32(data: &[u8]) -> Result<(u32, &[u8])> {
    let (bytes, rest) = take::<4>(data, "read_u32")?;
    Ok((u32::from_be_bytes(bytes), rest))
}

/// Split off a null-terminated string, returning it without the terminator.
#[inline]
pub fn read_cstring(data: &[u8]) -> Result<(&[u8], &[u8])> {
    let pos = memchr::memchr(0, data)
        .ok_or_else(|| Error::Protocol("read_cstring: no null terminator found".into()))?;
    Ok((&data[..pos], &data[pos + 1..]))
}

/// Split off a null-terminated UTF-8 string.
#[inline]
pub fn read_cstr(data: &[u8]) -> Result<(&str, &[u8])> {
    let (bytes, rest) = read_cstring(data)?;
    let s = simdutf8::basic::from_utf8(bytes)
        .map_err(|_| Error::Protocol("read_cstr: invalid UTF-8".into()))?;
    Ok((s, rest))
}

/// Appends one message to a buffer and back-patches its length on `finish`.
///
/// Layout: optional type byte, then a 4-byte length that counts itself and
/// the payload but not the type byte.
pub struct MessageBuilder<'a> {
    buf: &'a mut Vec<u8>,
    start: usize,
}

impl<'a> MessageBuilder<'a> {
    /// Start a regular message.
    pub fn new(buf: &'a mut Vec<u8>, type_byte: u8) -> Self {
        buf.push(type_byte);
        Self::untyped(buf)
    }

    /// Start a message without a type byte (StartupMessage, SSLRequest).
    pub fn untyped(buf: &'a mut Vec<u8>) -> Self {
        let start = buf.len();
        buf.extend_from_slice(&[0; 4]);
        Self { buf, start }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn write_cstr(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
    }

    /// Fill in the length field.
    pub fn finish(self) {
        let len = (self.buf.len() - self.start) as i32;
        self.buf[self.start..self.start + 4].copy_from_slice(&len.to_be_bytes());
    }
}
