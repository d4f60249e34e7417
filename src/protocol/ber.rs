//! Basic Encoding Rules primitives
//!
//! LDAP only uses single-byte tags and definite lengths, which keeps both
//! halves of this module small: [`BerWriter`] nests constructed values by
//! encoding children into a scratch writer, and [`BerReader`] walks a borrowed
//! slice with bounds checks on every step.

use super::constants::ber;
use bytes::{BufMut, BytesMut};
use std::io;
use zeroize::Zeroize;

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Append-only BER encoder
#[derive(Debug, Default)]
pub struct BerWriter {
    buf: BytesMut,
}

impl BerWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a tag, length and value
    pub fn write_tlv(&mut self, tag: u8, value: &[u8]) {
        self.buf.reserve(value.len() + 6);
        self.buf.put_u8(tag);
        write_length(&mut self.buf, value.len());
        self.buf.put_slice(value);
    }

    /// OCTET STRING (or any primitive string-like value under `tag`)
    pub fn write_octets(&mut self, tag: u8, value: &[u8]) {
        self.write_tlv(tag, value);
    }

    /// INTEGER or ENUMERATED under `tag`, minimal two's complement
    pub fn write_integer(&mut self, tag: u8, value: i64) {
        let bytes = value.to_be_bytes();
        let mut start = 0;
        while start < 7 {
            let b = bytes[start];
            let next = bytes[start + 1];
            let redundant = (b == 0x00 && next & 0x80 == 0) || (b == 0xFF && next & 0x80 != 0);
            if !redundant {
                break;
            }
            start += 1;
        }
        self.write_tlv(tag, &bytes[start..]);
    }

    /// BOOLEAN under `tag`
    pub fn write_bool(&mut self, tag: u8, value: bool) {
        self.write_tlv(tag, &[if value { 0xFF } else { 0x00 }]);
    }

    /// Zero-length value under `tag`
    pub fn write_null(&mut self, tag: u8) {
        self.write_tlv(tag, &[]);
    }

    /// Constructed value whose contents are produced by `f`
    pub fn write_constructed<F>(&mut self, tag: u8, f: F) -> io::Result<()>
    where
        F: FnOnce(&mut BerWriter) -> io::Result<()>,
    {
        let mut inner = BerWriter::new();
        f(&mut inner)?;
        self.write_tlv(tag, &inner.buf);
        Ok(())
    }

    /// SEQUENCE whose contents are produced by `f`
    pub fn write_sequence<F>(&mut self, f: F) -> io::Result<()>
    where
        F: FnOnce(&mut BerWriter) -> io::Result<()>,
    {
        self.write_constructed(ber::SEQUENCE, f)
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes written so far
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Overwrite the written bytes with zeros
    pub fn scrub(&mut self) {
        self.buf[..].zeroize();
    }

    /// Consume the writer
    pub fn into_bytes(self) -> BytesMut {
        self.buf
    }
}

fn write_length(buf: &mut BytesMut, len: usize) {
    if len < 0x80 {
        buf.put_u8(len as u8);
        return;
    }
    let bytes = (len as u64).to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    let significant = &bytes[skip..];
    buf.put_u8(0x80 | significant.len() as u8);
    buf.put_slice(significant);
}

/// Parsed tag and length of a TLV
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Tag byte
    pub tag: u8,
    /// Bytes taken by tag and length
    pub header_len: usize,
    /// Bytes of content that follow
    pub content_len: usize,
}

impl Header {
    /// Total encoded size of the TLV
    pub fn total_len(&self) -> usize {
        self.header_len + self.content_len
    }
}

/// Read a TLV header
///
/// Returns `Ok(None)` if `data` does not yet hold the complete header.
pub fn read_header(data: &[u8]) -> io::Result<Option<Header>> {
    let Some(&tag) = data.first() else {
        return Ok(None);
    };
    if tag & 0x1F == 0x1F {
        return Err(invalid(format!("multi-byte tag 0x{:02x} not supported", tag)));
    }
    let Some(&first) = data.get(1) else {
        return Ok(None);
    };
    if first < 0x80 {
        return Ok(Some(Header {
            tag,
            header_len: 2,
            content_len: first as usize,
        }));
    }
    let count = (first & 0x7F) as usize;
    if count == 0 {
        return Err(invalid("indefinite length is not allowed"));
    }
    if count > 4 {
        return Err(invalid(format!("length field of {} bytes is too large", count)));
    }
    if data.len() < 2 + count {
        return Ok(None);
    }
    let content_len = data[2..2 + count]
        .iter()
        .fold(0usize, |acc, b| (acc << 8) | *b as usize);
    Ok(Some(Header {
        tag,
        header_len: 2 + count,
        content_len,
    }))
}

/// Decode a two's complement integer body
pub fn decode_integer(bytes: &[u8]) -> io::Result<i64> {
    if bytes.is_empty() {
        return Err(invalid("empty integer"));
    }
    if bytes.len() > 8 {
        return Err(invalid(format!("integer of {} bytes overflows", bytes.len())));
    }
    let mut value: i64 = if bytes[0] & 0x80 != 0 { -1 } else { 0 };
    for b in bytes {
        value = (value << 8) | *b as i64;
    }
    Ok(value)
}

/// Cursor over BER-encoded bytes
#[derive(Debug, Clone)]
pub struct BerReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BerReader<'a> {
    /// Read from the start of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Whether every byte has been consumed
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Unconsumed bytes
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    /// Tag of the next TLV without consuming it
    pub fn peek_tag(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    /// Consume the next TLV
    pub fn read_tlv(&mut self) -> io::Result<(u8, &'a [u8])> {
        let rest = self.remaining();
        let header = read_header(rest)?.ok_or_else(|| invalid("truncated BER header"))?;
        if rest.len() < header.total_len() {
            return Err(invalid(format!(
                "truncated BER value: need {} bytes, have {}",
                header.total_len(),
                rest.len()
            )));
        }
        let value = &rest[header.header_len..header.total_len()];
        self.pos += header.total_len();
        Ok((header.tag, value))
    }

    /// Consume the next TLV, which must carry `tag`
    pub fn read_expected(&mut self, tag: u8) -> io::Result<&'a [u8]> {
        let (actual, value) = self.read_tlv()?;
        if actual != tag {
            return Err(invalid(format!(
                "expected tag 0x{:02x}, found 0x{:02x}",
                tag, actual
            )));
        }
        Ok(value)
    }

    /// Consume the next TLV only if it carries `tag`
    pub fn read_optional(&mut self, tag: u8) -> io::Result<Option<&'a [u8]>> {
        if self.peek_tag() == Some(tag) {
            self.read_expected(tag).map(Some)
        } else {
            Ok(None)
        }
    }

    /// INTEGER or ENUMERATED under `tag`
    pub fn read_integer(&mut self, tag: u8) -> io::Result<i64> {
        decode_integer(self.read_expected(tag)?)
    }

    /// INTEGER or ENUMERATED that must fit an `i32`
    pub fn read_i32(&mut self, tag: u8) -> io::Result<i32> {
        let value = self.read_integer(tag)?;
        i32::try_from(value).map_err(|_| invalid(format!("integer {} out of range", value)))
    }

    /// BOOLEAN under `tag`
    pub fn read_bool(&mut self, tag: u8) -> io::Result<bool> {
        match self.read_expected(tag)? {
            [b] => Ok(*b != 0),
            other => Err(invalid(format!("boolean of {} bytes", other.len()))),
        }
    }

    /// UTF-8 string under `tag`
    pub fn read_string(&mut self, tag: u8) -> io::Result<String> {
        bytes_to_string(self.read_expected(tag)?)
    }

    /// Nested reader over a constructed value under `tag`
    pub fn read_constructed(&mut self, tag: u8) -> io::Result<BerReader<'a>> {
        self.read_expected(tag).map(BerReader::new)
    }
}

/// Interpret LDAPString contents
pub fn bytes_to_string(bytes: &[u8]) -> io::Result<String> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|e| invalid(format!("invalid UTF-8 in LDAPString: {}", e)))
}
