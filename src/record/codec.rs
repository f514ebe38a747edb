//! Record codec
//!
//! Encoding and decoding functions for segment records.

use std::io::{self, Read, Seek, SeekFrom};

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Result, SeglogError};

/// Size of the leading total-length field
pub const HEADER_SIZE: usize = 4;

/// Fixed bytes per record: TotalLen (4) + KeyLen (4) + ValueLen (4)
pub const RECORD_OVERHEAD: usize = 12;

/// Largest body a record may declare in its total-length field
pub const MAX_BODY_SIZE: u64 = u32::MAX as u64;

/// A single key/value pair as stored in a segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Record {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Number of bytes `encode` produces
    pub fn encoded_len(&self) -> usize {
        RECORD_OVERHEAD + self.key.len() + self.value.len()
    }

    /// Encode the record to bytes
    ///
    /// Callers must keep `encoded_len() - HEADER_SIZE` within `MAX_BODY_SIZE`;
    /// the engine rejects larger records before they get here.
    pub fn encode(&self) -> Vec<u8> {
        let total_len = self.encoded_len();
        let mut buf = BytesMut::with_capacity(total_len);

        buf.put_u32_le((total_len - HEADER_SIZE) as u32);
        buf.put_u32_le(self.key.len() as u32);
        buf.put_slice(&self.key);
        buf.put_u32_le(self.value.len() as u32);
        buf.put_slice(&self.value);

        buf.to_vec()
    }

    /// Decode a complete record (including the total-length field)
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(SeglogError::Corruption(format!(
                "Incomplete record header: expected {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }

        let mut buf = bytes;
        let body_len = buf.get_u32_le() as usize;
        if buf.len() != body_len {
            return Err(SeglogError::Corruption(format!(
                "Record length mismatch: header declares {} bytes, got {}",
                body_len,
                buf.len()
            )));
        }

        Self::decode_body(buf)
    }

    /// Decode the bytes that follow the total-length field
    pub fn decode_body(body: &[u8]) -> Result<Self> {
        let mut buf = body;
        let key = take_field(&mut buf, "key")?;
        let value = take_field(&mut buf, "value")?;

        if buf.has_remaining() {
            return Err(SeglogError::Corruption(format!(
                "{} trailing bytes after record value",
                buf.remaining()
            )));
        }

        Ok(Self { key, value })
    }
}

/// Read a length-prefixed field, advancing the buffer past it
fn take_field(buf: &mut &[u8], what: &str) -> Result<Vec<u8>> {
    if buf.remaining() < 4 {
        return Err(SeglogError::Corruption(format!(
            "Missing {} length: {} bytes left",
            what,
            buf.remaining()
        )));
    }
    let len = buf.get_u32_le() as usize;

    if buf.remaining() < len {
        return Err(SeglogError::Corruption(format!(
            "Incomplete {}: expected {} bytes, got {}",
            what,
            len,
            buf.remaining()
        )));
    }
    let field = buf[..len].to_vec();
    buf.advance(len);

    Ok(field)
}

/// Read only the value of the record starting at the reader's position
///
/// The key is skipped with a seek and never allocated.
pub fn read_value<R: Read + Seek>(reader: &mut R) -> Result<Vec<u8>> {
    let mut header = [0u8; 8];
    read_exact_or_corrupt(reader, &mut header, "record header")?;

    let mut header_buf = &header[..];
    let body_len = header_buf.get_u32_le() as u64;
    let key_len = header_buf.get_u32_le() as u64;

    if key_len + 8 > body_len {
        return Err(SeglogError::Corruption(format!(
            "Key length {} does not fit in record body of {} bytes",
            key_len, body_len
        )));
    }

    // Skip the key (the index already matched it)
    reader.seek(SeekFrom::Current(key_len as i64))?;

    let mut len_bytes = [0u8; 4];
    read_exact_or_corrupt(reader, &mut len_bytes, "value length")?;
    let value_len = u32::from_le_bytes(len_bytes) as u64;

    if 8 + key_len + value_len != body_len {
        return Err(SeglogError::Corruption(format!(
            "Record body of {} bytes does not match key length {} and value length {}",
            body_len, key_len, value_len
        )));
    }

    let mut value = vec![0u8; value_len as usize];
    read_exact_or_corrupt(reader, &mut value, "value")?;

    Ok(value)
}

/// `read_exact` that reports a short read as corruption rather than plain I/O
fn read_exact_or_corrupt<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(SeglogError::Corruption(
            format!("Unexpected end of segment while reading {}", what),
        )),
        Err(e) => Err(e.into()),
    }
}
