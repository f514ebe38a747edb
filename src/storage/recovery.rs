//! Segment Recovery
//!
//! Rebuilds a segment's index by replaying its file after a restart or crash.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use crate::error::{Result, SeglogError};
use crate::record::{Record, HEADER_SIZE};

/// Look-ahead buffer used while replaying (8 KB)
pub const REPLAY_BUFFER_SIZE: usize = 8 * 1024;

/// Result of replaying one segment file
#[derive(Debug, Default)]
pub struct RecoveryResult {
    /// Rebuilt index: key → offset of its last record in the file
    pub index: HashMap<Vec<u8>, u64>,

    /// Number of well-formed records replayed
    pub records_recovered: u64,

    /// Length of the well-formed prefix of the file
    pub valid_len: u64,

    /// Whether a torn record was found after the well-formed prefix
    pub was_truncated: bool,
}

/// Replay a segment file
///
/// This will:
/// 1. Read records front to back through a bounded buffer
/// 2. Register each key at the offset its record starts
/// 3. Stop cleanly at end of file, or at a record whose declared length runs
///    past the end of the file (a crash mid-append)
///
/// A header cut short mid-field, or a body that does not decode, is
/// corruption and fails the replay.
pub fn replay(path: &Path) -> Result<RecoveryResult> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::with_capacity(REPLAY_BUFFER_SIZE, file);

    let mut result = RecoveryResult::default();
    let mut offset: u64 = 0;

    loop {
        if reader.fill_buf()?.is_empty() {
            break;
        }

        let mut header = [0u8; HEADER_SIZE];
        let got = read_full(&mut reader, &mut header)?;
        if got < HEADER_SIZE {
            return Err(SeglogError::Corruption(format!(
                "Truncated record header at offset {} in {}: {} of {} bytes",
                offset,
                path.display(),
                got,
                HEADER_SIZE
            )));
        }

        let body_len = u32::from_le_bytes(header) as u64;
        let record_end = offset + HEADER_SIZE as u64 + body_len;
        if record_end > file_len {
            tracing::warn!(
                path = %path.display(),
                offset,
                declared = body_len,
                available = file_len - offset - HEADER_SIZE as u64,
                "Partial record at end of segment, replay stops here"
            );
            result.was_truncated = true;
            break;
        }

        let mut body = vec![0u8; body_len as usize];
        reader.read_exact(&mut body)?;
        let record = Record::decode_body(&body).map_err(|e| match e {
            SeglogError::Corruption(msg) => SeglogError::Corruption(format!(
                "Record at offset {} in {}: {}",
                offset,
                path.display(),
                msg
            )),
            other => other,
        })?;

        result.index.insert(record.key, offset);
        result.records_recovered += 1;
        offset = record_end;
    }

    result.valid_len = offset;
    Ok(result)
}

/// Read until `buf` is full or the reader is exhausted, returning bytes read
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
