//! Chunked-transfer framing for the encapsulated body.
//!
//! ICAP reuses HTTP/1.1 chunked encoding: `hex-size [;ext] CRLF payload
//! CRLF`, terminated by a zero chunk. The `ieof` extension on the zero
//! chunk is the ICAP preview early terminator ("no more data will ever
//! come"), as opposed to a plain zero chunk inside a preview ("more may
//! come if you ask").

use crate::error::{Error, IcapResult};

use super::buffer::{ByteCursor, read_line};

/// The size line never legitimately approaches this; anything longer is
/// framing garbage rather than a long chunk.
const MAX_SIZE_LINE: usize = 64;

/// One parsed unit of the chunk stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Chunk {
    /// A data chunk's payload, CRLF already consumed.
    Data(Vec<u8>),
    /// The zero chunk, with its `ieof` marker.
    Terminator { ieof: bool },
}

/// Parse one complete chunk. `Ok(None)` until the size line, payload and
/// trailing CRLF are all buffered.
pub(crate) fn read_chunk(
    cur: &mut ByteCursor<'_>,
    max_chunk_size: usize,
) -> IcapResult<Option<Chunk>> {
    let line = match read_line(cur, MAX_SIZE_LINE) {
        Ok(Some(line)) => line,
        Ok(None) => return Ok(None),
        Err(Error::FrameTooLong(_)) => {
            return Err(Error::chunk("oversized chunk-size line"));
        }
        Err(err) => return Err(err),
    };
    let line = line.trim();
    let (size, extensions) = match line.split_once(';') {
        Some((size, extensions)) => (size.trim(), extensions),
        None => (line, ""),
    };
    if size.is_empty() || !size.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::chunk(format!("invalid chunk size {size:?}")));
    }
    let size = usize::from_str_radix(size, 16)
        .map_err(|_| Error::chunk(format!("chunk size {size:?} out of range")))?;
    if size == 0 {
        let ieof = extensions
            .split(';')
            .any(|token| token.trim().eq_ignore_ascii_case("ieof"));
        return Ok(Some(Chunk::Terminator { ieof }));
    }
    if size > max_chunk_size {
        return Err(Error::frame_too_long(format!(
            "chunk of {size} bytes exceeds the {max_chunk_size} byte cap"
        )));
    }
    let Some(payload) = cur.take(size) else {
        return Ok(None);
    };
    let payload = payload.to_vec();
    match cur.take(2) {
        None => Ok(None),
        Some(crlf) if crlf == b"\r\n" => Ok(Some(Chunk::Data(payload))),
        Some(_) => Err(Error::chunk("chunk payload not followed by CRLF")),
    }
}
