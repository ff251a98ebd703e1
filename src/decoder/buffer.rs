//! Cursor-based reader primitives.
//!
//! Every primitive that can exhaust the buffer reports under-run as
//! `Ok(None)`; the caller throws the cursor away and replays the current
//! logical unit once more bytes arrive. Nothing here keeps state between
//! calls.

use crate::error::{Error, IcapResult};

/// Read position over a borrowed byte buffer.
#[derive(Debug)]
pub(crate) struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far.
    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub(crate) fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    pub(crate) fn bump(&mut self) {
        self.pos += 1;
    }

    /// Consume exactly `n` bytes, or `None` when fewer are buffered.
    pub(crate) fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.remaining().len() < n {
            return None;
        }
        let taken = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Some(taken)
    }
}

/// Advance past every byte with value <= 0x20, stopping at the first byte
/// above it. Returns whether such a byte was seen. Tolerates stray CR/LF
/// between messages on a persistent connection.
pub(crate) fn skip_control_chars(cur: &mut ByteCursor<'_>) -> bool {
    while let Some(b) = cur.peek() {
        if b > 0x20 {
            return true;
        }
        cur.bump();
    }
    false
}

/// Read one line terminated by CRLF (or a lone LF; a lone CR does not
/// terminate). The returned line excludes the terminator. Fails with
/// [`Error::FrameTooLong`] once `cap` line bytes are seen without a
/// terminator, whether or not more input is buffered.
pub(crate) fn read_line(cur: &mut ByteCursor<'_>, cap: usize) -> IcapResult<Option<String>> {
    let rest = cur.remaining();
    let Some(lf) = rest.iter().position(|&b| b == b'\n') else {
        // a trailing CR may yet become part of the terminator
        let pending = rest.len() - usize::from(rest.ends_with(b"\r"));
        if pending > cap {
            return Err(Error::frame_too_long(format!(
                "line exceeds {cap} bytes without a terminator"
            )));
        }
        return Ok(None);
    };
    let mut line = &rest[..lf];
    if let Some(stripped) = line.strip_suffix(b"\r") {
        line = stripped;
    }
    if line.len() > cap {
        return Err(Error::frame_too_long(format!(
            "line of {} bytes exceeds the {cap} byte cap",
            line.len()
        )));
    }
    let line = std::str::from_utf8(line)
        .map_err(|_| Error::header("line is not valid UTF-8"))?
        .to_string();
    cur.pos += lf + 1;
    Ok(Some(line))
}

/// Like [`read_line`], but every consumed byte (terminator included) is
/// charged against a [`SizeDelimiter`] shared by the whole header block.
/// Returns the empty string at the blank line that ends a block.
pub(crate) fn read_header_line(
    cur: &mut ByteCursor<'_>,
    delimiter: &mut SizeDelimiter,
) -> IcapResult<Option<String>> {
    let rest = cur.remaining();
    let Some(lf) = rest.iter().position(|&b| b == b'\n') else {
        if delimiter.would_exceed(rest.len()) {
            return Err(Error::frame_too_long(format!(
                "header block exceeds {} bytes",
                delimiter.cap()
            )));
        }
        return Ok(None);
    };
    delimiter.add(lf + 1)?;
    let mut line = &rest[..lf];
    if let Some(stripped) = line.strip_suffix(b"\r") {
        line = stripped;
    }
    let line = std::str::from_utf8(line)
        .map_err(|_| Error::header("header line is not valid UTF-8"))?
        .to_string();
    cur.pos += lf + 1;
    Ok(Some(line))
}

/// Split an initial line on runs of SP into `[first, second, rest]`, the
/// rest trimmed. Tabs are not separators. `None` when fewer than three
/// tokens are present.
pub(crate) fn split_initial_line(line: &str) -> Option<[&str; 3]> {
    let line = line.trim_matches(' ');
    let (first, rest) = line.split_once(' ')?;
    let rest = rest.trim_start_matches(' ');
    let (second, rest) = rest.split_once(' ')?;
    let third = rest.trim_matches(' ');
    if first.is_empty() || second.is_empty() || third.is_empty() {
        return None;
    }
    Some([first, second, third])
}

/// Split a header line at the first `:`. The name must be non-empty and
/// free of whitespace; the value loses surrounding whitespace.
pub(crate) fn split_header(line: &str) -> IcapResult<(String, String)> {
    let Some((name, value)) = line.split_once(':') else {
        return Err(Error::header(format!("missing ':' in {line:?}")));
    };
    if name.is_empty() {
        return Err(Error::header(format!("empty header name in {line:?}")));
    }
    if name.bytes().any(|b| b == b' ' || b == b'\t') {
        return Err(Error::header(format!("whitespace in header name {name:?}")));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Header continuation: a physical line starting with SP or HTAB belongs
/// to the previous header's value.
pub(crate) fn is_continuation_line(line: &str) -> bool {
    line.starts_with(' ') || line.starts_with('\t')
}

/// Read header lines until the blank terminator, folding continuations
/// into the previous value with a single space. Each completed name/value
/// pair goes through `put` in order of appearance. Returns `false` on
/// under-run (the block replays from its start).
pub(crate) fn read_header_block(
    cur: &mut ByteCursor<'_>,
    delimiter: &mut SizeDelimiter,
    mut put: impl FnMut(&str, &str) -> IcapResult<()>,
) -> IcapResult<bool> {
    let mut name: Option<String> = None;
    let mut value = String::new();
    loop {
        let Some(line) = read_header_line(cur, delimiter)? else {
            return Ok(false);
        };
        if line.is_empty() {
            break;
        }
        if name.is_some() && is_continuation_line(&line) {
            value.push(' ');
            value.push_str(line.trim());
            continue;
        }
        if let Some(done) = name.take() {
            put(&done, &value)?;
        }
        let (next_name, next_value) = split_header(&line)?;
        name = Some(next_name);
        value = next_value;
    }
    if let Some(done) = name {
        put(&done, &value)?;
    }
    Ok(true)
}

/// Running byte counter with a hard cap, shared across all lines of one
/// header block so the cap applies to the aggregate.
#[derive(Debug)]
pub(crate) struct SizeDelimiter {
    used: usize,
    cap: usize,
}

impl SizeDelimiter {
    pub(crate) fn new(cap: usize) -> Self {
        Self { used: 0, cap }
    }

    pub(crate) fn cap(&self) -> usize {
        self.cap
    }

    pub(crate) fn would_exceed(&self, n: usize) -> bool {
        self.used + n > self.cap
    }

    /// Count `n` more bytes, failing once the cap is crossed.
    pub(crate) fn add(&mut self, n: usize) -> IcapResult<()> {
        if self.would_exceed(n) {
            return Err(Error::frame_too_long(format!(
                "header block exceeds {} bytes",
                self.cap
            )));
        }
        self.used += n;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_control_bytes_up_to_the_first_printable() {
        let mut cur = ByteCursor::new(b"\r\n\t \x00OPTIONS");
        assert!(skip_control_chars(&mut cur));
        assert_eq!(cur.remaining(), b"OPTIONS");

        let mut cur = ByteCursor::new(b"\r\n\r\n");
        assert!(!skip_control_chars(&mut cur));
        assert_eq!(cur.pos(), 4);
    }

    #[test]
    fn reads_crlf_and_bare_lf_lines() {
        let mut cur = ByteCursor::new(b"one\r\ntwo\nthree");
        assert_eq!(read_line(&mut cur, 100).unwrap().as_deref(), Some("one"));
        assert_eq!(read_line(&mut cur, 100).unwrap().as_deref(), Some("two"));
        // no terminator yet
        assert_eq!(read_line(&mut cur, 100).unwrap(), None);
        assert_eq!(cur.remaining(), b"three");
    }

    #[test]
    fn lone_cr_stays_in_the_line() {
        let mut cur = ByteCursor::new(b"a\rb\r\n");
        assert_eq!(read_line(&mut cur, 100).unwrap().as_deref(), Some("a\rb"));
    }

    #[test]
    fn line_cap_fires_without_a_terminator() {
        let long = vec![b'x'; 50];
        let mut cur = ByteCursor::new(&long);
        let err = read_line(&mut cur, 10).unwrap_err();
        assert!(matches!(err, Error::FrameTooLong(_)));
    }

    #[test]
    fn initial_line_splits_on_space_runs() {
        assert_eq!(
            split_initial_line("REQMOD  icap://h/s   ICAP/1.0"),
            Some(["REQMOD", "icap://h/s", "ICAP/1.0"])
        );
        assert_eq!(
            split_initial_line("ICAP/1.0 405 Method Not Allowed"),
            Some(["ICAP/1.0", "405", "Method Not Allowed"])
        );
        assert_eq!(split_initial_line("REQMOD icap://h/s"), None);
        assert_eq!(split_initial_line(""), None);
    }

    #[test]
    fn header_split_trims_value_and_rejects_bad_names() {
        assert_eq!(
            split_header("Host:  example  ").unwrap(),
            ("Host".to_string(), "example".to_string())
        );
        assert_eq!(
            split_header("ISTag: \"xyz==\"").unwrap(),
            ("ISTag".to_string(), "\"xyz==\"".to_string())
        );
        assert!(split_header("no colon here").is_err());
        assert!(split_header(": value").is_err());
        assert!(split_header("Bad Name: value").is_err());
    }

    #[test]
    fn delimiter_caps_the_aggregate() {
        let mut delimiter = SizeDelimiter::new(10);
        assert!(delimiter.add(6).is_ok());
        assert!(delimiter.add(4).is_ok());
        assert!(matches!(delimiter.add(1).unwrap_err(), Error::FrameTooLong(_)));
    }

    #[test]
    fn header_block_folds_continuations() {
        let raw = b"One: a\r\nTwo: first\r\n\tsecond\r\n  third\r\nThree: c\r\n\r\n";
        let mut cur = ByteCursor::new(raw);
        let mut delimiter = SizeDelimiter::new(raw.len());
        let mut seen = Vec::new();
        let complete = read_header_block(&mut cur, &mut delimiter, |n, v| {
            seen.push((n.to_string(), v.to_string()));
            Ok(())
        })
        .unwrap();
        assert!(complete);
        assert_eq!(
            seen,
            [
                ("One".to_string(), "a".to_string()),
                ("Two".to_string(), "first second third".to_string()),
                ("Three".to_string(), "c".to_string()),
            ]
        );
    }

    #[test]
    fn header_block_underrun_reports_incomplete() {
        let mut cur = ByteCursor::new(b"One: a\r\nTw");
        let mut delimiter = SizeDelimiter::new(100);
        let complete = read_header_block(&mut cur, &mut delimiter, |_, _| Ok(())).unwrap();
        assert!(!complete);
    }

    #[test]
    fn header_block_cap_spans_all_lines() {
        let raw = b"One: aaaaaaaa\r\nTwo: bbbbbbbb\r\n\r\n";
        let mut cur = ByteCursor::new(raw);
        let mut delimiter = SizeDelimiter::new(20);
        let err = read_header_block(&mut cur, &mut delimiter, |_, _| Ok(())).unwrap_err();
        assert!(matches!(err, Error::FrameTooLong(_)));
    }
}
