//! Non-blocking line framing over a [`Transport`].

use std::io;

use bytes::{Bytes, BytesMut};

use crate::transport::Transport;

/// Bytes pulled from the transport per read call.
pub const READ_CHUNK: usize = 2048;

/// Default cap on a single buffered line.
pub const DEFAULT_MAX_LINE: usize = 64 * 1024;

/// Buffers transport bytes and hands out complete lines.
///
/// Reads only what [`Transport::available`] reports, so filling never
/// blocks. Raw byte runs (IMAP literals) can be taken with
/// [`take`](Self::take) without line splitting.
#[derive(Debug)]
pub struct LineReader {
    buf: BytesMut,
    max_line: usize,
}

impl Default for LineReader {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE)
    }
}

impl LineReader {
    /// Creates a reader refusing lines longer than `max_line`.
    #[must_use]
    pub fn new(max_line: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(READ_CHUNK),
            max_line,
        }
    }

    /// Pulls whatever the transport has ready. Returns the byte count.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport read fails.
    pub fn fill<T: Transport + ?Sized>(&mut self, transport: &mut T) -> io::Result<usize> {
        let mut total = 0;
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let ready = transport.available();
            if ready == 0 {
                return Ok(total);
            }
            let want = ready.min(READ_CHUNK);
            let n = transport.read(&mut chunk[..want])?;
            if n == 0 {
                return Ok(total);
            }
            self.buf.extend_from_slice(&chunk[..n]);
            total += n;
            if self.buf.len() >= self.max_line + READ_CHUNK {
                return Ok(total);
            }
        }
    }

    /// Takes the next complete line, CRLF included.
    ///
    /// # Errors
    ///
    /// Returns `InvalidData` when more than the line limit is buffered
    /// without a line break.
    pub fn next_line(&mut self) -> io::Result<Option<Bytes>> {
        match self.buf.iter().position(|&b| b == b'\n') {
            Some(pos) => Ok(Some(self.buf.split_to(pos + 1).freeze())),
            None if self.buf.len() > self.max_line => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("line exceeds {} bytes", self.max_line),
            )),
            None => Ok(None),
        }
    }

    /// Takes up to `max` buffered bytes.
    pub fn take(&mut self, max: usize) -> Bytes {
        let n = max.min(self.buf.len());
        self.buf.split_to(n).freeze()
    }

    /// Number of buffered bytes.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drops everything buffered.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    fn connected(data: &str) -> MockTransport {
        let mut t = MockTransport::new();
        t.connect("localhost", 1).unwrap();
        t.push(data);
        t
    }

    #[test]
    fn splits_lines() {
        let mut t = connected("250-one\r\n250 two\r\npartial");
        let mut r = LineReader::default();
        assert_eq!(r.fill(&mut t).unwrap(), 25);
        assert_eq!(&r.next_line().unwrap().unwrap()[..], b"250-one\r\n");
        assert_eq!(&r.next_line().unwrap().unwrap()[..], b"250 two\r\n");
        assert!(r.next_line().unwrap().is_none());
        assert_eq!(r.buffered(), 7);

        t.push("\r\n");
        r.fill(&mut t).unwrap();
        assert_eq!(&r.next_line().unwrap().unwrap()[..], b"partial\r\n");
    }

    #[test]
    fn take_raw_bytes() {
        let mut t = connected("hello world\r\n");
        let mut r = LineReader::default();
        r.fill(&mut t).unwrap();
        assert_eq!(&r.take(5)[..], b"hello");
        assert_eq!(&r.take(100)[..], b" world\r\n");
        assert_eq!(r.buffered(), 0);
    }

    #[test]
    fn over_long_line_rejected() {
        let mut t = connected(&"x".repeat(40));
        let mut r = LineReader::new(16);
        r.fill(&mut t).unwrap();
        assert!(r.next_line().is_err());
    }

    #[test]
    fn nothing_available() {
        let mut t = connected("");
        let mut r = LineReader::default();
        assert_eq!(r.fill(&mut t).unwrap(), 0);
        assert!(r.next_line().unwrap().is_none());
    }
}
