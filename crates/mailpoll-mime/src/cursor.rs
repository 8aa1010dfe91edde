//! Uniform read/seek access over buffers, constant data and files.
//!
//! Encoders take a [`Cursor`] and never need to know where the bytes live.
//! Reading past the end yields `0` instead of failing.

use std::fmt;

use bytes::Bytes;
use mailpoll_core::FileHandle;

/// Read-ahead block size for file sources.
pub const FILE_BLOCK_SIZE: usize = 512;

/// Read/seek counters kept for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CursorStats {
    /// Bytes handed out by `read`/`read_into`.
    pub bytes_read: u64,
    /// Explicit seeks performed.
    pub seeks: u64,
    /// Blocks loaded from a file source.
    pub blocks_loaded: u64,
}

enum Source {
    Buffer(Bytes),
    Static(&'static [u8]),
    File {
        handle: Box<dyn FileHandle>,
        size: u64,
        block: Vec<u8>,
        block_start: u64,
        device_pos: u64,
    },
}

/// Addressable byte source.
pub struct Cursor {
    source: Source,
    pos: u64,
    stats: CursorStats,
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.source {
            Source::Buffer(_) => "buffer",
            Source::Static(_) => "static",
            Source::File { .. } => "file",
        };
        f.debug_struct("Cursor")
            .field("kind", &kind)
            .field("pos", &self.pos)
            .field("size", &self.size())
            .field("stats", &self.stats)
            .finish()
    }
}

impl Cursor {
    /// Cursor over an owned in-memory buffer.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self::with_source(Source::Buffer(data.into()))
    }

    /// Cursor over constant data.
    #[must_use]
    pub fn from_static(data: &'static [u8]) -> Self {
        Self::with_source(Source::Static(data))
    }

    /// Cursor over an open file.
    #[must_use]
    pub fn from_file(handle: Box<dyn FileHandle>) -> Self {
        let size = handle.size();
        Self::with_source(Source::File {
            handle,
            size,
            block: Vec::with_capacity(FILE_BLOCK_SIZE),
            block_start: 0,
            device_pos: 0,
        })
    }

    const fn with_source(source: Source) -> Self {
        Self {
            source,
            pos: 0,
            stats: CursorStats {
                bytes_read: 0,
                seeks: 0,
                blocks_loaded: 0,
            },
        }
    }

    /// Total size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        match &self.source {
            Source::Buffer(b) => b.len() as u64,
            Source::Static(s) => s.len() as u64,
            Source::File { size, .. } => *size,
        }
    }

    /// Current read position.
    #[must_use]
    pub const fn position(&self) -> u64 {
        self.pos
    }

    /// Returns true while unread bytes remain.
    #[must_use]
    pub fn available(&self) -> bool {
        self.pos < self.size()
    }

    /// Bytes left to read.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.size().saturating_sub(self.pos)
    }

    /// Diagnostic counters.
    #[must_use]
    pub const fn stats(&self) -> CursorStats {
        self.stats
    }

    /// Reads one byte, or `0` past the end.
    pub fn read(&mut self) -> u8 {
        match self.byte_at(self.pos) {
            Some(b) => {
                self.pos += 1;
                self.stats.bytes_read += 1;
                b
            }
            None => 0,
        }
    }

    /// Returns the next byte without consuming it, or `0` past the end.
    pub fn peek(&mut self) -> u8 {
        self.peek_n(0)
    }

    /// Returns the byte `n` positions ahead, or `0` past the end.
    pub fn peek_n(&mut self, n: u64) -> u8 {
        self.byte_at(self.pos + n).unwrap_or(0)
    }

    /// Reads up to `buf.len()` bytes, returning the count copied.
    pub fn read_into(&mut self, buf: &mut [u8]) -> usize {
        let mut n = 0;
        while n < buf.len() {
            match self.byte_at(self.pos) {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                    self.pos += 1;
                }
                None => break,
            }
        }
        self.stats.bytes_read += n as u64;
        n
    }

    /// Moves to `pos`, clamped to the size.
    ///
    /// On a file source this drops the read-ahead block.
    pub fn seek(&mut self, pos: u64) {
        self.pos = pos.min(self.size());
        self.stats.seeks += 1;
        if let Source::File { block, .. } = &mut self.source {
            block.clear();
        }
    }

    /// Seeks back to the start.
    pub fn rewind(&mut self) {
        self.seek(0);
    }

    #[allow(clippy::cast_possible_truncation)]
    fn byte_at(&mut self, pos: u64) -> Option<u8> {
        match &mut self.source {
            Source::Buffer(b) => b.get(pos as usize).copied(),
            Source::Static(s) => s.get(pos as usize).copied(),
            Source::File {
                handle,
                size,
                block,
                block_start,
                device_pos,
            } => {
                if pos >= *size {
                    return None;
                }
                let in_block = pos >= *block_start && pos < *block_start + block.len() as u64;
                if !in_block {
                    if *device_pos != pos {
                        if let Err(e) = handle.seek(pos) {
                            tracing::warn!(error = %e, pos, "file seek failed");
                            return None;
                        }
                        *device_pos = pos;
                    }
                    block.resize(FILE_BLOCK_SIZE, 0);
                    let n = match handle.read(block) {
                        Ok(n) => n,
                        Err(e) => {
                            tracing::warn!(error = %e, pos, "file read failed");
                            0
                        }
                    };
                    block.truncate(n);
                    *block_start = pos;
                    *device_pos = pos + n as u64;
                    self.stats.blocks_loaded += 1;
                    if n == 0 {
                        return None;
                    }
                }
                block.get((pos - *block_start) as usize).copied()
            }
        }
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
    use std::io;

    struct MemFile {
        data: Vec<u8>,
        pos: usize,
    }

    impl FileHandle for MemFile {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }

        fn write(&mut self, data: &[u8]) -> io::Result<()> {
            self.data.extend_from_slice(data);
            Ok(())
        }

        fn seek(&mut self, pos: u64) -> io::Result<()> {
            self.pos = pos as usize;
            Ok(())
        }

        fn size(&self) -> u64 {
            self.data.len() as u64
        }
    }

    fn sources(data: &'static [u8]) -> Vec<Cursor> {
        vec![
            Cursor::from_bytes(data.to_vec()),
            Cursor::from_static(data),
            Cursor::from_file(Box::new(MemFile {
                data: data.to_vec(),
                pos: 0,
            })),
        ]
    }

    #[test]
    fn same_behavior_for_every_source() {
        for mut c in sources(b"hello") {
            assert_eq!(c.size(), 5);
            assert!(c.available());
            assert_eq!(c.peek(), b'h');
            assert_eq!(c.peek_n(4), b'o');
            assert_eq!(c.peek_n(5), 0);
            assert_eq!(c.read(), b'h');
            let mut buf = [0u8; 8];
            assert_eq!(c.read_into(&mut buf), 4);
            assert_eq!(&buf[..4], b"ello");
            assert!(!c.available());
            assert_eq!(c.read(), 0);
            assert_eq!(c.stats().bytes_read, 5);
        }
    }

    #[test]
    fn seek_counts_and_clamps() {
        for mut c in sources(b"abcdef") {
            c.seek(3);
            assert_eq!(c.read(), b'd');
            c.seek(100);
            assert_eq!(c.position(), 6);
            c.rewind();
            assert_eq!(c.read(), b'a');
            assert_eq!(c.stats().seeks, 3);
        }
    }

    #[test]
    fn file_source_crosses_blocks() {
        let data: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();
        let mut c = Cursor::from_file(Box::new(MemFile {
            data: data.clone(),
            pos: 0,
        }));
        let mut out = Vec::new();
        while c.available() {
            out.push(c.read());
        }
        assert_eq!(out, data);
        assert_eq!(c.stats().blocks_loaded, 4);
    }

    #[test]
    fn file_seek_invalidates_block() {
        let data: Vec<u8> = (0..1024u32).map(|i| (i % 200) as u8).collect();
        let mut c = Cursor::from_file(Box::new(MemFile { data, pos: 0 }));
        assert_eq!(c.read(), 0);
        c.seek(700);
        assert_eq!(c.read(), (700 % 200) as u8);
        c.seek(1);
        assert_eq!(c.read(), 1);
        assert_eq!(c.stats().blocks_loaded, 3);
    }

    #[test]
    fn empty_source() {
        let mut c = Cursor::from_static(b"");
        assert!(!c.available());
        assert_eq!(c.read(), 0);
        assert_eq!(c.peek(), 0);
    }
}
