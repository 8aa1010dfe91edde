//! Byte-stream transport consumed by the engines.
//!
//! The engines never open sockets themselves. They drive a caller-supplied
//! [`Transport`] and only read after [`Transport::available`] reports
//! buffered bytes, so a poll step never blocks on the network.
//!
//! TLS upgrades (implicit TLS on connect, or STARTTLS mid-session) are
//! delegated to a [`TlsHook`] invoked synchronously with the transport.

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use bytes::{Buf, BytesMut};

/// Non-blocking byte stream.
pub trait Transport {
    /// Opens the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot be reached.
    fn connect(&mut self, host: &str, port: u16) -> io::Result<()>;

    /// Closes the connection. Calling it on a closed transport is a no-op.
    fn stop(&mut self);

    /// Returns true while the peer is reachable.
    fn connected(&self) -> bool;

    /// Number of bytes that can be read without blocking.
    fn available(&mut self) -> usize;

    /// Reads up to `buf.len()` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying read fails.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes some prefix of `data`, returning how much was accepted.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write fails.
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Sets the timeout applied to connect and write calls.
    fn set_timeout(&mut self, timeout: Duration);

    /// Writes all of `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if a write fails or the transport stops accepting data.
    fn write_all(&mut self, mut data: &[u8]) -> io::Result<()> {
        while !data.is_empty() {
            match self.write(data)? {
                0 => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                n => data = &data[n..],
            }
        }
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn connect(&mut self, host: &str, port: u16) -> io::Result<()> {
        (**self).connect(host, port)
    }

    fn stop(&mut self) {
        (**self).stop();
    }

    fn connected(&self) -> bool {
        (**self).connected()
    }

    fn available(&mut self) -> usize {
        (**self).available()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        (**self).write(data)
    }

    fn set_timeout(&mut self, timeout: Duration) {
        (**self).set_timeout(timeout);
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn connect(&mut self, host: &str, port: u16) -> io::Result<()> {
        (**self).connect(host, port)
    }

    fn stop(&mut self) {
        (**self).stop();
    }

    fn connected(&self) -> bool {
        (**self).connected()
    }

    fn available(&mut self) -> usize {
        (**self).available()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        (**self).write(data)
    }

    fn set_timeout(&mut self, timeout: Duration) {
        (**self).set_timeout(timeout);
    }
}

/// Callback performing a TLS upgrade on the transport.
///
/// Returns true when the handshake succeeded. The engine blocks its own
/// state machine on the call but does no I/O while it runs.
pub type TlsHook<T> = Box<dyn FnMut(&mut T) -> bool + Send>;

/// Scripted in-memory transport for tests and simulations.
///
/// Server bytes pushed with [`push`](Self::push) become readable
/// immediately. Replies queued with [`reply`](Self::reply) are released one
/// at a time, each time the client finishes writing a CRLF-terminated line.
#[derive(Debug, Default)]
pub struct MockTransport {
    inbound: BytesMut,
    replies: VecDeque<Vec<u8>>,
    sent: Vec<u8>,
    line_open: bool,
    connected: bool,
    secured: bool,
    refuse_connect: bool,
    fail_writes: bool,
    connects: usize,
    stops: usize,
    timeout: Duration,
}

impl MockTransport {
    /// Creates a disconnected mock transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes server bytes readable right away.
    pub fn push(&mut self, data: impl AsRef<[u8]>) -> &mut Self {
        self.inbound.extend_from_slice(data.as_ref());
        self
    }

    /// Queues a server reply released after the client's next command line.
    pub fn reply(&mut self, data: impl AsRef<[u8]>) -> &mut Self {
        self.replies.push_back(data.as_ref().to_vec());
        self
    }

    /// Makes the next `connect` fail.
    pub const fn refuse_connect(&mut self, refuse: bool) -> &mut Self {
        self.refuse_connect = refuse;
        self
    }

    /// Makes every write fail.
    pub const fn fail_writes(&mut self, fail: bool) -> &mut Self {
        self.fail_writes = fail;
        self
    }

    /// Simulates the server dropping the connection.
    pub fn drop_connection(&mut self) {
        self.connected = false;
        self.inbound.clear();
    }

    /// Marks the stream as TLS-protected. Used from TLS hooks in tests.
    pub const fn mark_secured(&mut self) {
        self.secured = true;
    }

    /// Returns true once a TLS hook has secured the stream.
    #[must_use]
    pub const fn is_secured(&self) -> bool {
        self.secured
    }

    /// Everything the client has written so far.
    #[must_use]
    pub fn sent(&self) -> &[u8] {
        &self.sent
    }

    /// Client output decoded lossily as UTF-8.
    #[must_use]
    pub fn sent_text(&self) -> String {
        String::from_utf8_lossy(&self.sent).into_owned()
    }

    /// Takes and clears the captured client output.
    pub fn take_sent(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.sent)
    }

    /// Number of successful `connect` calls.
    #[must_use]
    pub const fn connects(&self) -> usize {
        self.connects
    }

    /// Number of `stop` calls that closed an open connection.
    #[must_use]
    pub const fn stops(&self) -> usize {
        self.stops
    }

    /// Timeout most recently set by the engine.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    fn release_reply(&mut self) {
        if let Some(reply) = self.replies.pop_front() {
            self.inbound.extend_from_slice(&reply);
        }
    }
}

impl Transport for MockTransport {
    fn connect(&mut self, _host: &str, _port: u16) -> io::Result<()> {
        if self.refuse_connect {
            return Err(io::Error::from(io::ErrorKind::ConnectionRefused));
        }
        self.connected = true;
        self.secured = false;
        self.connects += 1;
        Ok(())
    }

    fn stop(&mut self) {
        if self.connected {
            self.stops += 1;
        }
        self.connected = false;
        self.secured = false;
    }

    fn connected(&self) -> bool {
        self.connected
    }

    fn available(&mut self) -> usize {
        if self.connected { self.inbound.len() } else { 0 }
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.connected {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        }
        let n = buf.len().min(self.inbound.len());
        buf[..n].copy_from_slice(&self.inbound[..n]);
        self.inbound.advance(n);
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if !self.connected {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        }
        if self.fail_writes {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        self.sent.extend_from_slice(data);
        self.line_open = !data.ends_with(b"\r\n");
        if !self.line_open {
            self.release_reply();
        }
        Ok(data.len())
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
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

    #[test]
    fn pushed_bytes_are_readable() {
        let mut t = MockTransport::new();
        t.push("* OK ready\r\n");
        t.connect("localhost", 143).unwrap();
        assert_eq!(t.available(), 12);

        let mut buf = [0u8; 5];
        assert_eq!(t.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"* OK ");
        assert_eq!(t.available(), 7);
    }

    #[test]
    fn reply_released_after_command_line() {
        let mut t = MockTransport::new();
        t.reply("250 OK\r\n");
        t.connect("localhost", 25).unwrap();
        assert_eq!(t.available(), 0);

        t.write_all(b"NOOP").unwrap();
        assert_eq!(t.available(), 0);
        t.write_all(b"\r\n").unwrap();
        assert_eq!(t.available(), 8);
        assert_eq!(t.sent_text(), "NOOP\r\n");
    }

    #[test]
    fn stop_is_idempotent() {
        let mut t = MockTransport::new();
        t.connect("localhost", 25).unwrap();
        t.stop();
        t.stop();
        assert!(!t.connected());
        assert_eq!(t.stops(), 1);
    }

    #[test]
    fn refused_connect() {
        let mut t = MockTransport::new();
        t.refuse_connect(true);
        assert!(t.connect("localhost", 25).is_err());
        assert!(!t.connected());
    }

    #[test]
    fn write_fails_when_disconnected() {
        let mut t = MockTransport::new();
        assert!(t.write_all(b"x\r\n").is_err());
    }

    #[test]
    fn borrowed_transport_forwards() {
        fn drive<T: Transport>(mut transport: T) {
            transport.connect("localhost", 25).unwrap();
            transport.write_all(b"QUIT\r\n").unwrap();
        }

        let mut t = MockTransport::new();
        drive(&mut t);
        assert_eq!(t.sent(), b"QUIT\r\n");
    }
}
