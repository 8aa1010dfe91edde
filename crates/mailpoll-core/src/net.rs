//! TCP transport with rustls upgrade.
//!
//! The socket runs in non-blocking mode so [`Transport::available`] never
//! stalls. Writes and the TLS handshake spin until the configured timeout.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore};

use crate::transport::{TlsHook, Transport};

const READ_CHUNK: usize = 2048;

enum Link {
    Plain(TcpStream),
    Tls {
        conn: Box<ClientConnection>,
        sock: TcpStream,
    },
}

/// Non-blocking TCP [`Transport`] that can be upgraded to TLS in place.
pub struct TcpTransport {
    link: Option<Link>,
    host: String,
    timeout: Duration,
    inbound: BytesMut,
    config: Arc<ClientConfig>,
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("host", &self.host)
            .field("connected", &self.link.is_some())
            .field("secured", &self.is_secured())
            .field("buffered", &self.inbound.len())
            .finish_non_exhaustive()
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpTransport {
    /// Creates a transport trusting the webpki root set.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(default_tls_config())
    }

    /// Creates a transport with a custom TLS client configuration.
    #[must_use]
    pub fn with_config(config: Arc<ClientConfig>) -> Self {
        Self {
            link: None,
            host: String::new(),
            timeout: Duration::from_secs(30),
            inbound: BytesMut::with_capacity(READ_CHUNK),
            config,
        }
    }

    /// Returns true once the stream is TLS-protected.
    #[must_use]
    pub const fn is_secured(&self) -> bool {
        matches!(self.link, Some(Link::Tls { .. }))
    }

    /// Performs the TLS handshake over the open plain connection.
    ///
    /// Bytes buffered before the upgrade are discarded.
    ///
    /// # Errors
    ///
    /// Returns an error if not connected, already secured, or the handshake
    /// fails or times out.
    pub fn upgrade(&mut self) -> io::Result<()> {
        let sock = match self.link.take() {
            Some(Link::Plain(sock)) => sock,
            other => {
                self.link = other;
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "no plain connection to upgrade",
                ));
            }
        };
        self.inbound.clear();

        let name = ServerName::try_from(self.host.clone()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid hostname: {}", self.host),
            )
        })?;
        let conn = ClientConnection::new(Arc::clone(&self.config), name).map_err(io::Error::other)?;
        let mut link = Link::Tls {
            conn: Box::new(conn),
            sock,
        };
        handshake(&mut link, self.timeout)?;
        tracing::debug!(host = %self.host, "TLS established");
        self.link = Some(link);
        Ok(())
    }

    /// TLS hook suitable for the engines' implicit TLS and STARTTLS paths.
    #[must_use]
    pub fn tls_hook() -> TlsHook<Self> {
        Box::new(|transport: &mut Self| match transport.upgrade() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "TLS upgrade failed");
                false
            }
        })
    }

    fn fill(&mut self) -> io::Result<()> {
        let mut tmp = [0u8; READ_CHUNK];
        let closed = match &mut self.link {
            None => return Ok(()),
            Some(Link::Plain(sock)) => loop {
                match sock.read(&mut tmp) {
                    Ok(0) => break true,
                    Ok(n) => self.inbound.extend_from_slice(&tmp[..n]),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break false,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => return Err(e),
                }
            },
            Some(Link::Tls { conn, sock }) => {
                let mut eof = false;
                loop {
                    match conn.read_tls(sock) {
                        Ok(0) => {
                            eof = true;
                            break;
                        }
                        Ok(_) => {
                            conn.process_new_packets().map_err(io::Error::other)?;
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => return Err(e),
                    }
                }
                loop {
                    match conn.reader().read(&mut tmp) {
                        Ok(0) => {
                            eof = true;
                            break;
                        }
                        Ok(n) => self.inbound.extend_from_slice(&tmp[..n]),
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) => return Err(e),
                    }
                }
                eof
            }
        };
        if closed {
            tracing::debug!(host = %self.host, "peer closed connection");
            self.link = None;
        }
        Ok(())
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self, host: &str, port: u16) -> io::Result<()> {
        self.stop();
        let mut last = io::Error::new(io::ErrorKind::NotFound, "host did not resolve");
        for addr in (host, port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(sock) => {
                    sock.set_nodelay(true)?;
                    sock.set_nonblocking(true)?;
                    self.host = host.to_string();
                    self.link = Some(Link::Plain(sock));
                    tracing::debug!(%addr, "connected");
                    return Ok(());
                }
                Err(e) => last = e,
            }
        }
        Err(last)
    }

    fn stop(&mut self) {
        if let Some(link) = self.link.take() {
            match link {
                Link::Plain(sock) => {
                    let _ = sock.shutdown(std::net::Shutdown::Both);
                }
                Link::Tls { mut conn, mut sock } => {
                    conn.send_close_notify();
                    let _ = conn.write_tls(&mut sock);
                    let _ = sock.shutdown(std::net::Shutdown::Both);
                }
            }
        }
        self.inbound.clear();
    }

    fn connected(&self) -> bool {
        self.link.is_some() || !self.inbound.is_empty()
    }

    fn available(&mut self) -> usize {
        if let Err(e) = self.fill() {
            tracing::warn!(error = %e, "read failed");
            self.link = None;
        }
        self.inbound.len()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.inbound.is_empty() {
            self.fill()?;
        }
        let n = buf.len().min(self.inbound.len());
        buf[..n].copy_from_slice(&self.inbound[..n]);
        self.inbound.advance(n);
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let deadline = Instant::now() + self.timeout;
        match &mut self.link {
            None => Err(io::Error::from(io::ErrorKind::NotConnected)),
            Some(Link::Plain(sock)) => loop {
                match sock.write(data) {
                    Ok(n) => return Ok(n),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => wait(deadline)?,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => return Err(e),
                }
            },
            Some(Link::Tls { conn, sock }) => {
                conn.writer().write_all(data)?;
                while conn.wants_write() {
                    match conn.write_tls(sock) {
                        Ok(_) => {}
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => wait(deadline)?,
                        Err(e) => return Err(e),
                    }
                }
                Ok(data.len())
            }
        }
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}

fn wait(deadline: Instant) -> io::Result<()> {
    if Instant::now() >= deadline {
        return Err(io::Error::from(io::ErrorKind::TimedOut));
    }
    std::thread::yield_now();
    Ok(())
}

fn handshake(link: &mut Link, timeout: Duration) -> io::Result<()> {
    let Link::Tls { conn, sock } = link else {
        return Ok(());
    };
    let deadline = Instant::now() + timeout;
    while conn.is_handshaking() {
        let mut progressed = false;
        if conn.wants_write() {
            match conn.write_tls(sock) {
                Ok(_) => progressed = true,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }
        }
        if conn.wants_read() {
            match conn.read_tls(sock) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
                Ok(_) => {
                    conn.process_new_packets().map_err(io::Error::other)?;
                    progressed = true;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }
        }
        if !progressed {
            wait(deadline)?;
        }
    }
    Ok(())
}

/// Client configuration trusting the webpki root certificates.
#[must_use]
pub fn default_tls_config() -> Arc<ClientConfig> {
    let root_store = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    Arc::new(config)
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
    use std::net::TcpListener;

    #[test]
    fn plain_round_trip_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            sock.write_all(b"220 ready\r\n").unwrap();
            let mut buf = [0u8; 6];
            sock.read_exact(&mut buf).unwrap();
            buf
        });

        let mut t = TcpTransport::new();
        t.connect("127.0.0.1", port).unwrap();
        assert!(t.connected());
        assert!(!t.is_secured());

        let deadline = Instant::now() + Duration::from_secs(5);
        while t.available() < 11 && Instant::now() < deadline {
            std::thread::yield_now();
        }
        let mut buf = [0u8; 11];
        assert_eq!(t.read(&mut buf).unwrap(), 11);
        assert_eq!(&buf, b"220 ready\r\n");

        t.write_all(b"QUIT\r\n").unwrap();
        assert_eq!(&server.join().unwrap(), b"QUIT\r\n");
        t.stop();
        assert!(!t.connected());
    }

    #[test]
    fn upgrade_requires_plain_connection() {
        let mut t = TcpTransport::new();
        assert!(t.upgrade().is_err());
    }
}
