//! Session configuration types.

use std::time::Duration;

/// Connection security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Security {
    /// No encryption (port 143). **Not recommended for production.**
    None,
    /// Start with plaintext, upgrade with STARTTLS (port 143).
    StartTls,
    /// TLS from the start (port 993).
    #[default]
    Implicit,
}

impl Security {
    /// Returns the default port for this security mode.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::None | Self::StartTls => 143,
            Self::Implicit => 993,
        }
    }
}

/// Ceiling on a body part fetched by [`fetch`](crate::ImapClient::fetch).
pub const DEFAULT_PART_SIZE_LIMIT: u64 = 5 * 1024 * 1024;

/// Most search results reported.
pub const DEFAULT_SEARCH_LIMIT: usize = 20;

/// Largest slice of part data decoded per poll.
pub const DEFAULT_LINE_LIMIT: usize = 2048;

/// IMAP session configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Security mode.
    pub security: Security,
    /// Time allowed for connecting and the greeting.
    pub connect_timeout: Duration,
    /// Time allowed for each `APPEND` content write.
    pub send_timeout: Duration,
    /// Time allowed for a response to arrive.
    pub read_timeout: Duration,
    /// How long an `IDLE` runs before it is refreshed.
    pub idle_timeout: Duration,
    /// Most search results kept.
    pub search_limit: usize,
    /// Keep the newest results, highest number first.
    pub recent_first: bool,
    /// Parts larger than this are skipped.
    pub part_size_limit: u64,
    /// Fetch parts with `BODY.PEEK` so `\Seen` is not set.
    pub read_only: bool,
    /// Client name sent with `ID`.
    pub client_name: String,
    /// Client version sent with `ID`.
    pub client_version: String,
    /// Directory that downloaded parts are written under.
    pub download_dir: Option<String>,
    /// Largest slice of part data decoded per poll.
    pub line_limit: usize,
}

impl Config {
    /// Creates a configuration using implicit TLS on port 993.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        ConfigBuilder::new(host).build()
    }

    /// Creates a configuration builder.
    #[must_use]
    pub fn builder(host: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder::new(host)
    }
}

/// Builder for [`Config`].
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    host: String,
    port: Option<u16>,
    security: Security,
    connect_timeout: Duration,
    send_timeout: Duration,
    read_timeout: Duration,
    idle_timeout: Duration,
    search_limit: usize,
    recent_first: bool,
    part_size_limit: u64,
    read_only: bool,
    client_name: String,
    client_version: String,
    download_dir: Option<String>,
    line_limit: usize,
}

impl ConfigBuilder {
    /// Creates a new builder with the given hostname.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            security: Security::default(),
            connect_timeout: Duration::from_secs(30),
            send_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(120),
            idle_timeout: Duration::from_secs(8 * 60),
            search_limit: DEFAULT_SEARCH_LIMIT,
            recent_first: true,
            part_size_limit: DEFAULT_PART_SIZE_LIMIT,
            read_only: true,
            client_name: "mailpoll".to_string(),
            client_version: crate::VERSION.to_string(),
            download_dir: None,
            line_limit: DEFAULT_LINE_LIMIT,
        }
    }

    /// Sets the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the security mode.
    #[must_use]
    pub const fn security(mut self, security: Security) -> Self {
        self.security = security;
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the `APPEND` write timeout.
    #[must_use]
    pub const fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Sets the response timeout.
    #[must_use]
    pub const fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets the `IDLE` refresh period.
    #[must_use]
    pub const fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets how many search results are kept.
    #[must_use]
    pub const fn search_limit(mut self, limit: usize) -> Self {
        self.search_limit = limit;
        self
    }

    /// Keeps the newest search results first.
    #[must_use]
    pub const fn recent_first(mut self, enabled: bool) -> Self {
        self.recent_first = enabled;
        self
    }

    /// Sets the body part size ceiling.
    #[must_use]
    pub const fn part_size_limit(mut self, bytes: u64) -> Self {
        self.part_size_limit = bytes;
        self
    }

    /// Chooses between `BODY.PEEK[]` and `BODY[]`.
    #[must_use]
    pub const fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Sets the name and version sent with `ID`.
    #[must_use]
    pub fn client_id(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.client_name = name.into();
        self.client_version = version.into();
        self
    }

    /// Writes fetched parts under `dir` through the file store.
    #[must_use]
    pub fn download_dir(mut self, dir: impl Into<String>) -> Self {
        self.download_dir = Some(dir.into());
        self
    }

    /// Sets the largest slice of part data decoded per poll.
    #[must_use]
    pub const fn line_limit(mut self, bytes: usize) -> Self {
        self.line_limit = bytes;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> Config {
        Config {
            host: self.host,
            port: self.port.unwrap_or_else(|| self.security.default_port()),
            security: self.security,
            connect_timeout: self.connect_timeout,
            send_timeout: self.send_timeout,
            read_timeout: self.read_timeout,
            idle_timeout: self.idle_timeout,
            search_limit: self.search_limit,
            recent_first: self.recent_first,
            part_size_limit: self.part_size_limit,
            read_only: self.read_only,
            client_name: self.client_name,
            client_version: self.client_version,
            download_dir: self.download_dir,
            line_limit: self.line_limit.max(1),
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

    #[test]
    fn test_default_ports() {
        assert_eq!(Security::None.default_port(), 143);
        assert_eq!(Security::StartTls.default_port(), 143);
        assert_eq!(Security::Implicit.default_port(), 993);
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::new("imap.example.com");
        assert_eq!(config.port, 993);
        assert_eq!(config.security, Security::Implicit);
        assert_eq!(config.idle_timeout, Duration::from_secs(480));
        assert_eq!(config.read_timeout, Duration::from_secs(120));
        assert_eq!(config.search_limit, 20);
        assert!(config.recent_first);
        assert!(config.read_only);
        assert_eq!(config.part_size_limit, 5 * 1024 * 1024);
        assert_eq!(config.line_limit, 2048);
        assert!(config.download_dir.is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = Config::builder("imap.example.com")
            .security(Security::StartTls)
            .search_limit(5)
            .recent_first(false)
            .client_id("probe", "0.1")
            .download_dir("/mail")
            .build();

        assert_eq!(config.port, 143);
        assert_eq!(config.search_limit, 5);
        assert!(!config.recent_first);
        assert_eq!(config.client_name, "probe");
        assert_eq!(config.download_dir.as_deref(), Some("/mail"));
    }

    #[test]
    fn test_explicit_port_wins() {
        let config = Config::builder("imap.example.com").port(1143).build();
        assert_eq!(config.port, 1143);
    }
}
