//! # Client Configuration
//!
//! Purpose: Describe the server list, credentials, timeouts and routing
//! strategy consumed by the cluster and its sessions.
//!
//! ## Usage Notes
//!
//! - `Config::default()` matches the defaults of the classic memcached
//!   clients: 2s timeouts, keep-alive on, no-delay on, failover on.
//! - Durations are expressed in milliseconds when loaded from JSON.
//!
//! ```json
//! {
//!   "servers": [{ "address": "10.0.0.1:11211" }, "unix:///run/mc.sock"],
//!   "username": "app",
//!   "password": "secret",
//!   "read_timeout": 500,
//!   "hasher": "ring"
//! }
//! ```

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// Default timeout for dial, read and write.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default idle time before TCP keep-alive probes start.
pub const DEFAULT_KEEP_ALIVE_PERIOD: Duration = Duration::from_secs(60);

/// Default time a failed server stays out of the live set.
pub const DEFAULT_DOWN_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Largest response body accepted before the connection is dropped.
pub const DEFAULT_MAX_BODY_SIZE: u32 = 32 * 1024 * 1024;

/// Socket family used to reach a server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Tcp,
    Unix,
}

impl Scheme {
    pub const fn as_str(self) -> &'static str {
        match self {
            Scheme::Tcp => "tcp",
            Scheme::Unix => "unix",
        }
    }
}

/// Address of one cache server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "AddrRepr")]
pub struct ServerAddr {
    pub address: String,
    #[serde(default)]
    pub scheme: Scheme,
}

// Accept either `"host:port"` strings or `{ "address": .., "scheme": .. }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum AddrRepr {
    Text(String),
    Full {
        address: String,
        #[serde(default)]
        scheme: Scheme,
    },
}

impl TryFrom<AddrRepr> for ServerAddr {
    type Error = ClientError;

    fn try_from(repr: AddrRepr) -> ClientResult<Self> {
        match repr {
            AddrRepr::Text(text) => ServerAddr::parse(&text),
            AddrRepr::Full { address, scheme } => {
                if address.is_empty() {
                    return Err(ClientError::InvalidAddress(address));
                }
                Ok(ServerAddr { address, scheme })
            }
        }
    }
}

impl ServerAddr {
    pub fn tcp(address: impl Into<String>) -> Self {
        ServerAddr {
            address: address.into(),
            scheme: Scheme::Tcp,
        }
    }

    pub fn unix(path: impl Into<String>) -> Self {
        ServerAddr {
            address: path.into(),
            scheme: Scheme::Unix,
        }
    }

    /// Parses `host:port`, `tcp://host:port`, `unix:///path` or a bare
    /// absolute socket path.
    pub fn parse(text: &str) -> ClientResult<Self> {
        let text = text.trim();
        let invalid = || ClientError::InvalidAddress(text.to_string());

        if let Some(path) = text.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(invalid());
            }
            return Ok(ServerAddr::unix(path));
        }
        if text.starts_with('/') {
            return Ok(ServerAddr::unix(text));
        }

        let host_port = text.strip_prefix("tcp://").unwrap_or(text);
        match host_port.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(ServerAddr::tcp(host_port))
            }
            _ => Err(invalid()),
        }
    }

    /// Parses a comma or whitespace separated server list.
    pub fn parse_list(text: &str) -> ClientResult<Vec<Self>> {
        text.split(|c: char| c == ',' || c.is_whitespace())
            .filter(|part| !part.is_empty())
            .map(ServerAddr::parse)
            .collect()
    }
}

impl fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme.as_str(), self.address)
    }
}

/// Key-to-server routing strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HasherKind {
    /// `crc32(key) mod live_count`.
    #[default]
    Modulo,
    /// Consistent-hash ring.
    Ring,
}

/// Configuration for the client, its cluster and sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Servers in routing order.
    pub servers: Vec<ServerAddr>,
    /// SASL PLAIN user; empty disables authentication.
    pub username: String,
    pub password: String,
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    /// Idle bound on each socket read, not on a whole response: a server
    /// that keeps trickling bytes can stretch one exchange past it.
    #[serde(with = "duration_ms")]
    pub read_timeout: Duration,
    /// Idle bound on each socket write, like `read_timeout`.
    #[serde(with = "duration_ms")]
    pub write_timeout: Duration,
    pub tcp_keep_alive: bool,
    #[serde(with = "duration_ms")]
    pub tcp_keep_alive_period: Duration,
    pub tcp_no_delay: bool,
    /// Retry network failures on another server.
    pub failover: bool,
    /// How long a failed server is skipped before it is tried again.
    #[serde(with = "duration_ms")]
    pub down_retry_delay: Duration,
    pub hasher: HasherKind,
    /// Responses whose header declares a larger body are rejected before
    /// any body buffer is allocated.
    pub max_body_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            servers: Vec::new(),
            username: String::new(),
            password: String::new(),
            connect_timeout: DEFAULT_TIMEOUT,
            read_timeout: DEFAULT_TIMEOUT,
            write_timeout: DEFAULT_TIMEOUT,
            tcp_keep_alive: true,
            tcp_keep_alive_period: DEFAULT_KEEP_ALIVE_PERIOD,
            tcp_no_delay: true,
            failover: true,
            down_retry_delay: DEFAULT_DOWN_RETRY_DELAY,
            hasher: HasherKind::Modulo,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

impl Config {
    /// Default configuration for the given servers.
    pub fn with_servers(servers: Vec<ServerAddr>) -> Self {
        Config {
            servers,
            ..Config::default()
        }
    }

    /// Sets SASL PLAIN credentials.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// True when SASL authentication should run after connecting.
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() || !self.password.is_empty()
    }

    /// Loads a configuration from JSON text.
    pub fn from_json_str(text: &str) -> ClientResult<Self> {
        let config: Config =
            serde_json::from_str(text).map_err(|err| ClientError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> ClientResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|err| ClientError::Config(format!("{}: {}", path.display(), err)))?;
        Self::from_json_str(&text)
    }

    /// Rejects configurations the cluster cannot run with.
    pub fn validate(&self) -> ClientResult<()> {
        if self.servers.is_empty() {
            return Err(ClientError::Config("server list is empty".into()));
        }
        let timeouts = [
            ("connect_timeout", self.connect_timeout),
            ("read_timeout", self.read_timeout),
            ("write_timeout", self.write_timeout),
        ];
        for (name, value) in timeouts {
            if value.is_zero() {
                return Err(ClientError::Config(format!("{} must be non-zero", name)));
            }
        }
        if self.max_body_size == 0 {
            return Err(ClientError::Config("max_body_size must be non-zero".into()));
        }
        Ok(())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_addresses() {
        assert_eq!(
            ServerAddr::parse("127.0.0.1:11211").unwrap(),
            ServerAddr::tcp("127.0.0.1:11211")
        );
        assert_eq!(
            ServerAddr::parse("tcp://cache:11211").unwrap(),
            ServerAddr::tcp("cache:11211")
        );
        assert_eq!(
            ServerAddr::parse("unix:///tmp/mc.sock").unwrap(),
            ServerAddr::unix("/tmp/mc.sock")
        );
        assert_eq!(
            ServerAddr::parse("/tmp/mc.sock").unwrap(),
            ServerAddr::unix("/tmp/mc.sock")
        );
        assert!(ServerAddr::parse("cache").is_err());
        assert!(ServerAddr::parse("cache:http").is_err());
        assert!(ServerAddr::parse("unix://").is_err());
    }

    #[test]
    fn parses_server_lists() {
        let list = ServerAddr::parse_list("a:1, b:2 c:3").unwrap();
        assert_eq!(
            list,
            vec![ServerAddr::tcp("a:1"), ServerAddr::tcp("b:2"), ServerAddr::tcp("c:3")]
        );
    }

    #[test]
    fn loads_json_with_defaults() {
        let config = Config::from_json_str(
            r#"{
                "servers": ["10.0.0.1:11211", { "address": "/run/mc.sock", "scheme": "unix" }],
                "username": "app",
                "read_timeout": 500,
                "hasher": "ring"
            }"#,
        )
        .unwrap();

        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.servers[1].scheme, Scheme::Unix);
        assert_eq!(config.read_timeout, Duration::from_millis(500));
        assert_eq!(config.write_timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.hasher, HasherKind::Ring);
        assert!(config.has_credentials());
        assert!(config.failover);
        assert_eq!(config.max_body_size, DEFAULT_MAX_BODY_SIZE);
    }

    #[test]
    fn rejects_invalid_config() {
        assert!(matches!(
            Config::from_json_str(r#"{ "servers": [] }"#),
            Err(ClientError::Config(_))
        ));
        assert!(matches!(
            Config::from_json_str(r#"{ "servers": ["a:1"], "connect_timeout": 0 }"#),
            Err(ClientError::Config(_))
        ));
        assert!(matches!(
            Config::from_json_str(r#"{ "servers": ["a:1"], "max_body_size": 0 }"#),
            Err(ClientError::Config(_))
        ));
        assert!(Config::from_json_str(r#"{ "servers": ["nope"] }"#).is_err());
    }
}
