//! # Client Configuration
//!
//! Purpose: Describe where and how a `Connection` connects, with defaults
//! suitable for a local server and a connection-string parser for the rest.
//!
//! ## Connection Strings
//!
//! ```text
//! [redis://|rediss://][[user:]password@]host[:port][/db][?key=value&...]
//!
//! keys: db, ssl, client, username, password,
//!       connect_timeout, send_timeout, receive_timeout, retry_timeout  (ms)
//!       idle_timeout                                                   (s)
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ClientError, ClientResult};
use crate::retry::RetryPolicy;
use crate::send_buffer::DEFAULT_CHUNK_SIZE;

/// Default server port.
pub const DEFAULT_PORT: u16 = 6379;

/// Default idle budget before a connection is probed for liveness.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(240);

/// TLS settings for an encrypted connection.
#[derive(Clone)]
pub struct TlsConfig {
    /// Prepared rustls client configuration (roots, ALPN, client auth).
    pub client_config: Arc<rustls::ClientConfig>,
    /// Name to verify instead of the configured host.
    pub server_name: Option<String>,
}

impl TlsConfig {
    /// Wraps a rustls configuration, verifying against the configured host.
    pub fn new(client_config: Arc<rustls::ClientConfig>) -> Self {
        TlsConfig {
            client_config,
            server_name: None,
        }
    }

    /// Overrides the name used for certificate verification.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}

impl fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfig")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

/// Configuration for one connection.
#[derive(Clone)]
pub struct ClientConfig {
    /// Server host name or IP address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Database (namespace) index selected after connecting.
    pub db: u32,
    /// ACL user name, sent with the password when present.
    pub username: Option<String>,
    /// Password sent with AUTH.
    pub password: Option<String>,
    /// Name registered with CLIENT SETNAME.
    pub client_name: Option<String>,
    /// Whether the connection must be encrypted.
    pub ssl: bool,
    /// TLS settings; required when `ssl` is set.
    pub tls: Option<TlsConfig>,
    /// TCP connect timeout per resolved address.
    pub connect_timeout: Option<Duration>,
    /// Socket write timeout.
    pub send_timeout: Option<Duration>,
    /// Socket read timeout.
    pub receive_timeout: Option<Duration>,
    /// Idle time after which the socket is probed before reuse.
    pub idle_timeout: Option<Duration>,
    /// Retry budget and backoff schedule.
    pub retry: RetryPolicy,
    /// Size of each pooled send-buffer chunk.
    pub chunk_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            db: 0,
            username: None,
            password: None,
            client_name: None,
            ssl: false,
            tls: None,
            connect_timeout: Some(Duration::from_secs(5)),
            send_timeout: Some(Duration::from_secs(10)),
            receive_timeout: Some(Duration::from_secs(10)),
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            retry: RetryPolicy::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Credentials never reach logs.
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db", &self.db)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("client_name", &self.client_name)
            .field("ssl", &self.ssl)
            .field("tls", &self.tls)
            .field("connect_timeout", &self.connect_timeout)
            .field("send_timeout", &self.send_timeout)
            .field("receive_timeout", &self.receive_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("retry", &self.retry)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

impl ClientConfig {
    /// Creates a configuration for `host:port` with default settings.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ClientConfig {
            host: host.into(),
            port,
            ..ClientConfig::default()
        }
    }

    /// `host:port` string used for resolution and logging.
    pub fn addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn with_db(mut self, db: u32) -> Self {
        self.db = db;
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    /// Enables TLS with the given settings.
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.ssl = true;
        self.tls = Some(tls);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_retry_budget(mut self, budget: Duration) -> Self {
        self.retry.budget = budget;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.retry.base_backoff = base;
        self.retry.max_backoff = max;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Checks cross-field consistency.
    pub fn validate(&self) -> ClientResult<()> {
        if self.host.is_empty() {
            return Err(ClientError::Config("host must not be empty".to_string()));
        }
        if self.chunk_size == 0 {
            return Err(ClientError::Config("chunk_size must be positive".to_string()));
        }
        if self.username.is_some() && self.password.is_none() {
            return Err(ClientError::Config(
                "username requires a password".to_string(),
            ));
        }
        if self.ssl && self.tls.is_none() {
            return Err(ClientError::Config(
                "ssl requested but no TLS client configuration supplied".to_string(),
            ));
        }
        Ok(())
    }
}

impl FromStr for ClientConfig {
    type Err = ClientError;

    fn from_str(input: &str) -> ClientResult<Self> {
        let mut config = ClientConfig::default();

        let mut rest = input.trim();
        if let Some(stripped) = rest.strip_prefix("redis://") {
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix("rediss://") {
            config.ssl = true;
            rest = stripped;
        }

        let (location, query) = match rest.split_once('?') {
            Some((location, query)) => (location, Some(query)),
            None => (rest, None),
        };

        // Passwords may contain '@'; the host never does.
        let hostpart = match location.rsplit_once('@') {
            Some((credentials, hostpart)) => {
                match credentials.split_once(':') {
                    Some((user, password)) => {
                        if !user.is_empty() {
                            config.username = Some(user.to_string());
                        }
                        config.password = Some(password.to_string());
                    }
                    None => config.password = Some(credentials.to_string()),
                }
                hostpart
            }
            None => location,
        };

        let (hostport, db) = match hostpart.split_once('/') {
            Some((hostport, db)) => (hostport, Some(db)),
            None => (hostpart, None),
        };
        let (host, port) = split_host_port(hostport)?;
        config.host = host;
        if let Some(port) = port {
            config.port = port;
        }
        if let Some(db) = db.filter(|db| !db.is_empty()) {
            config.db = parse_number(db, "db")?;
        }

        if let Some(query) = query {
            for pair in query.split('&').filter(|pair| !pair.is_empty()) {
                let (key, value) = pair
                    .split_once('=')
                    .ok_or_else(|| ClientError::Config(format!("missing value for {:?}", pair)))?;
                apply_option(&mut config, key, value)?;
            }
        }

        if config.host.is_empty() {
            return Err(ClientError::Config("host must not be empty".to_string()));
        }
        Ok(config)
    }
}

fn split_host_port(input: &str) -> ClientResult<(String, Option<u16>)> {
    if let Some(stripped) = input.strip_prefix('[') {
        let (host, tail) = stripped
            .split_once(']')
            .ok_or_else(|| ClientError::Config(format!("unterminated IPv6 host {:?}", input)))?;
        let port = match tail.strip_prefix(':') {
            Some(port) => Some(parse_number(port, "port")?),
            None if tail.is_empty() => None,
            None => return Err(ClientError::Config(format!("invalid host {:?}", input))),
        };
        return Ok((host.to_string(), port));
    }

    match input.rsplit_once(':') {
        Some((host, port)) => Ok((host.to_string(), Some(parse_number(port, "port")?))),
        None => Ok((input.to_string(), None)),
    }
}

fn apply_option(config: &mut ClientConfig, key: &str, value: &str) -> ClientResult<()> {
    match key.to_ascii_lowercase().as_str() {
        "db" => config.db = parse_number(value, key)?,
        "ssl" => config.ssl = parse_bool(value, key)?,
        "client" => config.client_name = Some(value.to_string()),
        "username" => config.username = Some(value.to_string()),
        "password" => config.password = Some(value.to_string()),
        "connect_timeout" => config.connect_timeout = Some(parse_millis(value, key)?),
        "send_timeout" => config.send_timeout = Some(parse_millis(value, key)?),
        "receive_timeout" => config.receive_timeout = Some(parse_millis(value, key)?),
        "retry_timeout" => config.retry.budget = parse_millis(value, key)?,
        "idle_timeout" => {
            let secs: u64 = parse_number(value, key)?;
            config.idle_timeout = if secs == 0 {
                None
            } else {
                Some(Duration::from_secs(secs))
            };
        }
        other => {
            return Err(ClientError::Config(format!(
                "unknown connection option {:?}",
                other
            )))
        }
    }
    Ok(())
}

fn parse_number<T: FromStr>(value: &str, field: &str) -> ClientResult<T> {
    value
        .parse()
        .map_err(|_| ClientError::Config(format!("invalid {}: {:?}", field, value)))
}

fn parse_millis(value: &str, field: &str) -> ClientResult<Duration> {
    parse_number::<u64>(value, field).map(Duration::from_millis)
}

fn parse_bool(value: &str, field: &str) -> ClientResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ClientError::Config(format!("invalid {}: {:?}", field, value))),
    }
}
