//! Connection parameters shared read-only by every component of a client.
//!
//! A [`ClientConfig`] is assembled with the `with_*` methods, checked with
//! [`ClientConfig::validate`], and then moved into a client where it is held
//! behind an `Arc` and never mutated again.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use reqwest::Url;

use crate::error::ClientError;

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_QUEUE_CAPACITY: usize = 256;

// ==============================================================================
// Network
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Network {
    #[default]
    Main,
    Testnet,
    Regtest,
    Simnet,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Testnet => "testnet",
            Self::Regtest => "regtest",
            Self::Simnet => "simnet",
        }
    }

    /// Default HTTP/socket port of the full node on this network.
    pub fn node_port(self) -> u16 {
        match self {
            Self::Main => 8332,
            Self::Testnet => 18332,
            Self::Regtest => 48332,
            Self::Simnet => 18556,
        }
    }

    /// Default HTTP/socket port of the wallet service on this network.
    pub fn wallet_port(self) -> u16 {
        match self {
            Self::Main => 8334,
            Self::Testnet => 18334,
            Self::Regtest => 48334,
            Self::Simnet => 18558,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "main" | "mainnet" => Ok(Self::Main),
            "testnet" | "test" => Ok(Self::Testnet),
            "regtest" => Ok(Self::Regtest),
            "simnet" => Ok(Self::Simnet),
            other => Err(ClientError::InvalidConfig(format!(
                "unknown network `{other}`; expected main, testnet, regtest or simnet"
            ))),
        }
    }
}

/// Which remote service a config points at. Only affects the default port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Node,
    Wallet,
}

impl Service {
    fn default_port(self, network: Network) -> u16 {
        match self {
            Self::Node => network.node_port(),
            Self::Wallet => network.wallet_port(),
        }
    }
}

// ==============================================================================
// Reconnect Policy
// ==============================================================================

/// Exponential backoff parameters for the socket channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt.
    pub initial: Duration,
    /// Upper bound for any single delay.
    pub max: Duration,
    /// Growth factor applied per consecutive failed attempt.
    pub multiplier: f64,
    /// Extra random delay, as a fraction of the base delay (`0.0..=1.0`).
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

// ==============================================================================
// Client Config
// ==============================================================================

#[derive(Clone)]
pub struct ClientConfig {
    network: Network,
    host: String,
    port: u16,
    ssl: bool,
    path: String,
    api_key: Option<String>,
    token: Option<String>,
    timeout: Duration,
    reconnect: ReconnectConfig,
    queue_capacity: usize,
    requests_per_second: Option<u32>,
}

impl ClientConfig {
    pub fn new(network: Network, service: Service) -> Self {
        Self {
            network,
            host: DEFAULT_HOST.to_owned(),
            port: service.default_port(network),
            ssl: false,
            path: "/".to_owned(),
            api_key: None,
            token: None,
            timeout: DEFAULT_TIMEOUT,
            reconnect: ReconnectConfig::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            requests_per_second: None,
        }
    }

    /// Defaults for talking to the full node.
    pub fn node(network: Network) -> Self {
        Self::new(network, Service::Node)
    }

    /// Defaults for talking to the wallet service.
    pub fn wallet(network: Network) -> Self {
        Self::new(network, Service::Wallet)
    }

    /// Build a config from an `http://` or `https://` URL.
    ///
    /// A password in the URL's user-info section is taken as the API key.
    /// A missing port falls back to the service default for `network`.
    pub fn from_url(url: &str, network: Network, service: Service) -> Result<Self, ClientError> {
        let parsed = Url::parse(url).map_err(|e| {
            ClientError::InvalidConfig(format!("invalid url `{url}`: expected HTTP(S) URL ({e})"))
        })?;
        let ssl = match parsed.scheme() {
            "http" => false,
            "https" => true,
            other => {
                return Err(ClientError::InvalidConfig(format!(
                    "unsupported url scheme `{other}`; expected http or https"
                )))
            }
        };
        let host = parsed
            .host_str()
            .ok_or_else(|| ClientError::InvalidConfig(format!("url `{url}` has no host")))?;

        let mut config = Self::new(network, service)
            .with_host(host)
            .with_ssl(ssl)
            .with_path(parsed.path());
        if let Some(port) = parsed.port() {
            config = config.with_port(port);
        }
        if let Some(key) = parsed.password().filter(|p| !p.is_empty()) {
            config = config.with_api_key(key);
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_ssl(mut self, ssl: bool) -> Self {
        self.ssl = ssl;
        self
    }

    /// Set the path prefix. A leading `/` is added and a trailing one removed.
    #[must_use]
    pub fn with_path(mut self, path: impl AsRef<str>) -> Self {
        let trimmed = path.as_ref().trim_matches('/');
        self.path = format!("/{trimmed}");
        self
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_requests_per_second(mut self, limit: u32) -> Self {
        self.requests_per_second = Some(limit);
        self
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn ssl(&self) -> bool {
        self.ssl
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Default deadline for correlated calls and the socket handshake.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn reconnect(&self) -> &ReconnectConfig {
        &self.reconnect
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn requests_per_second(&self) -> Option<u32> {
        self.requests_per_second
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.host.is_empty() {
            return Err(ClientError::InvalidConfig("host must not be empty".to_owned()));
        }
        if self.port == 0 {
            return Err(ClientError::InvalidConfig("port must be non-zero".to_owned()));
        }
        if self.timeout.is_zero() {
            return Err(ClientError::InvalidConfig("timeout must be non-zero".to_owned()));
        }
        if self.queue_capacity == 0 {
            return Err(ClientError::InvalidConfig(
                "queue capacity must be at least 1".to_owned(),
            ));
        }
        if self.requests_per_second == Some(0) {
            return Err(ClientError::InvalidConfig(
                "requests_per_second must be at least 1".to_owned(),
            ));
        }
        let reconnect = &self.reconnect;
        if reconnect.initial.is_zero() || reconnect.initial > reconnect.max {
            return Err(ClientError::InvalidConfig(
                "reconnect delays must satisfy 0 < initial <= max".to_owned(),
            ));
        }
        if reconnect.multiplier.is_nan() || reconnect.multiplier < 1.0 {
            return Err(ClientError::InvalidConfig(
                "reconnect multiplier must be at least 1.0".to_owned(),
            ));
        }
        if !(0.0..=1.0).contains(&reconnect.jitter) {
            return Err(ClientError::InvalidConfig(
                "reconnect jitter must be within 0.0..=1.0".to_owned(),
            ));
        }
        self.http_base()?;
        Ok(())
    }

    /// Base URL for HTTP requests, including the path prefix.
    pub fn http_base(&self) -> Result<Url, ClientError> {
        let scheme = if self.ssl { "https" } else { "http" };
        self.base_url(scheme)
    }

    /// URL of the socket endpoint (`ws://` or `wss://`).
    pub fn socket_url(&self) -> Result<Url, ClientError> {
        let scheme = if self.ssl { "wss" } else { "ws" };
        self.base_url(scheme)
    }

    fn base_url(&self, scheme: &str) -> Result<Url, ClientError> {
        let raw = format!("{scheme}://{}:{}{}", self.host, self.port, self.path);
        Url::parse(&raw)
            .map_err(|e| ClientError::InvalidConfig(format!("cannot build url `{raw}`: {e}")))
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("network", &self.network)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("ssl", &self.ssl)
            .field("path", &self.path)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .field("reconnect", &self.reconnect)
            .field("queue_capacity", &self.queue_capacity)
            .field("requests_per_second", &self.requests_per_second)
            .finish()
    }
}
