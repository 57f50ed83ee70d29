//! Typed facades over the node and wallet services.
//!
//! [`NodeClient`] and [`WalletClient`] only marshal arguments: each method is
//! a single HTTP request or a single correlated socket call. Connection state,
//! membership and pending calls all live in the shared [`ClientCore`].

mod node;
mod types;
mod wallet;

pub use node::NodeClient;
pub use types::{Balance, FeeEstimate};
pub use wallet::WalletClient;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bitcoin::BlockHash;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::ClientConfig;
use crate::correlator::Correlator;
use crate::dispatcher::{Event, Listener, ListenerError};
use crate::error::ClientError;
use crate::http::HttpExecutor;
use crate::socket::{ConnectionState, Connector, SocketChannel};

// ==============================================================================
// Block Identifier
// ==============================================================================

/// A block addressed either by height or by hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockId {
    Height(u32),
    Hash(BlockHash),
}

impl BlockId {
    /// Socket calls take heights as numbers and hashes as hex strings.
    pub fn to_param(&self) -> Value {
        match self {
            Self::Height(height) => Value::from(*height),
            Self::Hash(hash) => Value::String(hash.to_string()),
        }
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Height(height) => write!(f, "{height}"),
            Self::Hash(hash) => write!(f, "{hash}"),
        }
    }
}

impl From<u32> for BlockId {
    fn from(height: u32) -> Self {
        Self::Height(height)
    }
}

impl From<BlockHash> for BlockId {
    fn from(hash: BlockHash) -> Self {
        Self::Hash(hash)
    }
}

impl FromStr for BlockId {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.is_empty() && s.len() < 64 && s.bytes().all(|b| b.is_ascii_digit()) {
            return s
                .parse::<u32>()
                .map(Self::Height)
                .map_err(|e| ClientError::InvalidRequest(format!("invalid block height `{s}`: {e}")));
        }
        s.parse::<BlockHash>()
            .map(Self::Hash)
            .map_err(|e| ClientError::InvalidRequest(format!("invalid block id `{s}`: {e}")))
    }
}

// ==============================================================================
// Shared Transports
// ==============================================================================

/// Everything one facade instance talks through.
pub struct ClientCore {
    config: Arc<ClientConfig>,
    http: HttpExecutor,
    channel: Arc<SocketChannel>,
    correlator: Correlator,
}

impl ClientCore {
    pub fn new(config: ClientConfig, connector: Arc<dyn Connector>) -> Result<Self, ClientError> {
        config.validate()?;
        let config = Arc::new(config);
        let http = HttpExecutor::new(&config)?;
        let channel = Arc::new(SocketChannel::new(Arc::clone(&config), connector)?);
        let correlator = Correlator::new(Arc::clone(&channel));
        Ok(Self {
            config,
            http,
            channel,
            correlator,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn http(&self) -> &HttpExecutor {
        &self.http
    }

    pub fn channel(&self) -> &Arc<SocketChannel> {
        &self.channel
    }

    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    pub fn state(&self) -> ConnectionState {
        self.channel.state()
    }

    pub async fn wait_ready(&self, timeout: Duration) -> Result<(), ClientError> {
        self.channel.wait_ready(timeout).await
    }

    pub fn on<F>(&self, event: &str, callback: F) -> Listener
    where
        F: Fn(&Event) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.channel.events().on(event, callback)
    }

    pub fn off(&self, event: &str, listener: &Listener) -> bool {
        self.channel.events().off(event, listener)
    }

    pub fn subscribe(&self, event: &str) -> mpsc::UnboundedReceiver<Event> {
        self.channel.events().subscribe(event)
    }

    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, ClientError> {
        self.correlator.call(method, params, None).await
    }
}
