use std::sync::Arc;
use std::time::Duration;

use bitcoin::Txid;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::ClientConfig;
use crate::correlator::Correlator;
use crate::dispatcher::{Event, Listener, ListenerError};
use crate::error::ClientError;
use crate::http::{HttpExecutor, ResourcePath};
use crate::socket::{error_message, ConnectionState, Connector, WsConnector};

use super::{BlockId, ClientCore, FeeEstimate};

/// Client for the full node's HTTP and socket interfaces.
pub struct NodeClient {
    core: ClientCore,
}

impl NodeClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        Self::with_connector(config, Arc::new(WsConnector))
    }

    pub fn with_connector(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            core: ClientCore::new(config, connector)?,
        })
    }

    // ==========================================================================
    // Lifecycle & events
    // ==========================================================================

    /// Start the socket channel. HTTP methods work without it.
    pub fn open(&self) -> Result<(), ClientError> {
        self.core.channel().open()
    }

    pub async fn close(&self) {
        self.core.channel().close().await;
    }

    pub fn config(&self) -> &ClientConfig {
        self.core.config()
    }

    pub fn state(&self) -> ConnectionState {
        self.core.state()
    }

    pub async fn wait_ready(&self, timeout: Duration) -> Result<(), ClientError> {
        self.core.wait_ready(timeout).await
    }

    pub fn on<F>(&self, event: &str, callback: F) -> Listener
    where
        F: Fn(&Event) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.core.on(event, callback)
    }

    pub fn off(&self, event: &str, listener: &Listener) -> bool {
        self.core.off(event, listener)
    }

    pub fn subscribe(&self, event: &str) -> mpsc::UnboundedReceiver<Event> {
        self.core.subscribe(event)
    }

    /// Ad hoc correlated call over the socket.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, ClientError> {
        self.core.call(method, params).await
    }

    pub fn correlator(&self) -> &Correlator {
        self.core.correlator()
    }

    pub fn http(&self) -> &HttpExecutor {
        self.core.http()
    }

    // ==========================================================================
    // HTTP
    // ==========================================================================

    pub async fn get_info(&self) -> Result<Option<Value>, ClientError> {
        self.core.http().get(&ResourcePath::root(), None).await
    }

    /// Txids currently in the mempool.
    pub async fn get_mempool(&self) -> Result<Option<Vec<Txid>>, ClientError> {
        let path = ResourcePath::new("/mempool", &[])?;
        self.core.http().get(&path, None).await
    }

    pub async fn get_block(&self, block: BlockId) -> Result<Option<Value>, ClientError> {
        let id = block.to_string();
        let path = ResourcePath::new("/block/{}", &[id.as_str()])?;
        self.core.http().get(&path, None).await
    }

    pub async fn get_tx(&self, txid: &Txid) -> Result<Option<Value>, ClientError> {
        let txid = txid.to_string();
        let path = ResourcePath::new("/tx/{}", &[txid.as_str()])?;
        self.core.http().get(&path, None).await
    }

    pub async fn get_coin(&self, txid: &Txid, index: u32) -> Result<Option<Value>, ClientError> {
        let txid = txid.to_string();
        let index = index.to_string();
        let path = ResourcePath::new("/coin/{}/{}", &[txid.as_str(), index.as_str()])?;
        self.core.http().get(&path, None).await
    }

    pub async fn get_tx_by_address(&self, address: &str) -> Result<Option<Vec<Value>>, ClientError> {
        let path = ResourcePath::new("/tx/address/{}", &[address])?;
        self.core.http().get(&path, None).await
    }

    /// Submit a raw transaction (hex).
    pub async fn broadcast(&self, tx_hex: &str) -> Result<Option<Value>, ClientError> {
        let path = ResourcePath::new("/broadcast", &[])?;
        self.core
            .http()
            .post(&path, Some(&json!({ "tx": tx_hex })))
            .await
    }

    pub async fn estimate_fee(&self, blocks: u32) -> Result<Option<FeeEstimate>, ClientError> {
        let path = ResourcePath::new("/fee", &[])?;
        self.core
            .http()
            .get(&path, Some(&json!({ "blocks": blocks })))
            .await
    }

    /// Run a node RPC method through the HTTP JSON-RPC endpoint.
    pub async fn execute(&self, method: &str, params: Vec<Value>) -> Result<Value, ClientError> {
        debug!(rpc.method = method, rpc.params = params.len(), "node rpc");
        let body = json!({ "method": method, "params": params });
        let reply = match self
            .core
            .http()
            .post::<RpcReply>(&ResourcePath::root(), Some(&body))
            .await
        {
            Ok(Some(reply)) => reply,
            Ok(None) => {
                return Err(ClientError::RequestFailed {
                    status: 404,
                    body: format!("rpc method `{method}` has no endpoint"),
                })
            }
            // The RPC server reports method failures with a non-2xx status
            // and a JSON-RPC error body.
            Err(ClientError::RequestFailed { status, body }) => {
                match serde_json::from_str::<RpcReply>(&body) {
                    Ok(reply) if reply.error.as_ref().is_some_and(|e| !e.is_null()) => reply,
                    _ => return Err(ClientError::RequestFailed { status, body }),
                }
            }
            Err(err) => return Err(err),
        };
        rpc_outcome(reply)
    }

    // ==========================================================================
    // Socket
    // ==========================================================================

    pub async fn get_tip(&self) -> Result<Value, ClientError> {
        self.call("get tip", Vec::new()).await
    }

    pub async fn get_entry(&self, block: BlockId) -> Result<Value, ClientError> {
        self.call("get entry", vec![block.to_param()]).await
    }

    /// Start receiving `block connect` / `block disconnect` events.
    pub async fn watch_chain(&self) -> Result<(), ClientError> {
        self.call("watch chain", Vec::new()).await.map(drop)
    }

    pub async fn unwatch_chain(&self) -> Result<(), ClientError> {
        self.call("unwatch chain", Vec::new()).await.map(drop)
    }

    /// Start receiving `tx` events for mempool additions.
    pub async fn watch_mempool(&self) -> Result<(), ClientError> {
        self.call("watch mempool", Vec::new()).await.map(drop)
    }
}

#[derive(Debug, Deserialize)]
struct RpcReply {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<Value>,
}

fn rpc_outcome(reply: RpcReply) -> Result<Value, ClientError> {
    match reply.error {
        Some(err) if !err.is_null() => Err(ClientError::Remote {
            message: error_message(err),
        }),
        _ => Ok(reply.result),
    }
}
