use std::sync::Arc;
use std::time::Duration;

use bitcoin::Txid;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::correlator::Correlator;
use crate::dispatcher::{Event, Listener, ListenerError};
use crate::error::ClientError;
use crate::http::{HttpExecutor, ResourcePath};
use crate::socket::{ConnectionState, Connector, WsConnector};

use super::{Balance, ClientCore};

/// Client for one wallet on the wallet service.
///
/// `open()` joins the wallet's private room so its events (`tx`, `balance`,
/// `confirmed`, ...) reach this client; the socket channel re-joins it after
/// every reconnect.
pub struct WalletClient {
    core: ClientCore,
    id: String,
    room: String,
}

impl WalletClient {
    pub fn new(config: ClientConfig, id: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_connector(config, id, Arc::new(WsConnector))
    }

    pub fn with_connector(
        config: ClientConfig,
        id: impl Into<String>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ClientError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ClientError::InvalidConfig("wallet id must not be empty".to_owned()));
        }
        Ok(Self {
            core: ClientCore::new(config, connector)?,
            room: format!("wallet.{id}"),
            id,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name of the socket room carrying this wallet's events.
    pub fn room(&self) -> &str {
        &self.room
    }

    // ==========================================================================
    // Lifecycle & events
    // ==========================================================================

    pub fn open(&self) -> Result<(), ClientError> {
        let channel = self.core.channel();
        channel.join(&self.room, self.core.config().token())?;
        channel.open()?;
        info!(wallet = %self.id, room = %self.room, "wallet client opened");
        Ok(())
    }

    pub async fn close(&self) {
        let channel = self.core.channel();
        if let Err(err) = channel.leave(&self.room) {
            debug!(wallet = %self.id, error = %err, "leave skipped; channel already closed");
        }
        channel.close().await;
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
        let path = ResourcePath::new("/wallet/{}", &[self.id.as_str()])?;
        self.core.http().get(&path, Some(&self.params(None))).await
    }

    pub async fn get_balance(&self, account: Option<&str>) -> Result<Option<Balance>, ClientError> {
        let path = ResourcePath::new("/wallet/{}/balance", &[self.id.as_str()])?;
        let params = self.params(account_param(account));
        self.core.http().get(&path, Some(&params)).await
    }

    pub async fn get_coins(&self, account: Option<&str>) -> Result<Option<Vec<Value>>, ClientError> {
        let path = ResourcePath::new("/wallet/{}/coin", &[self.id.as_str()])?;
        let params = self.params(account_param(account));
        self.core.http().get(&path, Some(&params)).await
    }

    pub async fn get_tx(&self, txid: &Txid) -> Result<Option<Value>, ClientError> {
        let txid = txid.to_string();
        let path = ResourcePath::new("/wallet/{}/tx/{}", &[self.id.as_str(), txid.as_str()])?;
        self.core.http().get(&path, Some(&self.params(None))).await
    }

    pub async fn get_history(&self, account: Option<&str>) -> Result<Option<Vec<Value>>, ClientError> {
        let path = ResourcePath::new("/wallet/{}/tx/history", &[self.id.as_str()])?;
        let params = self.params(account_param(account));
        self.core.http().get(&path, Some(&params)).await
    }

    pub async fn create_address(&self, account: &str) -> Result<Option<Value>, ClientError> {
        let path = ResourcePath::new("/wallet/{}/address", &[self.id.as_str()])?;
        let params = self.params(account_param(Some(account)));
        self.core.http().post(&path, Some(&params)).await
    }

    /// Create, sign and broadcast a transaction. `options` is the JSON object
    /// the service expects (`outputs`, `rate`, ...).
    pub async fn send(&self, options: Value) -> Result<Option<Value>, ClientError> {
        let Value::Object(options) = options else {
            return Err(ClientError::InvalidRequest(
                "send options must be a JSON object".to_owned(),
            ));
        };
        let path = ResourcePath::new("/wallet/{}/send", &[self.id.as_str()])?;
        let params = self.params(Some(options));
        self.core.http().post(&path, Some(&params)).await
    }

    /// Request params with the wallet token attached.
    fn params(&self, extra: Option<Map<String, Value>>) -> Value {
        let mut params = extra.unwrap_or_default();
        if let Some(token) = self.core.config().token() {
            params.insert("token".to_owned(), Value::String(token.to_owned()));
        }
        Value::Object(params)
    }
}

fn account_param(account: Option<&str>) -> Option<Map<String, Value>> {
    account.map(|account| {
        let mut map = Map::new();
        map.insert("account".to_owned(), Value::String(account.to_owned()));
        map
    })
}
