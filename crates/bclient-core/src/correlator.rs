//! Request/response correlation over the socket channel.
//!
//! Every call gets a fresh id and an entry in [`PendingCalls`]. Whoever
//! removes that entry (the response router, the timeout, a cancel, a
//! disconnect, a queue overflow) is the only one allowed to resolve it, so
//! each call settles exactly once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::ClientError;
use crate::lock;
use crate::socket::{CallRequest, SocketChannel};

type Responder = oneshot::Sender<Result<Value, ClientError>>;

// ==============================================================================
// Pending Call Table
// ==============================================================================

struct PendingCall {
    method: String,
    created_at: Instant,
    timeout: Duration,
    responder: Responder,
}

/// Outstanding correlated calls, keyed by id.
pub struct PendingCalls {
    next_id: AtomicU64,
    calls: Mutex<HashMap<u64, PendingCall>>,
}

impl PendingCalls {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Ids are drawn from a monotonic counter and never reused.
    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn register(
        &self,
        id: u64,
        method: &str,
        timeout: Duration,
    ) -> oneshot::Receiver<Result<Value, ClientError>> {
        let (responder, rx) = oneshot::channel();
        lock(&self.calls).insert(
            id,
            PendingCall {
                method: method.to_owned(),
                created_at: Instant::now(),
                timeout,
                responder,
            },
        );
        rx
    }

    /// Settle call `id` with `result`. Returns `false` if the call is no
    /// longer pending.
    pub(crate) fn resolve(&self, id: u64, result: Result<Value, ClientError>) -> bool {
        let Some(call) = self.take(id) else {
            return false;
        };
        trace!(
            rpc.id = id,
            rpc.method = %call.method,
            elapsed = ?call.created_at.elapsed(),
            timeout = ?call.timeout,
            ok = result.is_ok(),
            "settle call"
        );
        // The caller may have stopped waiting; nothing left to do then.
        let _ = call.responder.send(result);
        true
    }

    /// Reject every pending call whose id satisfies `filter`.
    pub(crate) fn reject_where(
        &self,
        filter: impl Fn(u64) -> bool,
        make_error: impl Fn() -> ClientError,
    ) -> usize {
        let drained: Vec<(u64, PendingCall)> = {
            let mut calls = lock(&self.calls);
            let ids: Vec<u64> = calls.keys().copied().filter(|id| filter(*id)).collect();
            ids.into_iter()
                .filter_map(|id| calls.remove(&id).map(|call| (id, call)))
                .collect()
        };

        let count = drained.len();
        for (id, call) in drained {
            debug!(rpc.id = id, rpc.method = %call.method, "reject pending call");
            let _ = call.responder.send(Err(make_error()));
        }
        count
    }

    pub(crate) fn reject_all(&self, make_error: impl Fn() -> ClientError) -> usize {
        self.reject_where(|_| true, make_error)
    }

    pub(crate) fn contains(&self, id: u64) -> bool {
        lock(&self.calls).contains_key(&id)
    }

    pub fn len(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take(&self, id: u64) -> Option<PendingCall> {
        lock(&self.calls).remove(&id)
    }
}

// ==============================================================================
// Correlator
// ==============================================================================

/// Turns socket messages into request/response calls.
#[derive(Clone)]
pub struct Correlator {
    channel: Arc<SocketChannel>,
    pending: Arc<PendingCalls>,
    default_timeout: Duration,
}

impl Correlator {
    pub fn new(channel: Arc<SocketChannel>) -> Self {
        let pending = channel.pending();
        let default_timeout = channel.config().timeout();
        Self {
            channel,
            pending,
            default_timeout,
        }
    }

    /// Issue a call without waiting for it. The returned handle's id can be
    /// passed to [`Correlator::cancel`].
    pub fn start(&self, method: &str, params: Vec<Value>, timeout: Option<Duration>) -> CallHandle {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let deadline = Instant::now() + timeout;
        let id = self.pending.next_id();
        let rx = self.pending.register(id, method, timeout);
        debug!(rpc.id = id, rpc.method = method, rpc.params = params.len(), "socket call");

        let request = CallRequest {
            id,
            method: method.to_owned(),
            params,
        };
        if let Err(err) = self.channel.submit(request) {
            self.pending.resolve(id, Err(err));
        }

        CallHandle {
            id,
            method: method.to_owned(),
            timeout,
            deadline,
            rx,
            pending: Arc::clone(&self.pending),
        }
    }

    pub async fn call(
        &self,
        method: &str,
        params: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, ClientError> {
        self.start(method, params, timeout).wait().await
    }

    /// Like [`Correlator::call`], deserializing the result into `T`.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<T, ClientError> {
        let value = self.call(method, params, timeout).await?;
        serde_json::from_value(value)
            .map_err(|e| ClientError::InvalidResponse(format!("decode `{method}` result: {e}")))
    }

    /// Resolve call `id` as [`ClientError::Cancelled`]. The server is not told.
    pub fn cancel(&self, id: u64) -> bool {
        let cancelled = self.pending.resolve(id, Err(ClientError::Cancelled));
        if cancelled {
            debug!(rpc.id = id, "call cancelled");
        }
        cancelled
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// An issued call. Dropping it without waiting forgets the call.
///
/// The timeout runs from [`Correlator::start`], not from [`CallHandle::wait`].
pub struct CallHandle {
    id: u64,
    method: String,
    timeout: Duration,
    deadline: Instant,
    rx: oneshot::Receiver<Result<Value, ClientError>>,
    pending: Arc<PendingCalls>,
}

impl CallHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn wait(mut self) -> Result<Value, ClientError> {
        match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::ConnectionLost),
            Err(_) => {
                if self.pending.take(self.id).is_some() {
                    debug!(rpc.id = self.id, rpc.method = %self.method, "call timed out");
                    return Err(ClientError::Timeout {
                        method: self.method.clone(),
                        timeout: self.timeout,
                    });
                }
                // Settled by someone else right at the deadline; the
                // result is already on its way.
                (&mut self.rx).await.unwrap_or(Err(ClientError::ConnectionLost))
            }
        }
    }
}

impl Drop for CallHandle {
    fn drop(&mut self) {
        self.pending.take(self.id);
    }
}
