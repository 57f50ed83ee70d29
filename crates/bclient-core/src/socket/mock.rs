//! In-memory connector for driving the socket channel from tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::transport::{Connector, Transport};
use crate::error::ClientError;

/// Hands each successful connect to the paired [`MockServer`] as a
/// [`MockPeer`].
pub(crate) struct MockConnector {
    peers: mpsc::UnboundedSender<MockPeer>,
    refusals: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
}

pub(crate) struct MockServer {
    peers: mpsc::UnboundedReceiver<MockPeer>,
    refusals: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
}

pub(crate) fn mock_pair() -> (Arc<MockConnector>, MockServer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let refusals = Arc::new(AtomicUsize::new(0));
    let attempts = Arc::new(AtomicUsize::new(0));
    let connector = MockConnector {
        peers: tx,
        refusals: Arc::clone(&refusals),
        attempts: Arc::clone(&attempts),
    };
    let server = MockServer {
        peers: rx,
        refusals,
        attempts,
    };
    (Arc::new(connector), server)
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _url: &Url) -> Result<Box<dyn Transport>, ClientError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ClientError::Transport("connection refused".to_owned()));
        }

        let (to_peer, sent) = mpsc::unbounded_channel();
        let (push, incoming) = mpsc::unbounded_channel();
        self.peers
            .send(MockPeer { sent, push })
            .map_err(|_| ClientError::Transport("mock server gone".to_owned()))?;
        Ok(Box::new(MockTransport {
            incoming,
            outgoing: to_peer,
        }))
    }
}

impl MockServer {
    pub(crate) async fn accept(&mut self) -> MockPeer {
        self.peers.recv().await.expect("connector must stay alive")
    }

    /// Fail the next `n` connect attempts.
    pub(crate) fn refuse_next(&self, n: usize) {
        self.refusals.store(n, Ordering::SeqCst);
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

/// Server end of one mock connection. Dropping it looks like the server
/// closing the socket.
pub(crate) struct MockPeer {
    sent: mpsc::UnboundedReceiver<String>,
    push: mpsc::UnboundedSender<String>,
}

impl MockPeer {
    pub(crate) async fn next_frame(&mut self) -> Value {
        let text = self.sent.recv().await.expect("client must send a frame");
        serde_json::from_str(&text).expect("client frames must be JSON")
    }

    pub(crate) fn try_next_frame(&mut self) -> Option<Value> {
        let text = self.sent.try_recv().ok()?;
        Some(serde_json::from_str(&text).expect("client frames must be JSON"))
    }

    pub(crate) fn push(&self, frame: Value) {
        let _ = self.push.send(frame.to_string());
    }

    /// Read the auth call and answer it successfully.
    pub(crate) async fn accept_auth(&mut self) -> Value {
        let auth = self.next_frame().await;
        assert_eq!(auth["method"], "auth", "first frame must be the handshake");
        self.push(json!({ "id": auth["id"], "result": true }));
        auth
    }

    pub(crate) async fn reject_auth(&mut self, message: &str) {
        let auth = self.next_frame().await;
        assert_eq!(auth["method"], "auth", "first frame must be the handshake");
        self.push(json!({ "id": auth["id"], "error": { "message": message } }));
    }
}

struct MockTransport {
    incoming: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, text: String) -> Result<(), ClientError> {
        self.outgoing
            .send(text)
            .map_err(|_| ClientError::Transport("mock peer closed".to_owned()))
    }

    async fn recv(&mut self) -> Option<Result<String, ClientError>> {
        self.incoming.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        self.incoming.close();
        Ok(())
    }
}
