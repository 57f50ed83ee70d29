use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::Url;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::correlator::PendingCalls;
use crate::dispatcher::{Event, ListenerRegistry};
use crate::error::ClientError;
use crate::lock;

use super::backoff::Backoff;
use super::protocol::{CallRequest, Inbound, MembershipRequest, Outbound};
use super::queue::OutboundQueue;
use super::state::ConnectionState;
use super::transport::{Connector, Transport};

/// Method name of the handshake call sent right after every connect.
pub const AUTH_METHOD: &str = "auth";

enum Command {
    Call(CallRequest),
    Join { room: String, token: Option<String> },
    Leave { room: String },
    Rooms(oneshot::Sender<Vec<String>>),
    Close(oneshot::Sender<()>),
}

// ==============================================================================
// SocketChannel: caller-facing handle
// ==============================================================================

/// One persistent, authenticated, self-healing socket connection.
///
/// All state lives in a background task started by [`SocketChannel::open`].
/// The handle only sends it commands and observes its [`ConnectionState`].
/// Room membership is owned by the task and replayed after every reconnect.
pub struct SocketChannel {
    config: Arc<ClientConfig>,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    pending: Arc<PendingCalls>,
    listeners: Arc<ListenerRegistry>,
    /// The task before `open()` moves it onto the runtime.
    idle: Mutex<Option<ChannelTask>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SocketChannel {
    pub fn new(config: Arc<ClientConfig>, connector: Arc<dyn Connector>) -> Result<Self, ClientError> {
        let url = config.socket_url()?;
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let pending = Arc::new(PendingCalls::new());
        let listeners = Arc::new(ListenerRegistry::new());

        let task = ChannelTask {
            url,
            config: Arc::clone(&config),
            connector,
            commands: command_rx,
            state: state_tx,
            rooms: BTreeMap::new(),
            queue: OutboundQueue::new(config.queue_capacity()),
            pending: Arc::clone(&pending),
            listeners: Arc::clone(&listeners),
            backoff: Backoff::new(config.reconnect().clone()),
        };

        Ok(Self {
            config,
            commands,
            state,
            pending,
            listeners,
            idle: Mutex::new(Some(task)),
            task: Mutex::new(None),
        })
    }

    /// Start connecting. Returns immediately; watch [`SocketChannel::state`]
    /// or use [`SocketChannel::wait_ready`] to know when the channel is up.
    /// Opening twice is a no-op; opening after `close()` is an error.
    ///
    /// The channel task runs on the current tokio runtime. Called outside
    /// one, `open()` fails with [`ClientError::InvalidConfig`] and the
    /// channel stays unopened.
    pub fn open(&self) -> Result<(), ClientError> {
        let mut idle = lock(&self.idle);
        let Some(task) = idle.take() else {
            return if self.state().is_terminal() {
                Err(ClientError::Closed)
            } else {
                Ok(())
            };
        };
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                *idle = Some(task);
                return Err(ClientError::InvalidConfig(format!(
                    "socket channel must be opened inside a tokio runtime: {err}"
                )));
            }
        };
        drop(idle);
        info!(url = %task.url, "opening socket channel");
        let handle = runtime.spawn(task.run());
        *lock(&self.task) = Some(handle);
        Ok(())
    }

    /// Close the channel for good. Pending calls fail with
    /// [`ClientError::ConnectionLost`].
    pub async fn close(&self) {
        let idle = lock(&self.idle).take();
        if let Some(mut task) = idle {
            task.finish_closed();
            return;
        }

        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Close(ack)).is_ok() {
            let _ = done.await;
        }
        let handle = lock(&self.task).take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                debug!("socket channel task ended with join error: {err}");
            }
        }
    }

    /// Add `room` to the membership set. Sent now if ready, otherwise on the
    /// next transition to ready.
    pub fn join(&self, room: &str, token: Option<&str>) -> Result<(), ClientError> {
        let room = room.to_owned();
        let token = token.map(str::to_owned);
        if let Some(task) = lock(&self.idle).as_mut() {
            task.rooms.insert(room, token);
            return Ok(());
        }
        self.send_command(Command::Join { room, token })
    }

    pub fn leave(&self, room: &str) -> Result<(), ClientError> {
        let room = room.to_owned();
        if let Some(task) = lock(&self.idle).as_mut() {
            task.rooms.remove(&room);
            return Ok(());
        }
        self.send_command(Command::Leave { room })
    }

    /// Rooms the channel currently considers joined.
    pub async fn rooms(&self) -> Vec<String> {
        let unopened = lock(&self.idle).as_ref().map(ChannelTask::room_names);
        if let Some(names) = unopened {
            return names;
        }
        let (reply, rx) = oneshot::channel();
        if self.send_command(Command::Rooms(reply)).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Wait until the channel is ready, failing if it closes or `timeout`
    /// passes first.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<(), ClientError> {
        let mut state = self.state.clone();
        let wait = async {
            loop {
                let current = *state.borrow_and_update();
                if current.is_ready() {
                    return Ok(());
                }
                if current.is_terminal() {
                    return Err(ClientError::Closed);
                }
                if state.changed().await.is_err() {
                    return Err(ClientError::Closed);
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .unwrap_or_else(|_| {
                Err(ClientError::Timeout {
                    method: "wait_ready".to_owned(),
                    timeout,
                })
            })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Listener registry fed by this channel.
    pub fn events(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }

    pub(crate) fn pending(&self) -> Arc<PendingCalls> {
        Arc::clone(&self.pending)
    }

    pub(crate) fn submit(&self, call: CallRequest) -> Result<(), ClientError> {
        self.send_command(Command::Call(call))
    }

    fn send_command(&self, command: Command) -> Result<(), ClientError> {
        self.commands.send(command).map_err(|_| ClientError::Closed)
    }
}

impl Drop for SocketChannel {
    fn drop(&mut self) {
        // No executor to drive a graceful close from here.
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }
}

// ==============================================================================
// ChannelTask: the state machine
// ==============================================================================

enum Flow {
    Continue,
    Close,
}

enum Attempt {
    Ready(Box<dyn Transport>),
    Failed,
    Closed,
}

enum HandshakeEnd {
    Failed(ClientError),
    Closed,
}

enum SessionEnd {
    /// The server closed the connection.
    Dropped,
    Failed(ClientError),
    Closed,
}

struct ChannelTask {
    url: Url,
    config: Arc<ClientConfig>,
    connector: Arc<dyn Connector>,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    /// Room name to the token it was joined with.
    rooms: BTreeMap<String, Option<String>>,
    queue: OutboundQueue,
    pending: Arc<PendingCalls>,
    listeners: Arc<ListenerRegistry>,
    backoff: Backoff,
}

impl ChannelTask {
    async fn run(mut self) {
        loop {
            match self.establish().await {
                Attempt::Closed => return,
                Attempt::Failed => {}
                Attempt::Ready(transport) => match self.session(transport).await {
                    SessionEnd::Closed => return,
                    SessionEnd::Dropped => {
                        warn!(url = %self.url, "socket closed by server");
                        self.emit("disconnect", Vec::new());
                    }
                    SessionEnd::Failed(err) => {
                        self.report_error(&format!("socket connection lost: {err}"));
                        self.emit("disconnect", Vec::new());
                    }
                },
            }

            if let Flow::Close = self.enter_reconnecting() {
                return;
            }
            if let Flow::Close = self.backoff_delay().await {
                return;
            }
        }
    }

    /// Connect and authenticate; commands keep being serviced meanwhile.
    async fn establish(&mut self) -> Attempt {
        self.set_state(ConnectionState::Connecting);
        let connector = Arc::clone(&self.connector);
        let url = self.url.clone();
        let connect = connector.connect(&url);
        tokio::pin!(connect);

        let mut transport = loop {
            tokio::select! {
                result = &mut connect => match result {
                    Ok(transport) => break transport,
                    Err(err) => {
                        self.report_error(&format!("connect to {url} failed: {err}"));
                        return Attempt::Failed;
                    }
                },
                cmd = self.commands.recv() => {
                    if let Flow::Close = self.handle_offline(cmd) {
                        return Attempt::Closed;
                    }
                }
            }
        };
        self.set_state(ConnectionState::Connected);

        match self.handshake(transport.as_mut()).await {
            Ok(()) => Attempt::Ready(transport),
            Err(HandshakeEnd::Closed) => {
                if let Err(err) = transport.close().await {
                    debug!(error = %err, "socket close handshake failed");
                }
                Attempt::Closed
            }
            Err(HandshakeEnd::Failed(err)) => {
                self.report_error(&format!("socket handshake failed: {err}"));
                if let Err(err) = transport.close().await {
                    debug!(error = %err, "socket close failed after handshake error");
                }
                Attempt::Failed
            }
        }
    }

    async fn handshake(&mut self, transport: &mut dyn Transport) -> Result<(), HandshakeEnd> {
        let id = self.pending.next_id();
        let params = self
            .config
            .api_key()
            .map(|key| vec![Value::String(key.to_owned())])
            .unwrap_or_default();
        let frame = Outbound::Call(CallRequest {
            id,
            method: AUTH_METHOD.to_owned(),
            params,
        });
        send_frame(transport, &frame)
            .await
            .map_err(HandshakeEnd::Failed)?;
        self.set_state(ConnectionState::Authenticating);

        let timeout = self.config.timeout();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    return Err(HandshakeEnd::Failed(ClientError::Timeout {
                        method: AUTH_METHOD.to_owned(),
                        timeout,
                    }));
                }
                inbound = transport.recv() => match inbound {
                    None => {
                        return Err(HandshakeEnd::Failed(ClientError::Transport(
                            "connection closed during handshake".to_owned(),
                        )));
                    }
                    Some(Err(err)) => return Err(HandshakeEnd::Failed(err)),
                    Some(Ok(text)) => match Inbound::parse(&text) {
                        Ok(Inbound::Response { id: reply, outcome }) if reply == id => {
                            return outcome
                                .map(|_| ())
                                .map_err(|message| HandshakeEnd::Failed(ClientError::AuthError(message)));
                        }
                        Ok(other) => self.route(other),
                        Err(err) => warn!(error = %err, "ignoring malformed socket frame"),
                    },
                },
                cmd = self.commands.recv() => {
                    if let Flow::Close = self.handle_offline(cmd) {
                        return Err(HandshakeEnd::Closed);
                    }
                }
            }
        }
    }

    async fn session(&mut self, mut transport: Box<dyn Transport>) -> SessionEnd {
        self.set_state(ConnectionState::Ready);
        self.backoff.reset();
        info!(url = %self.url, rooms = self.rooms.len(), queued = self.queue.len(), "socket channel ready");

        // Membership first, so room-scoped calls in the queue find their room.
        let joins: Vec<Outbound> = self
            .rooms
            .iter()
            .map(|(room, token)| {
                Outbound::Membership(MembershipRequest::Join {
                    room: room.clone(),
                    token: token.clone(),
                })
            })
            .collect();
        for frame in &joins {
            if let Err(err) = send_frame(transport.as_mut(), frame).await {
                return SessionEnd::Failed(err);
            }
        }

        let queued: Vec<CallRequest> = self.queue.drain().collect();
        for call in queued {
            if !self.pending.contains(call.id) {
                trace!(rpc.id = call.id, "skipping queued call that already settled");
                continue;
            }
            if let Err(err) = send_frame(transport.as_mut(), &Outbound::Call(call)).await {
                return SessionEnd::Failed(err);
            }
        }

        self.emit("connect", Vec::new());

        loop {
            tokio::select! {
                inbound = transport.recv() => match inbound {
                    Some(Ok(text)) => self.route_text(&text),
                    Some(Err(err)) => return SessionEnd::Failed(err),
                    None => return SessionEnd::Dropped,
                },
                cmd = self.commands.recv() => {
                    let Some(cmd) = cmd else {
                        if let Err(err) = transport.close().await {
                            debug!(error = %err, "socket close handshake failed");
                        }
                        self.finish_closed();
                        return SessionEnd::Closed;
                    };
                    let frame = match cmd {
                        Command::Call(call) => {
                            if !self.pending.contains(call.id) {
                                trace!(rpc.id = call.id, "skipping call that settled before send");
                                continue;
                            }
                            Outbound::Call(call)
                        }
                        Command::Join { room, token } => {
                            self.rooms.insert(room.clone(), token.clone());
                            Outbound::Membership(MembershipRequest::Join { room, token })
                        }
                        Command::Leave { room } => {
                            if self.rooms.remove(&room).is_none() {
                                continue;
                            }
                            Outbound::Membership(MembershipRequest::Leave { room })
                        }
                        Command::Rooms(reply) => {
                            let _ = reply.send(self.room_names());
                            continue;
                        }
                        Command::Close(ack) => {
                            if let Err(err) = transport.close().await {
                                debug!(error = %err, "socket close handshake failed");
                            }
                            self.finish_closed();
                            self.emit("disconnect", Vec::new());
                            let _ = ack.send(());
                            return SessionEnd::Closed;
                        }
                    };
                    if let Err(err) = send_frame(transport.as_mut(), &frame).await {
                        return SessionEnd::Failed(err);
                    }
                }
            }
        }
    }

    /// Commands that arrive while not ready: calls queue up, membership
    /// changes are only recorded.
    fn handle_offline(&mut self, cmd: Option<Command>) -> Flow {
        let Some(cmd) = cmd else {
            self.finish_closed();
            return Flow::Close;
        };
        match cmd {
            Command::Call(call) => {
                let pending = Arc::clone(&self.pending);
                self.queue.retain(|queued| pending.contains(queued.id));
                let id = call.id;
                if let Some(evicted) = self.queue.push(call) {
                    warn!(
                        rpc.id = evicted.id,
                        rpc.method = %evicted.method,
                        capacity = self.config.queue_capacity(),
                        "outbound queue full; dropping oldest call"
                    );
                    self.pending.resolve(evicted.id, Err(ClientError::QueueOverflow));
                }
                trace!(rpc.id = id, queued = self.queue.len(), "call queued until ready");
            }
            Command::Join { room, token } => {
                self.rooms.insert(room, token);
            }
            Command::Leave { room } => {
                self.rooms.remove(&room);
            }
            Command::Rooms(reply) => {
                let _ = reply.send(self.room_names());
            }
            Command::Close(ack) => {
                self.finish_closed();
                let _ = ack.send(());
                return Flow::Close;
            }
        }
        Flow::Continue
    }

    /// Every pending call fails with [`ClientError::ConnectionLost`], queued
    /// ones included. Calls issued during the backoff queue up for the next
    /// session.
    fn enter_reconnecting(&mut self) -> Flow {
        while let Ok(cmd) = self.commands.try_recv() {
            if let Flow::Close = self.handle_offline(Some(cmd)) {
                return Flow::Close;
            }
        }
        self.set_state(ConnectionState::Reconnecting);
        self.queue.clear();
        let rejected = self.pending.reject_all(|| ClientError::ConnectionLost);
        if rejected > 0 {
            debug!(rejected, "failed pending calls after disconnect");
        }
        Flow::Continue
    }

    async fn backoff_delay(&mut self) -> Flow {
        let delay = self.backoff.next_delay();
        info!(
            url = %self.url,
            attempt = self.backoff.attempt(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "reconnecting socket"
        );
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return Flow::Continue,
                cmd = self.commands.recv() => {
                    if let Flow::Close = self.handle_offline(cmd) {
                        return Flow::Close;
                    }
                }
            }
        }
    }

    /// Terminal transition. Everything still pending or queued fails.
    fn finish_closed(&mut self) {
        self.set_state(ConnectionState::Closed);
        self.queue.clear();
        self.commands.close();
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                Command::Close(ack) => {
                    let _ = ack.send(());
                }
                Command::Rooms(reply) => {
                    let _ = reply.send(Vec::new());
                }
                Command::Call(_) | Command::Join { .. } | Command::Leave { .. } => {}
            }
        }
        let rejected = self.pending.reject_all(|| ClientError::ConnectionLost);
        info!(url = %self.url, rejected, "socket channel closed");
    }

    fn route_text(&self, text: &str) {
        trace!(frame = %text, "socket recv");
        match Inbound::parse(text) {
            Ok(inbound) => self.route(inbound),
            Err(err) => warn!(error = %err, "ignoring malformed socket frame"),
        }
    }

    fn route(&self, inbound: Inbound) {
        match inbound {
            Inbound::Response { id, outcome } => {
                let result = outcome.map_err(|message| ClientError::Remote { message });
                if !self.pending.resolve(id, result) {
                    debug!(rpc.id = id, "dropping response for unknown or settled call");
                }
            }
            Inbound::Event(event) => {
                self.listeners.emit(&event);
            }
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = *self.state.borrow();
        if previous.is_terminal() || previous == next {
            return;
        }
        self.state.send_replace(next);
        debug!(from = %previous, to = %next, "socket state");
    }

    fn report_error(&self, message: &str) {
        warn!(url = %self.url, "{message}");
        self.emit("error", vec![Value::String(message.to_owned())]);
    }

    fn emit(&self, name: &str, args: Vec<Value>) {
        self.listeners.emit(&Event::new(name, args));
    }

    fn room_names(&self) -> Vec<String> {
        self.rooms.keys().cloned().collect()
    }
}

async fn send_frame(transport: &mut dyn Transport, frame: &Outbound) -> Result<(), ClientError> {
    let text = frame.to_json()?;
    trace!(frame = %text, "socket send");
    transport.send(text).await
}
