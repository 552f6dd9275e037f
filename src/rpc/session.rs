//! Persistent realtime RPC session.
//!
//! One socket connection carries call/reply and publish/subscribe traffic.
//! A dedicated connection task owns the stream; every outbound frame flows
//! through a single queue, so concurrently issued operations are totally
//! ordered and never interleave on the wire. Replies and subscription
//! confirmations are correlated by request id through oneshot channels.
//!
//! Transport failures are terminal per call and never retried here. A
//! dropped socket transitions the session to `Disconnected`, drains every
//! pending operation with `NotConnected`, and broadcasts `Ended`; it does
//! not reconnect on its own.

use crate::config::RealtimeConfig;
use crate::error::{RpcError, RpcResult};
use crate::rpc::messages::{ClientFrame, RpcPayload, ServerFrame};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use wtransport::endpoint::endpoint_side::Client;
use wtransport::{ClientConfig, Endpoint};

/// Connectivity lifecycle of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No live socket
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// Session established and usable
    Connected,
}

/// Lifecycle notifications observable by the embedding application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session is established and the backend reports a live login
    Connected,
    /// The session ended
    Ended,
}

/// Handler invoked for each pushed event on a subscription
pub type EventHandler = Arc<dyn Fn(RpcPayload) + Send + Sync>;

/// An active subscription; dropping it keeps the subscription alive,
/// `unsubscribe` removes it.
pub struct Subscription {
    subscription: u64,
    handler_id: Uuid,
    session: Arc<SessionInner>,
}

impl Subscription {
    /// Server-assigned subscription id, used to correlate pushed events
    pub fn id(&self) -> u64 {
        self.subscription
    }

    /// Remove the handler, dropping the server subscription when it was
    /// the last one.
    pub async fn unsubscribe(self) -> RpcResult<()> {
        self.session
            .remove_handler(self.subscription, self.handler_id)
            .await
    }
}

enum OutboundFrame {
    Send(ClientFrame),
    Shutdown,
}

pub(crate) struct SessionInner {
    config: RealtimeConfig,
    state: watch::Sender<SessionState>,
    state_rx: watch::Receiver<SessionState>,
    transport_session_id: Mutex<Option<String>>,

    // Channel into the connection task
    tx: Mutex<Option<mpsc::Sender<OutboundFrame>>>,

    // Operations awaiting a reply, by request id
    pending_calls: Mutex<HashMap<u64, oneshot::Sender<RpcResult<RpcPayload>>>>,
    pending_subscribes: Mutex<HashMap<u64, oneshot::Sender<RpcResult<u64>>>>,
    pending_unsubscribes: Mutex<HashMap<u64, oneshot::Sender<RpcResult<()>>>>,

    // Event handlers by server subscription id
    handlers: Mutex<HashMap<u64, Vec<(Uuid, EventHandler)>>>,

    next_id: AtomicU64,
    ping_seq: AtomicU64,

    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    events: broadcast::Sender<SessionEvent>,
}

/// One realtime session over a single socket connection.
///
/// Cheaply cloneable; clones share the same session.
#[derive(Clone)]
pub struct RealtimeSession {
    inner: Arc<SessionInner>,
}

impl RealtimeSession {
    pub(crate) fn new(config: RealtimeConfig, events: broadcast::Sender<SessionEvent>) -> Self {
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);

        Self {
            inner: Arc::new(SessionInner {
                config,
                state: state_tx,
                state_rx,
                transport_session_id: Mutex::new(None),
                tx: Mutex::new(None),
                pending_calls: Mutex::new(HashMap::new()),
                pending_subscribes: Mutex::new(HashMap::new()),
                pending_unsubscribes: Mutex::new(HashMap::new()),
                handlers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                ping_seq: AtomicU64::new(0),
                shutdown: Mutex::new(None),
                events,
            }),
        }
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        *self.inner.state_rx.borrow()
    }

    /// Receiver for state transitions
    pub fn state_receiver(&self) -> watch::Receiver<SessionState> {
        self.inner.state_rx.clone()
    }

    /// The transport session id assigned during the handshake
    pub fn transport_session_id(&self) -> Option<String> {
        self.inner.transport_session_id.lock().clone()
    }

    /// Open the socket and perform the handshake.
    pub(crate) async fn connect(&self, endpoint_url: String, user_agent: String) -> RpcResult<()> {
        match self.state() {
            SessionState::Connected => return Ok(()),
            SessionState::Connecting => return Err(RpcError::NotConnected),
            SessionState::Disconnected => {}
        }

        self.inner.set_state(SessionState::Connecting);

        let (ready_tx, ready_rx) = oneshot::channel();
        let inner = self.inner.clone();
        tokio::spawn(async move {
            connection_task(inner, endpoint_url, user_agent, ready_tx).await;
        });

        ready_rx.await.unwrap_or(Err(RpcError::NotConnected))
    }

    /// Invoke a procedure and wait for its reply.
    ///
    /// Fails immediately with `NotConnected` when the session is not
    /// connected; the socket is never touched in that case.
    pub async fn call(
        &self,
        procedure: &str,
        args: Option<Vec<Value>>,
        kwargs: Option<Map<String, Value>>,
    ) -> RpcResult<RpcPayload> {
        if self.state() != SessionState::Connected {
            return Err(RpcError::NotConnected);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        debug!(id, procedure, "issuing call");

        let (tx, rx) = oneshot::channel();
        self.inner.pending_calls.lock().insert(id, tx);

        let frame = ClientFrame::Call {
            id,
            procedure: procedure.to_string(),
            args,
            kwargs,
        };
        if let Err(e) = self.inner.send(frame).await {
            self.inner.pending_calls.lock().remove(&id);
            return Err(e);
        }

        // No call-level timeout: the reply arrives, or the disconnect
        // drain fails the call.
        rx.await.unwrap_or(Err(RpcError::NotConnected))
    }

    /// Subscribe to a topic; the handler runs for every pushed event.
    pub async fn subscribe<F>(
        &self,
        topic: &str,
        options: Option<Map<String, Value>>,
        handler: F,
    ) -> RpcResult<Subscription>
    where
        F: Fn(RpcPayload) + Send + Sync + 'static,
    {
        if self.state() != SessionState::Connected {
            return Err(RpcError::NotConnected);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        debug!(id, topic, "subscribing");

        let (tx, rx) = oneshot::channel();
        self.inner.pending_subscribes.lock().insert(id, tx);

        let frame = ClientFrame::Subscribe {
            id,
            topic: topic.to_string(),
            options,
        };
        if let Err(e) = self.inner.send(frame).await {
            self.inner.pending_subscribes.lock().remove(&id);
            return Err(e);
        }

        let subscription = rx.await.unwrap_or(Err(RpcError::NotConnected))?;

        let handler_id = Uuid::new_v4();
        self.inner
            .handlers
            .lock()
            .entry(subscription)
            .or_default()
            .push((handler_id, Arc::new(handler)));

        Ok(Subscription {
            subscription,
            handler_id,
            session: self.inner.clone(),
        })
    }

    /// Close the socket. The session object stays around; pending
    /// operations are drained with `NotConnected`.
    pub async fn disconnect(&self) {
        let tx = self.inner.tx.lock().clone();
        if let Some(tx) = tx {
            let _ = tx.send(OutboundFrame::Shutdown).await;
        }
        if let Some(shutdown) = self.inner.shutdown.lock().take() {
            let _ = shutdown.send(());
        }
        self.inner.handle_disconnect();
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<SessionInner> {
        &self.inner
    }
}

impl SessionInner {
    fn set_state(&self, state: SessionState) {
        let _ = self.state.send(state);
    }

    async fn send(&self, frame: ClientFrame) -> RpcResult<()> {
        let tx = self.tx.lock().clone();
        match tx {
            Some(tx) => tx
                .send(OutboundFrame::Send(frame))
                .await
                .map_err(|_| RpcError::NotConnected),
            None => Err(RpcError::NotConnected),
        }
    }

    async fn remove_handler(&self, subscription: u64, handler_id: Uuid) -> RpcResult<()> {
        let drop_subscription = {
            let mut handlers = self.handlers.lock();
            if let Some(entries) = handlers.get_mut(&subscription) {
                entries.retain(|(id, _)| *id != handler_id);
                if entries.is_empty() {
                    handlers.remove(&subscription);
                    true
                } else {
                    false
                }
            } else {
                false
            }
        };

        if drop_subscription && *self.state_rx.borrow() == SessionState::Connected {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = oneshot::channel();
            self.pending_unsubscribes.lock().insert(id, tx);

            if let Err(e) = self.send(ClientFrame::Unsubscribe { id, subscription }).await {
                self.pending_unsubscribes.lock().remove(&id);
                return Err(e);
            }
            return rx.await.unwrap_or(Err(RpcError::NotConnected));
        }

        Ok(())
    }

    /// Process one inbound frame. Returns true when the server ended the
    /// session.
    fn handle_frame(&self, frame: ServerFrame) -> bool {
        match frame {
            ServerFrame::Result { id, results, kw_results } => {
                if let Some(tx) = self.pending_calls.lock().remove(&id) {
                    let _ = tx.send(Ok(RpcPayload::new(results, kw_results)));
                }
            }
            ServerFrame::CallError { id, message } => {
                let error = RpcError::Request(message);
                if error.indicates_logged_out() {
                    // Detection hook only; remediation is the caller's call.
                    warn!("backend reports a lapsed login");
                }
                if let Some(tx) = self.pending_calls.lock().remove(&id) {
                    let _ = tx.send(Err(error));
                }
            }
            ServerFrame::Subscribed { id, subscription } => {
                if let Some(tx) = self.pending_subscribes.lock().remove(&id) {
                    let _ = tx.send(Ok(subscription));
                }
            }
            ServerFrame::SubscribeError { id, message } => {
                if let Some(tx) = self.pending_subscribes.lock().remove(&id) {
                    let _ = tx.send(Err(RpcError::Request(message)));
                }
            }
            ServerFrame::Unsubscribed { id } => {
                if let Some(tx) = self.pending_unsubscribes.lock().remove(&id) {
                    let _ = tx.send(Ok(()));
                }
            }
            ServerFrame::Event { subscription, results, kw_results } => {
                self.dispatch_event(subscription, RpcPayload::new(results, kw_results));
            }
            ServerFrame::Pong { seq } => {
                debug!(seq, "pong");
            }
            ServerFrame::Welcome { .. } => {
                warn!("unexpected welcome after handshake");
            }
            ServerFrame::Goodbye { reason } => {
                info!(%reason, "server closed the session");
                return true;
            }
            ServerFrame::Abort { reason, .. } => {
                warn!(%reason, "server aborted the session");
                return true;
            }
        }
        false
    }

    fn dispatch_event(&self, subscription: u64, payload: RpcPayload) {
        let handlers = self.handlers.lock();
        if let Some(entries) = handlers.get(&subscription) {
            for (_, handler) in entries {
                handler(payload.clone());
            }
        }
    }

    /// Tear down after the socket is gone. Idempotent; broadcasts `Ended`
    /// only on the first transition out of a live state.
    fn handle_disconnect(&self) {
        let was_live = *self.state_rx.borrow() == SessionState::Connected;

        *self.tx.lock() = None;

        for (_, tx) in self.pending_calls.lock().drain() {
            let _ = tx.send(Err(RpcError::NotConnected));
        }
        for (_, tx) in self.pending_subscribes.lock().drain() {
            let _ = tx.send(Err(RpcError::NotConnected));
        }
        for (_, tx) in self.pending_unsubscribes.lock().drain() {
            let _ = tx.send(Err(RpcError::NotConnected));
        }

        self.set_state(SessionState::Disconnected);

        if was_live {
            let _ = self.events.send(SessionEvent::Ended);
        }
    }
}

/// Connection task: owns the socket for the whole session lifetime.
async fn connection_task(
    inner: Arc<SessionInner>,
    endpoint_url: String,
    user_agent: String,
    ready: oneshot::Sender<RpcResult<()>>,
) {
    let mut ready = Some(ready);
    let result = run_session(&inner, &endpoint_url, &user_agent, &mut ready).await;

    if let Some(ready) = ready.take() {
        // Handshake never completed; report the failure to the connector.
        inner.set_state(SessionState::Disconnected);
        let _ = ready.send(Err(result.err().unwrap_or(RpcError::NotConnected)));
        return;
    }

    if let Err(e) = &result {
        warn!("session loop ended: {e}");
    }
    inner.handle_disconnect();
}

async fn run_session(
    inner: &Arc<SessionInner>,
    endpoint_url: &str,
    user_agent: &str,
    ready: &mut Option<oneshot::Sender<RpcResult<()>>>,
) -> RpcResult<()> {
    let config = if inner.config.dangerous_skip_cert_verify {
        ClientConfig::builder()
            .with_bind_default()
            .with_no_cert_validation()
            .build()
    } else {
        ClientConfig::builder()
            .with_bind_default()
            .with_native_certs()
            .build()
    };

    let endpoint: Endpoint<Client> = Endpoint::client(config).map_err(|e| {
        error!("failed to build client endpoint: {e}");
        RpcError::NotConnected
    })?;

    debug!("connecting to {endpoint_url}");
    let connection = endpoint
        .connect(endpoint_url)
        .await
        .map_err(|_| RpcError::NotConnected)?;

    let (mut send, mut recv) = connection
        .open_bi()
        .await
        .map_err(|_| RpcError::NotConnected)?
        .await
        .map_err(|_| RpcError::NotConnected)?;

    // Handshake: announce identity, wait for the transport session id
    let hello = serde_json::to_vec(&ClientFrame::Hello {
        user_agent: user_agent.to_string(),
    })
    .map_err(|e| RpcError::Decoding(e.to_string()))?;
    send.write_all(&hello)
        .await
        .map_err(|_| RpcError::NotConnected)?;

    let mut buf = vec![0u8; 65536];
    let n = recv
        .read(&mut buf)
        .await
        .map_err(|_| RpcError::NotConnected)?
        .ok_or(RpcError::NotConnected)?;
    let frame: ServerFrame =
        serde_json::from_slice(&buf[..n]).map_err(|e| RpcError::Decoding(e.to_string()))?;

    match frame {
        ServerFrame::Welcome { session_id: Some(session_id) } => {
            info!(%session_id, "session established");
            *inner.transport_session_id.lock() = Some(session_id);
        }
        ServerFrame::Welcome { session_id: None } => {
            return Err(RpcError::MissingTransportSessionId);
        }
        ServerFrame::Abort { reason, code } => {
            warn!(%reason, "session refused");
            return Err(match code {
                Some(code) => RpcError::Http(code),
                None => RpcError::Request(reason),
            });
        }
        other => {
            return Err(RpcError::Decoding(format!(
                "unexpected handshake frame: {other:?}"
            )));
        }
    }

    // Outbound queue; from here on every frame is totally ordered
    let (tx, mut rx) = mpsc::channel::<OutboundFrame>(100);
    *inner.tx.lock() = Some(tx);
    inner.set_state(SessionState::Connected);

    if let Some(ready) = ready.take() {
        let _ = ready.send(Ok(()));
    }

    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    *inner.shutdown.lock() = Some(shutdown_tx);

    // Keepalive rides the same outbound queue
    let ping_inner = inner.clone();
    let ping_interval = inner.config.ping_interval;
    let ping_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(ping_interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            if *ping_inner.state_rx.borrow() != SessionState::Connected {
                break;
            }
            let seq = ping_inner.ping_seq.fetch_add(1, Ordering::SeqCst);
            if ping_inner.send(ClientFrame::Ping { seq }).await.is_err() {
                break;
            }
        }
    });

    let result: RpcResult<()> = loop {
        tokio::select! {
            frame = rx.recv() => {
                match frame {
                    Some(OutboundFrame::Send(frame)) => {
                        let bytes = match serde_json::to_vec(&frame) {
                            Ok(bytes) => bytes,
                            Err(e) => break Err(RpcError::Decoding(e.to_string())),
                        };
                        if send.write_all(&bytes).await.is_err() {
                            break Err(RpcError::NotConnected);
                        }
                    }
                    Some(OutboundFrame::Shutdown) | None => break Ok(()),
                }
            }

            result = recv.read(&mut buf) => {
                match result {
                    Ok(Some(n)) => match serde_json::from_slice::<ServerFrame>(&buf[..n]) {
                        Ok(frame) => {
                            if inner.handle_frame(frame) {
                                break Ok(());
                            }
                        }
                        Err(e) => warn!("failed to parse frame: {e}"),
                    },
                    Ok(None) => {
                        debug!("stream closed by server");
                        break Err(RpcError::NotConnected);
                    }
                    Err(_) => break Err(RpcError::NotConnected),
                }
            }

            _ = &mut shutdown_rx => break Ok(()),
        }
    };

    ping_task.abort();
    result
}
