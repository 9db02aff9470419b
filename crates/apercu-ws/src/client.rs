//! WebSocket JSON-RPC client with lazy connect and subscription queues.
//!
//! One background task per open socket owns the connection, the pending
//! request table and the subscription table. Callers reach it through an
//! unbounded command channel. When the socket closes, everything in flight
//! fails with `RpcError("WebSocket closed")` and the task exits; the next
//! call opens a fresh connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use apercu_core::error::RpcError;
use apercu_core::request::{InboundFrame, JsonRpcRequest, JsonRpcResponse};
use apercu_core::transport::{Notifications, RpcTransport};

use crate::subscriptions::{Dispatch, Queue, Subscription, SubscriptionId, SubscriptionTable};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type SubscribeReply = oneshot::Sender<Result<(SubscriptionId, Queue), RpcError>>;

/// Configuration for the WebSocket client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsClientConfig {
    /// Capacity of each subscription queue. A queue that fills up is
    /// terminated rather than allowed to grow.
    pub subscription_buffer: usize,
    /// Upper bound on the TCP + WebSocket handshake.
    pub connect_timeout: Duration,
}

impl Default for WsClientConfig {
    fn default() -> Self {
        Self {
            subscription_buffer: 1024,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// What the connection task does when a response arrives.
pub(crate) enum Pending {
    Call(oneshot::Sender<Result<Value, RpcError>>),
    Subscribe(SubscribeReply),
    /// Fire-and-forget (`eth_unsubscribe`).
    Discard,
}

/// Command sent from callers to the background WS task.
pub(crate) enum WsCommand {
    Request { id: u64, frame: String, pending: Pending },
    Unsubscribe(SubscriptionId),
    Close,
}

/// WebSocket JSON-RPC client.
///
/// Nothing is opened until the first `request` or `subscribe`. Concurrent
/// first callers share one handshake. The client never reconnects on its
/// own: after a close the next call starts a new connection.
pub struct WsRpcClient {
    url: String,
    config: WsClientConfig,
    next_id: Arc<AtomicU64>,
    conn: Mutex<Option<mpsc::UnboundedSender<WsCommand>>>,
}

impl WsRpcClient {
    pub fn new(url: impl Into<String>, config: WsClientConfig) -> Self {
        Self {
            url: url.into(),
            config,
            next_id: Arc::new(AtomicU64::new(1)),
            conn: Mutex::new(None),
        }
    }

    /// Command channel of the open connection, connecting first if needed.
    async fn connection(&self) -> Result<mpsc::UnboundedSender<WsCommand>, RpcError> {
        let mut conn = self.conn.lock().await;
        if let Some(tx) = conn.as_ref().filter(|tx| !tx.is_closed()) {
            return Ok(tx.clone());
        }

        tracing::info!(url = %self.url, "connecting via WebSocket");
        let timeout = self.config.connect_timeout;
        let (ws, _) = match tokio::time::timeout(timeout, connect_async(self.url.as_str())).await {
            Ok(Ok(handshake)) => handshake,
            Ok(Err(e)) => {
                tracing::warn!(url = %self.url, error = %e, "WebSocket connect failed");
                return Err(RpcError::new(format!("WebSocket connect failed: {e}")).with_cause(e));
            }
            Err(elapsed) => {
                tracing::warn!(url = %self.url, timeout_ms = timeout.as_millis() as u64, "WebSocket connect timed out");
                return Err(
                    RpcError::new(format!("WebSocket connect failed: timed out after {timeout:?}")).with_cause(elapsed)
                );
            }
        };

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let task = ConnectionTask {
            url: self.url.clone(),
            pending: HashMap::new(),
            subscriptions: SubscriptionTable::new(self.config.subscription_buffer),
            next_id: Arc::clone(&self.next_id),
        };
        tokio::spawn(task.run(ws, cmd_rx));

        *conn = Some(cmd_tx.clone());
        Ok(cmd_tx)
    }

    /// Hand one request to the connection task.
    async fn dispatch(
        &self,
        method: &str,
        params: Value,
        pending: Pending,
    ) -> Result<mpsc::UnboundedSender<WsCommand>, RpcError> {
        let cmd_tx = self.connection().await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        cmd_tx
            .send(WsCommand::Request { id, frame, pending })
            .map_err(|_| RpcError::new("WebSocket is not open"))?;
        Ok(cmd_tx)
    }
}

impl Drop for WsRpcClient {
    fn drop(&mut self) {
        if let Some(tx) = self.conn.get_mut().take() {
            let _ = tx.send(WsCommand::Close);
        }
    }
}

#[async_trait]
impl RpcTransport for WsRpcClient {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let (tx, rx) = oneshot::channel();
        self.dispatch(method, params, Pending::Call(tx)).await?;
        rx.await.map_err(|_| RpcError::closed())?
    }

    async fn subscribe(&self, kind: &str, params: Option<Value>) -> Result<Notifications, RpcError> {
        let mut args = vec![Value::String(kind.to_string())];
        args.extend(params);

        let (tx, rx) = oneshot::channel();
        let cmd_tx = self.dispatch("eth_subscribe", Value::Array(args), Pending::Subscribe(tx)).await?;
        let (id, queue) = rx.await.map_err(|_| RpcError::closed())??;
        tracing::debug!(subscription = %id, kind, "subscribed");
        Ok(Box::pin(Subscription::new(id, queue, cmd_tx)))
    }

    fn url(&self) -> &str {
        &self.url
    }
}

// ─── Connection task ─────────────────────────────────────────────────────────

struct ConnectionTask {
    url: String,
    pending: HashMap<u64, Pending>,
    subscriptions: SubscriptionTable,
    next_id: Arc<AtomicU64>,
}

impl ConnectionTask {
    async fn run(mut self, ws: WsStream, mut cmd_rx: mpsc::UnboundedReceiver<WsCommand>) {
        let (mut sink, mut stream) = ws.split();

        let reason = loop {
            tokio::select! {
                // Incoming commands from callers
                cmd = cmd_rx.recv() => match cmd {
                    None | Some(WsCommand::Close) => {
                        // Unsubscribes queued alongside the close still go out.
                        if self.flush(&mut cmd_rx, &mut sink).await.is_err() {
                            break "send failed";
                        }
                        break "client dropped";
                    }
                    Some(WsCommand::Request { id, frame, pending }) => {
                        self.pending.insert(id, pending);
                        if let Err(e) = sink.send(Message::Text(frame.into())).await {
                            tracing::warn!(id, error = %e, "WebSocket send failed");
                            if let Some(pending) = self.pending.remove(&id) {
                                reject(pending, RpcError::new("Failed to send request").with_cause(e));
                            }
                            break "send failed";
                        }
                    }
                    Some(WsCommand::Unsubscribe(sub)) => {
                        if self.subscriptions.remove(&sub) && self.unsubscribe(&mut sink, &sub).await.is_err() {
                            break "send failed";
                        }
                    }
                },
                // Incoming messages from node
                msg = stream.next() => match msg {
                    None => break "stream ended",
                    Some(Err(e)) => {
                        tracing::warn!(url = %self.url, error = %e, "WebSocket receive error");
                        break "receive error";
                    }
                    Some(Ok(Message::Text(text))) => {
                        if self.on_text(text.as_str(), &mut sink).await.is_err() {
                            break "send failed";
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            break "send failed";
                        }
                    }
                    Some(Ok(Message::Close(_))) => break "server closed",
                    Some(Ok(_)) => tracing::debug!("ignoring non-text frame"),
                },
            }
        };

        tracing::info!(
            url = %self.url,
            reason,
            pending = self.pending.len(),
            subscriptions = self.subscriptions.len(),
            "WebSocket closed"
        );

        // Commands that raced the close fail the same way as pending ones.
        cmd_rx.close();
        while let Ok(cmd) = cmd_rx.try_recv() {
            if let WsCommand::Request { id, pending, .. } = cmd {
                self.pending.insert(id, pending);
            }
        }
        for (_, pending) in self.pending.drain() {
            reject(pending, RpcError::closed());
        }
        self.subscriptions.close_all();
        let _ = sink.close().await;
    }

    /// Take every queued command without waiting. Requests are parked for
    /// rejection; unsubscribes are sent.
    async fn flush(
        &mut self,
        cmd_rx: &mut mpsc::UnboundedReceiver<WsCommand>,
        sink: &mut WsSink,
    ) -> Result<(), tungstenite::Error> {
        while let Ok(cmd) = cmd_rx.try_recv() {
            match cmd {
                WsCommand::Request { id, pending, .. } => {
                    self.pending.insert(id, pending);
                }
                WsCommand::Unsubscribe(sub) => {
                    if self.subscriptions.remove(&sub) {
                        self.unsubscribe(sink, &sub).await?;
                    }
                }
                WsCommand::Close => {}
            }
        }
        Ok(())
    }

    async fn on_text(&mut self, text: &str, sink: &mut WsSink) -> Result<(), tungstenite::Error> {
        match InboundFrame::parse(text) {
            Some(InboundFrame::Response(resp)) => {
                if let Some(orphan) = self.on_response(resp) {
                    self.unsubscribe(sink, &orphan).await?;
                }
            }
            Some(InboundFrame::Notification(note)) => {
                let id = SubscriptionId(note.params.subscription);
                match self.subscriptions.dispatch(&id, note.params.result) {
                    Dispatch::Delivered => {}
                    Dispatch::Unknown => {
                        tracing::debug!(subscription = %id, "notification for unknown subscription dropped");
                    }
                    Dispatch::Closed => self.unsubscribe(sink, &id).await?,
                    Dispatch::Overflowed => {
                        tracing::warn!(subscription = %id, "subscription queue full, terminating subscription");
                        self.unsubscribe(sink, &id).await?;
                    }
                }
            }
            None => tracing::debug!(frame = %text, "unrecognized frame dropped"),
        }
        Ok(())
    }

    /// Resolve the waiter for `resp`. Returns a subscription id whose
    /// caller went away before it could be handed over.
    fn on_response(&mut self, resp: JsonRpcResponse) -> Option<SubscriptionId> {
        let Some(id) = resp.id.as_number() else {
            tracing::debug!(id = %resp.id, "response with non-numeric id dropped");
            return None;
        };
        let Some(pending) = self.pending.remove(&id) else {
            tracing::debug!(id, "response for unknown id dropped");
            return None;
        };

        match pending {
            Pending::Call(tx) => {
                let _ = tx.send(resp.into_result().map_err(RpcError::from));
                None
            }
            Pending::Subscribe(tx) => {
                let outcome = resp.into_result().map_err(RpcError::from).and_then(|v| match v {
                    Value::String(s) => Ok(SubscriptionId(s)),
                    other => Err(RpcError::malformed(format_args!("subscription id: {other}"))),
                });
                match outcome {
                    // Registered before the next frame is read, so no
                    // notification racing the confirmation is lost.
                    Ok(sub) => {
                        let queue = self.subscriptions.register(sub.clone());
                        if tx.send(Ok((sub.clone(), queue))).is_err() {
                            self.subscriptions.remove(&sub);
                            return Some(sub);
                        }
                        None
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        None
                    }
                }
            }
            Pending::Discard => None,
        }
    }

    async fn unsubscribe(&mut self, sink: &mut WsSink, sub: &SubscriptionId) -> Result<(), tungstenite::Error> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, "eth_unsubscribe", Value::Array(vec![Value::String(sub.0.clone())]));
        let Ok(frame) = serde_json::to_string(&req) else {
            return Ok(());
        };
        self.pending.insert(id, Pending::Discard);
        tracing::debug!(subscription = %sub, "unsubscribing");
        sink.send(Message::Text(frame.into())).await
    }
}

fn reject(pending: Pending, error: RpcError) {
    match pending {
        Pending::Call(tx) => {
            let _ = tx.send(Err(error));
        }
        Pending::Subscribe(tx) => {
            let _ = tx.send(Err(error));
        }
        Pending::Discard => {}
    }
}
