//! WebSocket subscription queues.
//!
//! The connection task owns a [`SubscriptionTable`] mapping each
//! `eth_subscribe` id to a bounded queue. The caller holds the matching
//! [`Subscription`], a `Stream` over that queue which unsubscribes on drop.

use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use apercu_core::error::RpcError;

use crate::client::WsCommand;

/// A unique subscription ID returned by `eth_subscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub String);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) type Queue = mpsc::Receiver<Result<Value, RpcError>>;

/// Notification payloads of one live subscription.
///
/// Yields `Err(RpcError("WebSocket closed"))` once if the socket closes, then
/// ends. Dropping it removes the registration and sends `eth_unsubscribe`.
pub struct Subscription {
    id: SubscriptionId,
    queue: Queue,
    cmd_tx: mpsc::UnboundedSender<WsCommand>,
}

impl Subscription {
    pub(crate) fn new(id: SubscriptionId, queue: Queue, cmd_tx: mpsc::UnboundedSender<WsCommand>) -> Self {
        Self { id, queue, cmd_tx }
    }
}

impl Stream for Subscription {
    type Item = Result<Value, RpcError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.queue.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // The connection may already be gone; nothing to undo then.
        let _ = self.cmd_tx.send(WsCommand::Unsubscribe(self.id.clone()));
    }
}

/// Outcome of routing one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    Delivered,
    /// No subscription with that id.
    Unknown,
    /// The queue was full; the subscription has been removed.
    Overflowed,
    /// The consumer is gone; the subscription has been removed.
    Closed,
}

/// Subscription id → queue. Owned by the connection task, never shared.
pub(crate) struct SubscriptionTable {
    entries: HashMap<SubscriptionId, mpsc::Sender<Result<Value, RpcError>>>,
    buffer: usize,
}

impl SubscriptionTable {
    pub(crate) fn new(buffer: usize) -> Self {
        Self {
            entries: HashMap::new(),
            buffer: buffer.max(1),
        }
    }

    /// Register a new subscription and return its queue.
    pub(crate) fn register(&mut self, id: SubscriptionId) -> Queue {
        let (tx, rx) = mpsc::channel(self.buffer);
        self.entries.insert(id, tx);
        rx
    }

    /// Forward an incoming notification to the correct subscription.
    pub(crate) fn dispatch(&mut self, id: &SubscriptionId, payload: Value) -> Dispatch {
        let Some(tx) = self.entries.get(id) else {
            return Dispatch::Unknown;
        };
        match tx.try_send(Ok(payload)) {
            Ok(()) => Dispatch::Delivered,
            Err(TrySendError::Full(_)) => {
                self.entries.remove(id);
                Dispatch::Overflowed
            }
            Err(TrySendError::Closed(_)) => {
                self.entries.remove(id);
                Dispatch::Closed
            }
        }
    }

    /// Remove a subscription. Returns `true` if it was registered.
    pub(crate) fn remove(&mut self, id: &SubscriptionId) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Hand every queue the close error and end it.
    pub(crate) fn close_all(&mut self) {
        for (_, tx) in self.entries.drain() {
            let _ = tx.try_send(Err(RpcError::closed()));
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn register_and_dispatch() {
        let mut table = SubscriptionTable::new(8);
        let id = SubscriptionId("0xdeadbeef".into());
        let mut rx = table.register(id.clone());

        assert_eq!(table.dispatch(&id, json!({"number": "0x1"})), Dispatch::Delivered);
        assert_eq!(rx.try_recv().unwrap().unwrap()["number"], "0x1");

        let other = SubscriptionId("0xother".into());
        assert_eq!(table.dispatch(&other, json!({})), Dispatch::Unknown);
    }

    #[test]
    fn overflow_removes_the_subscription() {
        let mut table = SubscriptionTable::new(2);
        let id = SubscriptionId("0x1".into());
        let mut rx = table.register(id.clone());

        assert_eq!(table.dispatch(&id, json!(1)), Dispatch::Delivered);
        assert_eq!(table.dispatch(&id, json!(2)), Dispatch::Delivered);
        assert_eq!(table.dispatch(&id, json!(3)), Dispatch::Overflowed);
        assert_eq!(table.len(), 0);

        // Buffered items drain, then the queue ends.
        assert_eq!(rx.try_recv().unwrap().unwrap(), json!(1));
        assert_eq!(rx.try_recv().unwrap().unwrap(), json!(2));
        assert!(matches!(rx.try_recv(), Err(mpsc::error::TryRecvError::Disconnected)));
    }

    #[test]
    fn dropped_consumer_is_pruned() {
        let mut table = SubscriptionTable::new(4);
        let id = SubscriptionId("0x1".into());
        drop(table.register(id.clone()));
        assert_eq!(table.dispatch(&id, json!(1)), Dispatch::Closed);
        assert!(!table.remove(&id));
    }

    #[test]
    fn close_all_delivers_the_close_error() {
        let mut table = SubscriptionTable::new(4);
        let mut a = table.register(SubscriptionId("0xa".into()));
        let mut b = table.register(SubscriptionId("0xb".into()));
        table.close_all();
        assert_eq!(table.len(), 0);
        for rx in [&mut a, &mut b] {
            assert!(rx.try_recv().unwrap().unwrap_err().is_closed());
            assert!(rx.try_recv().is_err());
        }
    }
}
