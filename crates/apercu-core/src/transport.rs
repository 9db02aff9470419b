//! The `RpcTransport` trait: the seam between the chain RPC service and a socket.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;

use crate::error::RpcError;

/// Push payloads of one subscription, in arrival order.
///
/// An `Err` item means the underlying connection failed; the stream ends
/// after it. Dropping the stream cancels the subscription.
pub type Notifications = Pin<Box<dyn Stream<Item = Result<Value, RpcError>> + Send>>;

/// A JSON-RPC connection that supports calls and server-push subscriptions.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` for use across Tokio tasks.
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    /// Send one request and wait for its correlated response.
    ///
    /// `params` is the JSON-RPC params array or object.
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError>;

    /// Open an `eth_subscribe` subscription of the given kind (e.g. `"newHeads"`).
    async fn subscribe(&self, kind: &str, params: Option<Value>) -> Result<Notifications, RpcError>;

    /// Return the transport's endpoint URL.
    fn url(&self) -> &str;
}
