//! apercu-ws: WebSocket JSON-RPC transport for apercu.
//!
//! # Features
//! - Lazy connect, one shared handshake for concurrent first callers
//! - Request multiplexing over a single connection
//! - Subscription queues (eth_subscribe / eth_unsubscribe on drop)
//! - No auto-reconnect: a closed socket fails everything in flight and the
//!   next call connects again

pub mod client;
pub mod subscriptions;

pub use client::{WsClientConfig, WsRpcClient};
pub use subscriptions::{Subscription, SubscriptionId};

use apercu_core::policy::RetryPolicy;
use apercu_core::rpc::ChainRpcService;

/// Chain RPC service over two sockets to `url`: one for calls, one for
/// the head subscription.
pub fn chain_rpc(url: &str, config: WsClientConfig, policy: RetryPolicy) -> ChainRpcService<WsRpcClient> {
    ChainRpcService::new(
        WsRpcClient::new(url, config.clone()),
        WsRpcClient::new(url, config),
        policy,
    )
}
