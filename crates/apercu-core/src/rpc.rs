//! Typed chain RPC façade over an [`RpcTransport`].
//!
//! Every one-shot call runs under the [`RetryPolicy`]; the head stream
//! resubscribes on its own whenever the subscription fails, so transient
//! connection trouble only shows up as a gap in heads.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{stream, Stream, StreamExt};
use serde_json::Value;

use crate::error::RpcError;
use crate::policy::{retry, RetryPolicy};
use crate::transport::{Notifications, RpcTransport};
use crate::types::{scalar, Head, Hex, Log, LogFilter};

/// A stream of new block headers.
pub type HeadStream = Pin<Box<dyn Stream<Item = Result<Head, RpcError>> + Send>>;

/// What the tail engine needs from a chain.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Latest block number as a hex quantity.
    async fn get_block_number(&self) -> Result<Hex, RpcError>;

    /// All logs matching `filter`, in the order the node returned them.
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>, RpcError>;

    /// New heads as they arrive. Nothing is subscribed until the stream is polled.
    fn watch_heads(&self) -> HeadStream;
}

/// [`ChainRpc`] over JSON-RPC, with retry and resubscription.
///
/// Calls and the head subscription use separate transports so a dropped
/// subscription socket never fails an in-flight call.
pub struct ChainRpcService<T> {
    requests: Arc<T>,
    subscriptions: Arc<T>,
    policy: RetryPolicy,
}

impl<T: RpcTransport> ChainRpcService<T> {
    pub fn new(requests: T, subscriptions: T, policy: RetryPolicy) -> Self {
        Self {
            requests: Arc::new(requests),
            subscriptions: Arc::new(subscriptions),
            policy,
        }
    }

    async fn block_number_once(&self) -> Result<Hex, RpcError> {
        let result = self.requests.request("eth_blockNumber", Value::Array(vec![])).await?;
        scalar(&result, "block number")
    }

    async fn logs_once(&self, filter: &LogFilter) -> Result<Vec<Log>, RpcError> {
        match self.requests.request("eth_getLogs", filter.to_params()).await? {
            Value::Array(entries) => entries.iter().map(Log::from_raw).collect(),
            _ => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl<T: RpcTransport> ChainRpc for ChainRpcService<T> {
    async fn get_block_number(&self) -> Result<Hex, RpcError> {
        retry(&self.policy, "eth_blockNumber", || self.block_number_once()).await
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>, RpcError> {
        retry(&self.policy, "eth_getLogs", || self.logs_once(filter)).await
    }

    fn watch_heads(&self) -> HeadStream {
        let state = HeadWatch {
            subscription: None,
            transport: Arc::clone(&self.subscriptions),
            policy: self.policy.clone(),
            failures: 0,
            exhausted: false,
        };
        Box::pin(stream::unfold(state, HeadWatch::next))
    }
}

// ─── Resubscribing head stream ───────────────────────────────────────────────

// Fields drop in order: the subscription must go before the transport so
// its unsubscribe is queued ahead of the socket close.
struct HeadWatch<T> {
    subscription: Option<Notifications>,
    transport: Arc<T>,
    policy: RetryPolicy,
    /// Consecutive failures since the last delivered head.
    failures: u32,
    exhausted: bool,
}

impl<T: RpcTransport> HeadWatch<T> {
    async fn next(mut self) -> Option<(Result<Head, RpcError>, Self)> {
        if self.exhausted {
            return None;
        }
        loop {
            let mut subscription = match self.subscription.take() {
                Some(sub) => sub,
                None => match self.transport.subscribe("newHeads", None).await {
                    Ok(sub) => {
                        tracing::debug!(url = %self.transport.url(), "subscribed to newHeads");
                        sub
                    }
                    Err(e) => {
                        if let Err(e) = self.back_off(e).await {
                            self.exhausted = true;
                            return Some((Err(e), self));
                        }
                        continue;
                    }
                },
            };

            let failure = match subscription.next().await {
                Some(Ok(raw)) => match Head::from_raw(&raw) {
                    Ok(head) => {
                        self.failures = 0;
                        self.subscription = Some(subscription);
                        return Some((Ok(head), self));
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "dropping malformed head notification");
                        self.subscription = Some(subscription);
                        continue;
                    }
                },
                Some(Err(e)) => e,
                None => RpcError::new("head subscription ended"),
            };

            // Dropping the old subscription unsubscribes it.
            drop(subscription);
            if let Err(e) = self.back_off(failure).await {
                self.exhausted = true;
                return Some((Err(e), self));
            }
        }
    }

    async fn back_off(&mut self, error: RpcError) -> Result<(), RpcError> {
        self.failures = self.failures.saturating_add(1);
        match self.policy.next_delay(self.failures) {
            Some(delay) => {
                tracing::warn!(
                    attempt = self.failures,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "head subscription lost, resubscribing"
                );
                tokio::time::sleep(delay).await;
                Ok(())
            }
            None => {
                tracing::error!(attempt = self.failures, error = %error, "giving up on head subscription");
                Err(error)
            }
        }
    }
}
