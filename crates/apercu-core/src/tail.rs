//! The tail engine: composes replay and follow into one ordered stream.
//!
//! # Phase 1: REPLAY
//! Only when `replay_blocks > 0`:
//!   - Fetch the latest block number
//!   - Fetch all logs in `[latest - (replay_blocks - 1), latest]` with one call
//!   - Emit them in returned order
//!
//! # Phase 2: FOLLOW
//! Only when `follow` is set. On each new head:
//!   - Verify parent hash against the previous head (emit a reorg if it differs)
//!   - Fetch logs for that single block
//!   - Emit them in returned order
//!
//! The previous-head tracker starts empty at the follow phase; replay does
//! not seed it. Nothing runs until the stream is polled, and each step runs
//! only when the consumer asks for more.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;

use futures::{stream, Stream, StreamExt};

use crate::config::TailConfig;
use crate::error::RpcError;
use crate::hex::replay_range;
use crate::rpc::{ChainRpc, HeadStream};
use crate::types::{Head, LogFilter, TailEvent};

/// Ordered tail output. Ends after the first `Err`.
pub type TailStream = Pin<Box<dyn Stream<Item = Result<TailEvent, RpcError>> + Send>>;

/// One tail invocation over a [`ChainRpc`].
pub struct TailEngine {
    rpc: Arc<dyn ChainRpc>,
    filter: LogFilter,
    replay_blocks: u64,
    follow: bool,
}

impl TailEngine {
    pub fn new(rpc: Arc<dyn ChainRpc>, config: &TailConfig) -> Self {
        Self {
            rpc,
            filter: config.base_filter(),
            replay_blocks: config.replay_blocks,
            follow: config.follow,
        }
    }

    /// Turn the engine into its event stream.
    pub fn stream(self) -> TailStream {
        let state = TailState {
            engine: self,
            phase: Phase::Replay,
            pending: VecDeque::new(),
            heads: None,
            previous: None,
            awaiting_logs: None,
        };
        Box::pin(stream::unfold(state, TailState::next))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Replay,
    Follow,
    Done,
}

struct TailState {
    engine: TailEngine,
    phase: Phase,
    /// Events computed but not yet pulled.
    pending: VecDeque<TailEvent>,
    heads: Option<HeadStream>,
    previous: Option<Head>,
    /// A head already checked for a reorg whose logs are not fetched yet.
    awaiting_logs: Option<Head>,
}

impl TailState {
    async fn next(mut self) -> Option<(Result<TailEvent, RpcError>, Self)> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some((Ok(event), self));
            }
            let step = match self.phase {
                Phase::Replay => self.replay().await,
                Phase::Follow => self.follow().await,
                Phase::Done => return None,
            };
            if let Err(e) = step {
                tracing::error!(error = %e, "tail stream failed");
                self.phase = Phase::Done;
                self.heads = None;
                return Some((Err(e), self));
            }
        }
    }

    async fn replay(&mut self) -> Result<(), RpcError> {
        self.phase = if self.engine.follow { Phase::Follow } else { Phase::Done };
        if self.engine.replay_blocks == 0 {
            return Ok(());
        }

        let latest = self.engine.rpc.get_block_number().await?;
        let (from, to) = replay_range(&latest, self.engine.replay_blocks)?;
        let logs = self.engine.rpc.get_logs(&self.engine.filter.range(from.clone(), to.clone())).await?;
        tracing::info!(%from, %to, logs = logs.len(), "replay complete");

        self.pending.extend(logs.into_iter().map(TailEvent::from));
        Ok(())
    }

    async fn follow(&mut self) -> Result<(), RpcError> {
        if let Some(head) = self.awaiting_logs.take() {
            let logs = self.engine.rpc.get_logs(&self.engine.filter.single_block(&head.number)).await?;
            tracing::debug!(number = %head.number, hash = %head.hash, logs = logs.len(), "head processed");
            self.pending.extend(logs.into_iter().map(TailEvent::from));
            return Ok(());
        }

        let rpc = &self.engine.rpc;
        let heads = self.heads.get_or_insert_with(|| rpc.watch_heads());
        match heads.next().await {
            Some(Ok(head)) => {
                if let Some(reorg) = TailEvent::reorg_between(self.previous.as_ref(), &head) {
                    tracing::warn!(
                        old = %head_hash(self.previous.as_ref()),
                        new = %head.hash,
                        height = %head.number,
                        "reorg detected"
                    );
                    self.pending.push_back(reorg);
                }
                self.previous = Some(head.clone());
                self.awaiting_logs = Some(head);
                Ok(())
            }
            Some(Err(e)) => Err(e),
            None => {
                tracing::info!("head stream ended");
                self.phase = Phase::Done;
                self.heads = None;
                Ok(())
            }
        }
    }
}

fn head_hash(head: Option<&Head>) -> &str {
    head.map(|h| h.hash.as_str()).unwrap_or_default()
}
